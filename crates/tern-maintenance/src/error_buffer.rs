//! Route errors waiting for a route to the node they report to

use std::collections::VecDeque;
use std::time::Duration;

use tern_core::{Address, Timestamp};
use tern_wire::RouteError;
use tracing::debug;

use crate::error::{MaintenanceError, MaintenanceResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorBufferEntry {
    pub error: RouteError,
    pub expire: Timestamp,
}

impl ErrorBufferEntry {
    /// Node the error is reported to
    pub fn destination(&self) -> Address {
        self.error.error_destination()
    }
}

/// Bounded, time-boxed FIFO of route errors awaiting discovery
#[derive(Debug)]
pub struct ErrorBuffer {
    entries: VecDeque<ErrorBufferEntry>,
    max_len: usize,
    timeout: Duration,
}

impl ErrorBuffer {
    pub fn new(max_len: usize, timeout: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            max_len: max_len.max(1),
            timeout,
        }
    }

    /// Buffer an error until `now + timeout`
    ///
    /// An identical error already buffered is rejected. When full, the
    /// oldest error is displaced and returned.
    pub fn enqueue(
        &mut self,
        error: RouteError,
        now: Timestamp,
    ) -> MaintenanceResult<Option<RouteError>> {
        if self.entries.iter().any(|e| e.error == error) {
            return Err(MaintenanceError::Duplicate);
        }
        let mut displaced = None;
        if self.entries.len() >= self.max_len {
            displaced = self.entries.pop_front().map(|e| e.error);
            debug!("error buffer full, dropping oldest");
        }
        self.entries.push_back(ErrorBufferEntry {
            error,
            expire: now + self.timeout,
        });
        Ok(displaced)
    }

    /// Remove the oldest error reported to `dst`
    pub fn dequeue(&mut self, dst: Address) -> Option<RouteError> {
        let pos = self.entries.iter().position(|e| e.destination() == dst)?;
        self.entries.remove(pos).map(|e| e.error)
    }

    pub fn find(&self, dst: Address) -> bool {
        self.entries.iter().any(|e| e.destination() == dst)
    }

    /// Remove every error reported to `dst`
    pub fn drop_packet_with_dst(&mut self, dst: Address) -> Vec<RouteError> {
        let (dropped, kept): (Vec<_>, Vec<_>) =
            self.entries.drain(..).partition(|e| e.destination() == dst);
        self.entries = kept.into();
        dropped.into_iter().map(|e| e.error).collect()
    }

    /// Remove expired errors, returning how many were dropped
    pub fn purge(&mut self, now: Timestamp) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| !e.expire.has_passed(now));
        before - self.entries.len()
    }

    /// Distinct error destinations, oldest first
    pub fn destinations(&self) -> Vec<Address> {
        let mut seen = Vec::new();
        for e in &self.entries {
            if !seen.contains(&e.destination()) {
                seen.push(e.destination());
            }
        }
        seen
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Gratuitous route reply suppression
//!
//! A node that overhears a packet it could shorten sends a gratuitous reply
//! to the packet's originator, but at most once per (originator, last hop)
//! pair within the holdoff window.

use std::time::Duration;

use tern_core::{Address, Timestamp};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct GratuitousReply {
    reply_to: Address,
    hop: Address,
    holdoff: Timestamp,
}

/// Bounded table of recently sent gratuitous replies
#[derive(Debug)]
pub struct GratuitousReplyTable {
    entries: Vec<GratuitousReply>,
    capacity: usize,
}

impl GratuitousReplyTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Whether a reply to `reply_to` about `hop` is still held off
    ///
    /// A match has its holdoff pushed out to `now + holdoff`.
    pub fn find_and_update(
        &mut self,
        reply_to: Address,
        hop: Address,
        holdoff: Duration,
        now: Timestamp,
    ) -> bool {
        self.purge(now);
        match self
            .entries
            .iter_mut()
            .find(|e| e.reply_to == reply_to && e.hop == hop)
        {
            Some(entry) => {
                entry.holdoff = now + holdoff;
                true
            }
            None => false,
        }
    }

    /// Record a reply; returns false when the table is full
    pub fn add_entry(
        &mut self,
        reply_to: Address,
        hop: Address,
        holdoff: Duration,
        now: Timestamp,
    ) -> bool {
        self.purge(now);
        if self.entries.len() >= self.capacity {
            trace!(reply_to = %reply_to, "gratuitous reply table full");
            return false;
        }
        self.entries.push(GratuitousReply {
            reply_to,
            hop,
            holdoff: now + holdoff,
        });
        true
    }

    pub fn purge(&mut self, now: Timestamp) {
        self.entries.retain(|e| !e.holdoff.has_passed(now));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

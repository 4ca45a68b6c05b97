//! Packets waiting for a route to their destination

use std::collections::VecDeque;
use std::time::Duration;

use tern_core::{Address, Datagram, Timestamp};
use tracing::debug;

use crate::error::{MaintenanceError, MaintenanceResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendBufferEntry {
    pub datagram: Datagram,
    pub expire: Timestamp,
}

/// Bounded, time-boxed FIFO of originated packets awaiting discovery
#[derive(Debug)]
pub struct SendBuffer {
    entries: VecDeque<SendBufferEntry>,
    max_len: usize,
    timeout: Duration,
}

impl SendBuffer {
    pub fn new(max_len: usize, timeout: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            max_len: max_len.max(1),
            timeout,
        }
    }

    /// Buffer a packet until `now + timeout`
    ///
    /// A packet with the same id and destination as a buffered one is
    /// rejected. When full, the oldest packet is displaced and returned.
    pub fn enqueue(&mut self, datagram: Datagram, now: Timestamp) -> MaintenanceResult<Option<Datagram>> {
        if self
            .entries
            .iter()
            .any(|e| e.datagram.id == datagram.id && e.datagram.destination == datagram.destination)
        {
            return Err(MaintenanceError::Duplicate);
        }
        let mut displaced = None;
        if self.entries.len() >= self.max_len {
            displaced = self.entries.pop_front().map(|e| e.datagram);
            if let Some(old) = &displaced {
                debug!(id = %old.id, dst = %old.destination, "send buffer full, dropping oldest");
            }
        }
        self.entries.push_back(SendBufferEntry {
            datagram,
            expire: now + self.timeout,
        });
        Ok(displaced)
    }

    /// Remove the oldest packet for `dst`
    pub fn dequeue(&mut self, dst: Address) -> Option<Datagram> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.datagram.destination == dst)?;
        self.entries.remove(pos).map(|e| e.datagram)
    }

    pub fn find(&self, dst: Address) -> bool {
        self.entries.iter().any(|e| e.datagram.destination == dst)
    }

    /// Remove every packet for `dst`
    pub fn drop_packet_with_dst(&mut self, dst: Address) -> Vec<Datagram> {
        let mut dropped = Vec::new();
        self.entries.retain(|e| {
            if e.datagram.destination == dst {
                dropped.push(e.datagram.clone());
                false
            } else {
                true
            }
        });
        dropped
    }

    /// Remove expired packets, returning them
    pub fn purge(&mut self, now: Timestamp) -> Vec<Datagram> {
        let mut expired = Vec::new();
        self.entries.retain(|e| {
            if e.expire.has_passed(now) {
                expired.push(e.datagram.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    /// Distinct destinations with buffered packets, oldest first
    pub fn destinations(&self) -> Vec<Address> {
        let mut seen = Vec::new();
        for e in &self.entries {
            if !seen.contains(&e.datagram.destination) {
                seen.push(e.datagram.destination);
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

#[cfg(test)]
mod tests {
    use tern_core::PacketId;

    use super::*;

    fn addr(d: u8) -> Address {
        Address::new(10, 0, 0, d)
    }

    fn datagram(id: u64, dst: u8) -> Datagram {
        Datagram::new(PacketId(id), addr(1), addr(dst), 17, &b"hello"[..])
    }

    #[test]
    fn test_same_packet_buffered_once() {
        let mut buf = SendBuffer::new(8, Duration::from_secs(30));
        assert_eq!(buf.enqueue(datagram(1, 4), Timestamp::ZERO), Ok(None));
        assert_eq!(
            buf.enqueue(datagram(1, 4), Timestamp::ZERO),
            Err(MaintenanceError::Duplicate)
        );
        assert_eq!(
            buf.enqueue(datagram(1, 4), Timestamp::ZERO),
            Err(MaintenanceError::Duplicate)
        );
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.enqueue(datagram(1, 5), Timestamp::ZERO), Ok(None));
    }

    #[test]
    fn test_overflow_displaces_oldest() {
        let mut buf = SendBuffer::new(2, Duration::from_secs(30));
        buf.enqueue(datagram(1, 4), Timestamp::ZERO).unwrap();
        buf.enqueue(datagram(2, 5), Timestamp::ZERO).unwrap();
        let displaced = buf.enqueue(datagram(3, 6), Timestamp::ZERO).unwrap();
        assert_eq!(displaced.map(|d| d.id), Some(PacketId(1)));
        assert_eq!(buf.destinations(), vec![addr(5), addr(6)]);
    }

    #[test]
    fn test_dequeue_and_drop_by_destination() {
        let mut buf = SendBuffer::new(8, Duration::from_secs(30));
        buf.enqueue(datagram(1, 4), Timestamp::ZERO).unwrap();
        buf.enqueue(datagram(2, 5), Timestamp::ZERO).unwrap();
        buf.enqueue(datagram(3, 4), Timestamp::ZERO).unwrap();
        assert_eq!(buf.dequeue(addr(4)).map(|d| d.id), Some(PacketId(1)));
        assert!(buf.find(addr(4)));
        assert_eq!(buf.drop_packet_with_dst(addr(4)).len(), 1);
        assert!(!buf.find(addr(4)));
        assert!(buf.dequeue(addr(4)).is_none());
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_purge_expired() {
        let mut buf = SendBuffer::new(8, Duration::from_secs(30));
        buf.enqueue(datagram(1, 4), Timestamp::ZERO).unwrap();
        buf.enqueue(datagram(2, 4), Timestamp::from_secs(10)).unwrap();
        let expired = buf.purge(Timestamp::from_secs(30));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, PacketId(1));
        assert_eq!(buf.len(), 1);
    }
}

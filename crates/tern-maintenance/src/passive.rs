//! Log of overheard packets used to recognise passive acknowledgments

use std::collections::VecDeque;
use std::time::Duration;

use tern_core::{Address, PacketId, Timestamp};

/// One overheard transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassiveBufferEntry {
    pub id: PacketId,
    pub source: Address,
    pub destination: Address,
    /// Node we heard transmitting
    pub transmitter: Address,
    pub segments_left: u8,
    pub expire: Timestamp,
}

impl PassiveBufferEntry {
    fn same_packet(&self, other: &Self) -> bool {
        self.id == other.id
            && self.source == other.source
            && self.destination == other.destination
            && self.segments_left == other.segments_left
    }
}

#[derive(Debug)]
pub struct PassiveBuffer {
    entries: VecDeque<PassiveBufferEntry>,
    max_len: usize,
    timeout: Duration,
}

impl PassiveBuffer {
    pub fn new(max_len: usize, timeout: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            max_len: max_len.max(1),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record an overheard packet; false if it was already recorded
    pub fn enqueue(&mut self, entry: PassiveBufferEntry, now: Timestamp) -> bool {
        self.purge(now);
        if self.all_equal(&entry) {
            return false;
        }
        if self.entries.len() >= self.max_len {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
        true
    }

    /// Whether the same packet at the same position was overheard
    pub fn all_equal(&self, entry: &PassiveBufferEntry) -> bool {
        self.entries.iter().any(|e| e.same_packet(entry))
    }

    pub fn purge(&mut self, now: Timestamp) {
        self.entries.retain(|e| !e.expire.has_passed(now));
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
    use super::*;

    fn addr(d: u8) -> Address {
        Address::new(10, 0, 0, d)
    }

    fn heard(id: u64, segments_left: u8, expire_secs: u64) -> PassiveBufferEntry {
        PassiveBufferEntry {
            id: PacketId(id),
            source: addr(1),
            destination: addr(9),
            transmitter: addr(3),
            segments_left,
            expire: Timestamp::from_secs(expire_secs),
        }
    }

    #[test]
    fn test_same_overhear_recorded_once() {
        let mut buf = PassiveBuffer::new(4, Duration::from_secs(30));
        assert!(buf.enqueue(heard(1, 2, 30), Timestamp::ZERO));
        assert!(!buf.enqueue(heard(1, 2, 30), Timestamp::ZERO));
        assert!(buf.enqueue(heard(1, 1, 30), Timestamp::ZERO));
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_bounded_and_expiring() {
        let mut buf = PassiveBuffer::new(1, Duration::from_secs(30));
        buf.enqueue(heard(1, 2, 5), Timestamp::ZERO);
        buf.enqueue(heard(2, 2, 30), Timestamp::ZERO);
        assert_eq!(buf.len(), 1);
        assert!(!buf.all_equal(&heard(1, 2, 5)));
        buf.purge(Timestamp::from_secs(30));
        assert!(buf.is_empty());
    }
}

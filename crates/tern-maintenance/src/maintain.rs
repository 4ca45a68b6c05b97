//! Packets awaiting acknowledgment from their next hop

use std::collections::VecDeque;
use std::time::Duration;

use tern_core::{Address, Frame, PacketId, Timestamp};
use tracing::{debug, trace};

use crate::keys::{LinkKey, NetworkKey, PassiveKey};

/// A transmitted packet kept until one of the ack schemes confirms it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintainBufferEntry {
    /// The frame as transmitted, shared with any retransmission
    pub frame: Frame,
    pub our_address: Address,
    pub next_hop: Address,
    /// Originator of the data packet
    pub source: Address,
    /// Final destination of the data packet
    pub destination: Address,
    /// Network-ack id; 0 when no explicit ack was requested
    pub ack_id: u16,
    /// Segments left as transmitted
    pub segments_left: u8,
    pub expire: Timestamp,
}

impl MaintainBufferEntry {
    pub fn network_key(&self) -> NetworkKey {
        NetworkKey {
            ack_id: self.ack_id,
            our_address: self.our_address,
            next_hop: self.next_hop,
            source: self.source,
            destination: self.destination,
        }
    }

    pub fn passive_key(&self) -> PassiveKey {
        PassiveKey {
            source: self.source,
            destination: self.destination,
            segments_left: self.segments_left,
        }
    }

    pub fn link_key(&self) -> LinkKey {
        LinkKey {
            source: self.source,
            destination: self.destination,
            our_address: self.our_address,
            next_hop: self.next_hop,
        }
    }

    fn same_identity(&self, other: &Self) -> bool {
        self.network_key() == other.network_key()
            && self.segments_left == other.segments_left
            && self.frame.ip.id == other.frame.ip.id
    }
}

/// Bounded buffer of packets awaiting acknowledgment
#[derive(Debug)]
pub struct MaintainBuffer {
    entries: VecDeque<MaintainBufferEntry>,
    max_len: usize,
    timeout: Duration,
}

impl MaintainBuffer {
    pub fn new(max_len: usize, timeout: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            max_len: max_len.max(1),
            timeout,
        }
    }

    /// Lifetime given to entries built by the caller
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Buffer a transmitted packet
    ///
    /// Returns false for a packet already buffered. A full buffer drops its
    /// oldest entry. Expired entries stay until [`purge`](Self::purge)
    /// returns them.
    pub fn enqueue(&mut self, entry: MaintainBufferEntry) -> bool {
        if self.all_equal(&entry) {
            trace!(next_hop = %entry.next_hop, ack_id = entry.ack_id, "already awaiting ack");
            return false;
        }
        if self.entries.len() >= self.max_len {
            if let Some(dropped) = self.entries.pop_front() {
                debug!(
                    next_hop = %dropped.next_hop,
                    dst = %dropped.destination,
                    "maintain buffer full, dropping oldest"
                );
            }
        }
        self.entries.push_back(entry);
        true
    }

    /// Remove the oldest packet sent through `next_hop`
    pub fn dequeue_next_hop(&mut self, next_hop: Address) -> Option<MaintainBufferEntry> {
        let pos = self.entries.iter().position(|e| e.next_hop == next_hop)?;
        self.entries.remove(pos)
    }

    pub fn find_next_hop(&self, next_hop: Address) -> bool {
        self.entries.iter().any(|e| e.next_hop == next_hop)
    }

    /// Remove the packet confirmed by a network-layer ack
    pub fn network_equal(&mut self, key: &NetworkKey) -> Option<MaintainBufferEntry> {
        self.take_first(|e| e.network_key() == *key)
    }

    /// Remove the packet confirmed by overhearing its next hop forward it
    ///
    /// Only entries without an explicit ack id match; those are the ones
    /// relying on passive acknowledgment. Packets of one flow share a key,
    /// so the overheard packet id must match as well.
    pub fn promisc_equal(&mut self, key: &PassiveKey, id: PacketId) -> Option<MaintainBufferEntry> {
        self.take_first(|e| e.ack_id == 0 && e.frame.ip.id == id && e.passive_key() == *key)
    }

    /// Remove the packet confirmed by a link-layer ack
    pub fn link_equal(&mut self, key: &LinkKey, id: PacketId) -> Option<MaintainBufferEntry> {
        self.take_first(|e| e.frame.ip.id == id && e.link_key() == *key)
    }

    /// Remove exactly `entry`, leaving other packets of its flow in place
    pub fn remove(&mut self, entry: &MaintainBufferEntry) -> Option<MaintainBufferEntry> {
        self.take_first(|e| e.same_identity(entry))
    }

    /// Whether an entry with the same identity is buffered
    pub fn all_equal(&self, entry: &MaintainBufferEntry) -> bool {
        self.entries.iter().any(|e| e.same_identity(entry))
    }

    /// Drop expired entries, returning them
    pub fn purge(&mut self, now: Timestamp) -> Vec<MaintainBufferEntry> {
        let mut expired = Vec::new();
        self.entries.retain(|e| {
            if e.expire.has_passed(now) {
                expired.push(e.clone());
                false
            } else {
                true
            }
        });
        expired
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn take_first(
        &mut self,
        matches: impl Fn(&MaintainBufferEntry) -> bool,
    ) -> Option<MaintainBufferEntry> {
        let pos = self.entries.iter().position(matches)?;
        self.entries.remove(pos)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tern_core::{DSR_PROTOCOL, IpMeta, PacketId};

    use super::*;

    fn addr(d: u8) -> Address {
        Address::new(10, 0, 0, d)
    }

    fn entry(id: u64, next_hop: u8, ack_id: u16, segments_left: u8) -> MaintainBufferEntry {
        let ip = IpMeta {
            id: PacketId(id),
            source: addr(1),
            destination: addr(next_hop),
            ttl: 64,
            protocol: DSR_PROTOCOL,
        };
        MaintainBufferEntry {
            frame: Frame::new(ip, Bytes::from_static(b"dsr")),
            our_address: addr(1),
            next_hop: addr(next_hop),
            source: addr(1),
            destination: addr(9),
            ack_id,
            segments_left,
            expire: Timestamp::from_secs(30),
        }
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut buf = MaintainBuffer::new(4, Duration::from_secs(30));
        assert!(buf.enqueue(entry(1, 2, 1, 3)));
        assert!(!buf.enqueue(entry(1, 2, 1, 3)));
        assert!(buf.enqueue(entry(2, 2, 2, 3)));
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_full_buffer_drops_oldest() {
        let mut buf = MaintainBuffer::new(2, Duration::from_secs(30));
        buf.enqueue(entry(1, 2, 1, 3));
        buf.enqueue(entry(2, 3, 1, 3));
        buf.enqueue(entry(3, 4, 1, 3));
        assert!(!buf.find_next_hop(addr(2)));
        assert!(buf.find_next_hop(addr(4)));
    }

    #[test]
    fn test_keys_match_exactly_one_entry() {
        let mut buf = MaintainBuffer::new(8, Duration::from_secs(30));
        let a = entry(1, 2, 1, 3);
        let b = entry(2, 2, 2, 3);
        buf.enqueue(a.clone());
        buf.enqueue(b.clone());

        let mut stray = a.network_key();
        stray.ack_id = 7;
        assert!(buf.network_equal(&stray).is_none());
        assert_eq!(buf.len(), 2);

        assert_eq!(buf.network_equal(&b.network_key()), Some(b));
        assert_eq!(buf.len(), 1);
        assert!(buf.link_equal(&a.link_key(), PacketId(9)).is_none());
        assert_eq!(buf.link_equal(&a.link_key(), PacketId(1)), Some(a));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_promisc_ignores_network_ack_entries() {
        let mut buf = MaintainBuffer::new(8, Duration::from_secs(30));
        let explicit = entry(1, 2, 5, 2);
        let passive = entry(2, 2, 0, 2);
        buf.enqueue(explicit.clone());
        assert!(buf.promisc_equal(&explicit.passive_key(), PacketId(1)).is_none());
        buf.enqueue(passive.clone());
        assert_eq!(buf.promisc_equal(&passive.passive_key(), PacketId(2)), Some(passive));
    }

    #[test]
    fn test_same_flow_packets_matched_by_id() {
        let mut buf = MaintainBuffer::new(8, Duration::from_secs(30));
        let first = entry(4, 2, 0, 2);
        let second = entry(5, 2, 0, 2);
        assert_eq!(first.passive_key(), second.passive_key());
        buf.enqueue(first.clone());
        buf.enqueue(second.clone());

        assert_eq!(buf.promisc_equal(&second.passive_key(), PacketId(5)), Some(second.clone()));
        assert!(buf.all_equal(&first));

        buf.enqueue(second.clone());
        assert_eq!(buf.remove(&second), Some(second));
        assert_eq!(buf.link_equal(&first.link_key(), PacketId(4)), Some(first));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_dequeue_next_hop_oldest_first() {
        let mut buf = MaintainBuffer::new(8, Duration::from_secs(30));
        buf.enqueue(entry(1, 2, 1, 3));
        buf.enqueue(entry(2, 3, 1, 3));
        buf.enqueue(entry(3, 2, 2, 3));
        assert_eq!(buf.dequeue_next_hop(addr(2)).unwrap().frame.ip.id, PacketId(1));
        assert_eq!(buf.dequeue_next_hop(addr(2)).unwrap().frame.ip.id, PacketId(3));
        assert!(buf.dequeue_next_hop(addr(2)).is_none());
    }

    #[test]
    fn test_purge_returns_expired() {
        let mut buf = MaintainBuffer::new(8, Duration::from_secs(30));
        buf.enqueue(entry(1, 2, 1, 3));
        assert!(buf.purge(Timestamp::from_secs(29)).is_empty());
        assert_eq!(buf.purge(Timestamp::from_secs(30)).len(), 1);
    }
}

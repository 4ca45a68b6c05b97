//! Egress queues
//!
//! Every frame a node transmits passes through one [`NetworkQueue`] per
//! priority class. The [`PriorityScheduler`] serves the classes round-robin
//! and reports congestion so the node can slow its retransmissions.

use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use tern_core::{Address, Frame, Priority, Timestamp};
use tracing::{debug, trace};

use crate::config::QueueConfig;
use crate::error::{MaintenanceError, MaintenanceResult};

/// Aggregate occupancy above which the queues count as congested
pub const CONGESTION_THRESHOLD: usize = 5;

/// A frame waiting for the medium
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkQueueEntry {
    pub frame: Frame,
    /// Receiver of this hop, or [`Address::BROADCAST`]
    pub next_hop: Address,
    pub inserted_at: Timestamp,
}

impl NetworkQueueEntry {
    pub fn new(frame: Frame, next_hop: Address, inserted_at: Timestamp) -> Self {
        Self {
            frame,
            next_hop,
            inserted_at,
        }
    }
}

/// Bounded FIFO with a maximum residence time
#[derive(Debug)]
pub struct NetworkQueue {
    entries: VecDeque<NetworkQueueEntry>,
    max_size: usize,
    max_delay: Duration,
}

impl NetworkQueue {
    pub fn new(max_size: usize, max_delay: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            max_size,
            max_delay,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Append an entry; false when the queue is full
    ///
    /// Stale entries count toward capacity until [`cleanup`](Self::cleanup)
    /// hands them back to the caller.
    pub fn enqueue(&mut self, entry: NetworkQueueEntry) -> bool {
        if self.entries.len() >= self.max_size {
            trace!(next_hop = %entry.next_hop, "network queue full");
            return false;
        }
        self.entries.push_back(entry);
        true
    }

    pub fn dequeue(&mut self) -> Option<NetworkQueueEntry> {
        self.entries.pop_front()
    }

    /// Drop entries queued for at least `max_delay`, returning them
    pub fn cleanup(&mut self, now: Timestamp) -> Vec<NetworkQueueEntry> {
        let max_delay = self.max_delay;
        let mut stale = Vec::new();
        self.entries.retain(|e| {
            if now.saturating_duration_since(e.inserted_at) >= max_delay {
                stale.push(e.clone());
                false
            } else {
                true
            }
        });
        if !stale.is_empty() {
            debug!(dropped = stale.len(), "discarded stale queued frames");
        }
        stale
    }

    /// Next hops of every queued frame
    pub fn next_hops(&self) -> impl Iterator<Item = Address> + '_ {
        self.entries.iter().map(|e| e.next_hop)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Round-robin scheduler over one queue per priority class
#[derive(Debug)]
pub struct PriorityScheduler {
    queues: Vec<NetworkQueue>,
    cursor: usize,
}

impl PriorityScheduler {
    pub fn new(config: &QueueConfig) -> Self {
        let count = config.num_priority_queues.max(1);
        let queues = (0..count)
            .map(|_| NetworkQueue::new(config.max_network_queue_size, config.max_network_queue_delay))
            .collect();
        Self { queues, cursor: 0 }
    }

    fn index_of(&self, priority: Priority) -> usize {
        priority.index().min(self.queues.len() - 1)
    }

    /// Queue a frame in its class
    pub fn enqueue(
        &mut self,
        priority: Priority,
        entry: NetworkQueueEntry,
    ) -> MaintenanceResult<()> {
        let index = self.index_of(priority);
        let queue = &mut self.queues[index];
        if queue.enqueue(entry) {
            Ok(())
        } else {
            Err(MaintenanceError::QueueFull {
                max: queue.max_size(),
            })
        }
    }

    /// Next frame to transmit
    ///
    /// Classes take turns, starting from the one after the class served
    /// last; empty classes are skipped.
    pub fn dequeue(&mut self) -> Option<(Priority, NetworkQueueEntry)> {
        let count = self.queues.len();
        for offset in 0..count {
            let index = (self.cursor + offset) % count;
            if let Some(entry) = self.queues[index].dequeue() {
                self.cursor = (index + 1) % count;
                let priority = if index == 0 {
                    Priority::Control
                } else {
                    Priority::Data
                };
                return Some((priority, entry));
            }
        }
        None
    }

    /// Drop stale frames from every class
    pub fn cleanup(&mut self, now: Timestamp) -> Vec<NetworkQueueEntry> {
        self.queues
            .iter_mut()
            .flat_map(|q| q.cleanup(now))
            .collect()
    }

    pub fn total_len(&self) -> usize {
        self.queues.iter().map(NetworkQueue::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.total_len() == 0
    }

    pub fn is_congested(&self) -> bool {
        self.total_len() > CONGESTION_THRESHOLD
    }

    /// Next hops of queued data frames
    pub fn data_next_hops(&self) -> BTreeSet<Address> {
        self.queues
            .iter()
            .skip(Priority::Data.index())
            .flat_map(NetworkQueue::next_hops)
            .collect()
    }

    pub fn queue_len(&self, priority: Priority) -> usize {
        self.queues[self.index_of(priority)].len()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tern_core::{IpMeta, PacketId};

    use super::*;

    fn addr(d: u8) -> Address {
        Address::new(10, 0, 0, d)
    }

    fn entry(id: u64, next_hop: u8, at_ms: u64) -> NetworkQueueEntry {
        let ip = IpMeta {
            id: PacketId(id),
            source: addr(1),
            destination: addr(next_hop),
            ttl: 64,
            protocol: 48,
        };
        NetworkQueueEntry::new(
            Frame::new(ip, Bytes::from_static(b"frame")),
            addr(next_hop),
            Timestamp::from_millis(at_ms),
        )
    }

    #[test]
    fn test_capacity_enforced() {
        let mut q = NetworkQueue::new(1, Duration::from_secs(30));
        assert!(q.enqueue(entry(1, 2, 0)));
        assert!(!q.enqueue(entry(2, 2, 0)));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn test_stale_frames_cleaned() {
        let mut q = NetworkQueue::new(4, Duration::from_millis(100));
        q.enqueue(entry(1, 2, 0));
        q.enqueue(entry(2, 2, 50));
        let stale = q.cleanup(Timestamp::from_millis(100));
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].frame.ip.id, PacketId(1));
        assert_eq!(q.dequeue().unwrap().frame.ip.id, PacketId(2));
    }

    #[test]
    fn test_stale_frames_left_for_cleanup() {
        let mut q = NetworkQueue::new(1, Duration::from_millis(100));
        q.enqueue(entry(1, 2, 0));
        assert!(!q.enqueue(entry(2, 2, 200)));
        assert_eq!(q.len(), 1);
        assert_eq!(q.cleanup(Timestamp::from_millis(200)).len(), 1);
        assert!(q.enqueue(entry(2, 2, 200)));
    }

    #[test]
    fn test_round_robin_between_classes() {
        let mut s = PriorityScheduler::new(&QueueConfig::default());
        s.enqueue(Priority::Data, entry(1, 2, 0)).unwrap();
        s.enqueue(Priority::Data, entry(2, 2, 0)).unwrap();
        s.enqueue(Priority::Control, entry(3, 2, 0)).unwrap();
        s.enqueue(Priority::Control, entry(4, 2, 0)).unwrap();

        let order: Vec<u64> = std::iter::from_fn(|| s.dequeue())
            .map(|(_, e)| e.frame.ip.id.0)
            .collect();
        assert_eq!(order, vec![3, 1, 4, 2]);
    }

    #[test]
    fn test_full_class_reports_capacity() {
        let mut s = PriorityScheduler::new(&QueueConfig {
            max_network_queue_size: 1,
            ..Default::default()
        });
        s.enqueue(Priority::Data, entry(1, 2, 0)).unwrap();
        assert_eq!(
            s.enqueue(Priority::Data, entry(2, 2, 0)),
            Err(MaintenanceError::QueueFull { max: 1 })
        );
        assert!(s.enqueue(Priority::Control, entry(3, 2, 0)).is_ok());
    }

    #[test]
    fn test_congestion_and_data_next_hops() {
        let mut s = PriorityScheduler::new(&QueueConfig::default());
        for id in 0..5 {
            s.enqueue(Priority::Data, entry(id, 2 + (id % 2) as u8, 0)).unwrap();
        }
        assert!(!s.is_congested());
        s.enqueue(Priority::Control, entry(9, 7, 0)).unwrap();
        assert!(s.is_congested());
        assert_eq!(
            s.data_next_hops().into_iter().collect::<Vec<_>>(),
            vec![addr(2), addr(3)]
        );
    }

    #[test]
    fn test_single_class_serves_everything() {
        let mut s = PriorityScheduler::new(&QueueConfig {
            num_priority_queues: 1,
            ..Default::default()
        });
        s.enqueue(Priority::Data, entry(1, 2, 0)).unwrap();
        s.enqueue(Priority::Control, entry(2, 2, 0)).unwrap();
        assert_eq!(s.queue_len(Priority::Control), 2);
        assert_eq!(s.total_len(), 2);
    }
}

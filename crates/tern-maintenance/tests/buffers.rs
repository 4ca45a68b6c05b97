//! # Buffer and Timer Tests
//!
//! Cross-structure behavior of the maintenance layer:
//! - duplicate suppression in the send buffer
//! - network queue capacity and residence-time cleanup
//! - cancelling a timer for any ack scheme is a no-op when nothing is armed
//!   and never touches an unrelated buffer entry

use std::time::Duration;

use bytes::Bytes;
use tern_core::{
    Address, DSR_PROTOCOL, Datagram, Frame, IpMeta, PacketId, Priority, Timestamp,
};
use tern_maintenance::{
    LinkKey, MaintainBuffer, MaintainBufferEntry, MaintenanceError, NetworkKey, NetworkQueue,
    NetworkQueueEntry, PassiveKey, PriorityScheduler, QueueConfig, RetryScheduler, SendBuffer,
};

fn addr(d: u8) -> Address {
    Address::new(10, 0, 0, d)
}

fn frame(id: u64) -> Frame {
    let ip = IpMeta {
        id: PacketId(id),
        source: addr(1),
        destination: addr(2),
        ttl: 64,
        protocol: DSR_PROTOCOL,
    };
    Frame::new(ip, Bytes::from_static(b"dsr-frame"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum AckTimer {
    Network(NetworkKey),
    Passive(PassiveKey),
    Link(LinkKey),
}

fn maintained(id: u64, ack_id: u16) -> MaintainBufferEntry {
    MaintainBufferEntry {
        frame: frame(id),
        our_address: addr(1),
        next_hop: addr(2),
        source: addr(1),
        destination: addr(4),
        ack_id,
        segments_left: 2,
        expire: Timestamp::from_secs(30),
    }
}

#[test]
fn test_identical_sends_buffered_once() {
    let mut buffer = SendBuffer::new(64, Duration::from_secs(30));
    let datagram = Datagram::new(PacketId(7), addr(1), addr(4), 17, Bytes::from_static(b"x"));
    let results: Vec<_> = (0..3)
        .map(|_| buffer.enqueue(datagram.clone(), Timestamp::ZERO))
        .collect();
    assert_eq!(results[0], Ok(None));
    assert_eq!(results[1], Err(MaintenanceError::Duplicate));
    assert_eq!(results[2], Err(MaintenanceError::Duplicate));
    assert_eq!(buffer.len(), 1);
}

#[test]
fn test_queue_of_one_rejects_then_cleans_up() {
    let max_delay = Duration::from_millis(500);
    let mut queue = NetworkQueue::new(1, max_delay);
    let now = Timestamp::ZERO;
    assert!(queue.enqueue(NetworkQueueEntry::new(frame(1), addr(2), now)));
    assert!(!queue.enqueue(NetworkQueueEntry::new(frame(2), addr(2), now)));

    let later = now + max_delay;
    let stale = queue.cleanup(later);
    assert_eq!(stale.len(), 1);
    assert!(queue.is_empty());
}

#[test]
fn test_scheduler_accepts_after_stale_frames_cleaned() {
    let config = QueueConfig {
        max_network_queue_size: 1,
        max_network_queue_delay: Duration::from_millis(500),
        num_priority_queues: 2,
    };
    let mut scheduler = PriorityScheduler::new(&config);
    let now = Timestamp::ZERO;
    scheduler
        .enqueue(Priority::Data, NetworkQueueEntry::new(frame(1), addr(2), now))
        .unwrap();
    let later = Timestamp::from_millis(600);
    let next = || NetworkQueueEntry::new(frame(2), addr(2), later);
    assert!(scheduler.enqueue(Priority::Data, next()).is_err());

    let stale = scheduler.cleanup(later);
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].frame.ip.id, PacketId(1));
    assert!(scheduler.enqueue(Priority::Data, next()).is_ok());
    assert_eq!(scheduler.total_len(), 1);
}

#[test]
fn test_cancel_without_timer_is_harmless() {
    let mut timers: RetryScheduler<AckTimer, u32> = RetryScheduler::new();
    let mut buffer = MaintainBuffer::new(8, Duration::from_secs(30));
    let kept = maintained(1, 1);
    buffer.enqueue(kept.clone());

    let other = maintained(2, 2);
    for key in [
        AckTimer::Network(other.network_key()),
        AckTimer::Passive(PassiveKey {
            segments_left: 9,
            ..other.passive_key()
        }),
        AckTimer::Link(LinkKey {
            next_hop: addr(7),
            ..other.link_key()
        }),
    ] {
        assert_eq!(timers.cancel(&key), None);
    }
    assert!(buffer.network_equal(&other.network_key()).is_none());
    assert!(
        buffer
            .link_equal(
                &LinkKey {
                    next_hop: addr(7),
                    ..other.link_key()
                },
                other.frame.ip.id,
            )
            .is_none()
    );
    assert_eq!(buffer.len(), 1);
    assert!(buffer.all_equal(&kept));
}

#[test]
fn test_one_timer_per_key_across_schemes() {
    let mut timers: RetryScheduler<AckTimer, u32> = RetryScheduler::new();
    let entry = maintained(1, 1);
    let network = AckTimer::Network(entry.network_key());
    let link = AckTimer::Link(entry.link_key());

    timers.arm(network, Timestamp::from_millis(40), 0);
    timers.arm(network, Timestamp::from_millis(80), 1);
    timers.arm(link, Timestamp::from_millis(100), 0);
    assert_eq!(timers.len(), 2);

    assert_eq!(timers.pop_expired(Timestamp::from_millis(60)), None);
    assert_eq!(
        timers.pop_expired(Timestamp::from_millis(100)),
        Some((network, 1))
    );
    assert_eq!(timers.pop_expired(Timestamp::from_millis(100)), Some((link, 0)));
}

//! Keyed timer wheel for retries and deferred work
//!
//! Every armed timer is identified by a key and at most one timer per key
//! exists: arming an armed key replaces it. Cancelled and replaced timers
//! stay in the heap and are skipped lazily when they surface, recognised by
//! a sequence number that no longer matches the armed one.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::hash::Hash;
use std::time::Duration;

use tern_core::Timestamp;

#[derive(Debug)]
struct Scheduled<K> {
    deadline: Timestamp,
    seq: u64,
    key: K,
}

// Reversed so the max-heap yields the earliest deadline, then the lowest
// sequence number.
impl<K> PartialEq for Scheduled<K> {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl<K> Eq for Scheduled<K> {}

impl<K> PartialOrd for Scheduled<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Scheduled<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        match other.deadline.cmp(&self.deadline) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

#[derive(Debug)]
struct Armed<P> {
    deadline: Timestamp,
    seq: u64,
    payload: P,
}

/// Timers keyed by `K` carrying a payload `P`
#[derive(Debug)]
pub struct RetryScheduler<K, P> {
    heap: BinaryHeap<Scheduled<K>>,
    armed: HashMap<K, Armed<P>>,
    next_seq: u64,
}

impl<K, P> Default for RetryScheduler<K, P>
where
    K: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, P> RetryScheduler<K, P>
where
    K: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            armed: HashMap::new(),
            next_seq: 0,
        }
    }

    fn push(&mut self, key: K, deadline: Timestamp) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Scheduled { deadline, seq, key });
        seq
    }

    /// Arm `key` to fire at `deadline`, replacing any timer it had
    ///
    /// Returns the payload of the replaced timer.
    pub fn arm(&mut self, key: K, deadline: Timestamp, payload: P) -> Option<P> {
        let seq = self.push(key.clone(), deadline);
        self.armed
            .insert(
                key,
                Armed {
                    deadline,
                    seq,
                    payload,
                },
            )
            .map(|old| old.payload)
    }

    /// Disarm `key`; a no-op returning `None` when nothing was armed
    pub fn cancel(&mut self, key: &K) -> Option<P> {
        self.armed.remove(key).map(|armed| armed.payload)
    }

    /// Move an armed timer to a new deadline, keeping its payload
    pub fn rearm(&mut self, key: &K, deadline: Timestamp) -> bool {
        if !self.armed.contains_key(key) {
            return false;
        }
        let seq = self.push(key.clone(), deadline);
        if let Some(armed) = self.armed.get_mut(key) {
            armed.deadline = deadline;
            armed.seq = seq;
        }
        true
    }

    /// Push an armed timer's deadline back by `by`
    pub fn extend(&mut self, key: &K, by: Duration) -> bool {
        match self.deadline(key) {
            Some(deadline) => self.rearm(key, deadline + by),
            None => false,
        }
    }

    pub fn is_armed(&self, key: &K) -> bool {
        self.armed.contains_key(key)
    }

    pub fn deadline(&self, key: &K) -> Option<Timestamp> {
        self.armed.get(key).map(|armed| armed.deadline)
    }

    pub fn payload(&self, key: &K) -> Option<&P> {
        self.armed.get(key).map(|armed| &armed.payload)
    }

    pub fn payload_mut(&mut self, key: &K) -> Option<&mut P> {
        self.armed.get_mut(key).map(|armed| &mut armed.payload)
    }

    /// Armed keys in no particular order
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.armed.keys()
    }

    fn discard_stale(&mut self) {
        while let Some(top) = self.heap.peek() {
            let live = self
                .armed
                .get(&top.key)
                .is_some_and(|armed| armed.seq == top.seq);
            if live {
                break;
            }
            self.heap.pop();
        }
    }

    /// Earliest armed deadline
    pub fn next_deadline(&mut self) -> Option<Timestamp> {
        self.discard_stale();
        self.heap.peek().map(|top| top.deadline)
    }

    /// Disarm and return the earliest timer due at or before `now`
    ///
    /// Timers with equal deadlines fire in the order they were armed.
    pub fn pop_expired(&mut self, now: Timestamp) -> Option<(K, P)> {
        self.discard_stale();
        let top = self.heap.peek()?;
        if top.deadline > now {
            return None;
        }
        let top = self.heap.pop()?;
        let armed = self.armed.remove(&top.key)?;
        Some((top.key, armed.payload))
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

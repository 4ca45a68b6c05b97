//! Route request bookkeeping
//!
//! Tracks, per destination, how many discovery attempts have been made and
//! which request id to use next; per originator, which requests were
//! already seen; and which neighbors are suspected to be unidirectional.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tern_core::{Address, Timestamp};
use tracing::{debug, trace};

use crate::config::RequestTableConfig;

#[derive(Debug, Clone, Copy)]
struct DiscoveryEntry {
    request_count: u32,
    last_update: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SeenRequest {
    target: Address,
    id: u16,
    expire: Timestamp,
}

/// A neighbor suspected of having a unidirectional link to us
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub neighbor: Address,
    pub expire: Timestamp,
}

/// Route request table for one node
#[derive(Debug)]
pub struct RequestTable {
    config: RequestTableConfig,
    discoveries: BTreeMap<Address, DiscoveryEntry>,
    request_ids: BTreeMap<Address, u16>,
    seen: BTreeMap<Address, VecDeque<SeenRequest>>,
    blacklist: BTreeMap<Address, Timestamp>,
}

impl RequestTable {
    pub fn new(config: RequestTableConfig) -> Self {
        Self {
            config,
            discoveries: BTreeMap::new(),
            request_ids: BTreeMap::new(),
            seen: BTreeMap::new(),
            blacklist: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &RequestTableConfig {
        &self.config
    }

    /// Count one more discovery attempt for `dst`
    ///
    /// When the table is full, the destination updated longest ago makes
    /// room.
    pub fn find_and_update(&mut self, dst: Address, now: Timestamp) -> u32 {
        if !self.discoveries.contains_key(&dst)
            && self.discoveries.len() >= self.config.request_table_size.max(1)
        {
            let oldest = self
                .discoveries
                .iter()
                .min_by_key(|(_, e)| e.last_update)
                .map(|(d, _)| *d);
            if let Some(victim) = oldest {
                debug!(dst = %victim, "request table full, evicting destination");
                self.discoveries.remove(&victim);
            }
        }
        let entry = self.discoveries.entry(dst).or_insert(DiscoveryEntry {
            request_count: 0,
            last_update: now,
        });
        entry.request_count += 1;
        entry.last_update = now;
        entry.request_count
    }

    /// Discovery attempts made so far for `dst`
    pub fn rreq_count(&self, dst: Address) -> u32 {
        self.discoveries
            .get(&dst)
            .map(|e| e.request_count)
            .unwrap_or(0)
    }

    pub fn remove_entry(&mut self, dst: Address) -> bool {
        self.discoveries.remove(&dst).is_some()
    }

    pub fn len(&self) -> usize {
        self.discoveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.discoveries.is_empty()
    }

    /// Request id for the next discovery toward `dst`
    ///
    /// Starts at 0 and increases by one per call until it reaches
    /// `unique_request_id_size`, after which it starts again at 0.
    pub fn check_unique_rreq_id(&mut self, dst: Address) -> u16 {
        let max = self.config.unique_request_id_size;
        match self.request_ids.get_mut(&dst) {
            None => {
                self.request_ids.insert(dst, 0);
                0
            }
            Some(id) if *id >= max => {
                *id = 0;
                0
            }
            Some(id) => {
                *id += 1;
                *id
            }
        }
    }

    /// Whether the request `(source, target, id)` was already seen
    ///
    /// Unseen requests are recorded. Each originator keeps a bounded window
    /// of recent requests, oldest dropped first.
    pub fn find_source_duplicate(
        &mut self,
        source: Address,
        target: Address,
        id: u16,
        now: Timestamp,
    ) -> bool {
        let window = self.config.request_id_size.max(1);
        let history = self.seen.entry(source).or_default();
        history.retain(|r| !r.expire.has_passed(now));

        if history.iter().any(|r| r.target == target && r.id == id) {
            trace!(source = %source, target = %target, id, "duplicate route request");
            return true;
        }
        if history.len() >= window {
            history.pop_front();
        }
        history.push_back(SeenRequest {
            target,
            id,
            expire: now + self.config.source_history_timeout,
        });
        false
    }

    /// Blacklist `neighbor` for the configured timeout
    pub fn mark_unidirectional(&mut self, neighbor: Address, now: Timestamp) {
        let expire = now + self.config.blacklist_timeout;
        debug!(neighbor = %neighbor, "marking link unidirectional");
        self.blacklist.insert(neighbor, expire);
    }

    pub fn find_unidirectional(&self, neighbor: Address, now: Timestamp) -> Option<BlacklistEntry> {
        self.blacklist
            .get(&neighbor)
            .filter(|expire| !expire.has_passed(now))
            .map(|expire| BlacklistEntry {
                neighbor,
                expire: *expire,
            })
    }

    /// Drop expired blacklist entries and request history
    pub fn purge(&mut self, now: Timestamp) {
        self.blacklist.retain(|_, expire| !expire.has_passed(now));
        self.seen.retain(|_, history| {
            history.retain(|r| !r.expire.has_passed(now));
            !history.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn addr(d: u8) -> Address {
        Address::new(10, 0, 0, d)
    }

    fn table() -> RequestTable {
        RequestTable::new(RequestTableConfig {
            request_table_size: 2,
            request_id_size: 2,
            unique_request_id_size: 3,
            ..Default::default()
        })
    }

    #[test]
    fn test_find_and_update_counts() {
        let mut t = table();
        assert_eq!(t.rreq_count(addr(5)), 0);
        assert_eq!(t.find_and_update(addr(5), Timestamp::ZERO), 1);
        assert_eq!(t.find_and_update(addr(5), Timestamp::ZERO), 2);
        assert_eq!(t.rreq_count(addr(5)), 2);
        assert!(t.remove_entry(addr(5)));
        assert_eq!(t.rreq_count(addr(5)), 0);
    }

    #[test]
    fn test_full_table_evicts_least_recent() {
        let mut t = table();
        t.find_and_update(addr(5), Timestamp::from_secs(1));
        t.find_and_update(addr(6), Timestamp::from_secs(2));
        t.find_and_update(addr(5), Timestamp::from_secs(3));
        t.find_and_update(addr(7), Timestamp::from_secs(4));
        assert_eq!(t.len(), 2);
        assert_eq!(t.rreq_count(addr(6)), 0);
        assert_eq!(t.rreq_count(addr(5)), 2);
    }

    #[test]
    fn test_unique_id_wraps() {
        let mut t = table();
        let ids: Vec<u16> = (0..6).map(|_| t.check_unique_rreq_id(addr(5))).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 0, 1]);
        assert_eq!(t.check_unique_rreq_id(addr(6)), 0);
    }

    #[test]
    fn test_source_duplicate_window() {
        let mut t = table();
        let now = Timestamp::ZERO;
        assert!(!t.find_source_duplicate(addr(1), addr(9), 0, now));
        assert!(t.find_source_duplicate(addr(1), addr(9), 0, now));
        assert!(!t.find_source_duplicate(addr(2), addr(9), 0, now));
        assert!(!t.find_source_duplicate(addr(1), addr(9), 1, now));
        assert!(!t.find_source_duplicate(addr(1), addr(9), 2, now));
        // window of two: id 0 fell out
        assert!(!t.find_source_duplicate(addr(1), addr(9), 0, now));
    }

    #[test]
    fn test_source_history_expires() {
        let mut t = table();
        assert!(!t.find_source_duplicate(addr(1), addr(9), 4, Timestamp::ZERO));
        let later = Timestamp::ZERO + Duration::from_secs(10);
        assert!(!t.find_source_duplicate(addr(1), addr(9), 4, later));
    }

    #[test]
    fn test_blacklist_expires() {
        let mut t = table();
        t.mark_unidirectional(addr(3), Timestamp::ZERO);
        let entry = t.find_unidirectional(addr(3), Timestamp::from_secs(2)).unwrap();
        assert_eq!(entry.expire, Timestamp::from_secs(3));
        assert!(t.find_unidirectional(addr(3), Timestamp::from_secs(3)).is_none());
        t.purge(Timestamp::from_secs(3));
        assert!(t.find_unidirectional(addr(4), Timestamp::ZERO).is_none());
    }
}

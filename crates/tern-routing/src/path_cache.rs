//! Path-mode route cache
//!
//! Keeps up to `max_entries_each_dst` explicit paths per destination,
//! sorted so the preferred path is always at the front.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::time::Duration;

use tern_core::{Address, Timestamp};
use tracing::{debug, trace};

use crate::config::{PathOrdering, RouteCacheConfig};
use crate::route::RouteCacheEntry;

#[derive(Debug)]
pub(crate) struct PathCache {
    routes: BTreeMap<Address, Vec<RouteCacheEntry>>,
    max_cache_len: usize,
    max_entries_each_dst: usize,
    ordering: PathOrdering,
    sub_route: bool,
}

impl PathCache {
    pub(crate) fn new(config: &RouteCacheConfig) -> Self {
        Self {
            routes: BTreeMap::new(),
            max_cache_len: config.max_cache_len,
            max_entries_each_dst: config.max_entries_each_dst.max(1),
            ordering: config.path_ordering,
            sub_route: config.enable_sub_route,
        }
    }

    fn compare(ordering: PathOrdering, a: &RouteCacheEntry, b: &RouteCacheEntry) -> Ordering {
        let by_expire = b.expire().cmp(&a.expire());
        match ordering {
            PathOrdering::Expire => by_expire,
            PathOrdering::ExpireThenHops => by_expire.then(a.hops().cmp(&b.hops())),
        }
    }

    fn sort(ordering: PathOrdering, list: &mut [RouteCacheEntry]) {
        list.sort_by(|a, b| Self::compare(ordering, a, b));
    }

    /// Remove expired paths and destinations left without any
    pub(crate) fn purge(&mut self, now: Timestamp) {
        self.routes.retain(|dst, list| {
            list.retain(|entry| !entry.is_expired(now));
            if list.is_empty() {
                trace!(dst = %dst, "path cache destination expired");
            }
            !list.is_empty()
        });
    }

    /// Best path to `dst`, synthesizing one from a longer path if needed
    ///
    /// When no path ends at `dst`, the first cached path that passes through
    /// it is truncated there and stored as a new entry for `dst`.
    pub(crate) fn lookup(&mut self, dst: Address, now: Timestamp) -> Option<RouteCacheEntry> {
        self.purge(now);
        if let Some(list) = self.routes.get(&dst) {
            return list.first().cloned();
        }

        let synthesized = self.routes.values().flatten().find_map(|entry| {
            let pos = entry.path().iter().position(|a| *a == dst)?;
            let truncated = &entry.path()[..=pos];
            if truncated.len() > 1 && truncated.len() < entry.path().len() {
                RouteCacheEntry::new(truncated.to_vec(), entry.expire()).ok()
            } else {
                None
            }
        })?;

        debug!(dst = %dst, hops = synthesized.hops(), "synthesized sub-route");
        self.routes.insert(dst, vec![synthesized.clone()]);
        Some(synthesized)
    }

    /// Insert a path, refreshing it if already cached
    pub(crate) fn add(&mut self, entry: RouteCacheEntry, now: Timestamp) -> bool {
        self.purge(now);
        if entry.is_expired(now) {
            return false;
        }
        let dst = entry.destination();

        if !self.routes.contains_key(&dst) && self.routes.len() >= self.max_cache_len {
            self.evict_shortest_lived();
        }

        let ordering = self.ordering;
        let max_entries = self.max_entries_each_dst;
        let list = self.routes.entry(dst).or_default();

        if let Some(existing) = list.iter_mut().find(|e| **e == entry) {
            if entry.expire() > existing.expire() {
                existing.set_expire(entry.expire());
            }
            Self::sort(ordering, list);
            trace!(dst = %dst, "refreshed cached path");
            return true;
        }

        if list.len() >= max_entries {
            list.pop();
        }
        list.push(entry);
        Self::sort(ordering, list);
        debug!(dst = %dst, paths = list.len(), "cached new path");
        true
    }

    fn evict_shortest_lived(&mut self) {
        let victim = self
            .routes
            .iter()
            .min_by_key(|(_, list)| list.first().map(|e| e.expire()))
            .map(|(dst, _)| *dst);
        if let Some(dst) = victim {
            debug!(dst = %dst, "path cache full, evicting destination");
            self.routes.remove(&dst);
        }
    }

    /// Refresh the front path to `dst` after a successful delivery
    pub(crate) fn update_entry(&mut self, dst: Address, timeout: Duration, now: Timestamp) -> bool {
        let ordering = self.ordering;
        let Some(list) = self.routes.get_mut(&dst) else {
            return false;
        };
        if list.is_empty() {
            return false;
        }
        let mut front = list.remove(0);
        front.set_expire(now + timeout);
        list.push(front);
        Self::sort(ordering, list);
        true
    }

    pub(crate) fn delete(&mut self, dst: Address, now: Timestamp) -> bool {
        self.purge(now);
        self.routes.remove(&dst).is_some()
    }

    /// Cut every path using the link `error_source -> unreachable`
    ///
    /// With sub-routes enabled the prefix up to `error_source` is kept as a
    /// route to `error_source`, otherwise the whole path is dropped.
    pub(crate) fn delete_link(&mut self, error_source: Address, unreachable: Address, now: Timestamp) {
        self.purge(now);
        let sub_route = self.sub_route;
        let mut salvaged = Vec::new();

        for list in self.routes.values_mut() {
            list.retain(|entry| {
                let broken = entry
                    .path()
                    .windows(2)
                    .position(|w| w[0] == error_source && w[1] == unreachable);
                let Some(pos) = broken else {
                    return true;
                };
                let prefix = &entry.path()[..=pos];
                if sub_route && prefix.len() > 1 {
                    if let Ok(sub) = RouteCacheEntry::new(prefix.to_vec(), entry.expire()) {
                        salvaged.push(sub);
                    }
                }
                false
            });
        }
        self.routes.retain(|_, list| !list.is_empty());

        for sub in salvaged {
            self.add(sub, now);
        }
        debug!(
            error_source = %error_source,
            unreachable = %unreachable,
            "removed paths over broken link"
        );
    }

    /// Every cached path to `dst`, preferred first
    pub(crate) fn paths_to(&self, dst: Address) -> Vec<RouteCacheEntry> {
        self.routes.get(&dst).cloned().unwrap_or_default()
    }

    pub(crate) fn len(&self) -> usize {
        self.routes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(d: u8) -> Address {
        Address::new(10, 0, 0, d)
    }

    fn entry(ds: &[u8], expire_secs: u64) -> RouteCacheEntry {
        let path = ds.iter().map(|d| addr(*d)).collect();
        RouteCacheEntry::new(path, Timestamp::from_secs(expire_secs)).unwrap()
    }

    fn cache() -> PathCache {
        PathCache::new(&RouteCacheConfig {
            max_entries_each_dst: 3,
            ..Default::default()
        })
    }

    #[test]
    fn test_front_is_longest_lived() {
        let mut c = cache();
        let now = Timestamp::ZERO;
        assert!(c.add(entry(&[1, 2, 4], 10), now));
        assert!(c.add(entry(&[1, 3, 4], 50), now));
        assert!(c.add(entry(&[1, 5, 6, 4], 30), now));
        let best = c.lookup(addr(4), now).unwrap();
        assert_eq!(best.path(), &[addr(1), addr(3), addr(4)]);
    }

    #[test]
    fn test_entries_per_destination_bounded() {
        let mut c = cache();
        let now = Timestamp::ZERO;
        for (i, mid) in [2u8, 3, 5, 6, 7].into_iter().enumerate() {
            c.add(entry(&[1, mid, 4], 10 + i as u64), now);
            assert!(c.paths_to(addr(4)).len() <= 3);
        }
        let paths = c.paths_to(addr(4));
        assert_eq!(paths.len(), 3);
        assert_eq!(paths[0].path()[1], addr(7));
    }

    #[test]
    fn test_same_path_refreshes_expiry() {
        let mut c = cache();
        let now = Timestamp::ZERO;
        c.add(entry(&[1, 2, 4], 10), now);
        c.add(entry(&[1, 2, 4], 40), now);
        c.add(entry(&[1, 2, 4], 20), now);
        let paths = c.paths_to(addr(4));
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].expire(), Timestamp::from_secs(40));
    }

    #[test]
    fn test_lookup_synthesizes_intermediate_route() {
        let mut c = cache();
        let now = Timestamp::ZERO;
        c.add(entry(&[1, 2], 1), now);
        c.add(entry(&[1, 3, 4], 5), now);

        let sub = c.lookup(addr(3), now).unwrap();
        assert_eq!(sub.path(), &[addr(1), addr(3)]);
        assert_eq!(sub.expire(), Timestamp::from_secs(5));
        assert_eq!(c.paths_to(addr(3)).len(), 1);
        assert!(c.lookup(addr(9), now).is_none());
    }

    #[test]
    fn test_expired_paths_purged() {
        let mut c = cache();
        c.add(entry(&[1, 2], 1), Timestamp::ZERO);
        assert!(c.lookup(addr(2), Timestamp::from_millis(999)).is_some());
        assert!(c.lookup(addr(2), Timestamp::from_secs(1)).is_none());
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn test_update_entry_extends_front() {
        let mut c = cache();
        let now = Timestamp::from_secs(1);
        c.add(entry(&[1, 2, 4], 10), now);
        c.add(entry(&[1, 3, 4], 20), now);
        assert!(c.update_entry(addr(4), Duration::from_secs(100), now));
        let best = c.lookup(addr(4), now).unwrap();
        assert_eq!(best.path()[1], addr(3));
        assert_eq!(best.expire(), Timestamp::from_secs(101));
        assert!(!c.update_entry(addr(9), Duration::from_secs(1), now));
    }

    #[test]
    fn test_delete_link_keeps_prefix_as_sub_route() {
        let mut c = cache();
        let now = Timestamp::ZERO;
        c.add(entry(&[1, 2, 3, 4], 10), now);
        c.add(entry(&[1, 5, 4], 5), now);
        c.delete_link(addr(2), addr(3), now);

        let remaining = c.paths_to(addr(4));
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].path()[1], addr(5));
        assert_eq!(c.paths_to(addr(2))[0].path(), &[addr(1), addr(2)]);
    }

    #[test]
    fn test_delete_link_without_sub_routes() {
        let mut c = PathCache::new(&RouteCacheConfig {
            enable_sub_route: false,
            ..Default::default()
        });
        let now = Timestamp::ZERO;
        c.add(entry(&[1, 2, 3], 10), now);
        c.delete_link(addr(2), addr(3), now);
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn test_delete_missing_destination() {
        let mut c = cache();
        assert!(!c.delete(addr(4), Timestamp::ZERO));
        c.add(entry(&[1, 4], 10), Timestamp::ZERO);
        assert!(c.delete(addr(4), Timestamp::ZERO));
    }

    #[test]
    fn test_hop_tie_break() {
        let mut c = PathCache::new(&RouteCacheConfig {
            path_ordering: PathOrdering::ExpireThenHops,
            ..Default::default()
        });
        let now = Timestamp::ZERO;
        c.add(entry(&[1, 2, 3, 4], 10), now);
        c.add(entry(&[1, 5, 4], 10), now);
        assert_eq!(c.lookup(addr(4), now).unwrap().hops(), 2);
    }
}

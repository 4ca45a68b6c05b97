//! Route cache facade
//!
//! [`RouteCache`] hides whether routes are stored as explicit paths or as a
//! link graph, and carries the per-node state that lives next to the cache
//! in DSR: the neighbor table and the per-next-hop ack id counters.

use std::collections::BTreeMap;

use tern_core::{Address, MacAddress, Timestamp};
use tracing::{debug, instrument, trace};

use crate::config::{CacheType, RouteCacheConfig};
use crate::link_cache::{Link, LinkCache};
use crate::neighbor::NeighborTable;
use crate::path_cache::PathCache;
use crate::route::RouteCacheEntry;

#[derive(Debug)]
enum CacheMode {
    Path(PathCache),
    Link(LinkCache),
}

/// Route cache for one node
#[derive(Debug)]
pub struct RouteCache {
    own: Address,
    config: RouteCacheConfig,
    mode: CacheMode,
    neighbors: NeighborTable,
    ack_ids: BTreeMap<Address, u16>,
}

impl RouteCache {
    /// Create an empty cache for the node at `own`
    pub fn new(own: Address, config: RouteCacheConfig) -> Self {
        let mode = match config.cache_type {
            CacheType::Path => CacheMode::Path(PathCache::new(&config)),
            CacheType::Link => CacheMode::Link(LinkCache::new(own, &config)),
        };
        Self {
            own,
            config,
            mode,
            neighbors: NeighborTable::new(),
            ack_ids: BTreeMap::new(),
        }
    }

    pub fn own_address(&self) -> Address {
        self.own
    }

    pub fn cache_type(&self) -> CacheType {
        self.config.cache_type
    }

    pub fn config(&self) -> &RouteCacheConfig {
        &self.config
    }

    /// Best known route to `dst`
    ///
    /// An empty or fully expired cache simply yields `None`.
    pub fn lookup(&mut self, dst: Address, now: Timestamp) -> Option<RouteCacheEntry> {
        let found = match &mut self.mode {
            CacheMode::Path(cache) => cache.lookup(dst, now),
            CacheMode::Link(cache) => cache.lookup(dst, self.config.route_cache_timeout, now),
        };
        trace!(dst = %dst, hit = found.is_some(), "route cache lookup");
        found
    }

    /// Add a complete route entry
    pub fn add_route(&mut self, entry: RouteCacheEntry, now: Timestamp) -> bool {
        match &mut self.mode {
            CacheMode::Path(cache) => cache.add(entry, now),
            CacheMode::Link(cache) => cache.add_path(entry.path(), now),
        }
    }

    /// Learn a discovered path, expiring after the configured timeout
    #[instrument(skip(self, path), fields(hops = path.len().saturating_sub(1)))]
    pub fn add_path(&mut self, path: &[Address], now: Timestamp) -> bool {
        match &mut self.mode {
            CacheMode::Path(cache) => {
                match RouteCacheEntry::new(path.to_vec(), now + self.config.route_cache_timeout) {
                    Ok(entry) => cache.add(entry, now),
                    Err(e) => {
                        debug!(error = %e, "ignoring unusable path");
                        false
                    }
                }
            }
            CacheMode::Link(cache) => cache.add_path(path, now),
        }
    }

    /// Forget the route to `dst`
    ///
    /// In link mode every link touching `dst` is dropped. Returns false when
    /// nothing was cached.
    pub fn delete_route(&mut self, dst: Address, now: Timestamp) -> bool {
        match &mut self.mode {
            CacheMode::Path(cache) => cache.delete(dst, now),
            CacheMode::Link(cache) => cache.delete_node(dst, now),
        }
    }

    /// Drop every route using the link `error_source -> unreachable`
    #[instrument(skip(self))]
    pub fn delete_all_routes_including_link(
        &mut self,
        error_source: Address,
        unreachable: Address,
        now: Timestamp,
    ) {
        match &mut self.mode {
            CacheMode::Path(cache) => cache.delete_link(error_source, unreachable, now),
            CacheMode::Link(cache) => cache.delete_link(error_source, unreachable, now),
        }
    }

    /// Refresh the route to `dst` after a delivery succeeded over it
    pub fn update_route_entry(&mut self, dst: Address, now: Timestamp) -> bool {
        let timeout = self.config.route_cache_timeout;
        match &mut self.mode {
            CacheMode::Path(cache) => cache.update_entry(dst, timeout, now),
            CacheMode::Link(cache) => match cache.lookup(dst, timeout, now) {
                Some(route) => {
                    cache.use_extends(route.path(), now);
                    true
                }
                None => false,
            },
        }
    }

    /// Raise the stability of a route in active use; no-op in path mode
    pub fn use_extends(&mut self, path: &[Address], now: Timestamp) {
        if let CacheMode::Link(cache) = &mut self.mode {
            cache.use_extends(path, now);
        }
    }

    /// Drop expired state
    pub fn purge(&mut self, now: Timestamp) {
        match &mut self.mode {
            CacheMode::Path(cache) => cache.purge(now),
            CacheMode::Link(cache) => cache.purge(now),
        }
    }

    /// Every cached path to `dst`, preferred first; path mode only
    pub fn paths_to(&self, dst: Address) -> Vec<RouteCacheEntry> {
        match &self.mode {
            CacheMode::Path(cache) => cache.paths_to(dst),
            CacheMode::Link(_) => Vec::new(),
        }
    }

    /// Destinations held by the path cache, or links held by the link cache
    pub fn len(&self) -> usize {
        match &self.mode {
            CacheMode::Path(cache) => cache.len(),
            CacheMode::Link(cache) => cache.links().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current link graph with each link's expiry; empty in path mode
    pub fn link_snapshot(&self) -> BTreeMap<Link, Timestamp> {
        match &self.mode {
            CacheMode::Path(_) => BTreeMap::new(),
            CacheMode::Link(cache) => cache.links().clone(),
        }
    }

    /// Derived best route per destination; empty in path mode
    pub fn best_route_table(&self) -> BTreeMap<Address, Vec<Address>> {
        match &self.mode {
            CacheMode::Path(_) => BTreeMap::new(),
            CacheMode::Link(cache) => cache.best_routes().clone(),
        }
    }

    /// Stability expiry of a node in the link graph
    pub fn node_stability(&self, node: Address) -> Option<Timestamp> {
        match &self.mode {
            CacheMode::Path(_) => None,
            CacheMode::Link(cache) => cache.node_stability(node),
        }
    }

    /// Shared handle to the neighbor table
    pub fn neighbors(&self) -> &NeighborTable {
        &self.neighbors
    }

    pub fn is_neighbor(&self, address: Address, now: Timestamp) -> bool {
        self.neighbors.is_neighbor(address, now)
    }

    /// Extend a known neighbor's lifetime by the route cache timeout
    pub fn update_neighbor(&self, address: Address, now: Timestamp) -> bool {
        self.neighbors
            .update(address, now + self.config.route_cache_timeout)
    }

    /// Record a neighbor heard at `now`
    pub fn add_neighbor(&self, address: Address, mac: MacAddress, now: Timestamp) {
        if !self.update_neighbor(address, now) {
            self.neighbors
                .add(address, mac, now + self.config.route_cache_timeout);
        }
    }

    /// Mark neighbors behind a failed MAC as closed
    pub fn process_tx_error(&self, mac: MacAddress) -> usize {
        self.neighbors.process_tx_error(mac)
    }

    /// Remove closed and expired neighbors, returning the closed ones
    pub fn purge_mac(&self, now: Timestamp) -> Vec<Address> {
        self.neighbors.purge(now)
    }

    /// Next ack id for packets sent to `next_hop`, starting at 1
    pub fn check_unique_ack_id(&mut self, next_hop: Address) -> u16 {
        let id = self.ack_ids.entry(next_hop).or_insert(0);
        *id = id.wrapping_add(1);
        if *id == 0 {
            *id = 1;
        }
        *id
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn addr(d: u8) -> Address {
        Address::new(10, 0, 0, d)
    }

    fn path(ds: &[u8]) -> Vec<Address> {
        ds.iter().map(|d| addr(*d)).collect()
    }

    fn path_cache() -> RouteCache {
        RouteCache::new(
            addr(1),
            RouteCacheConfig {
                cache_type: CacheType::Path,
                ..Default::default()
            },
        )
    }

    #[test]
    fn test_both_modes_serve_learned_path() {
        let now = Timestamp::ZERO;
        for mut cache in [path_cache(), RouteCache::new(addr(1), RouteCacheConfig::default())] {
            assert!(cache.lookup(addr(3), now).is_none());
            assert!(cache.add_path(&path(&[1, 2, 3]), now));
            let route = cache.lookup(addr(3), now).unwrap();
            assert_eq!(route.path(), &path(&[1, 2, 3]));
            assert_eq!(route.expire(), Timestamp::from_secs(300));
        }
    }

    #[test]
    fn test_short_path_rejected() {
        let mut cache = path_cache();
        assert!(!cache.add_path(&path(&[1]), Timestamp::ZERO));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_delete_route_reports_presence() {
        let now = Timestamp::ZERO;
        for mut cache in [path_cache(), RouteCache::new(addr(1), RouteCacheConfig::default())] {
            assert!(!cache.delete_route(addr(3), now));
            cache.add_path(&path(&[1, 2, 3]), now);
            assert!(cache.delete_route(addr(3), now));
            assert!(cache.lookup(addr(3), now).is_none());
        }
    }

    #[test]
    fn test_broken_link_removes_route_in_both_modes() {
        let now = Timestamp::ZERO;
        for mut cache in [path_cache(), RouteCache::new(addr(1), RouteCacheConfig::default())] {
            cache.add_path(&path(&[1, 2, 3]), now);
            cache.delete_all_routes_including_link(addr(2), addr(3), now);
            assert!(cache.lookup(addr(3), now).is_none());
            assert!(cache.lookup(addr(2), now).is_some());
        }
    }

    #[test]
    fn test_update_route_entry_link_mode_extends_links() {
        let mut cache = RouteCache::new(addr(1), RouteCacheConfig::default());
        let now = Timestamp::ZERO;
        assert!(!cache.update_route_entry(addr(3), now));
        cache.add_path(&path(&[1, 2, 3]), now);
        assert!(cache.update_route_entry(addr(3), now));
        let later = now + Duration::from_secs(60);
        assert!(cache.lookup(addr(3), later).is_some());
    }

    #[test]
    fn test_ack_ids_per_next_hop() {
        let mut cache = path_cache();
        assert_eq!(cache.check_unique_ack_id(addr(2)), 1);
        assert_eq!(cache.check_unique_ack_id(addr(2)), 2);
        assert_eq!(cache.check_unique_ack_id(addr(3)), 1);
    }

    #[test]
    fn test_neighbor_lifecycle() {
        let cache = path_cache();
        let now = Timestamp::ZERO;
        let mac = MacAddress::derived_from(addr(2));
        assert!(!cache.is_neighbor(addr(2), now));
        cache.add_neighbor(addr(2), mac, now);
        assert!(cache.is_neighbor(addr(2), now));
        assert_eq!(cache.process_tx_error(mac), 1);
        assert_eq!(cache.purge_mac(now), vec![addr(2)]);
        assert!(!cache.is_neighbor(addr(2), now));
    }
}

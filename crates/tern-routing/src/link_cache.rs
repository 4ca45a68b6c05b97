//! Link-mode route cache
//!
//! Every discovered route is broken into links. Links and the nodes on them
//! carry a stability lifetime; the best route to each destination is always
//! derived from the surviving link graph with Dijkstra, never stored
//! directly.
//!
//! Stability is kept as an absolute expiry, so "remaining stability" is
//! simply `expiry - now` and anything at or past its expiry is purged.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tern_core::{Address, Timestamp};
use tracing::{debug, trace};

use crate::config::RouteCacheConfig;
use crate::route::RouteCacheEntry;

/// An undirected link, stored with its endpoints in canonical order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Link {
    pub low: Address,
    pub high: Address,
}

impl Link {
    pub fn new(a: Address, b: Address) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn contains(&self, node: Address) -> bool {
        self.low == node || self.high == node
    }
}

type Graph = BTreeMap<Address, BTreeMap<Address, u32>>;

fn build_graph(links: &BTreeMap<Link, Timestamp>) -> Graph {
    let mut graph = Graph::new();
    for link in links.keys() {
        graph.entry(link.low).or_default().insert(link.high, 1);
        graph.entry(link.high).or_default().insert(link.low, 1);
    }
    graph
}

/// Best route from `source` to every reachable node of a link set
///
/// Shortest paths by hop count; among equally short paths the predecessor
/// whose link expires later wins.
pub fn shortest_paths(
    links: &BTreeMap<Link, Timestamp>,
    source: Address,
) -> BTreeMap<Address, Vec<Address>> {
    let graph = build_graph(links);
    let mut best = BTreeMap::new();
    let Some(source_edges) = graph.get(&source) else {
        return best;
    };

    let stability = |a: Address, b: Address| links.get(&Link::new(a, b)).copied();
    let mut dist: BTreeMap<Address, u32> = BTreeMap::new();
    let mut pre: BTreeMap<Address, Address> = BTreeMap::new();
    let mut visited: BTreeSet<Address> = BTreeSet::new();

    for (neighbor, weight) in source_edges {
        dist.insert(*neighbor, *weight);
        pre.insert(*neighbor, source);
    }
    dist.insert(source, 0);
    visited.insert(source);

    while visited.len() < graph.len() {
        let mut current: Option<(Address, u32)> = None;
        for (node, d) in &dist {
            if visited.contains(node) {
                continue;
            }
            if current.is_none_or(|(_, best_d)| *d <= best_d) {
                current = Some((*node, *d));
            }
        }
        let Some((u, du)) = current else {
            break;
        };
        visited.insert(u);

        let Some(edges) = graph.get(&u) else {
            continue;
        };
        for (v, weight) in edges {
            if visited.contains(v) {
                continue;
            }
            let candidate = du + weight;
            match dist.get(v) {
                Some(dv) if candidate > *dv => {}
                Some(dv) if candidate == *dv => {
                    let old = pre.get(v).and_then(|p| stability(*p, *v));
                    let new = stability(u, *v);
                    if old < new {
                        pre.insert(*v, u);
                    }
                }
                _ => {
                    dist.insert(*v, candidate);
                    pre.insert(*v, u);
                }
            }
        }
    }

    for node in pre.keys() {
        if *node == source {
            continue;
        }
        let mut path = vec![*node];
        let mut cursor = *node;
        while let Some(p) = pre.get(&cursor) {
            path.push(*p);
            if *p == source || path.len() > graph.len() {
                break;
            }
            cursor = *p;
        }
        if path.last() == Some(&source) {
            path.reverse();
            best.insert(*node, path);
        }
    }
    best
}

#[derive(Debug)]
pub(crate) struct LinkCache {
    own: Address,
    links: BTreeMap<Link, Timestamp>,
    nodes: BTreeMap<Address, Timestamp>,
    best_routes: BTreeMap<Address, Vec<Address>>,
    init_stability: Duration,
    min_life_time: Duration,
    use_extends: Duration,
    incr_factor: u32,
    decr_factor: u32,
}

impl LinkCache {
    pub(crate) fn new(own: Address, config: &RouteCacheConfig) -> Self {
        Self {
            own,
            links: BTreeMap::new(),
            nodes: BTreeMap::new(),
            best_routes: BTreeMap::new(),
            init_stability: config.init_stability,
            min_life_time: config.min_life_time,
            use_extends: config.use_extends,
            incr_factor: config.stability_incr_factor.max(1),
            decr_factor: config.stability_decr_factor.max(1),
        }
    }

    fn rebuild(&mut self) {
        self.best_routes = shortest_paths(&self.links, self.own);
        trace!(routes = self.best_routes.len(), "rebuilt best route table");
    }

    /// Drop expired links and nodes, rebuilding routes if anything went
    pub(crate) fn purge(&mut self, now: Timestamp) {
        let links_before = self.links.len();
        let nodes_before = self.nodes.len();
        self.links.retain(|_, expire| !expire.has_passed(now));
        self.nodes.retain(|_, expire| !expire.has_passed(now));
        if self.links.len() != links_before {
            debug!(
                expired = links_before - self.links.len(),
                "purged expired links"
            );
            self.rebuild();
        } else if self.nodes.len() != nodes_before {
            trace!(expired = nodes_before - self.nodes.len(), "purged expired nodes");
        }
    }

    fn node_remaining(&self, node: Address, now: Timestamp) -> Duration {
        self.nodes
            .get(&node)
            .map(|expire| expire.remaining_from(now))
            .unwrap_or_default()
    }

    /// Add every link of a discovered path
    pub(crate) fn add_path(&mut self, path: &[Address], now: Timestamp) -> bool {
        self.purge(now);
        if path.len() < 2 {
            return false;
        }
        for pair in path.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if a == b {
                continue;
            }
            for node in [a, b] {
                self.nodes.entry(node).or_insert(now + self.init_stability);
            }
            let stability = self
                .node_remaining(a, now)
                .min(self.node_remaining(b, now))
                .max(self.min_life_time);
            let expire = now + stability;
            let slot = self.links.entry(Link::new(a, b)).or_insert(expire);
            if expire > *slot {
                *slot = expire;
            }
        }
        self.rebuild();
        true
    }

    pub(crate) fn lookup(
        &mut self,
        dst: Address,
        timeout: Duration,
        now: Timestamp,
    ) -> Option<RouteCacheEntry> {
        self.purge(now);
        let path = self.best_routes.get(&dst)?;
        if path.len() < 2 {
            return None;
        }
        RouteCacheEntry::new(path.clone(), now + timeout).ok()
    }

    /// Multiply a node's remaining stability; unknown nodes start fresh
    pub(crate) fn inc_stability(&mut self, node: Address, now: Timestamp) -> bool {
        match self.nodes.get_mut(&node) {
            None => {
                self.nodes.insert(node, now + self.init_stability);
                false
            }
            Some(expire) => {
                let remaining = expire.remaining_from(now).saturating_mul(self.incr_factor);
                *expire = now + remaining;
                true
            }
        }
    }

    /// Divide a node's remaining stability; unknown nodes start fresh
    pub(crate) fn dec_stability(&mut self, node: Address, now: Timestamp) -> bool {
        match self.nodes.get_mut(&node) {
            None => {
                self.nodes.insert(node, now + self.init_stability);
                false
            }
            Some(expire) => {
                let remaining = expire.remaining_from(now) / self.decr_factor;
                *expire = now + remaining;
                true
            }
        }
    }

    /// Keep the links and nodes of a route in active use alive
    pub(crate) fn use_extends(&mut self, path: &[Address], now: Timestamp) {
        self.purge(now);
        if path.len() < 2 {
            return;
        }
        let floor = now + self.use_extends;
        for pair in path.windows(2) {
            if let Some(expire) = self.links.get_mut(&Link::new(pair[0], pair[1]))
                && *expire < floor
            {
                *expire = floor;
            }
        }
        for node in path {
            let fresh = self
                .nodes
                .get(node)
                .is_some_and(|expire| expire.remaining_from(now) <= self.init_stability);
            if fresh {
                self.inc_stability(*node, now);
            }
        }
        self.rebuild();
    }

    /// Remove the link `error_source - unreachable` and penalize its ends
    pub(crate) fn delete_link(&mut self, error_source: Address, unreachable: Address, now: Timestamp) {
        self.purge(now);
        let removed = self.links.remove(&Link::new(error_source, unreachable)).is_some();
        for node in [error_source, unreachable] {
            if self.nodes.contains_key(&node) {
                self.dec_stability(node, now);
            }
        }
        self.rebuild();
        debug!(
            error_source = %error_source,
            unreachable = %unreachable,
            removed,
            "removed broken link"
        );
    }

    /// Drop every link touching `node`
    pub(crate) fn delete_node(&mut self, node: Address, now: Timestamp) -> bool {
        self.purge(now);
        let before = self.links.len();
        self.links.retain(|link, _| !link.contains(node));
        let removed = self.links.len() != before;
        if removed {
            self.rebuild();
        }
        removed
    }

    pub(crate) fn links(&self) -> &BTreeMap<Link, Timestamp> {
        &self.links
    }

    pub(crate) fn node_stability(&self, node: Address) -> Option<Timestamp> {
        self.nodes.get(&node).copied()
    }

    pub(crate) fn best_routes(&self) -> &BTreeMap<Address, Vec<Address>> {
        &self.best_routes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(d: u8) -> Address {
        Address::new(10, 0, 0, d)
    }

    fn path(ds: &[u8]) -> Vec<Address> {
        ds.iter().map(|d| addr(*d)).collect()
    }

    fn cache() -> LinkCache {
        LinkCache::new(addr(1), &RouteCacheConfig::default())
    }

    #[test]
    fn test_link_is_canonical() {
        assert_eq!(Link::new(addr(3), addr(1)), Link::new(addr(1), addr(3)));
        assert_eq!(Link::new(addr(3), addr(1)).low, addr(1));
    }

    #[test]
    fn test_add_path_derives_routes_to_every_node() {
        let mut c = cache();
        let now = Timestamp::ZERO;
        assert!(c.add_path(&path(&[1, 2, 3, 4]), now));
        let timeout = Duration::from_secs(300);
        assert_eq!(c.lookup(addr(4), timeout, now).unwrap().path(), &path(&[1, 2, 3, 4]));
        assert_eq!(c.lookup(addr(3), timeout, now).unwrap().path(), &path(&[1, 2, 3]));
        assert!(c.lookup(addr(1), timeout, now).is_none());
        assert!(c.lookup(addr(9), timeout, now).is_none());
    }

    #[test]
    fn test_shorter_path_wins() {
        let mut c = cache();
        let now = Timestamp::ZERO;
        c.add_path(&path(&[1, 2, 3, 4, 5]), now);
        c.add_path(&path(&[1, 6, 5]), now);
        let route = c.lookup(addr(5), Duration::from_secs(1), now).unwrap();
        assert_eq!(route.path(), &path(&[1, 6, 5]));
    }

    #[test]
    fn test_link_stability_from_node_stability() {
        let mut c = cache();
        let now = Timestamp::ZERO;
        c.add_path(&path(&[1, 2]), now);
        let link = Link::new(addr(1), addr(2));
        assert_eq!(c.links()[&link], Timestamp::from_secs(25));
    }

    #[test]
    fn test_links_expire() {
        let mut c = cache();
        c.add_path(&path(&[1, 2, 3]), Timestamp::ZERO);
        let later = Timestamp::from_secs(25);
        assert!(c.lookup(addr(3), Duration::from_secs(1), later).is_none());
        assert!(c.links().is_empty());
    }

    #[test]
    fn test_inc_and_dec_stability() {
        let mut c = cache();
        let now = Timestamp::ZERO;
        assert!(!c.inc_stability(addr(7), now));
        assert_eq!(c.node_stability(addr(7)), Some(Timestamp::from_secs(25)));
        assert!(c.inc_stability(addr(7), now));
        assert_eq!(c.node_stability(addr(7)), Some(Timestamp::from_secs(100)));
        assert!(c.dec_stability(addr(7), now));
        assert_eq!(c.node_stability(addr(7)), Some(Timestamp::from_secs(50)));
    }

    #[test]
    fn test_use_extends_raises_links_and_fresh_nodes() {
        let mut c = cache();
        let now = Timestamp::ZERO;
        c.add_path(&path(&[1, 2, 3]), now);
        c.use_extends(&path(&[1, 2, 3]), now);
        assert_eq!(
            c.links()[&Link::new(addr(2), addr(3))],
            Timestamp::from_secs(120)
        );
        assert_eq!(c.node_stability(addr(2)), Some(Timestamp::from_secs(100)));

        // Already incremented since init, so left alone.
        c.use_extends(&path(&[1, 2, 3]), now);
        assert_eq!(c.node_stability(addr(2)), Some(Timestamp::from_secs(100)));
    }

    #[test]
    fn test_delete_link_reroutes() {
        let mut c = cache();
        let now = Timestamp::ZERO;
        c.add_path(&path(&[1, 2, 4]), now);
        c.add_path(&path(&[1, 3, 5, 4]), now);
        c.delete_link(addr(2), addr(4), now);
        let route = c.lookup(addr(4), Duration::from_secs(1), now).unwrap();
        assert_eq!(route.path(), &path(&[1, 3, 5, 4]));
        assert_eq!(c.node_stability(addr(2)), Some(Timestamp::from_micros(12_500_000)));
    }

    #[test]
    fn test_equal_length_tie_prefers_stable_link() {
        let mut links = BTreeMap::new();
        links.insert(Link::new(addr(1), addr(2)), Timestamp::from_secs(10));
        links.insert(Link::new(addr(1), addr(3)), Timestamp::from_secs(10));
        links.insert(Link::new(addr(2), addr(4)), Timestamp::from_secs(5));
        links.insert(Link::new(addr(3), addr(4)), Timestamp::from_secs(50));
        let best = shortest_paths(&links, addr(1));
        assert_eq!(best[&addr(4)], path(&[1, 3, 4]));

        links.insert(Link::new(addr(2), addr(4)), Timestamp::from_secs(90));
        let best = shortest_paths(&links, addr(1));
        assert_eq!(best[&addr(4)], path(&[1, 2, 4]));
    }

    #[test]
    fn test_best_routes_match_fresh_computation() {
        let mut c = cache();
        let now = Timestamp::ZERO;
        c.add_path(&path(&[1, 2, 3, 4]), now);
        c.add_path(&path(&[1, 5, 4]), now);
        c.delete_link(addr(5), addr(4), now);
        assert_eq!(c.best_routes(), &shortest_paths(c.links(), addr(1)));
    }
}

//! # Route Cache Property Tests
//!
//! Properties that must hold across arbitrary sequences of cache updates:
//! - the link cache's best-route table always equals a fresh Dijkstra run
//! - every best route is a shortest route by hop count
//! - the path cache never holds more than `max_entries_each_dst` paths
//! - request ids increase per destination until they wrap

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use tern_core::{Address, Timestamp};
use tern_routing::{
    CacheType, Link, RequestTable, RequestTableConfig, RouteCache, RouteCacheConfig,
    RouteCacheEntry, shortest_paths,
};

fn addr(d: u8) -> Address {
    Address::new(10, 0, 0, d)
}

struct XorShift(u32);

impl XorShift {
    fn next(&mut self) -> u32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 17;
        self.0 ^= self.0 << 5;
        self.0
    }

    fn below(&mut self, n: u32) -> u32 {
        self.next() % n
    }
}

/// Random loop-free path starting at node 1
fn random_path(rng: &mut XorShift) -> Vec<Address> {
    let len = 2 + rng.below(5) as usize;
    let mut path = vec![addr(1)];
    while path.len() < len {
        let next = addr(2 + rng.below(11) as u8);
        if !path.contains(&next) {
            path.push(next);
        }
    }
    path
}

fn hop_distances(links: &BTreeMap<Link, Timestamp>, source: Address) -> BTreeMap<Address, usize> {
    let mut adjacency: BTreeMap<Address, BTreeSet<Address>> = BTreeMap::new();
    for link in links.keys() {
        adjacency.entry(link.low).or_default().insert(link.high);
        adjacency.entry(link.high).or_default().insert(link.low);
    }
    let mut dist = BTreeMap::from([(source, 0usize)]);
    let mut queue = VecDeque::from([source]);
    while let Some(node) = queue.pop_front() {
        let d = dist[&node];
        for next in adjacency.get(&node).into_iter().flatten() {
            if !dist.contains_key(next) {
                dist.insert(*next, d + 1);
                queue.push_back(*next);
            }
        }
    }
    dist
}

#[test]
fn test_best_routes_equal_fresh_dijkstra() {
    let mut rng = XorShift(0x9e37_79b9);
    let mut cache = RouteCache::new(addr(1), RouteCacheConfig::default());
    let now = Timestamp::from_secs(1);

    for step in 0..300 {
        if step % 4 == 3 {
            let links: Vec<Link> = cache.link_snapshot().into_keys().collect();
            if !links.is_empty() {
                let link = links[rng.below(links.len() as u32) as usize];
                cache.delete_all_routes_including_link(link.low, link.high, now);
            }
        } else {
            let path = random_path(&mut rng);
            cache.add_path(&path, now);
        }
        assert_eq!(
            cache.best_route_table(),
            shortest_paths(&cache.link_snapshot(), addr(1)),
            "diverged at step {step}"
        );
    }
}

#[test]
fn test_best_routes_are_shortest() {
    let mut rng = XorShift(0x0bad_5eed);
    let mut cache = RouteCache::new(addr(1), RouteCacheConfig::default());
    let now = Timestamp::ZERO;
    for _ in 0..40 {
        let path = random_path(&mut rng);
        cache.add_path(&path, now);
    }

    let links = cache.link_snapshot();
    let dist = hop_distances(&links, addr(1));
    let table = cache.best_route_table();
    assert_eq!(table.len(), dist.len() - 1);
    for (dst, route) in &table {
        assert_eq!(route.first(), Some(&addr(1)));
        assert_eq!(route.last(), Some(dst));
        assert_eq!(route.len() - 1, dist[dst]);
        for pair in route.windows(2) {
            assert!(links.contains_key(&Link::new(pair[0], pair[1])));
        }
    }
}

#[test]
fn test_sub_route_synthesized_from_longer_path() {
    let mut cache = RouteCache::new(
        addr(1),
        RouteCacheConfig {
            cache_type: CacheType::Path,
            ..Default::default()
        },
    );
    let now = Timestamp::ZERO;
    let to_b = RouteCacheEntry::new(vec![addr(1), addr(2)], Timestamp::from_secs(1)).unwrap();
    let to_d =
        RouteCacheEntry::new(vec![addr(1), addr(3), addr(4)], Timestamp::from_secs(300)).unwrap();
    assert!(cache.add_route(to_b, now));
    assert!(cache.add_route(to_d, now));

    let to_c = cache.lookup(addr(3), now).unwrap();
    assert_eq!(to_c.path(), &[addr(1), addr(3)]);
}

#[test]
fn test_entries_per_destination_bounded() {
    let max = 4;
    let mut cache = RouteCache::new(
        addr(1),
        RouteCacheConfig {
            cache_type: CacheType::Path,
            max_entries_each_dst: max,
            ..Default::default()
        },
    );
    let now = Timestamp::ZERO;
    for mid in 2..20u8 {
        let path = vec![addr(1), addr(mid), addr(mid + 100), addr(250)];
        let entry = RouteCacheEntry::new(path.clone(), Timestamp::from_secs(u64::from(mid))).unwrap();
        assert_eq!(entry.path().len(), path.len());
        cache.add_route(entry, now);
        assert!(cache.paths_to(addr(250)).len() <= max);
    }
    assert_eq!(cache.paths_to(addr(250)).len(), max);
}

#[test]
fn test_request_ids_monotonic_until_wrap() {
    let max = 40;
    let mut table = RequestTable::new(RequestTableConfig {
        unique_request_id_size: max,
        ..Default::default()
    });
    let mut previous = table.check_unique_rreq_id(addr(9));
    assert_eq!(previous, 0);
    for _ in 0..max {
        let id = table.check_unique_rreq_id(addr(9));
        assert!(id > previous);
        previous = id;
    }
    assert_eq!(previous, max);
    assert_eq!(table.check_unique_rreq_id(addr(9)), 0);
}

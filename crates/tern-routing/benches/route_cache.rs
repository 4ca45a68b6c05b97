//! Route cache performance benchmarks
//!
//! Benchmarks for the operations a node runs on every packet:
//! - Route lookup in path and link mode
//! - Learning a discovered path
//! - Tearing down routes after a link failure
//!
//! Run with: cargo bench -p tern-routing

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use tern_core::{Address, Timestamp};
use tern_routing::{CacheType, RouteCache, RouteCacheConfig};

fn addr(index: u16) -> Address {
    Address::from_index(index)
}

/// Cache at node 0 holding routes along the rows and columns of a grid
fn grid_cache(cache_type: CacheType, side: u16) -> RouteCache {
    let config = RouteCacheConfig {
        cache_type,
        ..Default::default()
    };
    let mut cache = RouteCache::new(addr(0), config);
    let now = Timestamp::ZERO;
    for column in 1..side {
        // Along the first row, then down the column
        let mut path: Vec<Address> = (0..=column).map(addr).collect();
        path.extend((1..side).map(|row| addr(row * side + column)));
        cache.add_path(&path, now);
    }
    cache
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");
    let now = Timestamp::from_secs(1);

    for cache_type in [CacheType::Path, CacheType::Link] {
        let mut cache = grid_cache(cache_type, 8);
        let far = addr(8 * 8 - 1);
        group.bench_function(format!("{:?}_far_destination", cache_type), |b| {
            b.iter(|| cache.lookup(black_box(far), now))
        });
        group.bench_function(format!("{:?}_miss", cache_type), |b| {
            b.iter(|| cache.lookup(black_box(addr(500)), now))
        });
    }

    group.finish();
}

fn bench_add_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("add_path");
    let path: Vec<Address> = (0..10).map(addr).collect();

    for cache_type in [CacheType::Path, CacheType::Link] {
        group.bench_function(format!("{:?}_10_hops_into_grid", cache_type), |b| {
            b.iter_batched(
                || grid_cache(cache_type, 8),
                |mut cache| cache.add_path(black_box(&path), Timestamp::ZERO),
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_link_failure(c: &mut Criterion) {
    let mut group = c.benchmark_group("link_failure");

    for cache_type in [CacheType::Path, CacheType::Link] {
        group.bench_function(format!("{:?}_delete_first_hop", cache_type), |b| {
            b.iter_batched(
                || grid_cache(cache_type, 8),
                |mut cache| {
                    cache.delete_all_routes_including_link(
                        black_box(addr(0)),
                        black_box(addr(1)),
                        Timestamp::from_secs(1),
                    )
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(benches, bench_lookup, bench_add_path, bench_link_failure);
criterion_main!(benches);

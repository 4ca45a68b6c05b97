//! Route cache and request table configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Route cache strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CacheType {
    /// Whole discovered paths per destination
    Path,
    /// Link graph with shortest-path recomputation
    #[default]
    Link,
}

/// Ordering of alternative paths to the same destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PathOrdering {
    /// Longest remaining lifetime first
    #[default]
    Expire,
    /// Longest remaining lifetime first, fewer hops on ties
    ExpireThenHops,
}

/// Configuration for the route cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteCacheConfig {
    pub cache_type: CacheType,
    /// Most destinations held by the path cache
    pub max_cache_len: usize,
    /// Lifetime of a freshly learned or refreshed route
    pub route_cache_timeout: Duration,
    /// Most alternative paths per destination
    pub max_entries_each_dst: usize,
    pub path_ordering: PathOrdering,
    /// Keep the surviving prefix of a route broken mid-way
    pub enable_sub_route: bool,
    /// Divisor applied to a node's stability after a failure
    pub stability_decr_factor: u32,
    /// Multiplier applied to a node's stability after a successful use
    pub stability_incr_factor: u32,
    /// Stability of a node seen for the first time
    pub init_stability: Duration,
    /// Floor on any link's stability
    pub min_life_time: Duration,
    /// Minimum stability of a link on a route in active use
    pub use_extends: Duration,
}

impl Default for RouteCacheConfig {
    fn default() -> Self {
        Self {
            cache_type: CacheType::Link,
            max_cache_len: 64,
            route_cache_timeout: Duration::from_secs(300),
            max_entries_each_dst: 20,
            path_ordering: PathOrdering::Expire,
            enable_sub_route: true,
            stability_decr_factor: 2,
            stability_incr_factor: 4,
            init_stability: Duration::from_secs(25),
            min_life_time: Duration::from_secs(1),
            use_extends: Duration::from_secs(120),
        }
    }
}

/// Configuration for the route request table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestTableConfig {
    /// Most destinations with discovery counters
    pub request_table_size: usize,
    /// Most remembered (target, id) pairs per originator
    pub request_id_size: usize,
    /// Request ids wrap back to 0 after reaching this value
    pub unique_request_id_size: u16,
    /// How long a suspected unidirectional link stays blacklisted
    pub blacklist_timeout: Duration,
    /// How long a seen (originator, target, id) triple suppresses duplicates
    pub source_history_timeout: Duration,
}

impl Default for RequestTableConfig {
    fn default() -> Self {
        Self {
            request_table_size: 64,
            request_id_size: 16,
            unique_request_id_size: 256,
            blacklist_timeout: Duration::from_secs(3),
            source_history_timeout: Duration::from_secs(10),
        }
    }
}

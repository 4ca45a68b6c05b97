//! # Tern Routing
//!
//! Route state for a DSR node: what routes are known, what discoveries are
//! in progress, and which neighbors are reachable.
//!
//! ## Core Components
//!
//! - [`RouteCache`]: destination to source route resolution, in path or link mode
//! - [`RequestTable`]: discovery attempt counters, request ids, duplicate
//!   suppression and the unidirectional-link blacklist
//! - [`GratuitousReplyTable`]: holdoff for unsolicited shortened replies
//! - [`NeighborTable`]: one-hop neighbors, shared with the link-layer feed
//!
//! ## Cache Modes
//!
//! 1. **Path**: every discovered path is kept whole, up to
//!    `max_entries_each_dst` per destination, longest-lived first. A lookup
//!    miss may be served by truncating a longer path that passes through
//!    the destination.
//! 2. **Link**: paths are broken into links with a stability lifetime. The
//!    best route to every destination is recomputed with Dijkstra after each
//!    change, preferring more stable links between equally short routes.
//!
//! ## Example
//!
//! ```rust,ignore
//! use tern_routing::{RouteCache, RouteCacheConfig};
//!
//! let mut cache = RouteCache::new(own, RouteCacheConfig::default());
//! cache.add_path(&[own, relay, dst], now);
//! let route = cache.lookup(dst, now).expect("route learned");
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod gratuitous;
pub mod link_cache;
pub mod neighbor;
mod path_cache;
pub mod request_table;
pub mod route;

// Re-export main types
pub use cache::RouteCache;
pub use config::{CacheType, PathOrdering, RequestTableConfig, RouteCacheConfig};
pub use error::{CacheError, CacheResult};
pub use gratuitous::GratuitousReplyTable;
pub use link_cache::{Link, shortest_paths};
pub use neighbor::{Neighbor, NeighborTable};
pub use request_table::{BlacklistEntry, RequestTable};
pub use route::RouteCacheEntry;

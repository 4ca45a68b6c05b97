//! Route cache entries and source-route path helpers
//!
//! A path is an ordered list of addresses, originator first and
//! destination last, both inclusive.

use std::time::Duration;

use tern_core::{Address, Timestamp};

use crate::error::{CacheError, CacheResult};

/// A cached route to one destination
///
/// Discovery attempts and suspected unidirectional first hops are tracked
/// per destination and per neighbor in the
/// [`RequestTable`](crate::RequestTable), not on each route.
#[derive(Debug, Clone)]
pub struct RouteCacheEntry {
    path: Vec<Address>,
    expire: Timestamp,
}

impl RouteCacheEntry {
    /// Create an entry expiring at `expire`
    ///
    /// The path must hold at least two addresses with distinct endpoints.
    pub fn new(path: Vec<Address>, expire: Timestamp) -> CacheResult<Self> {
        if path.len() < 2 {
            return Err(CacheError::TooShort { len: path.len() });
        }
        if path.first() == path.last() {
            return Err(CacheError::SameEndpoints(path[0]));
        }
        Ok(Self { path, expire })
    }

    pub fn path(&self) -> &[Address] {
        &self.path
    }

    pub fn into_path(self) -> Vec<Address> {
        self.path
    }

    /// Final address of the route
    pub fn destination(&self) -> Address {
        self.path[self.path.len() - 1]
    }

    /// First address of the route
    pub fn source(&self) -> Address {
        self.path[0]
    }

    /// Number of links on the route
    pub fn hops(&self) -> usize {
        self.path.len() - 1
    }

    pub fn expire(&self) -> Timestamp {
        self.expire
    }

    pub fn set_expire(&mut self, expire: Timestamp) {
        self.expire = expire;
    }

    /// Lifetime left at `now`
    pub fn remaining(&self, now: Timestamp) -> Duration {
        self.expire.remaining_from(now)
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expire.has_passed(now)
    }
}

/// Routes compare by their full path
impl PartialEq for RouteCacheEntry {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for RouteCacheEntry {}

/// Collapse loops by cutting everything between repeated addresses
///
/// `[A, B, C, B, D]` becomes `[A, B, D]`.
pub fn remove_duplicates(path: &[Address]) -> Vec<Address> {
    let mut result: Vec<Address> = Vec::with_capacity(path.len());
    for address in path {
        match result.iter().position(|a| a == address) {
            Some(pos) => result.truncate(pos + 1),
            None => result.push(*address),
        }
    }
    result
}

/// Whether two paths share any address
pub fn has_common_address(a: &[Address], b: &[Address]) -> bool {
    a.iter().any(|x| b.contains(x))
}

/// The suffix of `path` starting at `from`, empty if absent
pub fn cut_route(path: &[Address], from: Address) -> Vec<Address> {
    path.iter()
        .position(|a| *a == from)
        .map(|pos| path[pos..].to_vec())
        .unwrap_or_default()
}

/// Whether `node` appears somewhere after `after` in `path`
pub fn contains_after(node: Address, after: Address, path: &[Address]) -> bool {
    path.iter()
        .position(|a| *a == after)
        .is_some_and(|pos| path[pos + 1..].contains(&node))
}

/// The hop following `own` along `path`
///
/// A two-address path always yields its second address; `own` at the end
/// of the path yields `own` itself.
pub fn next_hop(own: Address, path: &[Address]) -> Option<Address> {
    if path.len() == 2 {
        return Some(path[1]);
    }
    if path.last() == Some(&own) {
        return Some(own);
    }
    let pos = path.iter().position(|a| *a == own)?;
    path.get(pos + 1).copied()
}

/// The hop preceding `own` along `path`, used to send replies backwards
pub fn previous_hop(own: Address, path: &[Address]) -> Option<Address> {
    if path.len() == 2 {
        return Some(path[0]);
    }
    let pos = path.iter().position(|a| *a == own)?;
    pos.checked_sub(1).map(|p| path[p])
}

//! One-hop neighbor tracking
//!
//! The table is a cloneable handle over shared state so the link-layer
//! liveness feed can report transmission failures without owning the
//! route cache.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tern_core::{Address, MacAddress, Timestamp};
use tracing::debug;

/// A directly reachable node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Neighbor {
    pub address: Address,
    pub mac: MacAddress,
    pub expire: Timestamp,
    /// Set when the link layer failed to reach this neighbor
    pub close: bool,
}

/// Shared neighbor table
#[derive(Debug, Clone, Default)]
pub struct NeighborTable {
    entries: Arc<DashMap<Address, Neighbor>>,
}

impl NeighborTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `address` is a live neighbor at `now`
    pub fn is_neighbor(&self, address: Address, now: Timestamp) -> bool {
        self.entries
            .get(&address)
            .is_some_and(|n| !n.close && !n.expire.has_passed(now))
    }

    pub fn expire_of(&self, address: Address) -> Option<Timestamp> {
        self.entries.get(&address).map(|n| n.expire)
    }

    pub fn mac_of(&self, address: Address) -> Option<MacAddress> {
        self.entries.get(&address).map(|n| n.mac)
    }

    /// Extend a known neighbor's lifetime, returning false if unknown
    pub fn update(&self, address: Address, expire: Timestamp) -> bool {
        match self.entries.get_mut(&address) {
            Some(mut n) => {
                if expire > n.expire {
                    n.expire = expire;
                }
                n.close = false;
                true
            }
            None => false,
        }
    }

    /// Insert or replace a neighbor
    pub fn add(&self, address: Address, mac: MacAddress, expire: Timestamp) {
        self.entries.insert(
            address,
            Neighbor {
                address,
                mac,
                expire,
                close: false,
            },
        );
    }

    /// Mark every neighbor behind `mac` as unreachable
    pub fn process_tx_error(&self, mac: MacAddress) -> usize {
        let mut marked = 0;
        for mut entry in self.entries.iter_mut() {
            if entry.mac == mac && !entry.close {
                entry.close = true;
                marked += 1;
            }
        }
        if marked > 0 {
            debug!(mac = %mac, marked, "neighbor link failed");
        }
        marked
    }

    /// Remove closed and expired neighbors, returning the closed ones
    pub fn purge(&self, now: Timestamp) -> Vec<Address> {
        let mut closed = Vec::new();
        self.entries.retain(|address, n| {
            if n.close {
                closed.push(*address);
                false
            } else {
                !n.expire.has_passed(now)
            }
        });
        closed.sort();
        closed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of every tracked neighbor
    pub fn snapshot(&self) -> Vec<Neighbor> {
        let mut all: Vec<Neighbor> = self.entries.iter().map(|n| n.value().clone()).collect();
        all.sort_by_key(|n| n.address);
        all
    }
}

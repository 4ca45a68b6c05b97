//! Node statistics

use serde::{Deserialize, Serialize};
use tern_core::RoutingError;

/// Counters kept by a routing node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStats {
    /// Datagrams accepted from the upper layer
    pub originated: u64,
    /// Datagrams delivered to the upper layer
    pub delivered: u64,
    /// Data packets relayed along a source route
    pub forwarded: u64,
    /// Frames handed to the link layer
    pub transmitted: u64,

    pub rreq_sent: u64,
    pub rrep_sent: u64,
    pub rerr_sent: u64,
    pub acks_sent: u64,

    /// Packets re-issued along an alternative route
    pub salvaged: u64,
    pub link_breaks: u64,
    /// Maintained packets confirmed by overhearing the next hop
    pub passive_acks: u64,

    pub cache_hits: u64,
    pub cache_misses: u64,

    pub dropped: DropCounts,
}

impl NodeStats {
    /// Fraction of route lookups answered by the cache
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}

/// Drops broken down by reason
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropCounts {
    pub no_route: u64,
    pub discovery_exhausted: u64,
    pub link_broken: u64,
    pub ack_timeout: u64,
    pub salvage_exhausted: u64,
    pub unsupported_option: u64,
    pub buffer_overflow: u64,
    pub expired: u64,
    pub queue_full: u64,
    pub invalid_source_route: u64,
    pub invalid_destination: u64,
}

impl DropCounts {
    pub fn record(&mut self, reason: &RoutingError) {
        let counter = match reason {
            RoutingError::NoRoute => &mut self.no_route,
            RoutingError::DiscoveryExhausted { .. } => &mut self.discovery_exhausted,
            RoutingError::LinkBroken { .. } => &mut self.link_broken,
            RoutingError::AckTimeout { .. } => &mut self.ack_timeout,
            RoutingError::SalvageExhausted { .. } => &mut self.salvage_exhausted,
            RoutingError::UnsupportedOption(_) => &mut self.unsupported_option,
            RoutingError::BufferOverflow => &mut self.buffer_overflow,
            RoutingError::Expired => &mut self.expired,
            RoutingError::QueueFull => &mut self.queue_full,
            RoutingError::InvalidSourceRoute => &mut self.invalid_source_route,
            RoutingError::InvalidDestination(_) => &mut self.invalid_destination,
        };
        *counter += 1;
    }

    pub fn total(&self) -> u64 {
        self.no_route
            + self.discovery_exhausted
            + self.link_broken
            + self.ack_timeout
            + self.salvage_exhausted
            + self.unsupported_option
            + self.buffer_overflow
            + self.expired
            + self.queue_full
            + self.invalid_source_route
            + self.invalid_destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_core::Address;

    #[test]
    fn test_drop_counts_by_reason() {
        let mut drops = DropCounts::default();
        drops.record(&RoutingError::Expired);
        drops.record(&RoutingError::Expired);
        drops.record(&RoutingError::LinkBroken {
            next_hop: Address::new(10, 0, 0, 2),
        });
        assert_eq!(drops.expired, 2);
        assert_eq!(drops.link_broken, 1);
        assert_eq!(drops.total(), 3);
    }

    #[test]
    fn test_cache_hit_ratio() {
        let mut stats = NodeStats::default();
        assert_eq!(stats.cache_hit_ratio(), 0.0);
        stats.cache_hits = 3;
        stats.cache_misses = 1;
        assert!((stats.cache_hit_ratio() - 0.75).abs() < f64::EPSILON);
    }
}

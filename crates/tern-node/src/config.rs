//! Node configuration
//!
//! [`NodeConfig`] gathers every tunable of a routing node. The component
//! configurations live with their components; this module adds the
//! discovery settings and the presets.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tern_maintenance::{MaintenanceConfig, QueueConfig};
use tern_routing::{CacheType, RequestTableConfig, RouteCacheConfig};

use crate::error::{NodeError, NodeResult};

/// Route discovery pacing and reply damping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Propagating requests before buffered packets are dropped
    pub rreq_retries: u32,
    /// Wait for answers to the one-hop probe
    pub non_prop_request_timeout: Duration,
    /// Hop limit of propagating requests
    pub discovery_hop_limit: u8,
    /// Base backoff between propagating requests
    pub request_period: Duration,
    /// Ceiling on the backoff between propagating requests
    pub max_request_period: Duration,
    /// Interval of the periodic send buffer check
    pub send_buff_interval: Duration,
    /// Suppression window for repeated gratuitous replies
    pub gra_reply_holdoff: Duration,
    pub gra_reply_table_size: usize,
    /// Upper bound of the random delay before re-broadcasting a request
    pub broadcast_jitter: Duration,
    /// Answer requests from the route cache on the target's behalf
    pub cached_replies: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            rreq_retries: 16,
            non_prop_request_timeout: Duration::from_millis(30),
            discovery_hop_limit: 255,
            request_period: Duration::from_millis(500),
            max_request_period: Duration::from_secs(10),
            send_buff_interval: Duration::from_secs(500),
            gra_reply_holdoff: Duration::from_secs(1),
            gra_reply_table_size: 64,
            broadcast_jitter: Duration::from_millis(10),
            cached_replies: true,
        }
    }
}

/// Complete configuration of a routing node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub route_cache: RouteCacheConfig,
    pub request_table: RequestTableConfig,
    pub maintenance: MaintenanceConfig,
    pub queue: QueueConfig,
    pub discovery: DiscoveryConfig,
}

impl NodeConfig {
    /// Default configuration with a path cache instead of a link cache
    pub fn path_cache() -> Self {
        let mut config = Self::default();
        config.route_cache.cache_type = CacheType::Path;
        config
    }

    /// Create a config for dense, mostly static networks
    ///
    /// Neighbors are close and plentiful, so buffers shrink and discovery
    /// gives up sooner.
    pub fn dense_network() -> Self {
        Self {
            route_cache: RouteCacheConfig {
                route_cache_timeout: Duration::from_secs(120),
                max_entries_each_dst: 8,
                ..Default::default()
            },
            request_table: RequestTableConfig {
                request_table_size: 32,
                ..Default::default()
            },
            maintenance: MaintenanceConfig {
                max_send_buff_len: 32,
                max_send_buff_time: Duration::from_secs(10),
                max_maint_len: 32,
                max_maint_time: Duration::from_secs(10),
                node_traversal_time: Duration::from_millis(20),
                ..Default::default()
            },
            queue: QueueConfig {
                max_network_queue_size: 200,
                max_network_queue_delay: Duration::from_secs(10),
                ..Default::default()
            },
            discovery: DiscoveryConfig {
                rreq_retries: 8,
                request_period: Duration::from_millis(250),
                max_request_period: Duration::from_secs(5),
                ..Default::default()
            },
        }
    }

    /// Create a config for fast-moving nodes
    ///
    /// Cached routes go stale quickly and links break often, so routes
    /// expire sooner and packets get more retransmissions.
    pub fn high_mobility() -> Self {
        Self {
            route_cache: RouteCacheConfig {
                route_cache_timeout: Duration::from_secs(30),
                init_stability: Duration::from_secs(10),
                use_extends: Duration::from_secs(30),
                ..Default::default()
            },
            request_table: RequestTableConfig {
                blacklist_timeout: Duration::from_secs(1),
                ..Default::default()
            },
            maintenance: MaintenanceConfig {
                max_maint_rexmt: 4,
                try_passive_acks: 2,
                ..Default::default()
            },
            queue: QueueConfig::default(),
            discovery: DiscoveryConfig {
                max_request_period: Duration::from_secs(5),
                gra_reply_holdoff: Duration::from_millis(500),
                ..Default::default()
            },
        }
    }

    /// Validate configuration invariants
    ///
    /// An empty list means the configuration is valid.
    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if self.discovery.request_period > self.discovery.max_request_period {
            warnings.push(ConfigWarning::RequestPeriodExceedsMax);
        }

        if self.route_cache.max_entries_each_dst == 0 {
            warnings.push(ConfigWarning::NoEntriesPerDestination);
        }

        if self.route_cache.min_life_time > self.route_cache.init_stability {
            warnings.push(ConfigWarning::MinLifeTimeExceedsInitStability);
        }

        if self.route_cache.stability_incr_factor < 1 || self.route_cache.stability_decr_factor < 1 {
            warnings.push(ConfigWarning::StabilityFactorBelowOne);
        }

        if self.queue.num_priority_queues == 0 {
            warnings.push(ConfigWarning::NoPriorityQueues);
        }

        if self.maintenance.max_maint_len == 0 {
            warnings.push(ConfigWarning::EmptyMaintainBuffer);
        }

        // The salvage field of a DSR source route is four bits wide
        if self.maintenance.max_salvage_count > 15 {
            warnings.push(ConfigWarning::SalvageCountTooLarge);
        }

        warnings
    }

    /// Check if the configuration is valid (no warnings)
    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    /// Fail with the first warning, if any
    pub fn ensure_valid(&self) -> NodeResult<()> {
        match self.validate().into_iter().next() {
            Some(warning) => Err(NodeError::InvalidConfig(warning)),
            None => Ok(()),
        }
    }
}

/// Configuration warnings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigWarning {
    /// Base request period exceeds its ceiling
    RequestPeriodExceedsMax,
    /// The path cache may keep no route per destination
    NoEntriesPerDestination,
    /// Link lifetime floor exceeds the initial node stability
    MinLifeTimeExceedsInitStability,
    /// A stability factor would shrink on success or grow on failure
    StabilityFactorBelowOne,
    /// No egress queue to transmit through
    NoPriorityQueues,
    /// No room to keep packets awaiting acknowledgment
    EmptyMaintainBuffer,
    /// Salvage count does not fit the 4-bit salvage field
    SalvageCountTooLarge,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::RequestPeriodExceedsMax => {
                write!(f, "request_period exceeds max_request_period")
            }
            ConfigWarning::NoEntriesPerDestination => {
                write!(f, "max_entries_each_dst is 0")
            }
            ConfigWarning::MinLifeTimeExceedsInitStability => {
                write!(f, "min_life_time exceeds init_stability")
            }
            ConfigWarning::StabilityFactorBelowOne => {
                write!(f, "stability factors must be at least 1")
            }
            ConfigWarning::NoPriorityQueues => write!(f, "num_priority_queues is 0"),
            ConfigWarning::EmptyMaintainBuffer => write!(f, "max_maint_len is 0"),
            ConfigWarning::SalvageCountTooLarge => {
                write!(f, "max_salvage_count exceeds 15")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = NodeConfig::default();
        assert_eq!(config.route_cache.cache_type, CacheType::Link);
        assert_eq!(config.discovery.rreq_retries, 16);
        assert_eq!(config.discovery.non_prop_request_timeout, Duration::from_millis(30));
        assert_eq!(config.maintenance.max_maint_rexmt, 2);
        assert_eq!(config.queue.num_priority_queues, 2);
    }

    #[test]
    fn test_path_cache_config() {
        let config = NodeConfig::path_cache();
        assert_eq!(config.route_cache.cache_type, CacheType::Path);
        assert!(config.is_valid());
    }

    #[test]
    fn test_presets_are_valid() {
        for config in [
            NodeConfig::default(),
            NodeConfig::dense_network(),
            NodeConfig::high_mobility(),
        ] {
            assert!(config.validate().is_empty(), "{:?}", config.validate());
        }
    }

    #[test]
    fn test_request_period_exceeds_max() {
        let mut config = NodeConfig::default();
        config.discovery.request_period = Duration::from_secs(20);
        assert!(config.validate().contains(&ConfigWarning::RequestPeriodExceedsMax));
        assert!(!config.is_valid());
    }

    #[test]
    fn test_salvage_count_too_large() {
        let mut config = NodeConfig::default();
        config.maintenance.max_salvage_count = 16;
        assert!(matches!(
            config.ensure_valid(),
            Err(NodeError::InvalidConfig(ConfigWarning::SalvageCountTooLarge))
        ));
    }

    #[test]
    fn test_multiple_warnings() {
        let mut config = NodeConfig::default();
        config.queue.num_priority_queues = 0;
        config.maintenance.max_maint_len = 0;
        config.route_cache.stability_decr_factor = 0;
        let warnings = config.validate();
        assert_eq!(warnings.len(), 3);
        assert!(warnings.contains(&ConfigWarning::NoPriorityQueues));
        assert!(warnings.contains(&ConfigWarning::EmptyMaintainBuffer));
        assert!(warnings.contains(&ConfigWarning::StabilityFactorBelowOne));
    }

    #[test]
    fn test_warning_display() {
        assert_eq!(
            ConfigWarning::RequestPeriodExceedsMax.to_string(),
            "request_period exceeds max_request_period"
        );
    }
}

//! # Node Configuration Tests
//!
//! Configuration as an operator sees it:
//! - every preset is valid and survives a JSON round trip
//! - defaults match the protocol's documented values
//! - invalid settings are reported, not silently accepted

use std::time::Duration;

use tern_node::{ConfigWarning, NodeConfig, NodeError};
use tern_routing::CacheType;

#[test]
fn test_presets_round_trip_through_json() {
    for config in [
        NodeConfig::default(),
        NodeConfig::path_cache(),
        NodeConfig::dense_network(),
        NodeConfig::high_mobility(),
    ] {
        assert!(config.is_valid(), "{:?}", config.validate());
        let json = serde_json::to_string(&config).unwrap();
        let back: NodeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}

#[test]
fn test_protocol_defaults() {
    let config = NodeConfig::default();

    assert_eq!(config.route_cache.cache_type, CacheType::Link);
    assert_eq!(config.route_cache.route_cache_timeout, Duration::from_secs(300));
    assert_eq!(config.route_cache.max_entries_each_dst, 20);

    assert_eq!(config.maintenance.max_send_buff_len, 64);
    assert_eq!(config.maintenance.max_maint_rexmt, 2);
    assert_eq!(config.maintenance.max_salvage_count, 15);
    assert!(config.maintenance.passive_acknowledgment);
    assert!(!config.maintenance.link_acknowledgment);

    assert_eq!(config.queue.max_network_queue_size, 400);
    assert_eq!(config.queue.num_priority_queues, 2);

    assert_eq!(config.discovery.rreq_retries, 16);
    assert_eq!(config.discovery.non_prop_request_timeout, Duration::from_millis(30));
    assert_eq!(config.discovery.discovery_hop_limit, 255);
    assert_eq!(config.discovery.request_period, Duration::from_millis(500));
    assert_eq!(config.discovery.max_request_period, Duration::from_secs(10));
}

#[test]
fn test_invalid_settings_rejected() {
    let mut config = NodeConfig::default();
    config.maintenance.max_maint_len = 0;
    config.queue.num_priority_queues = 0;

    assert_eq!(
        config.validate(),
        vec![ConfigWarning::NoPriorityQueues, ConfigWarning::EmptyMaintainBuffer]
    );
    assert!(matches!(
        config.ensure_valid(),
        Err(NodeError::InvalidConfig(ConfigWarning::NoPriorityQueues))
    ));
}

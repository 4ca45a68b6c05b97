//! Maintenance and egress queue configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Buffer sizes, ack schemes and retry budgets for packet maintenance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Most packets waiting for a route
    pub max_send_buff_len: usize,
    /// How long a packet may wait for a route
    pub max_send_buff_time: Duration,
    /// Most packets awaiting acknowledgment
    pub max_maint_len: usize,
    /// How long a packet may await acknowledgment
    pub max_maint_time: Duration,
    /// Network-layer retransmissions before a link is declared broken
    pub max_maint_rexmt: u32,
    /// Most times one packet may be salvaged
    pub max_salvage_count: u8,
    /// Worst-case one-hop traversal time, the unit of retry backoff
    pub node_traversal_time: Duration,
    /// Use overheard forwarding as acknowledgment
    pub passive_acknowledgment: bool,
    pub passive_ack_timeout: Duration,
    pub try_passive_acks: u32,
    /// Use link-layer reports as acknowledgment
    pub link_acknowledgment: bool,
    pub link_ack_timeout: Duration,
    pub try_link_acks: u32,
    /// Added to armed network-ack timers while the egress queue is congested
    pub retrans_incr: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            max_send_buff_len: 64,
            max_send_buff_time: Duration::from_secs(30),
            max_maint_len: 50,
            max_maint_time: Duration::from_secs(30),
            max_maint_rexmt: 2,
            max_salvage_count: 15,
            node_traversal_time: Duration::from_millis(40),
            passive_acknowledgment: true,
            passive_ack_timeout: Duration::from_millis(100),
            try_passive_acks: 1,
            link_acknowledgment: false,
            link_ack_timeout: Duration::from_millis(100),
            try_link_acks: 1,
            retrans_incr: Duration::from_millis(20),
        }
    }
}

/// Egress queue limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Most frames per priority queue
    pub max_network_queue_size: usize,
    /// Longest a frame may wait in a queue
    pub max_network_queue_delay: Duration,
    pub num_priority_queues: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_network_queue_size: 400,
            max_network_queue_delay: Duration::from_secs(30),
            num_priority_queues: 2,
        }
    }
}

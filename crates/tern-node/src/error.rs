//! Error types for the routing node

use thiserror::Error;

use crate::config::ConfigWarning;

/// Errors from node construction and the real-time driver
///
/// Per-packet failures never appear here; they are reported as
/// [`RoutingEvent::Dropped`](tern_core::RoutingEvent::Dropped).
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(ConfigWarning),

    /// The driver task is gone
    #[error("Node driver channel closed")]
    ChannelClosed,

    /// The driver task panicked or was aborted
    #[error("Node driver task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Result type for node operations
pub type NodeResult<T> = Result<T, NodeError>;

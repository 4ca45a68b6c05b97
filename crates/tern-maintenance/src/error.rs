//! Maintenance error types

use thiserror::Error;

/// Errors raised by the maintenance buffers and queues
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MaintenanceError {
    #[error("Queue full (max {max})")]
    QueueFull { max: usize },

    #[error("Packet already buffered")]
    Duplicate,
}

/// Result type for maintenance operations
pub type MaintenanceResult<T> = Result<T, MaintenanceError>;

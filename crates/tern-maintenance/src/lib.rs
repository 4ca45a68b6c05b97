//! # Tern Maintenance
//!
//! Everything a node holds on to between handing a packet down and knowing
//! its fate.
//!
//! ## Core Components
//!
//! - [`SendBuffer`] / [`ErrorBuffer`]: packets and route errors waiting for
//!   a route
//! - [`MaintainBuffer`]: transmitted packets waiting for acknowledgment,
//!   matched by [`NetworkKey`], [`PassiveKey`] or [`LinkKey`]
//! - [`PassiveBuffer`]: overheard packets, used to recognise passive acks
//! - [`RetryScheduler`]: keyed timers; one timer per key, re-arming replaces
//! - [`PriorityScheduler`]: per-class [`NetworkQueue`]s every egress frame
//!   passes through
//!
//! All structures take the current time as an argument and never read a
//! clock themselves.

pub mod config;
pub mod error;
pub mod error_buffer;
pub mod keys;
pub mod maintain;
pub mod passive;
pub mod queue;
pub mod retry;
pub mod send_buffer;

// Re-export main types
pub use config::{MaintenanceConfig, QueueConfig};
pub use error::{MaintenanceError, MaintenanceResult};
pub use error_buffer::{ErrorBuffer, ErrorBufferEntry};
pub use keys::{LinkKey, NetworkKey, PassiveKey};
pub use maintain::{MaintainBuffer, MaintainBufferEntry};
pub use passive::{PassiveBuffer, PassiveBufferEntry};
pub use queue::{CONGESTION_THRESHOLD, NetworkQueue, NetworkQueueEntry, PriorityScheduler};
pub use retry::RetryScheduler;
pub use send_buffer::{SendBuffer, SendBufferEntry};

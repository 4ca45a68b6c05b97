//! # Tern Node
//!
//! The DSR routing node: route discovery, packet maintenance and route
//! error handling tied together into one state machine.
//!
//! This crate provides [`RoutingNode`], which owns:
//! - A route cache and request table (`tern-routing`)
//! - Send, error, maintain and passive buffers (`tern-maintenance`)
//! - The egress priority queues every frame leaves through
//! - One keyed timer scheduler for retries, discovery backoff and jitter
//!
//! The node never reads a wall clock or spawns tasks itself. A
//! discrete-event simulation drives it with a [`ManualClock`], and the
//! [`driver`] module runs it on tokio against a [`SystemClock`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use tern_node::{NodeConfig, RoutingNode};
//!
//! let mut node = RoutingNode::new(address, NodeConfig::default(), clock, topology, link);
//! node.send(Datagram::new(id, address, dst, 17, payload))?;
//! while let Some(at) = node.next_deadline() {
//!     clock.set(at);
//!     node.handle_timers();
//! }
//! for event in node.drain_events() {
//!     println!("{event:?}");
//! }
//! ```
//!
//! [`ManualClock`]: tern_core::ManualClock
//! [`SystemClock`]: tern_core::SystemClock

mod config;
pub mod driver;
mod error;
mod node;
mod stats;

pub use config::{ConfigWarning, DiscoveryConfig, NodeConfig};
pub use driver::{NodeCommand, NodeHandle};
pub use error::{NodeError, NodeResult};
pub use node::{RoutingNode, SendOutcome, link_ack_for};
pub use stats::{DropCounts, NodeStats};

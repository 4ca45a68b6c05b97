//! # Tern Core
//!
//! Core traits, types, and errors for the Tern reactive routing stack.
//!
//! Tern discovers and maintains multi-hop source routes between nodes of a
//! mobile ad-hoc network. This crate holds the vocabulary every other crate
//! shares, and the seams through which a routing node talks to the world
//! around it, so the same node runs inside a discrete-event simulation or on
//! a real link.
//!
//! ## Key Traits
//!
//! - [`Clock`]: Virtual time source ([`ManualClock`] for simulation, [`SystemClock`] for real time)
//! - [`TopologyView`]: Address / node-id / MAC translation
//! - [`LinkLayer`]: Transmission onto the medium
//!
//! ## Key Types
//!
//! - [`Address`]: Totally ordered 4-byte node address
//! - [`Timestamp`]: Microsecond virtual time
//! - [`Frame`] / [`Datagram`]: Link and upper-layer packet envelopes
//! - [`RoutingEvent`]: Everything a node reports about its packets

pub mod address;
pub mod error;
pub mod event;
pub mod packet;
pub mod time;
pub mod traits;

// Re-export main types
pub use address::*;
pub use error::*;
pub use event::*;
pub use packet::*;
pub use time::*;
pub use traits::*;

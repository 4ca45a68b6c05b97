//! Routing events
//!
//! A node reports everything observable about its packets through
//! [`RoutingEvent`]s: deliveries to the upper layer, drops with their
//! reason, and route lifecycle changes.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::RoutingError;
use crate::packet::PacketId;
use crate::time::Timestamp;

/// Events emitted by a routing node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingEvent {
    /// A packet reached this node and was handed to the upper layer
    Delivered {
        id: PacketId,
        source: Address,
        protocol: u8,
        payload: Bytes,
        at: Timestamp,
    },

    /// A packet was dropped
    Dropped {
        id: Option<PacketId>,
        destination: Address,
        reason: RoutingError,
        at: Timestamp,
    },

    /// A route request was broadcast for a destination
    DiscoveryStarted {
        destination: Address,
        /// `false` for the one-hop non-propagating probe
        propagating: bool,
        at: Timestamp,
    },

    /// A route reply installed a route to a destination
    RouteDiscovered {
        destination: Address,
        hops: usize,
        at: Timestamp,
    },

    /// A next hop was declared unreachable
    LinkBroken { next_hop: Address, at: Timestamp },

    /// A route error was transmitted toward `error_destination`
    RouteErrorSent {
        unreachable: Address,
        error_destination: Address,
        at: Timestamp,
    },

    /// A packet was re-issued along an alternative route
    Salvaged {
        id: PacketId,
        destination: Address,
        salvage: u8,
        at: Timestamp,
    },
}

impl RoutingEvent {
    /// Virtual time at which the event happened
    pub fn at(&self) -> Timestamp {
        match self {
            Self::Delivered { at, .. }
            | Self::Dropped { at, .. }
            | Self::DiscoveryStarted { at, .. }
            | Self::RouteDiscovered { at, .. }
            | Self::LinkBroken { at, .. }
            | Self::RouteErrorSent { at, .. }
            | Self::Salvaged { at, .. } => *at,
        }
    }

    pub fn is_delivery(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    pub fn is_drop(&self) -> bool {
        matches!(self, Self::Dropped { .. })
    }
}

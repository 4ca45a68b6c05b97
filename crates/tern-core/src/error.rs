//! Error types for the Tern routing stack

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::Address;

/// Top-level error type for Tern
#[derive(Debug, Error)]
pub enum TernError {
    #[error("Address error: {0}")]
    Address(#[from] AddressError),

    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Errors related to node addressing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("Invalid address format: {0}")]
    InvalidFormat(String),

    #[error("No node id known for address {0}")]
    UnknownAddress(Address),

    #[error("No address known for node id {0}")]
    UnknownNodeId(u16),
}

/// Per-packet and per-route routing failures
///
/// None of these are fatal to a node. They describe why a packet was
/// dropped or why a route was torn down, and travel inside
/// [`RoutingEvent::Dropped`](crate::RoutingEvent::Dropped).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum RoutingError {
    #[error("No route available to destination")]
    NoRoute,

    #[error("Route discovery exhausted after {attempts} requests")]
    DiscoveryExhausted { attempts: u32 },

    #[error("Link to next hop {next_hop} is broken")]
    LinkBroken { next_hop: Address },

    #[error("Acknowledgment timed out after {retries} retries")]
    AckTimeout { retries: u32 },

    #[error("Salvage limit reached (salvaged {salvage} times)")]
    SalvageExhausted { salvage: u8 },

    #[error("Unsupported option type {0}")]
    UnsupportedOption(u8),

    #[error("Buffer overflow")]
    BufferOverflow,

    #[error("Packet expired in buffer")]
    Expired,

    #[error("Network queue full")]
    QueueFull,

    #[error("Malformed source route")]
    InvalidSourceRoute,

    #[error("Invalid destination {0}")]
    InvalidDestination(Address),
}

/// Errors related to protocol framing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("Malformed packet: {0}")]
    Malformed(String),
}

/// Result type alias using TernError
pub type TernResult<T> = Result<T, TernError>;

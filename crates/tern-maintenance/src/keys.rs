//! Composite keys correlating an in-flight packet with its retry timer
//!
//! Each acknowledgment scheme identifies a packet by a different subset of
//! its fields. A key must be matched in full; matching on a subset would
//! let an ack for one packet cancel another's timer.

use serde::{Deserialize, Serialize};
use tern_core::Address;

/// Identity of a packet awaiting an explicit network-layer ack
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NetworkKey {
    pub ack_id: u16,
    pub our_address: Address,
    pub next_hop: Address,
    pub source: Address,
    pub destination: Address,
}

/// Identity of a packet awaiting a passive (overheard) ack
///
/// `segments_left` is the value we transmitted; the next hop forwards the
/// packet with one less.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PassiveKey {
    pub source: Address,
    pub destination: Address,
    pub segments_left: u8,
}

/// Identity of a packet awaiting a link-layer ack
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkKey {
    pub source: Address,
    pub destination: Address,
    pub our_address: Address,
    pub next_hop: Address,
}

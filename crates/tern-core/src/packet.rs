//! Packet envelopes
//!
//! Two shapes of packet cross the routing core's boundary:
//!
//! - [`Datagram`]: what the upper layer hands down and gets delivered back
//! - [`Frame`]: what travels over the link layer, an IP-like envelope around
//!   the encoded DSR header, options and upper-layer payload
//!
//! Payloads are [`Bytes`], an immutable reference-counted snapshot, so a
//! packet held for retransmission can never be mutated behind the sender's
//! back.

use bytes::Bytes;
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::address::Address;

/// IP protocol number carried by frames holding a DSR header
pub const DSR_PROTOCOL: u8 = 48;

/// Default hop limit for originated data frames
pub const DEFAULT_TTL: u8 = 64;

/// Identification carried unchanged across every copy of a packet
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[display("#{_0}")]
pub struct PacketId(pub u64);

/// Egress priority class
///
/// The discriminant is the index of the class's network queue, lowest
/// index served first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    /// Discovery, replies, errors and acks
    Control = 0,
    /// Source-routed upper-layer data
    Data = 1,
}

impl Priority {
    /// Queue index for this class
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Network-layer envelope fields of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpMeta {
    /// Identification, preserved when the packet is forwarded
    pub id: PacketId,
    /// Transmitting node for this hop
    pub source: Address,
    /// Intended receiver for this hop, or [`Address::BROADCAST`]
    pub destination: Address,
    /// Remaining hop budget
    pub ttl: u8,
    /// Upper protocol number; [`DSR_PROTOCOL`] for routed frames
    pub protocol: u8,
}

/// A frame handed to or received from the link layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub ip: IpMeta,
    /// Encoded DSR fixed header, options and upper-layer payload
    pub data: Bytes,
}

impl Frame {
    pub fn new(ip: IpMeta, data: Bytes) -> Self {
        Self { ip, data }
    }

    /// Total size on the link
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// An upper-layer packet travelling end to end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datagram {
    pub id: PacketId,
    pub source: Address,
    pub destination: Address,
    /// Upper-layer protocol number, carried in the DSR next-header field
    pub protocol: u8,
    pub payload: Bytes,
}

impl Datagram {
    pub fn new(
        id: PacketId,
        source: Address,
        destination: Address,
        protocol: u8,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            id,
            source,
            destination,
            protocol,
            payload: payload.into(),
        }
    }
}

/// A link-layer acknowledgment report
///
/// Emitted when `next_hop` received a data frame that `our_address`
/// transmitted, so the transmitter can cancel its link retry timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkAck {
    /// Identification of the acknowledged frame
    pub id: PacketId,
    pub source: Address,
    pub destination: Address,
    pub our_address: Address,
    pub next_hop: Address,
}

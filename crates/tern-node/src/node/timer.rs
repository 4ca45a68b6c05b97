//! Timer keys and the work each timer carries

use tern_core::{Address, Frame, PacketId, Priority};
use tern_maintenance::{LinkKey, MaintainBufferEntry, NetworkKey, PassiveKey};
use tern_wire::UnreachableError;

/// Identity of a node timer
///
/// Arming a key that is already armed replaces its deadline and task, so
/// each key has at most one pending expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum TimerKey {
    /// Network-layer ack retry for a maintained packet
    Network(NetworkKey),
    /// Passive ack wait for a maintained packet
    ///
    /// Packets of one flow share a passive key, so the packet id keeps
    /// their timers apart.
    Passive(PassiveKey, PacketId),
    /// Link-layer ack wait for a maintained packet
    Link(LinkKey, PacketId),
    /// Wait for answers to the one-hop probe
    NonPropRequest(Address),
    /// Backoff before the next propagating request
    Request(Address),
    SendBufferCheck,
    Egress,
    /// One-shot delayed work
    Deferred(u64),
}

#[derive(Debug, Clone)]
pub(crate) enum TimerTask {
    /// Retransmit or give up on a maintained packet
    Retry {
        entry: MaintainBufferEntry,
        retries: u32,
    },
    /// Continue route discovery
    Discovery {
        protocol: u8,
        /// Route error to piggyback on the next request
        error: Option<UnreachableError>,
    },
    SendBufferCheck,
    Egress,
    /// Queue a frame after a jitter delay
    Transmit {
        frame: Frame,
        next_hop: Address,
        priority: Priority,
    },
    SendFromBuffer { destination: Address },
    SalvageNextHop { next_hop: Address },
    BreakNextHop { next_hop: Address },
}

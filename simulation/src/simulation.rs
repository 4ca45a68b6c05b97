//! Simulation engine for Tern
//!
//! Implements discrete-event simulation with:
//! - One real [`RoutingNode`] per mesh node, all sharing a [`ManualClock`]
//! - A medium that delivers frames to neighbors after a fixed propagation delay
//! - Overhearing, link-layer acks and transmit failures derived from the mesh
//! - Links that can be taken down and brought back mid-run
//!
//! The engine alternates between two sources of work: frames in flight,
//! kept in a time-ordered queue, and node timers, reported through
//! [`RoutingNode::next_deadline`]. Virtual time jumps straight to whichever
//! is earliest.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap};
use std::time::Duration;

use bytes::Bytes;
use tern_core::{
    Address, AddressBook, Clock, Datagram, Frame, LinkAck, LinkLayer, MacAddress, ManualClock,
    PacketId, RoutingError, RoutingEvent, Timestamp,
};
use tern_logging::NodeContextGuard;
use tern_node::{NodeConfig, RoutingNode, SendOutcome, link_ack_for};
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::topology::Mesh;

/// Upper protocol number stamped on datagrams injected by the simulation
pub const SIM_PROTOCOL: u8 = 17;

/// A routing node wired to the simulated medium
pub type SimNode = RoutingNode<ManualClock, AddressBook, SimLink>;

/// Errors raised by simulation control calls
#[derive(Debug, Error)]
pub enum SimError {
    #[error("unknown node: {0}")]
    UnknownNode(Address),

    #[error("node rejected datagram: {0}")]
    Routing(#[from] RoutingError),
}

pub type SimResult<T> = Result<T, SimError>;

/// Configuration for the simulation
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Configuration shared by every node
    pub node: NodeConfig,
    /// Time between a transmission and its arrival at neighbors
    pub propagation_delay: Duration,
    /// Let neighbors of a unicast transmitter overhear the frame
    pub promiscuous: bool,
    /// Report unicast frames sent over a missing link back to the sender
    pub tx_errors: bool,
    /// Base seed for the nodes' jitter sources
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            propagation_delay: Duration::from_millis(1),
            promiscuous: true,
            tx_errors: true,
            seed: 0,
        }
    }
}

/// Link layer that parks frames until the engine collects them
#[derive(Debug, Default)]
pub struct SimLink {
    outbox: Vec<(Frame, Address)>,
}

impl SimLink {
    /// Take every frame transmitted since the last call
    pub fn drain(&mut self) -> Vec<(Frame, Address)> {
        std::mem::take(&mut self.outbox)
    }

    pub fn pending(&self) -> usize {
        self.outbox.len()
    }
}

impl LinkLayer for SimLink {
    fn transmit(&mut self, frame: Frame, next_hop: Address) {
        self.outbox.push((frame, next_hop));
    }
}

/// A routing event tagged with the node that reported it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimEvent {
    pub node: Address,
    pub event: RoutingEvent,
}

/// Simulation statistics
#[derive(Debug, Clone, Default)]
pub struct SimStats {
    /// Datagrams accepted by their source node
    pub originated: u64,
    /// Datagrams delivered at least once
    pub delivered: u64,
    /// Deliveries of a datagram already delivered
    pub duplicates: u64,
    pub dropped: u64,
    /// Datagrams a source node refused
    pub rejected: u64,
    pub frames_sent: u64,
    /// Unicast frames sent over a link that was down
    pub frames_lost: u64,
    pub discoveries_started: u64,
    pub routes_discovered: u64,
    pub route_errors: u64,
    pub link_breaks: u64,
    pub salvaged: u64,
    /// Sum of first-delivery latencies
    pub total_latency: Duration,
}

impl SimStats {
    /// Fraction of originated datagrams that were delivered
    pub fn delivery_ratio(&self) -> f64 {
        if self.originated == 0 {
            0.0
        } else {
            self.delivered as f64 / self.originated as f64
        }
    }

    pub fn average_latency(&self) -> Option<Duration> {
        let delivered = u32::try_from(self.delivered).ok().filter(|d| *d > 0)?;
        Some(self.total_latency / delivered)
    }
}

#[derive(Debug)]
enum SimAction {
    /// A frame arrives at its receiver, or at any neighbor when broadcast
    Deliver { to: Address, frame: Frame },
    /// A neighbor of the transmitter overhears a unicast frame
    Overhear { to: Address, frame: Frame },
    LinkAck { to: Address, ack: LinkAck },
    TxError { to: Address, mac: MacAddress },
    /// The upper layer of `from` hands over a datagram
    Send { from: Address, datagram: Datagram },
}

#[derive(Debug)]
struct Scheduled {
    at: Timestamp,
    seq: u64,
    action: SimAction,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        (self.at, self.seq) == (other.at, other.seq)
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

/// The simulation state
pub struct Simulation {
    /// The network mesh; edit through [`link_up`](Self::link_up) and
    /// [`link_down`](Self::link_down) while running
    mesh: Mesh,
    pub config: SimConfig,
    clock: ManualClock,
    book: AddressBook,
    nodes: BTreeMap<Address, SimNode>,
    queue: BinaryHeap<Reverse<Scheduled>>,
    next_seq: u64,
    next_packet: u64,
    /// Origination time of datagrams not yet delivered
    in_flight: BTreeMap<PacketId, Timestamp>,
    /// Global event log (all events)
    pub events: Vec<SimEvent>,
    pub stats: SimStats,
}

impl Simulation {
    /// Create a simulation with one routing node per mesh node
    pub fn new(mesh: Mesh, config: SimConfig) -> Self {
        let clock = ManualClock::new();
        let book = mesh.address_book();
        let nodes = mesh
            .nodes()
            .into_iter()
            .enumerate()
            .map(|(index, address)| {
                let _guard = NodeContextGuard::simulated(address);
                let node = RoutingNode::new(
                    address,
                    config.node.clone(),
                    clock.clone(),
                    book.clone(),
                    SimLink::default(),
                )
                .with_rng_seed(config.seed ^ index as u64);
                (address, node)
            })
            .collect();
        info!(
            nodes = mesh.node_count(),
            links = mesh.edge_count(),
            "simulation created"
        );

        Self {
            mesh,
            config,
            clock,
            book,
            nodes,
            queue: BinaryHeap::new(),
            next_seq: 0,
            next_packet: 1,
            in_flight: BTreeMap::new(),
            events: Vec::new(),
            stats: SimStats::default(),
        }
    }

    /// Current virtual time
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn node(&self, address: Address) -> Option<&SimNode> {
        self.nodes.get(&address)
    }

    /// Mutable node access, for seeding caches before a run
    pub fn node_mut(&mut self, address: Address) -> Option<&mut SimNode> {
        self.nodes.get_mut(&address)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SimNode> {
        self.nodes.values()
    }

    /// Hand a datagram from `from` to `to` to the source node right now
    pub fn send(
        &mut self,
        from: Address,
        to: Address,
        payload: impl Into<Bytes>,
    ) -> SimResult<PacketId> {
        let datagram = self.datagram(from, to, payload)?;
        let id = datagram.id;
        self.inject(from, datagram)?;
        Ok(id)
    }

    /// Schedule a datagram to be handed to `from` at a later time
    pub fn send_at(
        &mut self,
        at: Timestamp,
        from: Address,
        to: Address,
        payload: impl Into<Bytes>,
    ) -> SimResult<PacketId> {
        let datagram = self.datagram(from, to, payload)?;
        let id = datagram.id;
        self.schedule(at, SimAction::Send { from, datagram });
        Ok(id)
    }

    fn datagram(
        &mut self,
        from: Address,
        to: Address,
        payload: impl Into<Bytes>,
    ) -> SimResult<Datagram> {
        for address in [from, to] {
            if !self.nodes.contains_key(&address) {
                return Err(SimError::UnknownNode(address));
            }
        }
        let id = PacketId(self.next_packet);
        self.next_packet += 1;
        Ok(Datagram::new(id, from, to, SIM_PROTOCOL, payload))
    }

    fn inject(&mut self, from: Address, datagram: Datagram) -> SimResult<SendOutcome> {
        let now = self.now();
        let id = datagram.id;
        let node = self
            .nodes
            .get_mut(&from)
            .ok_or(SimError::UnknownNode(from))?;
        let outcome = {
            let _guard = NodeContextGuard::simulated(from);
            node.send(datagram)?
        };
        debug!(%from, %id, ?outcome, "datagram injected");
        self.stats.originated += 1;
        self.in_flight.insert(id, now);
        self.collect(from);
        Ok(outcome)
    }

    /// Bring a link up
    pub fn link_up(&mut self, a: Address, b: Address) -> SimResult<()> {
        self.check_nodes(a, b)?;
        info!(%a, %b, at = %self.now(), "link up");
        self.mesh.connect(a, b);
        Ok(())
    }

    /// Take a link down; frames already in flight still arrive
    pub fn link_down(&mut self, a: Address, b: Address) -> SimResult<()> {
        self.check_nodes(a, b)?;
        info!(%a, %b, at = %self.now(), "link down");
        self.mesh.disconnect(a, b);
        Ok(())
    }

    fn check_nodes(&self, a: Address, b: Address) -> SimResult<()> {
        match [a, b].into_iter().find(|n| !self.nodes.contains_key(n)) {
            Some(unknown) => Err(SimError::UnknownNode(unknown)),
            None => Ok(()),
        }
    }

    /// Run for a span of virtual time
    pub fn run_for(&mut self, duration: Duration) {
        let until = self.now() + duration;
        self.run_until(until);
    }

    /// Process everything due up to and including `until`
    pub fn run_until(&mut self, until: Timestamp) {
        while let Some(at) = self.next_instant().filter(|at| *at <= until) {
            self.clock.set(at);
            self.step();
        }
        self.clock.set(until);
    }

    fn next_instant(&mut self) -> Option<Timestamp> {
        let queued = self.queue.peek().map(|Reverse(top)| top.at);
        let timers = self
            .nodes
            .values_mut()
            .filter_map(|node| node.next_deadline())
            .min();
        queued.into_iter().chain(timers).min()
    }

    /// Run every action and timer due at the current instant
    fn step(&mut self) {
        let now = self.now();
        trace!(at = %now, "step");
        while self.queue.peek().is_some_and(|Reverse(top)| top.at <= now) {
            if let Some(Reverse(scheduled)) = self.queue.pop() {
                self.apply(scheduled.action);
            }
        }

        let due: Vec<Address> = self
            .nodes
            .iter_mut()
            .filter_map(|(address, node)| {
                node.next_deadline()
                    .is_some_and(|d| d <= now)
                    .then_some(*address)
            })
            .collect();
        for address in due {
            self.with_node(address, |node| {
                node.handle_timers();
            });
        }
    }

    fn apply(&mut self, action: SimAction) {
        match action {
            SimAction::Deliver { to, frame } => self.with_node(to, |node| node.receive(frame)),
            SimAction::Overhear { to, frame } => {
                self.with_node(to, |node| node.promiscuous_receive(frame))
            }
            SimAction::LinkAck { to, ack } => self.with_node(to, |node| node.link_ack(ack)),
            SimAction::TxError { to, mac } => self.with_node(to, |node| node.tx_error(mac)),
            SimAction::Send { from, datagram } => {
                let id = datagram.id;
                if let Err(e) = self.inject(from, datagram) {
                    debug!(%from, %id, error = %e, "scheduled datagram rejected");
                    self.stats.rejected += 1;
                }
            }
        }
    }

    fn with_node(&mut self, address: Address, f: impl FnOnce(&mut SimNode)) {
        let Some(node) = self.nodes.get_mut(&address) else {
            return;
        };
        {
            let _guard = NodeContextGuard::simulated(address);
            f(node);
        }
        self.collect(address);
    }

    /// Pick up the events and frames a node produced
    fn collect(&mut self, address: Address) {
        let Some(node) = self.nodes.get_mut(&address) else {
            return;
        };
        let events = node.drain_events();
        let frames = node.link_mut().drain();
        for event in events {
            self.record(address, event);
        }
        for (frame, next_hop) in frames {
            self.transmit(address, frame, next_hop);
        }
    }

    /// Put a frame on the medium
    fn transmit(&mut self, from: Address, frame: Frame, next_hop: Address) {
        let at = self.now() + self.config.propagation_delay;
        self.stats.frames_sent += 1;

        if next_hop.is_broadcast() {
            let neighbors: Vec<Address> = self.mesh.neighbors(from).collect();
            for to in neighbors {
                self.schedule(
                    at,
                    SimAction::Deliver {
                        to,
                        frame: frame.clone(),
                    },
                );
            }
            return;
        }

        if !self.mesh.are_connected(from, next_hop) {
            trace!(%from, to = %next_hop, id = %frame.ip.id, "frame lost");
            self.stats.frames_lost += 1;
            if self.config.tx_errors {
                let mac = MacAddress::derived_from(next_hop);
                self.schedule(at, SimAction::TxError { to: from, mac });
            }
            return;
        }

        if self.config.node.maintenance.link_acknowledgment {
            if let Some(ack) = link_ack_for(&frame, next_hop, &self.book) {
                self.schedule(at, SimAction::LinkAck { to: from, ack });
            }
        }
        if self.config.promiscuous {
            let overhearing: Vec<Address> = self
                .mesh
                .neighbors(from)
                .filter(|n| *n != next_hop)
                .collect();
            self.schedule(
                at,
                SimAction::Deliver {
                    to: next_hop,
                    frame: frame.clone(),
                },
            );
            for to in overhearing {
                self.schedule(
                    at,
                    SimAction::Overhear {
                        to,
                        frame: frame.clone(),
                    },
                );
            }
        } else {
            self.schedule(at, SimAction::Deliver { to: next_hop, frame });
        }
    }

    fn schedule(&mut self, at: Timestamp, action: SimAction) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(Scheduled { at, seq, action }));
    }

    fn record(&mut self, node: Address, event: RoutingEvent) {
        match &event {
            RoutingEvent::Delivered { id, source, at, .. } => {
                match self.in_flight.remove(id) {
                    Some(sent) => {
                        let latency = at.saturating_duration_since(sent);
                        self.stats.delivered += 1;
                        self.stats.total_latency += latency;
                        info!(%node, %id, %source, ?latency, "datagram delivered");
                    }
                    None => {
                        self.stats.duplicates += 1;
                        debug!(%node, %id, "duplicate delivery");
                    }
                }
            }
            RoutingEvent::Dropped {
                id,
                destination,
                reason,
                ..
            } => {
                self.stats.dropped += 1;
                debug!(%node, ?id, dst = %destination, %reason, "packet dropped");
            }
            RoutingEvent::DiscoveryStarted { .. } => self.stats.discoveries_started += 1,
            RoutingEvent::RouteDiscovered { .. } => self.stats.routes_discovered += 1,
            RoutingEvent::LinkBroken { next_hop, .. } => {
                self.stats.link_breaks += 1;
                debug!(%node, %next_hop, "link broken");
            }
            RoutingEvent::RouteErrorSent { .. } => self.stats.route_errors += 1,
            RoutingEvent::Salvaged { .. } => self.stats.salvaged += 1,
        }
        self.events.push(SimEvent { node, event });
    }

    /// Events reported by one node, oldest first
    pub fn events_at(&self, node: Address) -> impl Iterator<Item = &RoutingEvent> {
        self.events
            .iter()
            .filter(move |e| e.node == node)
            .map(|e| &e.event)
    }

    /// Whether a datagram reached its destination
    pub fn was_delivered(&self, id: PacketId) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e.event, RoutingEvent::Delivered { id: got, .. } if got == id))
    }

    /// Get a summary of the current state
    pub fn state_summary(&self) -> String {
        let buffered: usize = self.nodes.values().map(SimNode::send_buffer_len).sum();
        let maintained: usize = self.nodes.values().map(SimNode::maintain_buffer_len).sum();
        format!(
            "{}: {} delivered / {} sent, {} buffered, {} awaiting ack, {} frames in flight",
            self.now(),
            self.stats.delivered,
            self.stats.originated,
            buffered,
            maintained,
            self.queue.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{MeshBuilder, from_edges};

    fn addr(index: u16) -> Address {
        Address::from_index(index)
    }

    #[test]
    fn test_direct_delivery() {
        let mesh = MeshBuilder::new(2).full_mesh();
        let mut sim = Simulation::new(mesh, SimConfig::default());

        let id = sim.send(addr(0), addr(1), vec![1, 2, 3]).unwrap();
        sim.run_for(Duration::from_secs(2));

        assert!(sim.was_delivered(id));
        assert_eq!(sim.stats.delivered, 1);
        assert_eq!(sim.stats.delivery_ratio(), 1.0);
        assert!(sim.stats.average_latency().is_some());
    }

    #[test]
    fn test_relay_delivery() {
        // 0 - 1 - 2 (line)
        let mesh = MeshBuilder::new(3).line();
        let mut sim = Simulation::new(mesh, SimConfig::default());

        let id = sim.send(addr(0), addr(2), b"hello".to_vec()).unwrap();
        sim.run_for(Duration::from_secs(3));

        assert!(sim.was_delivered(id));
        let delivered_at_2 = sim
            .events_at(addr(2))
            .any(|e| matches!(e, RoutingEvent::Delivered { source, .. } if *source == addr(0)));
        assert!(delivered_at_2);
    }

    #[test]
    fn test_unknown_node_rejected() {
        let mut sim = Simulation::new(from_edges(&[(0, 1)]), SimConfig::default());
        assert!(matches!(
            sim.send(addr(0), addr(9), vec![]),
            Err(SimError::UnknownNode(a)) if a == addr(9)
        ));
        assert!(sim.link_up(addr(0), addr(9)).is_err());
        assert_eq!(sim.stats.originated, 0);
    }

    #[test]
    fn test_send_to_self_is_routing_error() {
        let mut sim = Simulation::new(from_edges(&[(0, 1)]), SimConfig::default());
        assert!(matches!(
            sim.send(addr(0), addr(0), vec![]),
            Err(SimError::Routing(RoutingError::InvalidDestination(_)))
        ));
    }

    #[test]
    fn test_run_until_advances_clock() {
        let mut sim = Simulation::new(MeshBuilder::new(2).line(), SimConfig::default());
        sim.run_until(Timestamp::from_millis(250));
        assert_eq!(sim.now(), Timestamp::from_millis(250));
        sim.run_for(Duration::from_millis(50));
        assert_eq!(sim.now(), Timestamp::from_millis(300));
        assert_eq!(sim.stats.frames_sent, 0);
    }

    #[test]
    fn test_scheduled_send_fires_later() {
        let mut sim = Simulation::new(MeshBuilder::new(2).line(), SimConfig::default());
        let id = sim
            .send_at(Timestamp::from_secs(1), addr(1), addr(0), vec![7])
            .unwrap();

        sim.run_until(Timestamp::from_millis(900));
        assert_eq!(sim.stats.originated, 0);

        sim.run_for(Duration::from_secs(2));
        assert_eq!(sim.stats.originated, 1);
        assert!(sim.was_delivered(id));
    }

    #[test]
    fn test_frames_over_missing_link_are_lost() {
        let mut sim = Simulation::new(MeshBuilder::new(2).line(), SimConfig::default());
        sim.node_mut(addr(0))
            .unwrap()
            .route_cache_mut()
            .add_path(&[addr(0), addr(1)], Timestamp::ZERO);
        sim.link_down(addr(0), addr(1)).unwrap();

        let id = sim.send(addr(0), addr(1), vec![1]).unwrap();
        sim.run_for(Duration::from_secs(1));

        assert!(!sim.was_delivered(id));
        assert!(sim.stats.frames_lost >= 1);
        assert!(
            sim.events_at(addr(0))
                .any(|e| matches!(e, RoutingEvent::LinkBroken { next_hop, .. } if *next_hop == addr(1)))
        );
    }
}

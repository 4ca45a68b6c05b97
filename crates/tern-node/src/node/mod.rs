//! The routing node state machine
//!
//! A [`RoutingNode`] owns every table and buffer of one DSR node and is
//! driven entirely from outside: the upper layer calls [`send`], the link
//! layer calls [`receive`], [`promiscuous_receive`], [`link_ack`] and
//! [`tx_error`], and whoever owns the clock calls [`handle_timers`] once
//! [`next_deadline`] has passed. Nothing here blocks or spawns.
//!
//! The work is split across submodules:
//!
//! - `discovery`: route requests and their backoff
//! - `receive`: option dispatch for inbound and overheard frames
//! - `maintenance`: acknowledgment schemes, salvage and route errors
//! - `timer`: timer keys and the tasks they carry
//!
//! [`send`]: RoutingNode::send
//! [`receive`]: RoutingNode::receive
//! [`promiscuous_receive`]: RoutingNode::promiscuous_receive
//! [`link_ack`]: RoutingNode::link_ack
//! [`tx_error`]: RoutingNode::tx_error
//! [`handle_timers`]: RoutingNode::handle_timers
//! [`next_deadline`]: RoutingNode::next_deadline

mod discovery;
mod maintenance;
mod receive;
mod timer;

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tern_core::{
    Address, BROADCAST_NODE_ID, Clock, DSR_PROTOCOL, Datagram, Frame, IpMeta, LinkLayer,
    PacketId, Priority, RoutingError, RoutingEvent, Timestamp, TopologyView,
};
use tern_maintenance::{
    ErrorBuffer, MaintainBuffer, MaintenanceError, NetworkQueueEntry, PassiveBuffer,
    PriorityScheduler, RetryScheduler, SendBuffer,
};
use tern_routing::{GratuitousReplyTable, NeighborTable, RequestTable, RouteCache};
use tern_wire::{DsrPacket, SourceRoute};
use tracing::{debug, instrument, trace, warn};

use crate::config::NodeConfig;
use crate::stats::NodeStats;
use timer::{TimerKey, TimerTask};

pub use maintenance::link_ack_for;

/// Upper bound of the spacing between two egress transmissions
const EGRESS_JITTER: Duration = Duration::from_micros(1_000);

/// Upper bound of the spacing between consecutive sends from a buffer
const BUFFER_SEND_JITTER: Duration = Duration::from_millis(100);

/// What happened to a datagram handed to [`RoutingNode::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// A cached route was found and the packet is on its way
    Routed,
    /// No route yet; the packet waits in the send buffer
    Buffered,
    /// The same packet was already waiting in the send buffer
    AlreadyBuffered,
}

/// One DSR node
pub struct RoutingNode<C: Clock, T: TopologyView, L: LinkLayer> {
    address: Address,
    config: NodeConfig,
    clock: C,
    topology: T,
    link: L,

    cache: RouteCache,
    requests: RequestTable,
    gratuitous: GratuitousReplyTable,

    send_buffer: SendBuffer,
    error_buffer: ErrorBuffer,
    maintain_buffer: MaintainBuffer,
    passive_buffer: PassiveBuffer,
    egress: PriorityScheduler,

    timers: RetryScheduler<TimerKey, TimerTask>,
    next_deferred: u64,
    next_control_seq: u32,
    rng: StdRng,

    events: Vec<RoutingEvent>,
    stats: NodeStats,
}

impl<C: Clock, T: TopologyView, L: LinkLayer> RoutingNode<C, T, L> {
    /// Create a node
    ///
    /// The random source used for jitter is seeded from the address, so a
    /// simulation replays identically. Use [`with_rng_seed`] to vary it.
    ///
    /// [`with_rng_seed`]: RoutingNode::with_rng_seed
    pub fn new(address: Address, config: NodeConfig, clock: C, topology: T, link: L) -> Self {
        let m = &config.maintenance;
        let mut node = Self {
            address,
            cache: RouteCache::new(address, config.route_cache.clone()),
            requests: RequestTable::new(config.request_table.clone()),
            gratuitous: GratuitousReplyTable::new(config.discovery.gra_reply_table_size),
            send_buffer: SendBuffer::new(m.max_send_buff_len, m.max_send_buff_time),
            error_buffer: ErrorBuffer::new(m.max_send_buff_len, m.max_send_buff_time),
            maintain_buffer: MaintainBuffer::new(m.max_maint_len, m.max_maint_time),
            passive_buffer: PassiveBuffer::new(m.max_send_buff_len, m.max_send_buff_time),
            egress: PriorityScheduler::new(&config.queue),
            timers: RetryScheduler::new(),
            next_deferred: 0,
            next_control_seq: 0,
            rng: StdRng::seed_from_u64(u64::from(address.to_u32())),
            events: Vec::new(),
            stats: NodeStats::default(),
            config,
            clock,
            topology,
            link,
        };
        let first_check = node.now() + node.config.discovery.send_buff_interval;
        node.timers
            .arm(TimerKey::SendBufferCheck, first_check, TimerTask::SendBufferCheck);
        debug!(node = %address, cache = ?node.config.route_cache.cache_type, "routing node created");
        node
    }

    /// Reseed the jitter source
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Hand an upper-layer datagram to the node
    ///
    /// Returns an error only for destinations that can never be routed:
    /// this node itself and the broadcast address.
    #[instrument(skip(self, datagram), fields(node = %self.address, dst = %datagram.destination, id = %datagram.id))]
    pub fn send(&mut self, datagram: Datagram) -> Result<SendOutcome, RoutingError> {
        let dst = datagram.destination;
        if dst == self.address || dst.is_broadcast() {
            return Err(RoutingError::InvalidDestination(dst));
        }
        let now = self.now();
        self.housekeeping(now);
        self.stats.originated += 1;

        if let Some(route) = self.cache.lookup(dst, now) {
            self.stats.cache_hits += 1;
            trace!(hops = route.hops(), "route cache hit");
            self.send_data(datagram, route.into_path(), 0);
            return Ok(SendOutcome::Routed);
        }
        self.stats.cache_misses += 1;

        let protocol = datagram.protocol;
        match self.send_buffer.enqueue(datagram, now) {
            Ok(None) => {}
            Ok(Some(displaced)) => {
                self.drop_packet(
                    Some(displaced.id),
                    displaced.destination,
                    RoutingError::BufferOverflow,
                );
            }
            Err(MaintenanceError::Duplicate) => return Ok(SendOutcome::AlreadyBuffered),
            Err(e) => {
                warn!(error = %e, "send buffer rejected packet");
                return Err(RoutingError::BufferOverflow);
            }
        }

        if !self.discovering(dst) {
            self.send_initial_request(dst, protocol);
        }
        Ok(SendOutcome::Buffered)
    }

    /// Earliest time at which [`handle_timers`](Self::handle_timers) has work
    pub fn next_deadline(&mut self) -> Option<Timestamp> {
        self.timers.next_deadline()
    }

    /// Run every timer due at the current time
    ///
    /// Timers armed for the current instant by the work done here run in
    /// the same call. Returns the number of timers that fired.
    #[instrument(skip(self), fields(node = %self.address))]
    pub fn handle_timers(&mut self) -> usize {
        let now = self.now();
        self.housekeeping(now);
        let mut fired = 0;
        while let Some((key, task)) = self.timers.pop_expired(now) {
            fired += 1;
            self.dispatch(key, task);
        }
        fired
    }

    fn dispatch(&mut self, key: TimerKey, task: TimerTask) {
        trace!(?key, "timer fired");
        match task {
            TimerTask::Retry { entry, retries } => match key {
                TimerKey::Network(_) => self.network_ack_expired(entry, retries),
                TimerKey::Passive(..) => self.passive_ack_expired(entry, retries),
                TimerKey::Link(..) => self.link_ack_expired(entry, retries),
                other => warn!(key = ?other, "retry task on a non-ack timer"),
            },
            TimerTask::Discovery { protocol, error } => match key {
                TimerKey::NonPropRequest(dst) | TimerKey::Request(dst) => {
                    self.discovery_expired(dst, protocol, error)
                }
                other => warn!(key = ?other, "discovery task on a non-discovery timer"),
            },
            TimerTask::SendBufferCheck => self.check_send_buffer(),
            TimerTask::Egress => self.service_egress(),
            TimerTask::Transmit {
                frame,
                next_hop,
                priority,
            } => self.transmit(frame, next_hop, priority),
            TimerTask::SendFromBuffer { destination } => self.send_packet_from_buffer(destination),
            TimerTask::SalvageNextHop { next_hop } => self.salvage_next_hop(next_hop),
            TimerTask::BreakNextHop { next_hop } => self.break_next_hop_step(next_hop),
        }
    }

    /// Take every event recorded since the last call
    pub fn drain_events(&mut self) -> Vec<RoutingEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn route_cache(&self) -> &RouteCache {
        &self.cache
    }

    /// Mutable cache access, for seeding routes
    pub fn route_cache_mut(&mut self) -> &mut RouteCache {
        &mut self.cache
    }

    pub fn request_table(&self) -> &RequestTable {
        &self.requests
    }

    /// Shared neighbor table handle
    pub fn neighbors(&self) -> NeighborTable {
        self.cache.neighbors().clone()
    }

    pub fn send_buffer_len(&self) -> usize {
        self.send_buffer.len()
    }

    pub fn error_buffer_len(&self) -> usize {
        self.error_buffer.len()
    }

    pub fn maintain_buffer_len(&self) -> usize {
        self.maintain_buffer.len()
    }

    pub fn egress_len(&self) -> usize {
        self.egress.total_len()
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn topology(&self) -> &T {
        &self.topology
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Expire buffered state
    fn housekeeping(&mut self, now: Timestamp) {
        for datagram in self.send_buffer.purge(now) {
            self.drop_packet(Some(datagram.id), datagram.destination, RoutingError::Expired);
        }
        let stale_errors = self.error_buffer.purge(now);
        if stale_errors > 0 {
            debug!(count = stale_errors, "expired buffered route errors");
        }
        for entry in self.maintain_buffer.purge(now) {
            self.drop_packet(Some(entry.frame.ip.id), entry.destination, RoutingError::Expired);
        }
        self.passive_buffer.purge(now);
        self.requests.purge(now);
        self.gratuitous.purge(now);
        self.cache.purge(now);
    }

    fn emit(&mut self, event: RoutingEvent) {
        self.events.push(event);
    }

    fn drop_packet(&mut self, id: Option<PacketId>, destination: Address, reason: RoutingError) {
        debug!(id = ?id, dst = %destination, reason = %reason, "dropping packet");
        self.stats.dropped.record(&reason);
        let at = self.now();
        self.emit(RoutingEvent::Dropped {
            id,
            destination,
            reason,
            at,
        });
    }

    /// Fresh identification for a control packet this node originates
    fn next_control_id(&mut self) -> PacketId {
        self.next_control_seq = self.next_control_seq.wrapping_add(1);
        PacketId(u64::from(self.address.to_u32()) << 32 | u64::from(self.next_control_seq))
    }

    fn node_id(&self, address: Address) -> u16 {
        self.topology.node_id(address).unwrap_or_else(|| {
            warn!(address = %address, "address has no node id");
            BROADCAST_NODE_ID
        })
    }

    /// Originator of a packet, from the header's source id
    fn originator(&self, packet: &DsrPacket) -> Address {
        self.topology
            .address_of(packet.source_id)
            .filter(|a| !a.is_broadcast())
            .or_else(|| {
                packet
                    .source_route()
                    .and_then(|sr: &SourceRoute| sr.addresses.first().copied())
            })
            .unwrap_or(Address::UNSPECIFIED)
    }

    fn jitter(&mut self, max: Duration) -> Duration {
        let max = u64::try_from(max.as_micros()).unwrap_or(u64::MAX);
        Duration::from_micros(self.rng.random_range(0..=max))
    }

    /// Run `task` once after `delay`
    fn defer(&mut self, delay: Duration, task: TimerTask) {
        let key = TimerKey::Deferred(self.next_deferred);
        self.next_deferred = self.next_deferred.wrapping_add(1);
        let at = self.now() + delay;
        self.timers.arm(key, at, task);
    }

    /// Wrap an encoded DSR packet in a frame from this node
    fn build_frame(
        &self,
        packet: &DsrPacket,
        id: PacketId,
        next_hop: Address,
        ttl: u8,
    ) -> Option<Frame> {
        match packet.encode() {
            Ok(data) => {
                let ip = IpMeta {
                    id,
                    source: self.address,
                    destination: next_hop,
                    ttl,
                    protocol: DSR_PROTOCOL,
                };
                Some(Frame::new(ip, data))
            }
            Err(e) => {
                warn!(error = %e, "failed to encode DSR packet");
                None
            }
        }
    }

    /// Queue a freshly originated control packet
    fn send_control(&mut self, packet: DsrPacket, next_hop: Address, ttl: u8) {
        let id = self.next_control_id();
        if let Some(frame) = self.build_frame(&packet, id, next_hop, ttl) {
            self.transmit(frame, next_hop, Priority::Control);
        }
    }

    /// Report every frame that sat in the egress queue too long
    fn discard_stale_frames(&mut self, now: Timestamp) {
        for stale in self.egress.cleanup(now) {
            self.drop_packet(Some(stale.frame.ip.id), stale.next_hop, RoutingError::Expired);
        }
    }

    /// Hand a frame to the egress scheduler
    fn transmit(&mut self, frame: Frame, next_hop: Address, priority: Priority) {
        let now = self.now();
        self.discard_stale_frames(now);
        let id = frame.ip.id;
        let entry = NetworkQueueEntry::new(frame, next_hop, now);
        if let Err(e) = self.egress.enqueue(priority, entry) {
            debug!(error = %e, next_hop = %next_hop, "egress rejected frame");
            self.drop_packet(Some(id), next_hop, RoutingError::QueueFull);
            return;
        }
        if !self.timers.is_armed(&TimerKey::Egress) {
            self.timers.arm(TimerKey::Egress, now, TimerTask::Egress);
        }
    }

    /// Put the next queued frame on the medium
    fn service_egress(&mut self) {
        let now = self.now();
        self.discard_stale_frames(now);

        // Give retries toward congested next hops more time
        if self.egress.is_congested() {
            let busy = self.egress.data_next_hops();
            let keys: Vec<TimerKey> = self
                .timers
                .keys()
                .filter(|k| matches!(k, TimerKey::Network(n) if busy.contains(&n.next_hop)))
                .copied()
                .collect();
            let incr = self.config.maintenance.retrans_incr;
            for key in keys {
                self.timers.extend(&key, incr);
            }
        }

        if let Some((priority, entry)) = self.egress.dequeue() {
            trace!(
                id = %entry.frame.ip.id,
                next_hop = %entry.next_hop,
                ?priority,
                "transmitting frame"
            );
            self.stats.transmitted += 1;
            self.link.transmit(entry.frame, entry.next_hop);
        }

        if !self.egress.is_empty() {
            let delay = self.jitter(EGRESS_JITTER);
            self.timers.arm(TimerKey::Egress, now + delay, TimerTask::Egress);
        }
    }
}

impl<C, T, L> std::fmt::Debug for RoutingNode<C, T, L>
where
    C: Clock,
    T: TopologyView,
    L: LinkLayer,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingNode")
            .field("address", &self.address)
            .field("routes", &self.cache.len())
            .field("send_buffer", &self.send_buffer.len())
            .field("maintain_buffer", &self.maintain_buffer.len())
            .field("timers", &self.timers.len())
            .finish()
    }
}

//! Inbound frame processing
//!
//! Options are dispatched with one exhaustive match per frame. Data frames
//! are then delivered or forwarded along their source route.

use std::time::Duration;

use rand::Rng;
use tern_core::{
    Address, Clock, DEFAULT_TTL, DSR_PROTOCOL, Frame, IpMeta, LinkLayer, Priority, RoutingError,
    RoutingEvent, Timestamp, TopologyView,
};
use tern_maintenance::{MaintainBufferEntry, NetworkKey, PassiveBufferEntry, PassiveKey};
use tern_routing::{CacheType, route};
use tern_wire::option::{MAX_REQUEST_ADDRESSES, MAX_ROUTE_ADDRESSES};
use tern_wire::{
    Ack, AckRequest, DsrOption, DsrPacket, MessageType, RouteError, RouteReply, RouteRequest,
    UnsupportedError,
};
use tracing::{debug, instrument, trace, warn};

use super::RoutingNode;
use super::timer::{TimerKey, TimerTask};

impl<C: Clock, T: TopologyView, L: LinkLayer> RoutingNode<C, T, L> {
    /// Process a frame addressed to this node or broadcast
    #[instrument(skip(self, frame), fields(node = %self.address, id = %frame.ip.id, from = %frame.ip.source))]
    pub fn receive(&mut self, frame: Frame) {
        let now = self.now();
        self.note_neighbor(frame.ip.source, now);

        let packet = match DsrPacket::decode(&frame.data) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(error = %e, "dropping undecodable frame");
                return;
            }
        };

        for option in &packet.options {
            match option {
                DsrOption::Pad1 | DsrOption::PadN(_) => {}
                DsrOption::RouteRequest(rreq) => self.handle_request(&frame, &packet, rreq),
                DsrOption::RouteReply(rrep) => self.handle_reply(&frame, &packet, rrep),
                // A route error riding on a request is applied by the request handler
                DsrOption::RouteError(_) if packet.route_request().is_some() => {}
                DsrOption::RouteError(rerr) => self.handle_route_error(&frame, &packet, rerr),
                DsrOption::SourceRoute(_) => {}
                DsrOption::AckRequest(request) => self.send_ack(&frame, &packet, *request),
                DsrOption::Ack(ack) => self.handle_ack(&frame, *ack),
                DsrOption::Unknown { option_type, .. } => {
                    self.report_unsupported(*option_type, frame.ip.source)
                }
            }
        }

        if packet.message_type == MessageType::Data {
            self.receive_data(frame, packet);
        }
    }

    /// Process a frame overheard on the medium but addressed elsewhere
    ///
    /// Overhearing a neighbor forward a packet this node sent confirms it
    /// passively. Overhearing a packet whose route passes through this node
    /// further along triggers a gratuitous reply with the shorter route.
    pub fn promiscuous_receive(&mut self, frame: Frame) {
        let now = self.now();
        let transmitter = frame.ip.source;
        self.note_neighbor(transmitter, now);

        let Ok(packet) = DsrPacket::decode(&frame.data) else {
            return;
        };
        if packet.message_type != MessageType::Data {
            return;
        }
        let Some(sr) = packet.source_route() else {
            return;
        };
        let Some(destination) = sr.destination() else {
            return;
        };
        let originator = self.originator(&packet);

        let overheard = PassiveBufferEntry {
            id: frame.ip.id,
            source: originator,
            destination,
            transmitter,
            segments_left: sr.segments_left,
            expire: now + self.passive_buffer.timeout(),
        };
        if self.passive_buffer.enqueue(overheard, now) {
            if let Some(segments_left) = sr.segments_left.checked_add(1) {
                let key = PassiveKey {
                    source: originator,
                    destination,
                    segments_left,
                };
                if let Some(acked) = self.maintain_buffer.promisc_equal(&key, frame.ip.id) {
                    self.timers
                        .cancel(&TimerKey::Passive(acked.passive_key(), acked.frame.ip.id));
                    self.stats.passive_acks += 1;
                    trace!(id = %acked.frame.ip.id, next_hop = %transmitter, "passive ack");
                }
            }
        }

        if frame.ip.destination != self.address
            && route::contains_after(self.address, frame.ip.destination, &sr.addresses)
        {
            let addresses = sr.addresses.clone();
            self.send_gratuitous_reply(&addresses, originator, transmitter);
        }
    }

    fn note_neighbor(&mut self, neighbor: Address, now: Timestamp) {
        if neighbor == self.address || neighbor.is_broadcast() {
            return;
        }
        if let Some(mac) = self.topology.mac_of(neighbor) {
            self.cache.add_neighbor(neighbor, mac, now);
        }
    }

    /// Tell the originator it can skip the hops between `transmitter` and us
    fn send_gratuitous_reply(&mut self, path: &[Address], originator: Address, transmitter: Address) {
        let now = self.now();
        let holdoff = self.config.discovery.gra_reply_holdoff;
        if self
            .gratuitous
            .find_and_update(originator, transmitter, holdoff, now)
        {
            trace!(originator = %originator, "gratuitous reply held off");
            return;
        }
        if !self.gratuitous.add_entry(originator, transmitter, holdoff, now) {
            return;
        }

        let (Some(from), Some(to)) = (
            path.iter().position(|a| *a == transmitter),
            path.iter().position(|a| *a == self.address),
        ) else {
            return;
        };
        let mut shortened = path[..=from].to_vec();
        shortened.extend_from_slice(&path[to..]);
        let (Some(first), Some(last)) = (shortened.first().copied(), shortened.last().copied())
        else {
            return;
        };

        debug!(
            originator = %originator,
            hops = shortened.len() - 1,
            "sending gratuitous route reply"
        );
        let reply = DsrPacket::control(
            DSR_PROTOCOL,
            self.node_id(last),
            self.node_id(first),
            vec![DsrOption::RouteReply(RouteReply {
                addresses: shortened,
            })],
        );
        self.send_control(reply, transmitter, DEFAULT_TTL);
        self.stats.rrep_sent += 1;
    }

    fn handle_request(&mut self, frame: &Frame, packet: &DsrPacket, rreq: &RouteRequest) {
        let now = self.now();
        let own = self.address;
        let prev_hop = frame.ip.source;
        let Some(source) = rreq.addresses.first().copied() else {
            return;
        };
        if source == own {
            return;
        }
        if self.requests.find_unidirectional(prev_hop, now).is_some() {
            debug!(prev_hop = %prev_hop, "ignoring request over blacklisted link");
            return;
        }
        if self
            .requests
            .find_source_duplicate(source, rreq.target, rreq.id, now)
        {
            return;
        }
        if rreq.addresses.contains(&own) {
            return;
        }

        let mut walked = rreq.addresses.clone();
        walked.push(own);
        self.learn_reverse(&walked, now);

        if rreq.target == own {
            debug!(source = %source, hops = walked.len() - 1, "answering route request");
            let reply = DsrPacket::control(
                packet.next_header,
                self.node_id(own),
                self.node_id(source),
                vec![DsrOption::RouteReply(RouteReply { addresses: walked })],
            );
            self.send_control(reply, prev_hop, DEFAULT_TTL);
            self.stats.rrep_sent += 1;

            if self.send_buffer.find(source) {
                self.cancel_discovery(source);
                self.send_packet_from_buffer(source);
            }
            return;
        }

        if self.config.discovery.cached_replies && self.reply_from_cache(packet, rreq, prev_hop) {
            return;
        }

        if frame.ip.ttl == 0 {
            trace!(target = %rreq.target, "non-propagating request stops here");
            return;
        }
        if walked.len() > MAX_REQUEST_ADDRESSES {
            debug!(target = %rreq.target, "route request full, not forwarding");
            return;
        }

        let mut options = vec![DsrOption::RouteRequest(RouteRequest {
            id: rreq.id,
            target: rreq.target,
            addresses: walked,
        })];
        if let Some(RouteError::Unreachable(err)) = packet.route_error() {
            self.cache
                .delete_all_routes_including_link(err.error_source, err.unreachable, now);
            options.push(DsrOption::RouteError(RouteError::Unreachable(err.clone())));
        }
        let forwarded = DsrPacket::control(packet.next_header, packet.source_id, packet.dest_id, options);
        let Some(out) = self.forward_frame(&forwarded, frame, Address::BROADCAST) else {
            return;
        };
        let delay = self.jitter(self.config.discovery.broadcast_jitter);
        self.defer(
            delay,
            TimerTask::Transmit {
                frame: out,
                next_hop: Address::BROADCAST,
                priority: Priority::Control,
            },
        );
    }

    /// Answer a request on the target's behalf from the route cache
    ///
    /// Returns false when no usable route is cached; the request is then
    /// forwarded as usual.
    fn reply_from_cache(&mut self, packet: &DsrPacket, rreq: &RouteRequest, prev_hop: Address) -> bool {
        let now = self.now();
        let Some(cached) = self.cache.lookup(rreq.target, now) else {
            return false;
        };
        let cached = cached.into_path();
        if route::has_common_address(&rreq.addresses, &cached) {
            return false;
        }
        let mut full = rreq.addresses.clone();
        full.extend_from_slice(&cached);
        if full.len() > MAX_ROUTE_ADDRESSES {
            return false;
        }
        let Some(source) = full.first().copied() else {
            return false;
        };

        // Stagger replies so that nodes with shorter routes answer first
        let hops = cached.len().saturating_sub(1) as f64;
        let spread: f64 = self.rng.random();
        let factor = (hops - 1.0 + spread).max(0.0);
        let delay = Duration::from_secs_f64(
            self.config.maintenance.node_traversal_time.as_secs_f64() * 2.0 * factor,
        );

        debug!(target = %rreq.target, hops = full.len() - 1, delay = ?delay, "replying from route cache");
        let reply = DsrPacket::control(
            packet.next_header,
            self.node_id(self.address),
            self.node_id(source),
            vec![DsrOption::RouteReply(RouteReply { addresses: full })],
        );
        let id = self.next_control_id();
        let Some(frame) = self.build_frame(&reply, id, prev_hop, DEFAULT_TTL) else {
            return false;
        };
        self.stats.rrep_sent += 1;
        self.defer(
            delay,
            TimerTask::Transmit {
                frame,
                next_hop: prev_hop,
                priority: Priority::Control,
            },
        );
        true
    }

    fn handle_reply(&mut self, frame: &Frame, packet: &DsrPacket, rrep: &RouteReply) {
        let now = self.now();
        let own = self.address;
        let addresses = &rrep.addresses;
        if addresses.len() < 2 {
            return;
        }

        if addresses[0] == own {
            let route = route::remove_duplicates(addresses);
            let Some(dst) = route.last().copied() else {
                return;
            };
            if route.len() < 2 {
                return;
            }
            self.cache.add_path(&route, now);
            debug!(dst = %dst, hops = route.len() - 1, "route discovered");
            self.emit(RoutingEvent::RouteDiscovered {
                destination: dst,
                hops: route.len() - 1,
                at: now,
            });
            self.cancel_discovery(dst);
            self.send_packet_from_buffer(dst);
            self.flush_error_buffer(dst);
            return;
        }

        let onward = route::cut_route(addresses, own);
        let learned = match self.cache.cache_type() {
            CacheType::Link => addresses.clone(),
            CacheType::Path => onward.clone(),
        };
        if onward.len() >= 2 {
            self.cache.add_path(&learned, now);
        }
        if let Some(pos) = addresses.iter().position(|a| *a == own) {
            self.learn_reverse(&addresses[..=pos], now);
        }

        let Some(prev) = route::previous_hop(own, addresses) else {
            debug!("route reply does not list this node");
            return;
        };
        if let Some(out) = self.forward_frame(packet, frame, prev) {
            self.transmit(out, prev, Priority::Control);
        }
    }

    fn handle_route_error(&mut self, frame: &Frame, packet: &DsrPacket, rerr: &RouteError) {
        let now = self.now();
        let own = self.address;
        let at_destination = match packet.source_route() {
            Some(sr) => sr.segments_left == 0 && sr.destination() == Some(own),
            None => rerr.error_destination() == own,
        };

        match rerr {
            RouteError::Unreachable(err) => {
                debug!(
                    error_source = %err.error_source,
                    unreachable = %err.unreachable,
                    "route error received"
                );
                self.cache
                    .delete_all_routes_including_link(err.error_source, err.unreachable, now);
                if at_destination {
                    self.handle_error_at_source(err.clone());
                    return;
                }
            }
            RouteError::Unsupported(err) if at_destination => {
                warn!(
                    from = %err.error_source,
                    option_type = err.unsupported,
                    "neighbor does not support option"
                );
                return;
            }
            RouteError::Unsupported(_) => {}
        }

        self.forward_source_routed_control(frame, packet);
    }

    fn forward_source_routed_control(&mut self, frame: &Frame, packet: &DsrPacket) {
        match self.advance_source_route(frame, packet.clone()) {
            Ok((next, advanced)) => {
                if let Some(out) = self.forward_frame(&advanced, frame, next) {
                    self.transmit(out, next, Priority::Control);
                }
            }
            Err(reason) => debug!(reason = %reason, "cannot forward control packet"),
        }
    }

    fn send_ack(&mut self, frame: &Frame, packet: &DsrPacket, request: AckRequest) {
        let prev_hop = frame.ip.source;
        let ack = Ack {
            id: request.id,
            real_source: self.originator(packet),
            real_destination: packet
                .source_route()
                .and_then(|sr| sr.destination())
                .unwrap_or(self.address),
        };
        trace!(ack_id = ack.id, to = %prev_hop, "sending ack");
        let reply = DsrPacket::control(
            DSR_PROTOCOL,
            self.node_id(self.address),
            self.node_id(prev_hop),
            vec![DsrOption::Ack(ack)],
        );
        self.send_control(reply, prev_hop, 1);
        self.stats.acks_sent += 1;
    }

    fn handle_ack(&mut self, frame: &Frame, ack: Ack) {
        let now = self.now();
        self.cache.update_route_entry(ack.real_destination, now);
        let key = NetworkKey {
            ack_id: ack.id,
            our_address: self.address,
            next_hop: frame.ip.source,
            source: ack.real_source,
            destination: ack.real_destination,
        };
        self.timers.cancel(&TimerKey::Network(key));
        if self.maintain_buffer.network_equal(&key).is_some() {
            trace!(ack_id = ack.id, next_hop = %frame.ip.source, "network ack");
        }
    }

    /// Answer an option this node does not understand
    fn report_unsupported(&mut self, option_type: u8, from: Address) {
        let now = self.now();
        debug!(option_type, from = %from, "unsupported option");
        let Some(route) = self.cache.lookup(from, now) else {
            trace!(to = %from, "no route for option-not-supported error");
            return;
        };
        let error = RouteError::Unsupported(UnsupportedError {
            salvage: 0,
            error_source: self.address,
            error_destination: from,
            unsupported: u16::from(option_type),
        });
        self.send_route_error(error, route.into_path());
    }

    fn receive_data(&mut self, frame: Frame, packet: DsrPacket) {
        let Some(sr) = packet.source_route() else {
            debug!("data packet without source route");
            self.drop_packet(Some(frame.ip.id), self.address, RoutingError::InvalidSourceRoute);
            return;
        };
        let Some(destination) = sr.destination() else {
            self.drop_packet(Some(frame.ip.id), self.address, RoutingError::InvalidSourceRoute);
            return;
        };

        if sr.segments_left == 0 {
            if destination == self.address {
                self.deliver(&frame, packet);
            } else {
                self.drop_packet(Some(frame.ip.id), destination, RoutingError::InvalidSourceRoute);
            }
            return;
        }

        let originator = self.originator(&packet);
        let (next, advanced) = match self.advance_source_route(&frame, packet) {
            Ok(advanced) => advanced,
            Err(reason) => {
                self.drop_packet(Some(frame.ip.id), destination, reason);
                return;
            }
        };
        let segments_left = advanced.source_route().map_or(0, |sr| sr.segments_left);
        let Some(out) = self.forward_frame(&advanced, &frame, next) else {
            self.drop_packet(Some(frame.ip.id), destination, RoutingError::InvalidSourceRoute);
            return;
        };

        if let Some(onward) = advanced.source_route() {
            let now = self.now();
            let suffix = route::cut_route(&onward.addresses, self.address);
            if suffix.len() >= 2 {
                self.cache.use_extends(&suffix, now);
            }
        }

        trace!(next_hop = %next, dst = %destination, segments_left, "forwarding data packet");
        self.stats.forwarded += 1;
        let expire = self.now() + self.maintain_buffer.timeout();
        self.maintain(MaintainBufferEntry {
            frame: out,
            our_address: self.address,
            next_hop: next,
            source: originator,
            destination,
            ack_id: 0,
            segments_left,
            expire,
        });
    }

    fn deliver(&mut self, frame: &Frame, packet: DsrPacket) {
        let source = self.originator(&packet);
        debug!(source = %source, id = %frame.ip.id, "delivering packet");
        self.stats.delivered += 1;
        let at = self.now();
        self.emit(RoutingEvent::Delivered {
            id: frame.ip.id,
            source,
            protocol: packet.next_header,
            payload: packet.payload,
            at,
        });
    }

    /// Move a source route one hop along
    ///
    /// Returns the next hop and the packet as it should be sent there, with
    /// any ack request removed.
    fn advance_source_route(
        &self,
        frame: &Frame,
        mut packet: DsrPacket,
    ) -> Result<(Address, DsrPacket), RoutingError> {
        if frame.ip.ttl <= 1 {
            return Err(RoutingError::Expired);
        }
        packet.strip_ack_request();
        let own = self.address;
        let sr = packet
            .source_route_mut()
            .ok_or(RoutingError::InvalidSourceRoute)?;
        let n = sr.addresses.len();
        let s = usize::from(sr.segments_left);
        if s == 0 || s >= n || sr.addresses[n - s - 1] != own {
            return Err(RoutingError::InvalidSourceRoute);
        }
        let next = sr.addresses[n - s];
        sr.segments_left -= 1;
        Ok((next, packet))
    }

    /// Frame for relaying `packet`, keeping the inbound identification
    fn forward_frame(&self, packet: &DsrPacket, inbound: &Frame, next_hop: Address) -> Option<Frame> {
        let data = match packet.encode() {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "failed to re-encode forwarded packet");
                return None;
            }
        };
        let ip = IpMeta {
            id: inbound.ip.id,
            source: self.address,
            destination: next_hop,
            ttl: inbound.ip.ttl.saturating_sub(1),
            protocol: inbound.ip.protocol,
        };
        Some(Frame::new(ip, data))
    }

    /// Cache the way back from the end of `walked` to its start
    fn learn_reverse(&mut self, walked: &[Address], now: Timestamp) {
        if walked.len() < 2 {
            return;
        }
        let reversed: Vec<Address> = walked.iter().rev().copied().collect();
        self.cache.add_path(&reversed, now);
    }
}

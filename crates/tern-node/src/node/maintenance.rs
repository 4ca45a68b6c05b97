//! Route maintenance
//!
//! Every data packet a node transmits is held in the maintain buffer until
//! the next hop confirms it. Exactly one acknowledgment scheme is armed per
//! packet at a time:
//!
//! 1. **Link**: the link layer reports delivery (when enabled)
//! 2. **Passive**: the node overhears the next hop forwarding the packet
//! 3. **Network**: an explicit ack option, answering an ack request
//!
//! Passive waits escalate to network acks. When network retries or link
//! waits run out the link is declared broken: routes over it are deleted,
//! a route error goes back toward the packet's source, and every packet
//! still waiting on that next hop is salvaged onto another route if one is
//! cached.

use tern_core::{
    Address, Clock, DEFAULT_TTL, DSR_PROTOCOL, Datagram, Frame, IpMeta, LinkAck, LinkLayer,
    MacAddress, Priority, RoutingError, RoutingEvent, TopologyView,
};
use tern_maintenance::{LinkKey, MaintainBufferEntry, MaintenanceError};
use tern_routing::route;
use tern_wire::{DsrOption, DsrPacket, MessageType, RouteError, SourceRoute, UnreachableError};
use tracing::{debug, instrument, trace, warn};

use super::timer::{TimerKey, TimerTask};
use super::{BUFFER_SEND_JITTER, RoutingNode};

/// Link-layer ack for a data frame received by `receiver`
///
/// Returns `None` for frames that are not source-routed data.
pub fn link_ack_for<T: TopologyView + ?Sized>(
    frame: &Frame,
    receiver: Address,
    topology: &T,
) -> Option<LinkAck> {
    let packet = DsrPacket::decode(&frame.data).ok()?;
    if packet.message_type != MessageType::Data {
        return None;
    }
    let sr = packet.source_route()?;
    let source = topology
        .address_of(packet.source_id)
        .filter(|a| !a.is_broadcast())
        .or_else(|| sr.addresses.first().copied())?;
    Some(LinkAck {
        id: frame.ip.id,
        source,
        destination: sr.destination()?,
        our_address: frame.ip.source,
        next_hop: receiver,
    })
}

fn entry_passive_timer(entry: &MaintainBufferEntry) -> TimerKey {
    TimerKey::Passive(entry.passive_key(), entry.frame.ip.id)
}

fn entry_link_timer(entry: &MaintainBufferEntry) -> TimerKey {
    TimerKey::Link(entry.link_key(), entry.frame.ip.id)
}

impl<C: Clock, T: TopologyView, L: LinkLayer> RoutingNode<C, T, L> {
    /// Originate a data packet along `path`
    pub(super) fn send_data(&mut self, datagram: Datagram, path: Vec<Address>, salvage: u8) {
        let now = self.now();
        let Some(next_hop) = route::next_hop(self.address, &path) else {
            self.drop_packet(
                Some(datagram.id),
                datagram.destination,
                RoutingError::InvalidSourceRoute,
            );
            return;
        };
        self.cache.use_extends(&path, now);

        let sr = SourceRoute::new(path, salvage);
        let segments_left = sr.segments_left;
        let packet = DsrPacket::data(
            datagram.protocol,
            self.node_id(self.address),
            self.node_id(datagram.destination),
            vec![DsrOption::SourceRoute(sr)],
            datagram.payload,
        );
        let Some(frame) = self.build_frame(&packet, datagram.id, next_hop, DEFAULT_TTL) else {
            self.drop_packet(
                Some(datagram.id),
                datagram.destination,
                RoutingError::InvalidSourceRoute,
            );
            return;
        };

        let entry = MaintainBufferEntry {
            frame,
            our_address: self.address,
            next_hop,
            source: self.address,
            destination: datagram.destination,
            ack_id: 0,
            segments_left,
            expire: now + self.maintain_buffer.timeout(),
        };
        self.maintain(entry);
    }

    /// Transmit a packet and arm the first acknowledgment scheme for it
    pub(super) fn maintain(&mut self, entry: MaintainBufferEntry) {
        let now = self.now();
        let m = &self.config.maintenance;
        let (key, timeout) = if m.link_acknowledgment {
            (entry_link_timer(&entry), m.link_ack_timeout)
        } else if m.passive_acknowledgment && entry.next_hop != entry.destination {
            (entry_passive_timer(&entry), m.passive_ack_timeout)
        } else {
            self.request_network_ack(entry);
            return;
        };

        if !self.maintain_buffer.enqueue(entry.clone()) {
            trace!(id = %entry.frame.ip.id, "packet already awaiting acknowledgment");
            return;
        }
        self.transmit(entry.frame.clone(), entry.next_hop, Priority::Data);
        self.timers
            .arm(key, now + timeout, TimerTask::Retry { entry, retries: 0 });
    }

    /// Re-send a packet with an ack request and wait for the explicit ack
    fn request_network_ack(&mut self, mut entry: MaintainBufferEntry) {
        let now = self.now();
        let ack_id = self.cache.check_unique_ack_id(entry.next_hop);
        let data = match DsrPacket::decode(&entry.frame.data) {
            Ok(mut packet) => {
                packet.attach_ack_request(ack_id);
                packet.encode()
            }
            Err(e) => Err(e),
        };
        let data = match data {
            Ok(data) => data,
            Err(e) => {
                warn!(error = %e, "cannot attach ack request");
                self.drop_packet(
                    Some(entry.frame.ip.id),
                    entry.destination,
                    RoutingError::InvalidSourceRoute,
                );
                return;
            }
        };
        entry.frame = Frame::new(entry.frame.ip, data);
        entry.ack_id = ack_id;

        if !self.maintain_buffer.enqueue(entry.clone()) {
            trace!(ack_id, "packet already awaiting network ack");
            return;
        }
        self.transmit(entry.frame.clone(), entry.next_hop, Priority::Data);
        let wait = self.config.maintenance.node_traversal_time * 2;
        self.timers.arm(
            TimerKey::Network(entry.network_key()),
            now + wait,
            TimerTask::Retry { entry, retries: 0 },
        );
    }

    pub(super) fn network_ack_expired(&mut self, entry: MaintainBufferEntry, retries: u32) {
        if !self.maintain_buffer.all_equal(&entry) {
            return;
        }
        let now = self.now();
        if retries >= self.config.maintenance.max_maint_rexmt {
            self.maintain_buffer.remove(&entry);
            self.link_broken(entry, retries);
            return;
        }

        let retries = retries + 1;
        debug!(next_hop = %entry.next_hop, ack_id = entry.ack_id, retries, "retransmitting for network ack");
        self.transmit(entry.frame.clone(), entry.next_hop, Priority::Data);
        let wait = self.config.maintenance.node_traversal_time * (2 * retries);
        self.timers.arm(
            TimerKey::Network(entry.network_key()),
            now + wait,
            TimerTask::Retry { entry, retries },
        );
    }

    pub(super) fn passive_ack_expired(&mut self, entry: MaintainBufferEntry, retries: u32) {
        if !self.maintain_buffer.all_equal(&entry) {
            return;
        }
        let now = self.now();
        if retries < self.config.maintenance.try_passive_acks {
            let retries = retries + 1;
            trace!(next_hop = %entry.next_hop, retries, "retransmitting for passive ack");
            self.transmit(entry.frame.clone(), entry.next_hop, Priority::Data);
            let wait = self.config.maintenance.passive_ack_timeout;
            self.timers.arm(
                entry_passive_timer(&entry),
                now + wait,
                TimerTask::Retry { entry, retries },
            );
            return;
        }

        self.maintain_buffer.remove(&entry);
        self.request_network_ack(entry);
    }

    pub(super) fn link_ack_expired(&mut self, entry: MaintainBufferEntry, retries: u32) {
        if !self.maintain_buffer.all_equal(&entry) {
            return;
        }
        let now = self.now();
        if retries < self.config.maintenance.try_link_acks {
            let retries = retries + 1;
            trace!(next_hop = %entry.next_hop, retries, "retransmitting for link ack");
            self.transmit(entry.frame.clone(), entry.next_hop, Priority::Data);
            let wait = self.config.maintenance.link_ack_timeout;
            self.timers.arm(
                entry_link_timer(&entry),
                now + wait,
                TimerTask::Retry { entry, retries },
            );
            return;
        }

        self.maintain_buffer.remove(&entry);
        self.link_broken(entry, retries);
    }

    /// The link layer confirmed delivery of a data frame
    pub fn link_ack(&mut self, ack: LinkAck) {
        let key = LinkKey {
            source: ack.source,
            destination: ack.destination,
            our_address: ack.our_address,
            next_hop: ack.next_hop,
        };
        self.timers.cancel(&TimerKey::Link(key, ack.id));
        if self.maintain_buffer.link_equal(&key, ack.id).is_some() {
            trace!(id = %ack.id, next_hop = %ack.next_hop, dst = %ack.destination, "link ack");
        }
    }

    /// The link layer failed to reach a neighbor
    #[instrument(skip(self), fields(node = %self.address))]
    pub fn tx_error(&mut self, mac: MacAddress) {
        let now = self.now();
        self.cache.process_tx_error(mac);
        let mut unreachable = self.cache.purge_mac(now);
        if unreachable.is_empty() {
            if let Some(address) = self.topology.address_of_mac(mac) {
                if self.maintain_buffer.find_next_hop(address) {
                    unreachable.push(address);
                }
            }
        }
        for next_hop in unreachable {
            self.requests.mark_unidirectional(next_hop, now);
            self.break_link_to(next_hop);
        }
    }

    /// Where to report a broken link for `entry`, and the salvage count
    ///
    /// Unsalvaged packets report to their originator; salvaged ones to the
    /// node that salvaged them, which heads the new source route.
    fn error_destination(&self, entry: &MaintainBufferEntry) -> Option<(Address, u8)> {
        let packet = DsrPacket::decode(&entry.frame.data).ok()?;
        let sr = packet.source_route()?;
        if sr.salvage == 0 {
            Some((entry.source, 0))
        } else {
            Some((*sr.addresses.first()?, sr.salvage))
        }
    }

    fn cancel_retries(&mut self, entry: &MaintainBufferEntry) {
        let keys = [
            TimerKey::Network(entry.network_key()),
            entry_passive_timer(entry),
            entry_link_timer(entry),
        ];
        for key in keys {
            let same_packet = matches!(
                self.timers.payload(&key),
                Some(TimerTask::Retry { entry: armed, .. }) if armed.frame.ip.id == entry.frame.ip.id
            );
            if same_packet {
                self.timers.cancel(&key);
            }
        }
    }

    fn announce_break(&mut self, next_hop: Address) {
        let now = self.now();
        warn!(next_hop = %next_hop, "link broken");
        self.stats.link_breaks += 1;
        self.emit(RoutingEvent::LinkBroken { next_hop, at: now });
        self.cache
            .delete_all_routes_including_link(self.address, next_hop, now);
    }

    /// Acknowledgment retries for `entry` ran out
    fn link_broken(&mut self, entry: MaintainBufferEntry, retries: u32) {
        let next_hop = entry.next_hop;
        self.announce_break(next_hop);

        let salvage = match self.error_destination(&entry) {
            Some((error_dst, salvage)) => {
                if error_dst != self.address {
                    self.send_unreach_error(next_hop, error_dst, entry.destination, salvage);
                }
                salvage
            }
            None => 0,
        };

        if let Err(reason) = self.salvage(&entry) {
            let reason = match reason {
                RoutingError::NoRoute if salvage == 0 => RoutingError::AckTimeout { retries },
                RoutingError::NoRoute => RoutingError::LinkBroken { next_hop },
                other => other,
            };
            self.drop_packet(Some(entry.frame.ip.id), entry.destination, reason);
        }
        self.salvage_next_hop(next_hop);
    }

    /// Salvage one packet waiting on a broken next hop, then schedule the rest
    pub(super) fn salvage_next_hop(&mut self, next_hop: Address) {
        let Some(entry) = self.maintain_buffer.dequeue_next_hop(next_hop) else {
            return;
        };
        self.cancel_retries(&entry);
        if let Err(reason) = self.salvage(&entry) {
            let reason = match reason {
                RoutingError::NoRoute => RoutingError::LinkBroken { next_hop },
                other => other,
            };
            self.drop_packet(Some(entry.frame.ip.id), entry.destination, reason);
        }

        if self.maintain_buffer.find_next_hop(next_hop) {
            let delay = self.jitter(BUFFER_SEND_JITTER);
            self.defer(delay, TimerTask::SalvageNextHop { next_hop });
        }
    }

    /// The link layer reported `next_hop` unreachable
    fn break_link_to(&mut self, next_hop: Address) {
        self.announce_break(next_hop);
        self.break_next_hop_step(next_hop);
    }

    /// Salvage or report one packet waiting on a failed neighbor
    pub(super) fn break_next_hop_step(&mut self, next_hop: Address) {
        let Some(entry) = self.maintain_buffer.dequeue_next_hop(next_hop) else {
            return;
        };
        self.cancel_retries(&entry);
        if let Err(reason) = self.salvage(&entry) {
            if let Some((error_dst, salvage)) = self.error_destination(&entry) {
                if error_dst != self.address {
                    self.send_unreach_error(next_hop, error_dst, entry.destination, salvage);
                }
            }
            let reason = match reason {
                RoutingError::NoRoute => RoutingError::LinkBroken { next_hop },
                other => other,
            };
            self.drop_packet(Some(entry.frame.ip.id), entry.destination, reason);
        }

        if self.maintain_buffer.find_next_hop(next_hop) {
            let delay = self.jitter(BUFFER_SEND_JITTER);
            self.defer(delay, TimerTask::BreakNextHop { next_hop });
        }
    }

    /// Re-issue a packet along another cached route
    ///
    /// The packet keeps its identification and payload; its salvage count
    /// goes up by one.
    fn salvage(&mut self, entry: &MaintainBufferEntry) -> Result<(), RoutingError> {
        let now = self.now();
        let mut packet =
            DsrPacket::decode(&entry.frame.data).map_err(|_| RoutingError::InvalidSourceRoute)?;
        let salvage = packet
            .source_route()
            .map(|sr| sr.salvage)
            .ok_or(RoutingError::InvalidSourceRoute)?;
        if salvage >= self.config.maintenance.max_salvage_count {
            return Err(RoutingError::SalvageExhausted { salvage });
        }
        let path = self
            .cache
            .lookup(entry.destination, now)
            .ok_or(RoutingError::NoRoute)?
            .into_path();
        let next_hop =
            route::next_hop(self.address, &path).ok_or(RoutingError::InvalidSourceRoute)?;
        self.cache.use_extends(&path, now);

        let salvage = salvage + 1;
        let sr = SourceRoute::new(path, salvage);
        let segments_left = sr.segments_left;
        packet.strip_ack_request();
        if let Some(current) = packet.source_route_mut() {
            *current = sr;
        }
        let data = packet
            .encode()
            .map_err(|_| RoutingError::InvalidSourceRoute)?;

        let id = entry.frame.ip.id;
        let ip = IpMeta {
            id,
            source: self.address,
            destination: next_hop,
            ttl: DEFAULT_TTL,
            protocol: DSR_PROTOCOL,
        };
        let salvaged = MaintainBufferEntry {
            frame: Frame::new(ip, data),
            our_address: self.address,
            next_hop,
            source: entry.source,
            destination: entry.destination,
            ack_id: 0,
            segments_left,
            expire: now + self.maintain_buffer.timeout(),
        };

        debug!(id = %id, dst = %entry.destination, next_hop = %next_hop, salvage, "salvaging packet");
        self.stats.salvaged += 1;
        self.emit(RoutingEvent::Salvaged {
            id,
            destination: entry.destination,
            salvage,
            at: now,
        });
        self.maintain(salvaged);
        Ok(())
    }

    /// Report an unreachable next hop to `error_dst`
    ///
    /// Without a route the error waits in the error buffer while `error_dst`
    /// is discovered.
    pub(super) fn send_unreach_error(
        &mut self,
        unreachable: Address,
        error_dst: Address,
        original_dst: Address,
        salvage: u8,
    ) {
        let now = self.now();
        let error = RouteError::Unreachable(UnreachableError {
            salvage,
            error_source: self.address,
            error_destination: error_dst,
            unreachable,
            original_destination: original_dst,
        });

        if let Some(route) = self.cache.lookup(error_dst, now) {
            self.send_route_error(error, route.into_path());
            return;
        }

        match self.error_buffer.enqueue(error, now) {
            Ok(None) => {}
            Ok(Some(_)) => debug!("error buffer full, oldest route error discarded"),
            Err(MaintenanceError::Duplicate) => trace!(dst = %error_dst, "route error already buffered"),
            Err(e) => warn!(error = %e, "error buffer rejected route error"),
        }
        if !self.discovering(error_dst) {
            self.send_initial_request(error_dst, DSR_PROTOCOL);
        }
    }

    /// Send a route error along `path`
    pub(super) fn send_route_error(&mut self, error: RouteError, path: Vec<Address>) {
        let Some(next_hop) = route::next_hop(self.address, &path) else {
            return;
        };
        let error_dst = error.error_destination();
        let packet = DsrPacket::control(
            DSR_PROTOCOL,
            self.node_id(self.address),
            self.node_id(error_dst),
            vec![
                DsrOption::RouteError(error.clone()),
                DsrOption::SourceRoute(SourceRoute::new(path, 0)),
            ],
        );
        self.send_control(packet, next_hop, DEFAULT_TTL);
        self.stats.rerr_sent += 1;

        if let RouteError::Unreachable(err) = error {
            debug!(unreachable = %err.unreachable, error_dst = %error_dst, "sent route error");
            let at = self.now();
            self.emit(RoutingEvent::RouteErrorSent {
                unreachable: err.unreachable,
                error_destination: error_dst,
                at,
            });
        }
    }
}

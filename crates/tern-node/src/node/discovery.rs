//! Route discovery
//!
//! The first attempt for a destination is a non-propagating request that
//! only neighbors answer. If that times out, propagating requests follow
//! with a backoff of `request_period × attempt²` until a reply arrives or
//! `rreq_retries` attempts have been made.

use std::time::Duration;

use tern_core::{
    Address, BROADCAST_NODE_ID, Clock, DSR_PROTOCOL, LinkLayer, RoutingError, RoutingEvent,
    TopologyView,
};
use tern_wire::{DsrOption, DsrPacket, RouteError, RouteRequest, UnreachableError};
use tracing::{debug, trace};

use super::timer::{TimerKey, TimerTask};
use super::{BUFFER_SEND_JITTER, RoutingNode};

impl<C: Clock, T: TopologyView, L: LinkLayer> RoutingNode<C, T, L> {
    /// Whether a discovery for `dst` is in progress
    pub(super) fn discovering(&self, dst: Address) -> bool {
        self.timers.is_armed(&TimerKey::NonPropRequest(dst))
            || self.timers.is_armed(&TimerKey::Request(dst))
    }

    /// Stop discovering `dst` and forget its attempt count
    pub(super) fn cancel_discovery(&mut self, dst: Address) {
        self.timers.cancel(&TimerKey::NonPropRequest(dst));
        self.timers.cancel(&TimerKey::Request(dst));
        self.requests.remove_entry(dst);
    }

    /// Backoff before the next propagating request
    fn request_backoff(&self, attempts: u32) -> Duration {
        let d = &self.config.discovery;
        d.request_period
            .saturating_mul(attempts.saturating_mul(attempts))
            .min(d.max_request_period)
    }

    fn route_request(&mut self, dst: Address, protocol: u8, error: Option<UnreachableError>) -> DsrPacket {
        let id = self.requests.check_unique_rreq_id(dst);
        let mut options = vec![DsrOption::RouteRequest(RouteRequest {
            id,
            target: dst,
            addresses: vec![self.address],
        })];
        if let Some(error) = error {
            options.push(DsrOption::RouteError(RouteError::Unreachable(error)));
        }
        DsrPacket::control(protocol, self.node_id(self.address), BROADCAST_NODE_ID, options)
    }

    /// Probe the neighborhood for `dst`
    pub(super) fn send_initial_request(&mut self, dst: Address, protocol: u8) {
        let now = self.now();
        debug!(dst = %dst, "starting route discovery");
        let packet = self.route_request(dst, protocol, None);
        self.send_control(packet, Address::BROADCAST, 0);
        self.stats.rreq_sent += 1;

        let timeout = self.config.discovery.non_prop_request_timeout;
        self.timers.arm(
            TimerKey::NonPropRequest(dst),
            now + timeout,
            TimerTask::Discovery {
                protocol,
                error: None,
            },
        );
        self.emit(RoutingEvent::DiscoveryStarted {
            destination: dst,
            propagating: false,
            at: now,
        });
    }

    /// Flood a request for `dst`, optionally carrying a route error
    pub(super) fn send_propagating_request(
        &mut self,
        dst: Address,
        protocol: u8,
        error: Option<UnreachableError>,
    ) {
        let now = self.now();
        let attempts = self.requests.find_and_update(dst, now);
        let packet = self.route_request(dst, protocol, error);
        let hop_limit = self.config.discovery.discovery_hop_limit;
        self.send_control(packet, Address::BROADCAST, hop_limit);
        self.stats.rreq_sent += 1;

        self.timers.cancel(&TimerKey::NonPropRequest(dst));
        let delay = self.request_backoff(attempts);
        debug!(dst = %dst, attempts, delay = ?delay, "propagating route request");
        self.timers.arm(
            TimerKey::Request(dst),
            now + delay,
            TimerTask::Discovery {
                protocol,
                error: None,
            },
        );
        self.emit(RoutingEvent::DiscoveryStarted {
            destination: dst,
            propagating: true,
            at: now,
        });
    }

    /// A discovery timer ran out without a reply
    pub(super) fn discovery_expired(
        &mut self,
        dst: Address,
        protocol: u8,
        error: Option<UnreachableError>,
    ) {
        let now = self.now();
        if self.cache.lookup(dst, now).is_some() {
            trace!(dst = %dst, "route appeared while discovering");
            self.cancel_discovery(dst);
            self.send_packet_from_buffer(dst);
            self.flush_error_buffer(dst);
            return;
        }

        let attempts = self.requests.rreq_count(dst);
        if attempts >= self.config.discovery.rreq_retries {
            debug!(dst = %dst, attempts, "route discovery exhausted");
            self.cancel_discovery(dst);
            for datagram in self.send_buffer.drop_packet_with_dst(dst) {
                self.drop_packet(
                    Some(datagram.id),
                    dst,
                    RoutingError::DiscoveryExhausted { attempts },
                );
            }
            let errors = self.error_buffer.drop_packet_with_dst(dst);
            if !errors.is_empty() {
                debug!(dst = %dst, count = errors.len(), "discarding undeliverable route errors");
            }
            return;
        }

        self.send_propagating_request(dst, protocol, error);
    }

    /// A route error reached the node that originated the broken route
    ///
    /// With another route the buffered packets go out right away. Otherwise
    /// discovery restarts with the error attached, so every node the request
    /// floods through forgets the broken link too.
    pub(super) fn handle_error_at_source(&mut self, error: UnreachableError) {
        let now = self.now();
        let dst = error.original_destination;
        if self.cache.lookup(dst, now).is_some() {
            self.cancel_discovery(dst);
            self.send_packet_from_buffer(dst);
            return;
        }

        if !self.discovering(dst) {
            self.send_propagating_request(dst, DSR_PROTOCOL, Some(error));
            return;
        }

        // Already discovering: attach the error to the next attempt
        self.timers.cancel(&TimerKey::NonPropRequest(dst));
        let delay = self.request_backoff(self.requests.rreq_count(dst).max(1));
        self.timers.arm(
            TimerKey::Request(dst),
            now + delay,
            TimerTask::Discovery {
                protocol: DSR_PROTOCOL,
                error: Some(error),
            },
        );
    }

    /// Send the oldest buffered packet for `dst` if a route exists
    ///
    /// Remaining packets follow one at a time after a short random delay.
    pub(super) fn send_packet_from_buffer(&mut self, dst: Address) {
        let now = self.now();
        let Some(route) = self.cache.lookup(dst, now) else {
            if self.send_buffer.find(dst) && !self.discovering(dst) {
                trace!(dst = %dst, "buffered packets lost their route");
                self.send_initial_request(dst, DSR_PROTOCOL);
            }
            return;
        };
        let Some(datagram) = self.send_buffer.dequeue(dst) else {
            return;
        };
        self.send_data(datagram, route.into_path(), 0);

        if self.send_buffer.find(dst) {
            let delay = self.jitter(BUFFER_SEND_JITTER);
            self.defer(delay, TimerTask::SendFromBuffer { destination: dst });
        }
    }

    /// Send every buffered route error for `dst` while a route exists
    pub(super) fn flush_error_buffer(&mut self, dst: Address) {
        let now = self.now();
        while let Some(route) = self.cache.lookup(dst, now) {
            let Some(error) = self.error_buffer.dequeue(dst) else {
                break;
            };
            self.send_route_error(error, route.into_path());
        }
    }

    /// Periodic sweep of destinations that became routable
    pub(super) fn check_send_buffer(&mut self) {
        let now = self.now();
        let mut destinations = self.send_buffer.destinations();
        destinations.extend(self.error_buffer.destinations());
        destinations.sort();
        destinations.dedup();

        for dst in destinations {
            if self.cache.lookup(dst, now).is_some() {
                self.cancel_discovery(dst);
                self.send_packet_from_buffer(dst);
                self.flush_error_buffer(dst);
            }
        }

        let interval = self.config.discovery.send_buff_interval;
        self.timers
            .arm(TimerKey::SendBufferCheck, now + interval, TimerTask::SendBufferCheck);
    }
}

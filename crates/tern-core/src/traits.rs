//! Core traits for the external collaborators of a routing node
//!
//! - [`Clock`]: source of virtual time
//! - [`TopologyView`]: address / node-id / MAC translation
//! - [`LinkLayer`]: the downward path onto the medium

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::address::{Address, MacAddress};
use crate::packet::Frame;
use crate::time::Timestamp;

/// Node id carried in the DSR header for link-local broadcast
pub const BROADCAST_NODE_ID: u16 = 255;

/// Time abstraction for testability
pub trait Clock: Send + Sync {
    /// Current virtual time
    fn now(&self) -> Timestamp;
}

impl<C: Clock + ?Sized> Clock for Arc<C> {
    fn now(&self) -> Timestamp {
        (**self).now()
    }
}

/// Wall clock measuring time since its creation
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// The instant corresponding to [`Timestamp::ZERO`]
    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Wall-clock instant of a virtual timestamp
    pub fn instant_at(&self, at: Timestamp) -> Instant {
        self.epoch + Duration::from_micros(at.as_micros())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let elapsed = self.epoch.elapsed().as_micros();
        Timestamp::from_micros(u64::try_from(elapsed).unwrap_or(u64::MAX))
    }
}

/// Manually driven clock
///
/// Clones share the same time, so a simulation can hold one handle and
/// every node another.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    micros: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jump to an absolute time; going backwards is ignored
    pub fn set(&self, at: Timestamp) {
        self.micros.fetch_max(at.as_micros(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_micros()).unwrap_or(u64::MAX);
        self.micros.fetch_add(by, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_micros(self.micros.load(Ordering::SeqCst))
    }
}

/// Address, node-id and MAC translation
///
/// The DSR fixed header carries 16-bit node ids rather than addresses, and
/// link-layer failure reports carry MAC addresses. This trait is the only
/// place a node learns how those map onto [`Address`].
pub trait TopologyView: Send + Sync {
    /// Node id of an address; broadcast maps to [`BROADCAST_NODE_ID`]
    fn node_id(&self, address: Address) -> Option<u16>;

    /// Address of a node id
    fn address_of(&self, id: u16) -> Option<Address>;

    /// MAC address of a node's interface
    fn mac_of(&self, address: Address) -> Option<MacAddress>;

    /// Node address owning a MAC address
    fn address_of_mac(&self, mac: MacAddress) -> Option<Address>;
}

impl<T: TopologyView + ?Sized> TopologyView for Arc<T> {
    fn node_id(&self, address: Address) -> Option<u16> {
        (**self).node_id(address)
    }

    fn address_of(&self, id: u16) -> Option<Address> {
        (**self).address_of(id)
    }

    fn mac_of(&self, address: Address) -> Option<MacAddress> {
        (**self).mac_of(address)
    }

    fn address_of_mac(&self, mac: MacAddress) -> Option<Address> {
        (**self).address_of_mac(mac)
    }
}

/// Static address book assigning node ids in registration order
#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    ids: BTreeMap<Address, u16>,
    addresses: Vec<Address>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Address book for `count` nodes at [`Address::from_index`]
    pub fn sequential(count: u16) -> Self {
        let mut book = Self::new();
        for index in 0..count {
            book.register(Address::from_index(index));
        }
        book
    }

    /// Register an address, returning its node id
    ///
    /// Returns `None` once every id below [`BROADCAST_NODE_ID`] is taken.
    pub fn register(&mut self, address: Address) -> Option<u16> {
        if let Some(id) = self.ids.get(&address) {
            return Some(*id);
        }
        let id = u16::try_from(self.addresses.len()).ok()?;
        if id >= BROADCAST_NODE_ID {
            return None;
        }
        self.ids.insert(address, id);
        self.addresses.push(address);
        Some(id)
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl TopologyView for AddressBook {
    fn node_id(&self, address: Address) -> Option<u16> {
        if address.is_broadcast() {
            return Some(BROADCAST_NODE_ID);
        }
        self.ids.get(&address).copied()
    }

    fn address_of(&self, id: u16) -> Option<Address> {
        if id == BROADCAST_NODE_ID {
            return Some(Address::BROADCAST);
        }
        self.addresses.get(usize::from(id)).copied()
    }

    fn mac_of(&self, address: Address) -> Option<MacAddress> {
        self.ids
            .contains_key(&address)
            .then(|| MacAddress::derived_from(address))
    }

    fn address_of_mac(&self, mac: MacAddress) -> Option<Address> {
        let o = mac.octets();
        let address = Address::new(o[2], o[3], o[4], o[5]);
        (self.ids.contains_key(&address) && MacAddress::derived_from(address) == mac)
            .then_some(address)
    }
}

/// Downward path from a routing node onto the medium
///
/// `next_hop` is the single receiver for unicast frames or
/// [`Address::BROADCAST`] for floods. Transmission is fire-and-forget;
/// outcomes come back through the node's link feedback entry points.
pub trait LinkLayer: Send {
    fn transmit(&mut self, frame: Frame, next_hop: Address);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock = ManualClock::new();
        let handle = clock.clone();
        clock.advance(Duration::from_millis(5));
        assert_eq!(handle.now(), Timestamp::from_millis(5));
        handle.set(Timestamp::from_millis(2));
        assert_eq!(clock.now(), Timestamp::from_millis(5));
        handle.set(Timestamp::from_secs(1));
        assert_eq!(clock.now(), Timestamp::from_secs(1));
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }

    #[test]
    fn test_address_book_ids() {
        let book = AddressBook::sequential(3);
        let b = Address::from_index(1);
        assert_eq!(book.node_id(b), Some(1));
        assert_eq!(book.address_of(1), Some(b));
        assert_eq!(book.node_id(Address::BROADCAST), Some(BROADCAST_NODE_ID));
        assert_eq!(book.address_of(BROADCAST_NODE_ID), Some(Address::BROADCAST));
        assert_eq!(book.address_of(7), None);
    }

    #[test]
    fn test_address_book_mac_round_trip() {
        let book = AddressBook::sequential(2);
        let a = Address::from_index(0);
        let mac = book.mac_of(a).unwrap();
        assert_eq!(book.address_of_mac(mac), Some(a));
        assert_eq!(book.mac_of(Address::new(192, 168, 0, 1)), None);
    }

    #[test]
    fn test_address_book_is_bounded() {
        let book = AddressBook::sequential(300);
        assert_eq!(book.len(), usize::from(BROADCAST_NODE_ID));
    }
}

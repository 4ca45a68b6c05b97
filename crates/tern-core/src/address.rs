//! Node addressing
//!
//! [`Address`] is the opaque IPv4-like identifier every routing structure
//! keys on. Only total ordering and a fixed 4-byte encoding are assumed.
//! [`MacAddress`] identifies a link-layer interface and is only used to
//! correlate transmission failures with neighbors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AddressError;

/// A 4-byte network-layer node address
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Address([u8; 4]);

impl Address {
    /// Encoded size on the wire
    pub const LEN: usize = 4;

    /// `0.0.0.0`, used where a lookup produced no address
    pub const UNSPECIFIED: Address = Address([0, 0, 0, 0]);

    /// `255.255.255.255`, the link-local broadcast address
    pub const BROADCAST: Address = Address([255, 255, 255, 255]);

    /// Create an address from its four octets
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self([a, b, c, d])
    }

    /// Create an address from a raw octet array
    pub const fn from_octets(octets: [u8; 4]) -> Self {
        Self(octets)
    }

    /// Address of the `index`-th node in a `10.0.0.0/16` test network
    ///
    /// Index 0 maps to `10.0.0.1`.
    pub const fn from_index(index: u16) -> Self {
        let host = index as u32 + 1;
        Self([10, 0, (host >> 8) as u8, host as u8])
    }

    /// The raw octets
    pub const fn octets(&self) -> [u8; 4] {
        self.0
    }

    /// Big-endian integer view of the address
    pub const fn to_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }

    /// Build an address from its big-endian integer view
    pub const fn from_u32(value: u32) -> Self {
        Self(value.to_be_bytes())
    }

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }

    pub fn is_unspecified(&self) -> bool {
        *self == Self::UNSPECIFIED
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 4];
        let mut parts = s.split('.');
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| AddressError::InvalidFormat(s.to_string()))?;
            *octet = part
                .parse()
                .map_err(|_| AddressError::InvalidFormat(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(AddressError::InvalidFormat(s.to_string()));
        }
        Ok(Self(octets))
    }
}

impl From<[u8; 4]> for Address {
    fn from(octets: [u8; 4]) -> Self {
        Self(octets)
    }
}

/// A 6-byte link-layer address
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    /// Locally administered MAC derived from a network address
    pub const fn derived_from(address: Address) -> Self {
        let [a, b, c, d] = address.octets();
        Self([0x02, 0x00, a, b, c, d])
    }

    pub const fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            o[0], o[1], o[2], o[3], o[4], o[5]
        )
    }
}

impl fmt::Debug for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddress({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_display_and_parse() {
        let addr = Address::new(10, 0, 0, 7);
        assert_eq!(addr.to_string(), "10.0.0.7");
        assert_eq!("10.0.0.7".parse::<Address>().unwrap(), addr);
        assert!("10.0.0".parse::<Address>().is_err());
        assert!("10.0.0.1.5".parse::<Address>().is_err());
        assert!("10.0.0.300".parse::<Address>().is_err());
    }

    #[test]
    fn test_address_ordering_matches_integer_view() {
        let a = Address::new(10, 0, 0, 2);
        let b = Address::new(10, 0, 1, 1);
        assert!(a < b);
        assert!(a.to_u32() < b.to_u32());
        assert_eq!(Address::from_u32(a.to_u32()), a);
    }

    #[test]
    fn test_address_from_index() {
        assert_eq!(Address::from_index(0), Address::new(10, 0, 0, 1));
        assert_eq!(Address::from_index(255), Address::new(10, 0, 1, 0));
    }

    #[test]
    fn test_special_addresses() {
        assert!(Address::BROADCAST.is_broadcast());
        assert!(Address::default().is_unspecified());
        assert!(!Address::new(10, 0, 0, 1).is_broadcast());
    }

    #[test]
    fn test_mac_derived_from_address() {
        let mac = MacAddress::derived_from(Address::new(10, 0, 0, 3));
        assert_eq!(mac.to_string(), "02:00:0a:00:00:03");
    }
}

//! DSR options
//!
//! Every option is a TLV: `[type:1][length:1][data:length]`, except Pad1
//! which is the single byte `224`. `length` never counts the type and
//! length bytes themselves.
//!
//! ```text
//! RREQ         type 1    len 6+4n  [id:2][target:4][addr:4]*n
//! RREP         type 2    len 2+4n  [reserved:2][addr:4]*n
//! RERR unreach type 3    len 18    [etype=1][salvage][src:4][dst:4][unreach:4][orig_dst:4]
//! RERR unsupp  type 3    len 14    [etype=3][salvage][src:4][dst:4][option:2][reserved:2]
//! ACK          type 32   len 10    [id:2][real_src:4][real_dst:4]
//! SourceRoute  type 96   len 2+4n  [salvage][segments_left][addr:4]*n
//! AckRequest   type 160  len 2     [id:2]
//! PadN         type 0    len n-2   zeros
//! Pad1         type 224  (no length byte)
//! ```

use bytes::{Buf, BufMut, Bytes};
use tern_core::Address;

use crate::error::{WireError, WireResult, ensure_len};

pub const PADN_TYPE: u8 = 0;
pub const RREQ_TYPE: u8 = 1;
pub const RREP_TYPE: u8 = 2;
pub const RERR_TYPE: u8 = 3;
pub const ACK_TYPE: u8 = 32;
pub const SOURCE_ROUTE_TYPE: u8 = 96;
pub const ACK_REQUEST_TYPE: u8 = 160;
pub const PAD1_TYPE: u8 = 224;

/// Route error subtype: next hop unreachable
pub const ERROR_NODE_UNREACHABLE: u8 = 1;
/// Route error subtype: option not supported
pub const ERROR_OPTION_NOT_SUPPORTED: u8 = 3;

const UNREACHABLE_LEN: u8 = 18;
const UNSUPPORTED_LEN: u8 = 14;
const ACK_LEN: u8 = 10;
const ACK_REQUEST_LEN: u8 = 2;

/// Most addresses an RREQ can carry in its one-byte length
pub const MAX_REQUEST_ADDRESSES: usize = (u8::MAX as usize - 6) / Address::LEN;
/// Most addresses an RREP or source route can carry
pub const MAX_ROUTE_ADDRESSES: usize = (u8::MAX as usize - 2) / Address::LEN;

/// Route request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRequest {
    /// Per-destination request identifier
    pub id: u16,
    /// Address being discovered
    pub target: Address,
    /// Nodes traversed so far, originator first
    pub addresses: Vec<Address>,
}

/// Route reply carrying a complete source-to-target route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReply {
    pub addresses: Vec<Address>,
}

/// Source route attached to routed packets
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRoute {
    /// Times the packet has been salvaged onto a new route
    pub salvage: u8,
    /// Hops still to be visited; 0 at the final destination
    pub segments_left: u8,
    /// Full route, originator first and destination last
    pub addresses: Vec<Address>,
}

impl SourceRoute {
    /// Fresh source route for a path, positioned at its first hop
    pub fn new(addresses: Vec<Address>, salvage: u8) -> Self {
        let segments_left = u8::try_from(addresses.len().saturating_sub(2)).unwrap_or(u8::MAX);
        Self {
            salvage,
            segments_left,
            addresses,
        }
    }

    pub fn destination(&self) -> Option<Address> {
        self.addresses.last().copied()
    }
}

/// Unreachable-next-hop route error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreachableError {
    pub salvage: u8,
    /// Node that detected the broken link
    pub error_source: Address,
    /// Node the error is reported to
    pub error_destination: Address,
    /// Next hop that could not be reached
    pub unreachable: Address,
    /// Destination of the packet that triggered the error
    pub original_destination: Address,
}

/// Option-not-supported route error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedError {
    pub salvage: u8,
    pub error_source: Address,
    pub error_destination: Address,
    /// The option type that was not understood
    pub unsupported: u16,
}

/// Route error variants
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    Unreachable(UnreachableError),
    Unsupported(UnsupportedError),
}

impl RouteError {
    pub fn error_source(&self) -> Address {
        match self {
            Self::Unreachable(e) => e.error_source,
            Self::Unsupported(e) => e.error_source,
        }
    }

    pub fn error_destination(&self) -> Address {
        match self {
            Self::Unreachable(e) => e.error_destination,
            Self::Unsupported(e) => e.error_destination,
        }
    }

    pub fn salvage(&self) -> u8 {
        match self {
            Self::Unreachable(e) => e.salvage,
            Self::Unsupported(e) => e.salvage,
        }
    }

    pub fn error_type(&self) -> u8 {
        match self {
            Self::Unreachable(_) => ERROR_NODE_UNREACHABLE,
            Self::Unsupported(_) => ERROR_OPTION_NOT_SUPPORTED,
        }
    }
}

/// Explicit acknowledgment request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckRequest {
    pub id: u16,
}

/// Explicit acknowledgment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ack {
    pub id: u16,
    /// Originator of the acknowledged packet
    pub real_source: Address,
    /// Final destination of the acknowledged packet
    pub real_destination: Address,
}

/// Any option in a DSR option block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DsrOption {
    /// One byte of padding
    Pad1,
    /// Multi-byte padding; the value is the total size, at least 2
    PadN(u8),
    RouteRequest(RouteRequest),
    RouteReply(RouteReply),
    SourceRoute(SourceRoute),
    RouteError(RouteError),
    AckRequest(AckRequest),
    Ack(Ack),
    /// An option type this codec does not understand, kept verbatim
    Unknown { option_type: u8, data: Bytes },
}

impl DsrOption {
    /// The option's type code
    pub fn option_type(&self) -> u8 {
        match self {
            Self::Pad1 => PAD1_TYPE,
            Self::PadN(_) => PADN_TYPE,
            Self::RouteRequest(_) => RREQ_TYPE,
            Self::RouteReply(_) => RREP_TYPE,
            Self::SourceRoute(_) => SOURCE_ROUTE_TYPE,
            Self::RouteError(_) => RERR_TYPE,
            Self::AckRequest(_) => ACK_REQUEST_TYPE,
            Self::Ack(_) => ACK_TYPE,
            Self::Unknown { option_type, .. } => *option_type,
        }
    }

    pub fn is_padding(&self) -> bool {
        matches!(self, Self::Pad1 | Self::PadN(_))
    }

    /// Total encoded size including type and length bytes
    pub fn encoded_len(&self) -> usize {
        match self {
            Self::Pad1 => 1,
            Self::PadN(n) => usize::from(*n).max(2),
            Self::RouteRequest(r) => 8 + Address::LEN * r.addresses.len(),
            Self::RouteReply(r) => 4 + Address::LEN * r.addresses.len(),
            Self::SourceRoute(r) => 4 + Address::LEN * r.addresses.len(),
            Self::RouteError(RouteError::Unreachable(_)) => 2 + usize::from(UNREACHABLE_LEN),
            Self::RouteError(RouteError::Unsupported(_)) => 2 + usize::from(UNSUPPORTED_LEN),
            Self::AckRequest(_) => 2 + usize::from(ACK_REQUEST_LEN),
            Self::Ack(_) => 2 + usize::from(ACK_LEN),
            Self::Unknown { data, .. } => 2 + data.len(),
        }
    }

    /// Append the encoded option to `buf`
    pub fn encode_into<B: BufMut>(&self, buf: &mut B) -> WireResult<()> {
        match self {
            Self::Pad1 => buf.put_u8(PAD1_TYPE),
            Self::PadN(n) => {
                let n = (*n).max(2);
                buf.put_u8(PADN_TYPE);
                buf.put_u8(n - 2);
                buf.put_bytes(0, usize::from(n - 2));
            }
            Self::RouteRequest(r) => {
                check_address_count(r.addresses.len(), MAX_REQUEST_ADDRESSES)?;
                buf.put_u8(RREQ_TYPE);
                buf.put_u8(length_byte(self.encoded_len())?);
                buf.put_u16(r.id);
                put_address(buf, r.target);
                put_addresses(buf, &r.addresses);
            }
            Self::RouteReply(r) => {
                check_address_count(r.addresses.len(), MAX_ROUTE_ADDRESSES)?;
                buf.put_u8(RREP_TYPE);
                buf.put_u8(length_byte(self.encoded_len())?);
                buf.put_u16(0);
                put_addresses(buf, &r.addresses);
            }
            Self::SourceRoute(r) => {
                check_address_count(r.addresses.len(), MAX_ROUTE_ADDRESSES)?;
                buf.put_u8(SOURCE_ROUTE_TYPE);
                buf.put_u8(length_byte(self.encoded_len())?);
                buf.put_u8(r.salvage);
                buf.put_u8(r.segments_left);
                put_addresses(buf, &r.addresses);
            }
            Self::RouteError(RouteError::Unreachable(e)) => {
                buf.put_u8(RERR_TYPE);
                buf.put_u8(UNREACHABLE_LEN);
                buf.put_u8(ERROR_NODE_UNREACHABLE);
                buf.put_u8(e.salvage);
                put_address(buf, e.error_source);
                put_address(buf, e.error_destination);
                put_address(buf, e.unreachable);
                put_address(buf, e.original_destination);
            }
            Self::RouteError(RouteError::Unsupported(e)) => {
                buf.put_u8(RERR_TYPE);
                buf.put_u8(UNSUPPORTED_LEN);
                buf.put_u8(ERROR_OPTION_NOT_SUPPORTED);
                buf.put_u8(e.salvage);
                put_address(buf, e.error_source);
                put_address(buf, e.error_destination);
                buf.put_u16(e.unsupported);
                buf.put_u16(0);
            }
            Self::AckRequest(a) => {
                buf.put_u8(ACK_REQUEST_TYPE);
                buf.put_u8(ACK_REQUEST_LEN);
                buf.put_u16(a.id);
            }
            Self::Ack(a) => {
                buf.put_u8(ACK_TYPE);
                buf.put_u8(ACK_LEN);
                buf.put_u16(a.id);
                put_address(buf, a.real_source);
                put_address(buf, a.real_destination);
            }
            Self::Unknown { option_type, data } => {
                let length = length_byte(self.encoded_len())?;
                buf.put_u8(*option_type);
                buf.put_u8(length);
                buf.put_slice(data);
            }
        }
        Ok(())
    }

    /// Decode one option from the front of `data`
    ///
    /// Returns the option and the number of bytes it occupied.
    pub fn decode(data: &[u8]) -> WireResult<(Self, usize)> {
        ensure_len(data, 1)?;
        let option_type = data[0];
        if option_type == PAD1_TYPE {
            return Ok((Self::Pad1, 1));
        }
        ensure_len(data, 2)?;
        let length = data[1];
        let total = 2 + usize::from(length);
        ensure_len(data, total)?;
        let mut body = &data[2..total];
        let mismatch = WireError::LengthMismatch {
            option_type,
            length,
        };

        let option = match option_type {
            PADN_TYPE => Self::PadN(length.saturating_add(2)),
            RREQ_TYPE => {
                if length < 6 || (length - 6) % 4 != 0 {
                    return Err(mismatch);
                }
                let id = body.get_u16();
                let target = get_address(&mut body);
                Self::RouteRequest(RouteRequest {
                    id,
                    target,
                    addresses: get_addresses(&mut body),
                })
            }
            RREP_TYPE => {
                if length < 2 || (length - 2) % 4 != 0 {
                    return Err(mismatch);
                }
                body.advance(2);
                Self::RouteReply(RouteReply {
                    addresses: get_addresses(&mut body),
                })
            }
            SOURCE_ROUTE_TYPE => {
                if length < 2 || (length - 2) % 4 != 0 {
                    return Err(mismatch);
                }
                let salvage = body.get_u8();
                let segments_left = body.get_u8();
                Self::SourceRoute(SourceRoute {
                    salvage,
                    segments_left,
                    addresses: get_addresses(&mut body),
                })
            }
            RERR_TYPE => {
                ensure_len(body, 1).map_err(|_| mismatch.clone())?;
                match body[0] {
                    ERROR_NODE_UNREACHABLE => {
                        if length != UNREACHABLE_LEN {
                            return Err(mismatch);
                        }
                        body.advance(1);
                        let salvage = body.get_u8();
                        Self::RouteError(RouteError::Unreachable(UnreachableError {
                            salvage,
                            error_source: get_address(&mut body),
                            error_destination: get_address(&mut body),
                            unreachable: get_address(&mut body),
                            original_destination: get_address(&mut body),
                        }))
                    }
                    ERROR_OPTION_NOT_SUPPORTED => {
                        if length != UNSUPPORTED_LEN {
                            return Err(mismatch);
                        }
                        body.advance(1);
                        let salvage = body.get_u8();
                        Self::RouteError(RouteError::Unsupported(UnsupportedError {
                            salvage,
                            error_source: get_address(&mut body),
                            error_destination: get_address(&mut body),
                            unsupported: body.get_u16(),
                        }))
                    }
                    other => return Err(WireError::InvalidRouteErrorType(other)),
                }
            }
            ACK_REQUEST_TYPE => {
                if length != ACK_REQUEST_LEN {
                    return Err(mismatch);
                }
                Self::AckRequest(AckRequest { id: body.get_u16() })
            }
            ACK_TYPE => {
                if length != ACK_LEN {
                    return Err(mismatch);
                }
                let id = body.get_u16();
                Self::Ack(Ack {
                    id,
                    real_source: get_address(&mut body),
                    real_destination: get_address(&mut body),
                })
            }
            _ => Self::Unknown {
                option_type,
                data: Bytes::copy_from_slice(body),
            },
        };
        Ok((option, total))
    }
}

fn check_address_count(count: usize, limit: usize) -> WireResult<()> {
    if count > limit {
        return Err(WireError::TooManyAddresses { count, limit });
    }
    Ok(())
}

/// Length byte for an option of `encoded_len` total bytes
fn length_byte(encoded_len: usize) -> WireResult<u8> {
    u8::try_from(encoded_len.saturating_sub(2)).map_err(|_| WireError::OptionBlockTooLarge {
        size: encoded_len,
        limit: usize::from(u8::MAX) + 2,
    })
}

fn put_address<B: BufMut>(buf: &mut B, address: Address) {
    buf.put_slice(&address.octets());
}

fn put_addresses<B: BufMut>(buf: &mut B, addresses: &[Address]) {
    for address in addresses {
        put_address(buf, *address);
    }
}

fn get_address(buf: &mut &[u8]) -> Address {
    let mut octets = [0u8; 4];
    buf.copy_to_slice(&mut octets);
    Address::from_octets(octets)
}

fn get_addresses(buf: &mut &[u8]) -> Vec<Address> {
    let mut addresses = Vec::with_capacity(buf.len() / Address::LEN);
    while buf.len() >= Address::LEN {
        addresses.push(get_address(buf));
    }
    addresses
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(d: u8) -> Address {
        Address::new(10, 0, 0, d)
    }

    fn encode(option: &DsrOption) -> Vec<u8> {
        let mut buf = Vec::new();
        option.encode_into(&mut buf).unwrap();
        buf
    }

    #[test]
    fn test_unknown_option_length_limit() {
        let fits = DsrOption::Unknown {
            option_type: 77,
            data: Bytes::from(vec![0xab; 255]),
        };
        let buf = encode(&fits);
        assert_eq!(buf.len(), 257);
        assert_eq!(buf[1], 255);
        assert_eq!(DsrOption::decode(&buf).unwrap(), (fits, 257));

        let too_long = DsrOption::Unknown {
            option_type: 77,
            data: Bytes::from(vec![0xab; 256]),
        };
        let mut out = Vec::new();
        assert_eq!(
            too_long.encode_into(&mut out),
            Err(WireError::OptionBlockTooLarge {
                size: 258,
                limit: 257,
            })
        );
        assert!(out.is_empty());
    }

    #[test]
    fn test_rreq_layout() {
        let option = DsrOption::RouteRequest(RouteRequest {
            id: 7,
            target: addr(4),
            addresses: vec![addr(1), addr(2)],
        });
        let buf = encode(&option);
        assert_eq!(buf.len(), 16);
        assert_eq!(buf.len(), option.encoded_len());
        assert_eq!(&buf[..4], &[RREQ_TYPE, 14, 0, 7]);
        assert_eq!(&buf[4..8], &[10, 0, 0, 4]);
        assert_eq!(DsrOption::decode(&buf).unwrap(), (option, 16));
    }

    #[test]
    fn test_route_error_sizes() {
        let unreachable = DsrOption::RouteError(RouteError::Unreachable(UnreachableError {
            salvage: 2,
            error_source: addr(2),
            error_destination: addr(1),
            unreachable: addr(3),
            original_destination: addr(5),
        }));
        let buf = encode(&unreachable);
        assert_eq!(buf.len(), 20);
        assert_eq!(&buf[..4], &[RERR_TYPE, 18, ERROR_NODE_UNREACHABLE, 2]);

        let unsupported = DsrOption::RouteError(RouteError::Unsupported(UnsupportedError {
            salvage: 0,
            error_source: addr(2),
            error_destination: addr(1),
            unsupported: 77,
        }));
        let buf = encode(&unsupported);
        assert_eq!(buf.len(), 16);
        assert_eq!(buf[1], 14);
        assert_eq!(DsrOption::decode(&buf).unwrap().0, unsupported);
    }

    #[test]
    fn test_ack_and_ack_request_sizes() {
        let ack = DsrOption::Ack(Ack {
            id: 3,
            real_source: addr(1),
            real_destination: addr(9),
        });
        assert_eq!(encode(&ack).len(), 12);
        let req = DsrOption::AckRequest(AckRequest { id: 3 });
        assert_eq!(encode(&req), vec![ACK_REQUEST_TYPE, 2, 0, 3]);
    }

    #[test]
    fn test_padding_options() {
        assert_eq!(encode(&DsrOption::Pad1), vec![PAD1_TYPE]);
        assert_eq!(encode(&DsrOption::PadN(2)), vec![PADN_TYPE, 0]);
        assert_eq!(encode(&DsrOption::PadN(3)), vec![PADN_TYPE, 1, 0]);
        assert_eq!(DsrOption::decode(&[PADN_TYPE, 1, 0]).unwrap(), (DsrOption::PadN(3), 3));
    }

    #[test]
    fn test_unknown_option_preserved() {
        let buf = [200u8, 2, 0xAB, 0xCD];
        let (option, used) = DsrOption::decode(&buf).unwrap();
        assert_eq!(used, 4);
        assert_eq!(option.option_type(), 200);
        assert_eq!(encode(&option), buf.to_vec());
    }

    #[test]
    fn test_bad_lengths_rejected() {
        assert!(matches!(
            DsrOption::decode(&[RREQ_TYPE, 7, 0, 0, 0, 0, 0, 0, 0]),
            Err(WireError::LengthMismatch { option_type: RREQ_TYPE, length: 7 })
        ));
        assert!(matches!(
            DsrOption::decode(&[ACK_TYPE, 10, 0]),
            Err(WireError::Truncated { .. })
        ));
        assert_eq!(
            DsrOption::decode(&[RERR_TYPE, 2, 9, 0]),
            Err(WireError::InvalidRouteErrorType(9))
        );
    }

    #[test]
    fn test_too_many_addresses_rejected() {
        let option = DsrOption::SourceRoute(SourceRoute::new(
            (0..=MAX_ROUTE_ADDRESSES as u16).map(Address::from_index).collect(),
            0,
        ));
        let mut buf = Vec::new();
        assert!(matches!(
            option.encode_into(&mut buf),
            Err(WireError::TooManyAddresses { .. })
        ));
    }

    #[test]
    fn test_source_route_segments_left() {
        let sr = SourceRoute::new(vec![addr(1), addr(2), addr(3), addr(4)], 0);
        assert_eq!(sr.segments_left, 2);
        assert_eq!(sr.destination(), Some(addr(4)));
    }
}

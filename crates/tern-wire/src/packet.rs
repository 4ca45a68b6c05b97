//! Complete DSR packets: fixed header, aligned option block, payload
//!
//! Options are laid out on 4-byte boundaries relative to the start of the
//! option block, and the block itself is padded to a multiple of 4. Pad1 is
//! used for a single byte of filler and PadN for anything longer. Padding
//! is regenerated on every encode and stripped on decode, so callers only
//! ever see meaningful options.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{WireError, WireResult, ensure_len};
use crate::header::{FixedHeader, MessageType};
use crate::option::{Ack, AckRequest, DsrOption, RouteError, RouteReply, RouteRequest, SourceRoute};

/// Alignment of every option and of the whole block
pub const OPTION_ALIGNMENT: usize = 4;

/// A DSR header with its options and the upper-layer payload behind it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsrPacket {
    pub next_header: u8,
    pub message_type: MessageType,
    pub source_id: u16,
    pub dest_id: u16,
    /// Non-padding options in transmission order
    pub options: Vec<DsrOption>,
    pub payload: Bytes,
}

impl DsrPacket {
    /// A control packet with no payload
    pub fn control(next_header: u8, source_id: u16, dest_id: u16, options: Vec<DsrOption>) -> Self {
        Self {
            next_header,
            message_type: MessageType::Control,
            source_id,
            dest_id,
            options,
            payload: Bytes::new(),
        }
    }

    /// A data packet carrying an upper-layer payload
    pub fn data(
        next_header: u8,
        source_id: u16,
        dest_id: u16,
        options: Vec<DsrOption>,
        payload: Bytes,
    ) -> Self {
        Self {
            next_header,
            message_type: MessageType::Data,
            source_id,
            dest_id,
            options,
            payload,
        }
    }

    /// Encode header, padded option block and payload
    pub fn encode(&self) -> WireResult<Bytes> {
        let block = encode_options(&self.options)?;
        let payload_length =
            u16::try_from(block.len()).map_err(|_| WireError::OptionBlockTooLarge {
                size: block.len(),
                limit: usize::from(u16::MAX),
            })?;
        let header = FixedHeader {
            next_header: self.next_header,
            message_type: self.message_type,
            source_id: self.source_id,
            dest_id: self.dest_id,
            payload_length,
        };

        let mut buf = BytesMut::with_capacity(FixedHeader::LEN + block.len() + self.payload.len());
        header.encode_into(&mut buf);
        buf.put_slice(&block);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Decode a packet; the payload is a zero-copy slice of `data`
    pub fn decode(data: &Bytes) -> WireResult<Self> {
        let header = FixedHeader::decode(data)?;
        let block_end = FixedHeader::LEN + usize::from(header.payload_length);
        ensure_len(data, block_end)?;
        let options = decode_options(&data[FixedHeader::LEN..block_end])?;
        Ok(Self {
            next_header: header.next_header,
            message_type: header.message_type,
            source_id: header.source_id,
            dest_id: header.dest_id,
            options,
            payload: data.slice(block_end..),
        })
    }

    pub fn route_request(&self) -> Option<&RouteRequest> {
        self.options.iter().find_map(|o| match o {
            DsrOption::RouteRequest(r) => Some(r),
            _ => None,
        })
    }

    pub fn route_reply(&self) -> Option<&RouteReply> {
        self.options.iter().find_map(|o| match o {
            DsrOption::RouteReply(r) => Some(r),
            _ => None,
        })
    }

    pub fn source_route(&self) -> Option<&SourceRoute> {
        self.options.iter().find_map(|o| match o {
            DsrOption::SourceRoute(r) => Some(r),
            _ => None,
        })
    }

    pub fn source_route_mut(&mut self) -> Option<&mut SourceRoute> {
        self.options.iter_mut().find_map(|o| match o {
            DsrOption::SourceRoute(r) => Some(r),
            _ => None,
        })
    }

    pub fn route_error(&self) -> Option<&RouteError> {
        self.options.iter().find_map(|o| match o {
            DsrOption::RouteError(e) => Some(e),
            _ => None,
        })
    }

    pub fn ack_request(&self) -> Option<AckRequest> {
        self.options.iter().find_map(|o| match o {
            DsrOption::AckRequest(a) => Some(*a),
            _ => None,
        })
    }

    pub fn ack(&self) -> Option<Ack> {
        self.options.iter().find_map(|o| match o {
            DsrOption::Ack(a) => Some(*a),
            _ => None,
        })
    }

    /// Drop any ack request, keeping every other option in place
    pub fn strip_ack_request(&mut self) {
        self.options.retain(|o| !matches!(o, DsrOption::AckRequest(_)));
    }

    /// Place an ack request directly after the source route
    pub fn attach_ack_request(&mut self, id: u16) {
        self.strip_ack_request();
        let at = self
            .options
            .iter()
            .position(|o| matches!(o, DsrOption::SourceRoute(_)))
            .map_or(self.options.len(), |i| i + 1);
        self.options.insert(at, DsrOption::AckRequest(AckRequest { id }));
    }
}

/// Padding needed to bring `offset` onto the option alignment
fn pad_for(offset: usize) -> usize {
    (OPTION_ALIGNMENT - offset % OPTION_ALIGNMENT) % OPTION_ALIGNMENT
}

fn put_padding(buf: &mut BytesMut, pad: usize) -> WireResult<()> {
    match pad {
        0 => Ok(()),
        1 => DsrOption::Pad1.encode_into(buf),
        n => DsrOption::PadN(n as u8).encode_into(buf),
    }
}

/// Encode an option block with alignment padding
///
/// Padding options in `options` are ignored; alignment is recomputed.
pub fn encode_options(options: &[DsrOption]) -> WireResult<BytesMut> {
    let mut buf = BytesMut::new();
    for option in options.iter().filter(|o| !o.is_padding()) {
        let pad = pad_for(buf.len());
        put_padding(&mut buf, pad)?;
        option.encode_into(&mut buf)?;
    }
    let pad = pad_for(buf.len());
    put_padding(&mut buf, pad)?;
    Ok(buf)
}

/// Decode an option block, discarding padding
pub fn decode_options(mut block: &[u8]) -> WireResult<Vec<DsrOption>> {
    let mut options = Vec::new();
    while !block.is_empty() {
        let (option, used) = DsrOption::decode(block)?;
        block = &block[used..];
        if !option.is_padding() {
            options.push(option);
        }
    }
    Ok(options)
}

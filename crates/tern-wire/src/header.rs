//! The fixed 8-byte DSR header
//!
//! ```text
//! [next_header:1][message_type:1][source_id:2][dest_id:2][payload_length:2]
//! ```
//!
//! All multi-byte fields are big-endian. `payload_length` counts the bytes
//! of the option block that follows, padding included.

use bytes::{Buf, BufMut};

use crate::error::{WireError, WireResult, ensure_len};

/// DSR message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Discovery, replies, errors and acks
    Control = 1,
    /// Source-routed upper-layer data
    Data = 2,
}

impl TryFrom<u8> for MessageType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Control),
            2 => Ok(Self::Data),
            _ => Err(WireError::InvalidMessageType(value)),
        }
    }
}

/// Fixed DSR header preceding every option block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    /// Upper-layer protocol of the payload after the option block
    pub next_header: u8,
    pub message_type: MessageType,
    /// Node id of the originator
    pub source_id: u16,
    /// Node id of the final destination
    pub dest_id: u16,
    /// Byte length of the option block
    pub payload_length: u16,
}

impl FixedHeader {
    /// Encoded size in bytes
    pub const LEN: usize = 8;

    pub fn encode_into<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.next_header);
        buf.put_u8(self.message_type as u8);
        buf.put_u16(self.source_id);
        buf.put_u16(self.dest_id);
        buf.put_u16(self.payload_length);
    }

    pub fn decode(data: &[u8]) -> WireResult<Self> {
        ensure_len(data, Self::LEN)?;
        let mut buf = &data[..Self::LEN];
        let next_header = buf.get_u8();
        let message_type = MessageType::try_from(buf.get_u8())?;
        Ok(Self {
            next_header,
            message_type,
            source_id: buf.get_u16(),
            dest_id: buf.get_u16(),
            payload_length: buf.get_u16(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = FixedHeader {
            next_header: 17,
            message_type: MessageType::Data,
            source_id: 0x0102,
            dest_id: 0x0304,
            payload_length: 12,
        };
        let mut buf = Vec::new();
        header.encode_into(&mut buf);
        assert_eq!(buf, [17, 2, 0x01, 0x02, 0x03, 0x04, 0, 12]);
        assert_eq!(FixedHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_header_rejects_bad_message_type() {
        let buf = [0u8, 9, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            FixedHeader::decode(&buf),
            Err(WireError::InvalidMessageType(9))
        );
    }

    #[test]
    fn test_header_rejects_short_input() {
        assert!(matches!(
            FixedHeader::decode(&[1, 1, 0]),
            Err(WireError::Truncated { needed: 8, available: 3 })
        ));
    }
}

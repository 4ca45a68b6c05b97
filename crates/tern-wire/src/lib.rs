//! # Tern Wire
//!
//! Bit-exact codec for the DSR fixed header and its TLV option chain.
//!
//! ## Wire Format
//!
//! ```text
//! [fixed header:8][option block:payload_length][upper-layer payload]
//! ```
//!
//! - [`header`]: the fixed 8-byte header and [`MessageType`]
//! - [`option`]: every option type as a variant of [`DsrOption`]
//! - [`packet`]: [`DsrPacket`], which pads options onto 4-byte boundaries
//!   on encode and strips padding on decode
//!
//! Unknown option types decode into [`DsrOption::Unknown`] rather than
//! failing, so a receiver can answer them with an option-not-supported
//! route error.

pub mod error;
pub mod header;
pub mod option;
pub mod packet;

// Re-export main types
pub use error::{WireError, WireResult};
pub use header::{FixedHeader, MessageType};
pub use option::{
    Ack, AckRequest, DsrOption, RouteError, RouteReply, RouteRequest, SourceRoute,
    UnreachableError, UnsupportedError,
};
pub use packet::{DsrPacket, OPTION_ALIGNMENT, decode_options, encode_options};

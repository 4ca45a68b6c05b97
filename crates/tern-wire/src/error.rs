//! Wire codec errors

use thiserror::Error;

/// Errors raised while encoding or decoding DSR headers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    #[error("Truncated input: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },

    #[error("Invalid message type: {0}")]
    InvalidMessageType(u8),

    #[error("Option type {option_type} has invalid length {length}")]
    LengthMismatch { option_type: u8, length: u8 },

    #[error("Invalid route error type: {0}")]
    InvalidRouteErrorType(u8),

    #[error("Too many addresses for one option: {count}, limit {limit}")]
    TooManyAddresses { count: usize, limit: usize },

    #[error("Option block too large: {size} bytes exceeds {limit}")]
    OptionBlockTooLarge { size: usize, limit: usize },
}

/// Result type alias using WireError
pub type WireResult<T> = Result<T, WireError>;

/// Fail with [`WireError::Truncated`] unless `data` holds `needed` bytes
pub(crate) fn ensure_len(data: &[u8], needed: usize) -> WireResult<()> {
    if data.len() < needed {
        return Err(WireError::Truncated {
            needed,
            available: data.len(),
        });
    }
    Ok(())
}

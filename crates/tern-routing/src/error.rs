//! Route cache error types

use tern_core::Address;
use thiserror::Error;

/// Reasons a path cannot become a route cache entry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("Route has fewer than two addresses ({len})")]
    TooShort { len: usize },

    #[error("Route starts and ends at {0}")]
    SameEndpoints(Address),
}

/// Result type for route cache operations
pub type CacheResult<T> = Result<T, CacheError>;

//! Crate-wide error type.

use thiserror::Error;

/// Error type shared by the address/port primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AegisError {
    /// A CIDR string did not parse (e.g. bad prefix length, malformed octets).
    #[error("invalid CIDR {0:?}")]
    InvalidCidr(String),

    /// A port or port-range string did not parse.
    #[error("invalid port spec {0:?}")]
    InvalidPort(String),

    /// Mixed address families where both operands must share one.
    #[error("address family mismatch")]
    FamilyMismatch,
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, AegisError>;

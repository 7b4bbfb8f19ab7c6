//! Error types shared across the streaming crates.

use thiserror::Error;

/// Rejected before a session starts; never surfaces mid-stream.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid stream config: {0}")]
    Invalid(String),
    #[error("filter coefficient out of range: {0}")]
    FilterCoefficient(String),
}

/// A control-plane message that could not be decoded. Advisory only:
/// the receiver logs it and carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed control message: {0}")]
    Malformed(String),
}

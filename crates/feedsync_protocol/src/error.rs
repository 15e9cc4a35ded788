//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Reasons a feed line could not be decoded.
///
/// These never abort a stream; the decoder skips the line and records the
/// failure in its statistics.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The line is not valid JSON (or not valid UTF-8).
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// The line is JSON but has no string `type` field.
    #[error("message has no type")]
    MissingType,

    /// The line names a known kind but its fields do not match it.
    #[error("invalid {kind} message: {message}")]
    InvalidMessage {
        /// The message kind from the `type` field.
        kind: String,
        /// Description of the mismatch.
        message: String,
    },
}

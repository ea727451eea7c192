//! Protocol error types

use thiserror::Error;

/// Errors that can occur while decoding channel request payloads
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    /// Payload ended before a required field
    #[error("Payload too short: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    /// Terminal name length points past the end of the payload
    #[error("Terminal name length {0} exceeds payload")]
    TermNameOverflow(u32),

    /// Terminal name is not valid UTF-8
    #[error("Terminal name is not valid UTF-8")]
    InvalidTermName,
}

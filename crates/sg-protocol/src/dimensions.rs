//! Terminal dimensions carried by `pty-req` and `window-change` requests
//!
//! Both requests encode the size as two big-endian `u32` fields, width
//! (columns) first, then height (rows):
//!
//! - `window-change`: the dimensions start at offset 0.
//! - `pty-req`: a length-prefixed terminal name comes first; the 4-byte
//!   big-endian length lives at offset 0, so the dimensions start at
//!   `4 + term_name_len`.

use bytes::Buf;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Width of a length or dimension field in bytes
const FIELD_SIZE: usize = 4;

/// Encoded size of a width/height pair
pub const DIMENSIONS_SIZE: usize = 2 * FIELD_SIZE;

/// Terminal size in character cells
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TerminalDimensions {
    /// Columns
    pub width: u32,
    /// Rows
    pub height: u32,
}

impl TerminalDimensions {
    /// Create a new set of dimensions
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Decode dimensions from the start of `payload` (window-change layout)
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut buf = payload;
        if buf.remaining() < DIMENSIONS_SIZE {
            return Err(ProtocolError::Truncated {
                needed: DIMENSIONS_SIZE,
                actual: buf.remaining(),
            });
        }

        let width = buf.get_u32();
        let height = buf.get_u32();
        Ok(Self { width, height })
    }

    /// Decode the terminal name and dimensions of a `pty-req` payload
    pub fn decode_pty_request(payload: &[u8]) -> Result<(String, Self), ProtocolError> {
        let mut buf = payload;
        if buf.remaining() < FIELD_SIZE {
            return Err(ProtocolError::Truncated {
                needed: FIELD_SIZE,
                actual: buf.remaining(),
            });
        }

        let term_len = buf.get_u32();
        let name_end = FIELD_SIZE
            .checked_add(term_len as usize)
            .filter(|end| *end <= payload.len())
            .ok_or(ProtocolError::TermNameOverflow(term_len))?;

        let term = std::str::from_utf8(&payload[FIELD_SIZE..name_end])
            .map_err(|_| ProtocolError::InvalidTermName)?
            .to_string();

        let dims = Self::decode(&payload[name_end..])?;
        Ok((term, dims))
    }

    /// Columns, clamped to what a pty can represent
    pub fn cols(&self) -> u16 {
        u16::try_from(self.width).unwrap_or(u16::MAX)
    }

    /// Rows, clamped to what a pty can represent
    pub fn rows(&self) -> u16 {
        u16::try_from(self.height).unwrap_or(u16::MAX)
    }
}

impl Default for TerminalDimensions {
    fn default() -> Self {
        Self {
            width: 80,
            height: 24,
        }
    }
}

impl std::fmt::Display for TerminalDimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

//! Channel-scoped control requests
//!
//! A session channel carries out-of-band requests next to its byte stream.
//! The gateway acts on three of them:
//!
//! - `shell` with an empty payload starts the default shell.
//! - `pty-req` sets the initial terminal size.
//! - `window-change` resizes the terminal; it never gets a reply.
//!
//! Every other request type is refused.

use bytes::Bytes;

use crate::dimensions::TerminalDimensions;
use crate::error::ProtocolError;

/// A decoded control request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// `shell`; only an empty payload is honoured
    Shell { payload: Bytes },
    /// `pty-req`
    PtyRequest {
        term: String,
        dims: TerminalDimensions,
    },
    /// `window-change`
    WindowChange { dims: TerminalDimensions },
    /// Any request type the gateway does not act on
    Other { kind: String },
}

/// How a control request is answered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestReply {
    /// Affirmative reply
    Success,
    /// Negative reply
    Failure,
    /// No reply is sent
    Silent,
}

impl ControlRequest {
    /// Decode a request from its type string and raw payload
    pub fn from_wire(kind: &str, payload: &[u8]) -> Result<Self, ProtocolError> {
        let request = match kind {
            "shell" => Self::Shell {
                payload: Bytes::copy_from_slice(payload),
            },
            "pty-req" => {
                let (term, dims) = TerminalDimensions::decode_pty_request(payload)?;
                Self::PtyRequest { term, dims }
            }
            "window-change" => Self::WindowChange {
                dims: TerminalDimensions::decode(payload)?,
            },
            other => {
                tracing::trace!("Unhandled control request type: {}", other);
                Self::Other {
                    kind: other.to_string(),
                }
            }
        };
        Ok(request)
    }

    /// The request type as it appears on the wire
    pub fn kind(&self) -> &str {
        match self {
            Self::Shell { .. } => "shell",
            Self::PtyRequest { .. } => "pty-req",
            Self::WindowChange { .. } => "window-change",
            Self::Other { kind } => kind,
        }
    }

    /// Dimensions this request applies to the terminal, if any
    pub fn dimensions(&self) -> Option<TerminalDimensions> {
        match self {
            Self::PtyRequest { dims, .. } | Self::WindowChange { dims } => Some(*dims),
            _ => None,
        }
    }

    /// Reply owed to the client for this request
    ///
    /// `shell` is only accepted without a command; a payload there would be
    /// an attempt to run something other than the configured command.
    pub fn reply(&self) -> RequestReply {
        match self {
            Self::Shell { payload } if payload.is_empty() => RequestReply::Success,
            Self::Shell { .. } => RequestReply::Failure,
            Self::PtyRequest { .. } => RequestReply::Success,
            Self::WindowChange { .. } => RequestReply::Silent,
            Self::Other { .. } => RequestReply::Failure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_shell_is_accepted() {
        let request = ControlRequest::from_wire("shell", &[]).unwrap();
        assert_eq!(request.reply(), RequestReply::Success);
    }

    #[test]
    fn test_shell_with_command_is_refused() {
        let request = ControlRequest::from_wire("shell", b"rm -rf /").unwrap();
        assert_eq!(request.kind(), "shell");
        assert_eq!(request.reply(), RequestReply::Failure);
    }

    #[test]
    fn test_pty_request_decodes_dimensions() {
        let payload = [
            0, 0, 0, 5, b'x', b't', b'e', b'r', b'm', 0, 0, 0, 80, 0, 0, 0, 24,
        ];
        let request = ControlRequest::from_wire("pty-req", &payload).unwrap();
        assert_eq!(
            request,
            ControlRequest::PtyRequest {
                term: "xterm".to_string(),
                dims: TerminalDimensions::new(80, 24),
            }
        );
        assert_eq!(request.reply(), RequestReply::Success);
    }

    #[test]
    fn test_window_change_has_no_reply() {
        let payload = [0, 0, 0, 132, 0, 0, 0, 43];
        let request = ControlRequest::from_wire("window-change", &payload).unwrap();
        assert_eq!(request.dimensions(), Some(TerminalDimensions::new(132, 43)));
        assert_eq!(request.reply(), RequestReply::Silent);
    }

    #[test]
    fn test_unknown_request_is_refused() {
        let request = ControlRequest::from_wire("env", b"\0\0\0\x04LANG").unwrap();
        assert_eq!(request.kind(), "env");
        assert_eq!(request.dimensions(), None);
        assert_eq!(request.reply(), RequestReply::Failure);
    }

    #[test]
    fn test_malformed_window_change() {
        assert!(ControlRequest::from_wire("window-change", &[0, 0]).is_err());
    }
}

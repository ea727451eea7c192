//! sg-protocol: Channel request payloads for the shellgate gateway
//!
//! The SSH transport itself (handshake, encryption, framing) is provided by
//! the protocol library. This crate only covers the session-channel requests
//! the gateway acts on: terminal dimensions, pty/shell/window-change
//! requests, and channel-type gating.

pub mod channel;
pub mod dimensions;
pub mod error;
pub mod request;

pub use channel::ChannelKind;
pub use dimensions::TerminalDimensions;
pub use error::ProtocolError;
pub use request::{ControlRequest, RequestReply};

//! sg-gateway: SSH gateway attaching sessions to a pseudo-terminal command
//!
//! Clients authenticate by public key against an identity verifier; each
//! interactive channel they open gets its own pseudo-terminal running the
//! command resolved for that user. Bytes are bridged both ways between the
//! channel and the pty until either side closes, and the channel, the pty
//! and the process are torn down together exactly once.

pub mod auth;
pub mod dispatch;
pub mod pty;
pub mod resolver;
pub mod server;
pub mod session;
pub mod state;

pub use dispatch::{ChannelRejection, Dispatcher};
pub use state::GatewayState;

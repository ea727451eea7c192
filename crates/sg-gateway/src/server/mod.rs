//! SSH server implementation

mod handler;
mod listener;

pub use handler::{ConnectionHandler, RusshChannel, ServerConfig};
pub use listener::{load_host_key, GatewayServer};

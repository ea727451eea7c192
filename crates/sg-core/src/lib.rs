//! sg-core: Core abstractions and configuration for shellgate
//!
//! This crate provides the shared types, the collaborator traits the gateway
//! depends on (identity verification and command resolution), the error
//! taxonomy and the configuration structures.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use traits::{CommandResolver, IdentityVerifier};
pub use types::{CommandSpec, ConnectionId, EncodedPublicKey, SessionId, UserId};

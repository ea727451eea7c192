//! Collaborator traits
//!
//! The gateway never decides who may log in or what they get to run; both
//! decisions are delegated through these traits.

mod identity;
mod resolver;

pub use identity::IdentityVerifier;
pub use resolver::CommandResolver;

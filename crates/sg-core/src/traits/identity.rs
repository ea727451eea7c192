//! Identity verification

use async_trait::async_trait;

use crate::error::AuthError;
use crate::types::{EncodedPublicKey, UserId};

/// Decides whether a claimed user may authenticate with a given key
///
/// The decision must be deterministic for a given `(user, key)` pair; any
/// error rejects the handshake.
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Accept (`Ok`) or reject (`Err`) the offered key for `user`
    async fn verify(&self, user: &UserId, key: &EncodedPublicKey) -> Result<(), AuthError>;
}

//! Identity verifiers
//!
//! The gateway asks an [`IdentityVerifier`] about every offered key. Two
//! backends exist: per-user `authorized_keys` files and a remote HTTP
//! service. With neither configured, every login is refused.

mod keys;
mod remote;

pub use keys::{AuthorizedKeys, AuthorizedKeysVerifier};
pub use remote::RemoteVerifier;

use std::sync::Arc;

use async_trait::async_trait;

use sg_core::config::AuthConfig;
use sg_core::error::{AuthError, ConfigError};
use sg_core::{EncodedPublicKey, IdentityVerifier, UserId};

/// Refuses every key
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectAll;

#[async_trait]
impl IdentityVerifier for RejectAll {
    async fn verify(&self, _user: &UserId, _key: &EncodedPublicKey) -> Result<(), AuthError> {
        Err(AuthError::NoVerifier)
    }
}

/// Tries verifiers in order; the first acceptance wins
///
/// When every verifier rejects, the last rejection is returned.
pub struct VerifierChain {
    verifiers: Vec<Arc<dyn IdentityVerifier>>,
}

impl VerifierChain {
    pub fn new(verifiers: Vec<Arc<dyn IdentityVerifier>>) -> Self {
        Self { verifiers }
    }

    pub fn len(&self) -> usize {
        self.verifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }
}

#[async_trait]
impl IdentityVerifier for VerifierChain {
    async fn verify(&self, user: &UserId, key: &EncodedPublicKey) -> Result<(), AuthError> {
        let mut last = AuthError::NoVerifier;
        for verifier in &self.verifiers {
            match verifier.verify(user, key).await {
                Ok(()) => return Ok(()),
                Err(e) => last = e,
            }
        }
        Err(last)
    }
}

/// Build the verifier described by `[auth]`
pub fn verifier_from_config(config: &AuthConfig) -> Result<Arc<dyn IdentityVerifier>, ConfigError> {
    let mut verifiers: Vec<Arc<dyn IdentityVerifier>> = Vec::new();

    if let Some(dir) = &config.authorized_keys_dir {
        tracing::info!("Verifying keys against authorized_keys files in {:?}", dir);
        verifiers.push(Arc::new(AuthorizedKeysVerifier::new(dir)));
    }
    if let Some(url) = &config.verifier_url {
        tracing::info!("Verifying keys with {}", url);
        verifiers.push(Arc::new(RemoteVerifier::new(url)?));
    }

    Ok(match verifiers.len() {
        0 => {
            tracing::warn!("No identity verifier configured, every login will be rejected");
            Arc::new(RejectAll)
        }
        1 => verifiers.remove(0),
        _ => Arc::new(VerifierChain::new(verifiers)),
    })
}

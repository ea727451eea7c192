//! Per-user authorized_keys files

use std::collections::HashSet;
use std::io;
use std::path::PathBuf;

use async_trait::async_trait;

use sg_core::error::AuthError;
use sg_core::{EncodedPublicKey, IdentityVerifier, UserId};

/// The keys listed in one OpenSSH `authorized_keys` file
#[derive(Debug, Default)]
pub struct AuthorizedKeys {
    /// Base64 wire encodings of the listed keys
    encodings: HashSet<String>,
}

impl AuthorizedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `authorized_keys` content
    ///
    /// Lines that don't hold a parseable key are skipped with a warning.
    pub fn parse(content: &str) -> Self {
        let mut store = Self::new();

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            match key_field(line) {
                Some(encoded) => {
                    tracing::trace!("Loaded key on line {}", line_num + 1);
                    store.encodings.insert(encoded.to_string());
                }
                None => tracing::warn!("Failed to parse key on line {}", line_num + 1),
            }
        }

        store
    }

    /// Check if a key is listed
    pub fn contains(&self, key: &EncodedPublicKey) -> bool {
        self.encodings.contains(&key.base64)
    }

    pub fn len(&self) -> usize {
        self.encodings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encodings.is_empty()
    }
}

/// The base64 field of a `type base64 [comment]` line, or of a bare
/// base64 line, provided it decodes to a public key
fn key_field(line: &str) -> Option<&str> {
    line.split_whitespace()
        .take(2)
        .find(|field| russh_keys::parse_public_key_base64(field).is_ok())
}

/// Accepts a key when it is listed in `<dir>/<user>`
///
/// Files are read on every attempt, so edits apply without a restart.
#[derive(Debug, Clone)]
pub struct AuthorizedKeysVerifier {
    dir: PathBuf,
}

impl AuthorizedKeysVerifier {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl IdentityVerifier for AuthorizedKeysVerifier {
    async fn verify(&self, user: &UserId, key: &EncodedPublicKey) -> Result<(), AuthError> {
        if !user.is_plain() {
            return Err(AuthError::UnknownUser(user.to_string()));
        }

        let path = self.dir.join(user.as_str());
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(AuthError::UnknownUser(user.to_string()));
            }
            Err(e) => {
                return Err(AuthError::Unavailable(format!("{}: {}", path.display(), e)));
            }
        };

        if AuthorizedKeys::parse(&content).contains(key) {
            Ok(())
        } else {
            Err(AuthError::Rejected {
                user: user.to_string(),
                reason: format!("{} key not in authorized_keys", key.algorithm),
            })
        }
    }
}

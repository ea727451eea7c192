//! Remote identity service

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use sg_core::error::{AuthError, ConfigError};
use sg_core::{EncodedPublicKey, IdentityVerifier, UserId};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Body of a verification request
#[derive(Debug, Serialize)]
struct VerifyRequest<'a> {
    user: &'a str,
    algorithm: &'a str,
    public_key: &'a str,
}

/// Delegates the decision to an HTTP service
///
/// Each attempt POSTs `{ "user", "algorithm", "public_key" }` as JSON; any
/// 2xx answer accepts the key, everything else rejects it.
#[derive(Debug, Clone)]
pub struct RemoteVerifier {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl RemoteVerifier {
    pub fn new(url: &str) -> Result<Self, ConfigError> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| ConfigError::Invalid(format!("verifier_url {:?}: {}", url, e)))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("HTTP client: {}", e)))?;

        Ok(Self { client, url })
    }
}

#[async_trait]
impl IdentityVerifier for RemoteVerifier {
    async fn verify(&self, user: &UserId, key: &EncodedPublicKey) -> Result<(), AuthError> {
        let body = VerifyRequest {
            user: user.as_str(),
            algorithm: &key.algorithm,
            public_key: &key.base64,
        };

        let response = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let detail = response.text().await.unwrap_or_default();
        let reason = match detail.trim() {
            "" => format!("verifier answered {}", status),
            detail => format!("verifier answered {}: {}", status, detail),
        };
        Err(AuthError::Rejected {
            user: user.to_string(),
            reason,
        })
    }
}

//! Identity verification
//!
//! Token issuance belongs to an external identity provider; this module
//! only validates a presented bearer credential and extracts a stable
//! user id before any pipeline work happens.

use crate::error::TranscribeError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

/// Verifies a bearer token and resolves it to a stable user id.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify_token(&self, token: &str) -> Result<String, TranscribeError>;
}

/// Extract the token from an `Authorization: Bearer ...` header value.
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    header
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Fixed token -> user id table, for development and tests.
pub struct StaticIdentityProvider {
    tokens: HashMap<String, String>,
}

impl StaticIdentityProvider {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn verify_token(&self, token: &str) -> Result<String, TranscribeError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(TranscribeError::Unauthenticated)
    }
}

/// Tokeninfo response from the external identity provider.
#[derive(Debug, Deserialize)]
struct TokenInfo {
    /// Stable subject identifier for the authenticated user.
    sub: String,
}

/// Delegates verification to the identity provider's tokeninfo endpoint.
pub struct RemoteIdentityProvider {
    tokeninfo_url: String,
    client: reqwest::Client,
}

impl RemoteIdentityProvider {
    pub fn new(tokeninfo_url: String) -> anyhow::Result<Self> {
        use anyhow::Context;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to create HTTP client for RemoteIdentityProvider")?;
        Ok(Self {
            tokeninfo_url,
            client,
        })
    }
}

#[async_trait]
impl IdentityProvider for RemoteIdentityProvider {
    async fn verify_token(&self, token: &str) -> Result<String, TranscribeError> {
        let response = self
            .client
            .get(&self.tokeninfo_url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| {
                warn!("Tokeninfo request failed: {}", e);
                TranscribeError::Unauthenticated
            })?;

        if !response.status().is_success() {
            return Err(TranscribeError::Unauthenticated);
        }

        let info: TokenInfo = response.json().await.map_err(|e| {
            warn!("Unparseable tokeninfo response: {}", e);
            TranscribeError::Unauthenticated
        })?;
        Ok(info.sub)
    }
}

//! Client for the external push sink (a mirror gateway deployment).
//!
//! Secret keys, ready upstreams and routing config are mirrored to the
//! sink's admin surface over HTTP Basic. Credentials and target come from
//! the environment (`GATEWAY_API_URL`, `GATEWAY_USER`, `GATEWAY_PASSWORD`).

use crate::types::{ConfigEntry, ReadyUpstream, SecretKey};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

const ADMIN_PATH: &str = "admin/v1";

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push sink not configured: {0} is empty")]
    NotConfigured(&'static str),
    #[error("push request failed: {0}")]
    Request(String),
    #[error("push sink returned status {0}")]
    Status(u16),
}

/// Admin-API client for the push sink.
pub struct PushClient {
    user: String,
    password: String,
    root: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ReadyUpstreamPayload<'a> {
    chain_id: &'a str,
    source: &'a str,
    rpc: &'a str,
}

impl PushClient {
    /// Builds a client from explicit settings.
    ///
    /// # Errors
    ///
    /// [`PushError::NotConfigured`] when any setting is empty;
    /// [`PushError::Request`] when the HTTP client cannot be built.
    pub fn new(user: &str, password: &str, root: &str) -> Result<Self, PushError> {
        if root.is_empty() {
            return Err(PushError::NotConfigured("GATEWAY_API_URL"));
        }
        if user.is_empty() {
            return Err(PushError::NotConfigured("GATEWAY_USER"));
        }
        if password.is_empty() {
            return Err(PushError::NotConfigured("GATEWAY_PASSWORD"));
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .use_rustls_tls()
            .build()
            .map_err(|e| PushError::Request(e.to_string()))?;
        Ok(Self {
            user: user.to_string(),
            password: password.to_string(),
            root: root.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Builds a client from the process environment; `None` when the sink is
    /// not configured.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let root = std::env::var("GATEWAY_API_URL").unwrap_or_default();
        let user = std::env::var("GATEWAY_USER").unwrap_or_default();
        let password = std::env::var("GATEWAY_PASSWORD").unwrap_or_default();
        Self::new(&user, &password, &root).ok()
    }

    async fn post<T: Serialize + ?Sized>(&self, object: &str, body: &T) -> Result<(), PushError> {
        let url = format!("{}/{}/{}", self.root, ADMIN_PATH, object);
        let response = self
            .client
            .post(&url)
            .basic_auth(&self.user, Some(&self.password))
            .json(body)
            .send()
            .await
            .map_err(|e| PushError::Request(e.to_string()))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(PushError::Status(status.as_u16()));
        }
        Ok(())
    }

    /// Mirrors a secret key.
    ///
    /// # Errors
    ///
    /// [`PushError`] on transport failure or non-200 status.
    pub async fn post_secret_key(&self, secret: &SecretKey) -> Result<(), PushError> {
        self.post("secret", secret).await
    }

    /// Mirrors one ready upstream (the sink expects a list body).
    ///
    /// # Errors
    ///
    /// [`PushError`] on transport failure or non-200 status.
    pub async fn post_ready_upstream(&self, upstream: &ReadyUpstream) -> Result<(), PushError> {
        let payload = [ReadyUpstreamPayload {
            chain_id: &upstream.chain_id,
            source: &upstream.source,
            rpc: &upstream.rpc,
        }];
        self.post("upstream/ready", &payload).await
    }

    /// Mirrors a config record.
    ///
    /// # Errors
    ///
    /// [`PushError`] on transport failure or non-200 status.
    pub async fn post_config(&self, entry: &ConfigEntry) -> Result<(), PushError> {
        self.post("config", entry).await
    }
}

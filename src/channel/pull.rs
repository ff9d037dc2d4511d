use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;

/// Pull failures are non-fatal: the caller logs them, notifies `on_error`
/// subscribers, and relies on the next scheduled tick.
#[derive(Debug, Error)]
pub enum PullError {
    #[error("query request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("query endpoint rejected request: {0}")]
    Rejected(String),
}

/// Read-only source of the single most recent reading for a device.
#[async_trait]
pub trait PullSource: Send + Sync {
    async fn latest(&self, device_id: &str) -> Result<Value, PullError>;
}

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

/// Envelope returned by the query API. A non-success envelope is a pull
/// failure, exactly like a transport error.
#[derive(Debug, Deserialize)]
pub struct LatestResponse {
    pub success: bool,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub msg: Option<String>,
}

impl LatestResponse {
    pub fn into_result(self) -> Result<Value, PullError> {
        if !self.success {
            return Err(PullError::Rejected(
                self.msg.unwrap_or_else(|| "unspecified error".to_owned()),
            ));
        }
        self.result
            .ok_or_else(|| PullError::Rejected("query returned no reading".to_owned()))
    }
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpQueryClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    http: reqwest::Client,
    base_url: String,
}

impl HttpQueryClient {
    /// The request timeout keeps a hung request from starving the polling
    /// cadence; the interval timer fires regardless.
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build query HTTP client")?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                base_url: config.query_base_url.trim_end_matches('/').to_owned(),
            }),
        })
    }
}

#[async_trait]
impl PullSource for HttpQueryClient {
    async fn latest(&self, device_id: &str) -> Result<Value, PullError> {
        let url = format!("{}/devices/{}/latest", self.inner.base_url, device_id);
        debug!(device_id = %device_id, url = %url, "fetching latest reading");

        let envelope: LatestResponse = self
            .inner
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        envelope.into_result()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

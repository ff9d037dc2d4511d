use anyhow::{Context, Result};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the external read-only query API
    pub query_base_url: String,
    /// Comma-separated list of device IDs to poll and watch
    pub device_ids: Vec<String>,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    pub server_host: String,
    pub server_port: u16,
    /// Pull polling cadence
    pub poll_interval: Duration,
    /// Maximum age of a reading before a device is considered stale
    pub freshness_window: Duration,
    /// Health recomputation cadence
    pub health_tick: Duration,
    /// Per-device history ring capacity
    pub history_capacity: usize,
    /// Timeout applied to each pull request
    pub request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            query_base_url: required("QUERY_BASE_URL")?,
            device_ids: optional("DEVICE_IDS", "")
                .split(',')
                .filter(|s| !s.is_empty())
                .map(|s| s.trim().to_owned())
                .collect(),
            mqtt_host: optional("MQTT_HOST", "127.0.0.1"),
            mqtt_port: optional("MQTT_PORT", "1883")
                .parse()
                .context("MQTT_PORT must be a valid port number")?,
            mqtt_client_id: optional("MQTT_CLIENT_ID", "irrigation-monitor"),
            server_host: optional("SERVER_HOST", "0.0.0.0"),
            server_port: optional("SERVER_PORT", "8080")
                .parse()
                .context("SERVER_PORT must be a valid port number")?,
            poll_interval: Duration::from_millis(
                optional("POLL_INTERVAL_MS", "5000")
                    .parse()
                    .context("POLL_INTERVAL_MS must be a positive integer")?,
            ),
            freshness_window: Duration::from_secs(
                optional("FRESHNESS_WINDOW_SECS", "30")
                    .parse()
                    .context("FRESHNESS_WINDOW_SECS must be a positive integer")?,
            ),
            health_tick: Duration::from_secs(
                optional("HEALTH_TICK_SECS", "2")
                    .parse()
                    .context("HEALTH_TICK_SECS must be a positive integer")?,
            ),
            history_capacity: optional("HISTORY_CAPACITY", "50")
                .parse()
                .context("HISTORY_CAPACITY must be a positive integer")?,
            request_timeout: Duration::from_secs(
                optional("REQUEST_TIMEOUT_SECS", "10")
                    .parse()
                    .context("REQUEST_TIMEOUT_SECS must be a positive integer")?,
            ),
        })
    }
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var: {key}"))
}

fn optional(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

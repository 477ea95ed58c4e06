// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the ferry ingestion pipeline.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level ferry configuration.
///
/// Loaded from TOML files following XDG hierarchy, with `FERRY_*`
/// environment variable overrides. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FerryConfig {
    /// Process-level settings.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Upstream session and gateway settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Upstream rate budget.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Transient error retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Channel discovery settings.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Live listener settings.
    #[serde(default)]
    pub listener: ListenerConfig,

    /// Historical backfill settings.
    #[serde(default)]
    pub backfill: BackfillConfig,

    /// Output stream publishing settings.
    #[serde(default)]
    pub publisher: PublisherConfig,

    /// Catalog and output stream storage.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Metrics and health endpoint.
    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

/// Process-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct IngestConfig {
    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Seconds to wait for workers to drain on shutdown.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

/// Upstream session configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Credential identity used for interactive login (phone number).
    #[serde(default)]
    pub phone: Option<String>,

    /// Base URL of the upstream gateway's HTTP API.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,

    /// WebSocket URL for push updates. Derived from `gateway_url` when unset.
    #[serde(default)]
    pub ws_url: Option<String>,

    /// Static API token presented to the gateway alongside the session.
    #[serde(default)]
    pub api_token: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Allow prompting an operator for a login code.
    #[serde(default = "default_true")]
    pub interactive: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            phone: None,
            gateway_url: default_gateway_url(),
            ws_url: None,
            api_token: None,
            request_timeout_secs: default_request_timeout_secs(),
            interactive: true,
        }
    }
}

impl SessionConfig {
    /// WebSocket endpoint for push updates.
    pub fn updates_url(&self) -> String {
        match &self.ws_url {
            Some(url) => url.clone(),
            None => {
                let base = self.gateway_url.trim_end_matches('/');
                let ws = if let Some(rest) = base.strip_prefix("https://") {
                    format!("wss://{rest}")
                } else if let Some(rest) = base.strip_prefix("http://") {
                    format!("ws://{rest}")
                } else {
                    base.to_string()
                };
                format!("{ws}/updates")
            }
        }
    }
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:8081".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// Upstream rate budget configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Length of one budget window in seconds.
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Budget units granted per window.
    #[serde(default = "default_max_calls_per_window")]
    pub max_calls_per_window: u32,

    #[serde(default = "default_cost")]
    pub auth_cost: u32,

    #[serde(default = "default_cost")]
    pub discovery_cost: u32,

    #[serde(default = "default_cost")]
    pub history_cost: u32,

    #[serde(default = "default_cost")]
    pub subscribe_cost: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            max_calls_per_window: default_max_calls_per_window(),
            auth_cost: default_cost(),
            discovery_cost: default_cost(),
            history_cost: default_cost(),
            subscribe_cost: default_cost(),
        }
    }
}

fn default_window_secs() -> u64 {
    1
}

fn default_max_calls_per_window() -> u32 {
    20
}

fn default_cost() -> u32 {
    1
}

/// Exponential backoff for transient upstream and storage failures.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Jitter as a fraction of the delay (0.0 - 1.0).
    #[serde(default = "default_jitter_percent")]
    pub jitter_percent: f64,

    /// Attempts before a transient upstream failure forces session re-validation.
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            jitter_percent: default_jitter_percent(),
            max_attempts: default_retry_max_attempts(),
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_jitter_percent() -> f64 {
    0.1
}

fn default_retry_max_attempts() -> u32 {
    5
}

/// A folder name pattern and the tag given to channels found under it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GroupPattern {
    /// Case-insensitive folder name prefix, e.g. "archive" matches "Archive-1".
    pub prefix: String,

    /// Group tag stored on matching channels. Defaults to the lowercased prefix.
    #[serde(default)]
    pub tag: Option<String>,
}

impl GroupPattern {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            tag: None,
        }
    }

    /// Tag applied to channels under a matching folder.
    pub fn tag(&self) -> String {
        self.tag
            .clone()
            .unwrap_or_else(|| self.prefix.to_lowercase())
    }

    /// True when `folder_title` starts with the prefix, ignoring case.
    pub fn matches(&self, folder_title: &str) -> bool {
        folder_title
            .to_lowercase()
            .starts_with(&self.prefix.to_lowercase())
    }
}

/// Channel discovery configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Seconds between discovery passes.
    #[serde(default = "default_discovery_interval_secs")]
    pub interval_secs: u64,

    /// Folder patterns to monitor.
    #[serde(default = "default_groups")]
    pub groups: Vec<GroupPattern>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_discovery_interval_secs(),
            groups: default_groups(),
        }
    }
}

impl DiscoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

fn default_discovery_interval_secs() -> u64 {
    300
}

fn default_groups() -> Vec<GroupPattern> {
    vec![GroupPattern::new("archive"), GroupPattern::new("monitor")]
}

/// Live listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ListenerConfig {
    /// Capacity of the push-event handoff queue. A full queue blocks the connection reader.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Delay before re-subscribing after the push stream dropped.
    #[serde(default = "default_resubscribe_delay_secs")]
    pub resubscribe_delay_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            resubscribe_delay_secs: default_resubscribe_delay_secs(),
        }
    }
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_resubscribe_delay_secs() -> u64 {
    1
}

/// Historical backfill configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackfillConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Number of concurrent backfill workers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Messages requested per history page.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    /// How far back a never-ingested channel is fetched. `None` fetches all history.
    #[serde(default)]
    pub max_history_messages: Option<u32>,

    /// Non-flood failures before a job is marked failed.
    #[serde(default = "default_job_max_attempts")]
    pub max_attempts: u32,

    /// Delay before a failed attempt is retried.
    #[serde(default = "default_job_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: default_concurrency(),
            batch_size: default_batch_size(),
            max_history_messages: None,
            max_attempts: default_job_max_attempts(),
            retry_delay_secs: default_job_retry_delay_secs(),
        }
    }
}

fn default_concurrency() -> usize {
    2
}

fn default_batch_size() -> u32 {
    100
}

fn default_job_max_attempts() -> u32 {
    5
}

fn default_job_retry_delay_secs() -> u64 {
    30
}

/// Output stream publishing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PublisherConfig {
    /// How long a published `(channel, seq)` key is remembered for deduplication.
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,

    /// Seconds between prune passes over delivered events.
    #[serde(default = "default_prune_interval_secs")]
    pub prune_interval_secs: u64,

    /// Attempts to append an event while the output stream is unavailable.
    #[serde(default = "default_max_publish_attempts")]
    pub max_publish_attempts: u32,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: default_dedup_window_secs(),
            prune_interval_secs: default_prune_interval_secs(),
            max_publish_attempts: default_max_publish_attempts(),
        }
    }
}

fn default_dedup_window_secs() -> u64 {
    7 * 24 * 60 * 60
}

fn default_prune_interval_secs() -> u64 {
    3600
}

fn default_max_publish_attempts() -> u32 {
    10
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite catalog database (channels, jobs, session).
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Path to the SQLite output stream. `None` keeps the outbox in the catalog database.
    #[serde(default)]
    pub output_path: Option<String>,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            output_path: None,
            wal_mode: true,
        }
    }
}

impl StorageConfig {
    /// Database holding the output stream.
    pub fn output_database_path(&self) -> &str {
        self.output_path.as_deref().unwrap_or(&self.database_path)
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("ferry").join("ferry.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("ferry.db"))
        .to_string_lossy()
        .into_owned()
}

/// Metrics and health endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PrometheusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_host")]
    pub host: String,

    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_metrics_host(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_host() -> String {
    "127.0.0.1".to_string()
}

fn default_metrics_port() -> u16 {
    9464
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_pattern_matches_prefix_case_insensitively() {
        let pattern = GroupPattern::new("archive");
        assert!(pattern.matches("Archive-1"));
        assert!(pattern.matches("archive"));
        assert!(!pattern.matches("my archive"));
        assert_eq!(pattern.tag(), "archive");
    }

    #[test]
    fn explicit_tag_overrides_prefix() {
        let pattern = GroupPattern {
            prefix: "Watch".into(),
            tag: Some("monitor".into()),
        };
        assert_eq!(pattern.tag(), "monitor");
    }

    #[test]
    fn updates_url_derived_from_gateway() {
        let session = SessionConfig {
            gateway_url: "https://gw.example.com/".into(),
            ..SessionConfig::default()
        };
        assert_eq!(session.updates_url(), "wss://gw.example.com/updates");

        let explicit = SessionConfig {
            ws_url: Some("ws://10.0.0.2:9000/push".into()),
            ..SessionConfig::default()
        };
        assert_eq!(explicit.updates_url(), "ws://10.0.0.2:9000/push");
    }

    #[test]
    fn output_stream_defaults_to_catalog_database() {
        let storage = StorageConfig {
            database_path: "/var/lib/ferry/ferry.db".into(),
            ..StorageConfig::default()
        };
        assert_eq!(storage.output_database_path(), "/var/lib/ferry/ferry.db");
    }
}

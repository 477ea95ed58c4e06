// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization validation for configuration values.
//!
//! Validates semantic constraints that cannot be expressed via serde attributes,
//! such as bounded worker counts, well-formed URLs, and a dedup window long
//! enough to absorb live/backfill overlap.

use std::collections::HashSet;

use crate::diagnostic::ConfigError;
use crate::model::FerryConfig;

/// Shortest accepted dedup window (one day).
pub const MIN_DEDUP_WINDOW_SECS: u64 = 24 * 60 * 60;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Validate a deserialized configuration for semantic correctness.
///
/// Returns `Ok(())` if all validations pass, or `Err(Vec<ConfigError>)` with
/// all collected validation errors (does not fail fast).
pub fn validate_config(config: &FerryConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ConfigError::Validation { message });

    if !LOG_LEVELS.contains(&config.ingest.log_level.as_str()) {
        push(format!(
            "ingest.log_level `{}` must be one of {}",
            config.ingest.log_level,
            LOG_LEVELS.join(", ")
        ));
    }

    let gateway = config.session.gateway_url.trim();
    if !(gateway.starts_with("http://") || gateway.starts_with("https://")) {
        push(format!(
            "session.gateway_url `{gateway}` must start with http:// or https://"
        ));
    }

    if let Some(ws) = &config.session.ws_url
        && !(ws.starts_with("ws://") || ws.starts_with("wss://"))
    {
        push(format!("session.ws_url `{ws}` must start with ws:// or wss://"));
    }

    if let Some(phone) = &config.session.phone
        && phone.trim().is_empty()
    {
        push("session.phone must not be empty when set".to_string());
    }

    if config.session.request_timeout_secs == 0 {
        push("session.request_timeout_secs must be at least 1".to_string());
    }

    if config.rate_limit.window_secs == 0 {
        push("rate_limit.window_secs must be at least 1".to_string());
    }

    let max_calls = config.rate_limit.max_calls_per_window;
    if max_calls == 0 {
        push("rate_limit.max_calls_per_window must be at least 1".to_string());
    }
    for (name, cost) in [
        ("auth_cost", config.rate_limit.auth_cost),
        ("discovery_cost", config.rate_limit.discovery_cost),
        ("history_cost", config.rate_limit.history_cost),
        ("subscribe_cost", config.rate_limit.subscribe_cost),
    ] {
        if cost == 0 || cost > max_calls {
            push(format!(
                "rate_limit.{name} must be between 1 and max_calls_per_window ({max_calls}), got {cost}"
            ));
        }
    }

    if config.retry.backoff_factor < 1.0 {
        push(format!(
            "retry.backoff_factor must be >= 1.0, got {}",
            config.retry.backoff_factor
        ));
    }
    if !(0.0..=1.0).contains(&config.retry.jitter_percent) {
        push(format!(
            "retry.jitter_percent must be between 0.0 and 1.0, got {}",
            config.retry.jitter_percent
        ));
    }
    if config.retry.initial_delay_ms > config.retry.max_delay_ms {
        push("retry.initial_delay_ms must not exceed retry.max_delay_ms".to_string());
    }
    if config.retry.max_attempts == 0 {
        push("retry.max_attempts must be at least 1".to_string());
    }

    if config.discovery.interval_secs == 0 {
        push("discovery.interval_secs must be at least 1".to_string());
    }
    if config.discovery.groups.is_empty() {
        push("discovery.groups must contain at least one pattern".to_string());
    }
    let mut seen_prefixes = HashSet::new();
    for (i, group) in config.discovery.groups.iter().enumerate() {
        if group.prefix.trim().is_empty() {
            push(format!("discovery.groups[{i}].prefix must not be empty"));
        } else if !seen_prefixes.insert(group.prefix.to_lowercase()) {
            push(format!(
                "duplicate prefix `{}` in [[discovery.groups]]",
                group.prefix
            ));
        }
    }

    if config.listener.queue_capacity == 0 {
        push("listener.queue_capacity must be at least 1".to_string());
    }

    if !(1..=16).contains(&config.backfill.concurrency) {
        push(format!(
            "backfill.concurrency must be between 1 and 16, got {}",
            config.backfill.concurrency
        ));
    }
    if !(1..=1000).contains(&config.backfill.batch_size) {
        push(format!(
            "backfill.batch_size must be between 1 and 1000, got {}",
            config.backfill.batch_size
        ));
    }
    if config.backfill.max_attempts == 0 {
        push("backfill.max_attempts must be at least 1".to_string());
    }
    if config.backfill.max_history_messages == Some(0) {
        push("backfill.max_history_messages must be at least 1 when set".to_string());
    }

    // The dedup window has to outlive the slowest backfill job, or overlapping
    // live/backfill deliveries surface downstream twice.
    let retry_span = config
        .backfill
        .retry_delay_secs
        .saturating_mul(u64::from(config.backfill.max_attempts));
    let min_window = retry_span.max(MIN_DEDUP_WINDOW_SECS);
    if config.publisher.dedup_window_secs < min_window {
        push(format!(
            "publisher.dedup_window_secs must be at least {min_window}, got {}",
            config.publisher.dedup_window_secs
        ));
    }
    if config.publisher.prune_interval_secs == 0 {
        push("publisher.prune_interval_secs must be at least 1".to_string());
    }
    if config.publisher.max_publish_attempts == 0 {
        push("publisher.max_publish_attempts must be at least 1".to_string());
    }

    if config.storage.database_path.trim().is_empty() {
        push("storage.database_path must not be empty".to_string());
    }
    if let Some(output) = &config.storage.output_path
        && output.trim().is_empty()
    {
        push("storage.output_path must not be empty when set".to_string());
    }

    if config.prometheus.enabled && config.prometheus.host.parse::<std::net::IpAddr>().is_err()
    {
        push(format!(
            "prometheus.host `{}` is not a valid IP address",
            config.prometheus.host
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GroupPattern;

    fn messages(config: &FerryConfig) -> Vec<String> {
        match validate_config(config) {
            Ok(()) => Vec::new(),
            Err(errors) => errors.iter().map(|e| e.to_string()).collect(),
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&FerryConfig::default()).is_ok());
    }

    #[test]
    fn collects_all_errors() {
        let mut config = FerryConfig::default();
        config.backfill.concurrency = 0;
        config.backfill.batch_size = 5000;
        config.rate_limit.max_calls_per_window = 0;
        let errors = messages(&config);
        assert!(errors.len() >= 3, "expected several errors, got {errors:?}");
        assert!(errors.iter().any(|e| e.contains("backfill.concurrency")));
        assert!(errors.iter().any(|e| e.contains("backfill.batch_size")));
    }

    #[test]
    fn dedup_window_must_cover_job_retries() {
        let mut config = FerryConfig::default();
        config.publisher.dedup_window_secs = MIN_DEDUP_WINDOW_SECS;
        config.backfill.retry_delay_secs = 3600;
        config.backfill.max_attempts = 48;
        let errors = messages(&config);
        assert!(errors.iter().any(|e| e.contains("publisher.dedup_window_secs")));
    }

    #[test]
    fn rejects_duplicate_group_prefixes() {
        let mut config = FerryConfig::default();
        config.discovery.groups = vec![GroupPattern::new("archive"), GroupPattern::new("Archive")];
        let errors = messages(&config);
        assert!(errors.iter().any(|e| e.contains("duplicate prefix")));
    }

    #[test]
    fn rejects_non_http_gateway() {
        let mut config = FerryConfig::default();
        config.session.gateway_url = "tcp://10.0.0.1".into();
        let errors = messages(&config);
        assert!(errors.iter().any(|e| e.contains("session.gateway_url")));
    }
}

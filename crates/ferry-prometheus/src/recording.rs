// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any recorder can collect these metrics.

use std::time::Duration;

use ferry_core::{CostClass, JobStatus, Origin, PublishOutcome};
use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Register all ferry metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!(
        "ferry_events_published_total",
        "Events accepted by the output stream"
    );
    describe_counter!(
        "ferry_events_duplicate_total",
        "Events ignored as already published"
    );
    describe_counter!(
        "ferry_events_dropped_total",
        "Live events discarded before publishing"
    );
    describe_gauge!("ferry_backfill_jobs", "Backfill jobs by state");
    describe_histogram!(
        "ferry_rate_limit_backoff_seconds",
        "Flood-control waits requested by the upstream"
    );
    describe_gauge!(
        "ferry_rate_limit_backoff_active",
        "1 while upstream calls are paused for flood control"
    );
    describe_gauge!("ferry_session_valid", "1 while the upstream session is valid");
    describe_counter!(
        "ferry_upstream_calls_total",
        "Upstream calls by cost class"
    );
    describe_counter!(
        "ferry_discovery_syncs_total",
        "Discovery passes by outcome"
    );
    describe_gauge!("ferry_channels_enabled", "Enabled channels in the registry");
    describe_gauge!(
        "ferry_listener_queue_depth",
        "Live events buffered between the update stream and the publisher"
    );
}

/// Record a publish result.
pub fn record_published(origin: Origin, outcome: PublishOutcome) {
    let name = match outcome {
        PublishOutcome::Accepted => "ferry_events_published_total",
        PublishOutcome::DuplicateIgnored => "ferry_events_duplicate_total",
    };
    metrics::counter!(name, "origin" => origin.to_string()).increment(1);
}

/// Record a live event dropped before publishing. `reason` is a short tag.
pub fn record_dropped(reason: &'static str) {
    metrics::counter!("ferry_events_dropped_total", "reason" => reason).increment(1);
}

/// Publish job counts per state.
pub fn set_job_counts(counts: &[(JobStatus, usize)]) {
    for (status, count) in counts {
        metrics::gauge!("ferry_backfill_jobs", "state" => status.to_string()).set(*count as f64);
    }
}

/// Record a flood-control wait.
pub fn record_backoff(wait: Duration) {
    metrics::histogram!("ferry_rate_limit_backoff_seconds").record(wait.as_secs_f64());
}

pub fn set_backoff_active(active: bool) {
    metrics::gauge!("ferry_rate_limit_backoff_active").set(if active { 1.0 } else { 0.0 });
}

pub fn set_session_valid(valid: bool) {
    metrics::gauge!("ferry_session_valid").set(if valid { 1.0 } else { 0.0 });
}

pub fn record_upstream_call(class: CostClass) {
    metrics::counter!("ferry_upstream_calls_total", "class" => class.to_string()).increment(1);
}

/// `outcome` is one of "changed", "unchanged", "skipped", "error".
pub fn record_discovery_sync(outcome: &'static str) {
    metrics::counter!("ferry_discovery_syncs_total", "outcome" => outcome).increment(1);
}

pub fn set_channels_enabled(count: usize) {
    metrics::gauge!("ferry_channels_enabled").set(count as f64);
}

pub fn set_queue_depth(depth: usize) {
    metrics::gauge!("ferry_listener_queue_depth").set(depth as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    #[test]
    fn helpers_render_with_labels() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            register_metrics();
            record_published(Origin::Live, PublishOutcome::Accepted);
            record_published(Origin::Backfill, PublishOutcome::Accepted);
            record_published(Origin::Backfill, PublishOutcome::DuplicateIgnored);
            record_dropped("unknown_channel");
            set_job_counts(&[(JobStatus::PausedFloodWait, 2)]);
            record_backoff(Duration::from_secs(30));
            set_session_valid(true);
            record_upstream_call(CostClass::History);
        });

        let text = handle.render();
        assert!(text.contains(r#"ferry_events_published_total{origin="live"} 1"#));
        assert!(text.contains(r#"ferry_events_duplicate_total{origin="backfill"} 1"#));
        assert!(text.contains(r#"ferry_events_dropped_total{reason="unknown_channel"} 1"#));
        assert!(text.contains(r#"ferry_backfill_jobs{state="paused-flood-wait"} 2"#));
        assert!(text.contains(r#"ferry_upstream_calls_total{class="history"} 1"#));
        assert!(text.contains("ferry_session_valid 1"));
        assert!(text.contains("ferry_rate_limit_backoff_seconds"));
    }

    #[test]
    fn helpers_are_noops_without_recorder() {
        record_dropped("disabled_channel");
        set_queue_depth(3);
    }
}

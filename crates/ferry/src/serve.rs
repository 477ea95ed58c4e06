// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ferry serve`, `ferry login` and `ferry sync`.
//!
//! All three open the SQLite storage and the gateway client, then build the
//! ingestion [`Pipeline`] on top of them. `serve` runs it until a shutdown
//! signal; the other two drive a single component and exit.

use std::sync::Arc;
use std::time::Instant;

use ferry_config::model::FerryConfig;
use ferry_core::{FerryError, HealthStatus, PluginAdapter};
use ferry_ingest::{Pipeline, PipelineDeps, shutdown};
use ferry_storage::SqliteStorage;
use ferry_upstream::GatewayClient;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::health::{self, HealthState};
use crate::prompt::TtyPrompt;

/// Storage plus the pipeline built over it.
struct Runtime {
    storage: Arc<SqliteStorage>,
    pipeline: Pipeline,
}

impl Runtime {
    async fn open(config: FerryConfig) -> Result<Self, FerryError> {
        let storage = Arc::new(SqliteStorage::open(&config.storage).await?);
        let upstream = Arc::new(GatewayClient::new(&config.session)?);

        match upstream.health_check().await {
            Ok(HealthStatus::Healthy) => debug!("upstream gateway reachable"),
            Ok(status) => warn!(status = ?status, "upstream gateway not healthy, continuing"),
            Err(e) => warn!(error = %e, "upstream gateway health check failed, continuing"),
        }

        let deps = PipelineDeps {
            upstream,
            catalog: storage.clone(),
            jobs: storage.clone(),
            sessions: storage.clone(),
            sink: Arc::new(storage.sink()),
            prompt: Arc::new(TtyPrompt::new(config.session.interactive)),
        };
        let pipeline = Pipeline::build(config, deps).await?;
        Ok(Self { storage, pipeline })
    }

    async fn close(self) {
        drop(self.pipeline);
        if let Err(e) = self.storage.shutdown().await {
            warn!(error = %e, "WAL checkpoint failed on shutdown");
        }
    }
}

/// Runs the `ferry serve` command.
///
/// Returns once a shutdown signal has drained the pipeline, or with
/// `AuthRequired` if the session could not be established.
pub async fn run_serve(config: FerryConfig) -> Result<(), FerryError> {
    info!("starting ferry serve");

    let prometheus = if config.prometheus.enabled {
        match ferry_prometheus::PrometheusAdapter::new() {
            Ok(adapter) => Some(adapter),
            Err(e) => {
                warn!(error = %e, "prometheus initialization failed, continuing without metrics");
                None
            }
        }
    } else {
        debug!("prometheus metrics disabled by configuration");
        None
    };
    let prometheus_render = prometheus.as_ref().map(|adapter| {
        let handle = adapter.handle().clone();
        Arc::new(move || handle.render()) as Arc<dyn Fn() -> String + Send + Sync>
    });

    let endpoint = config
        .prometheus
        .enabled
        .then(|| (config.prometheus.host.clone(), config.prometheus.port));
    let runtime = Runtime::open(config).await?;

    let cancel = shutdown::install_signal_handler();

    let health_task = endpoint.map(|(host, port)| {
        let state = HealthState {
            start_time: Instant::now(),
            session: runtime.pipeline.session().subscribe_state(),
            prometheus_render,
        };
        let token = cancel.child_token();
        tokio::spawn(async move {
            if let Err(e) = health::serve(&host, port, state, token).await {
                warn!(error = %e, "health endpoint stopped");
            }
        })
    });

    let result = runtime.pipeline.run(cancel.clone()).await;
    cancel.cancel();
    if let Some(task) = health_task {
        join_logged("health", task).await;
    }
    runtime.close().await;

    if result.is_ok() {
        info!("ferry serve shutdown complete");
    }
    result
}

/// Await a background task, logging a panic or abort. Returns whether it
/// ended cleanly.
async fn join_logged(name: &'static str, task: JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            warn!(task = name, error = %e, "task ended abnormally");
            false
        }
    }
}

/// Runs the `ferry login` command.
pub async fn run_login(config: FerryConfig) -> Result<(), FerryError> {
    let runtime = Runtime::open(config).await?;
    let result = runtime.pipeline.session().bootstrap().await;
    runtime.close().await;

    let session = result?;
    println!(
        "session established for {} (user id {})",
        session.identity,
        session
            .user_id
            .map_or_else(|| "unknown".to_string(), |id| id.to_string())
    );
    Ok(())
}

/// Runs the `ferry sync` command.
///
/// Newly found channels get a persisted backfill job that the next
/// `ferry serve` picks up.
pub async fn run_sync(config: FerryConfig) -> Result<(), FerryError> {
    let runtime = Runtime::open(config).await?;
    let result = async {
        runtime.pipeline.session().bootstrap().await?;
        runtime.pipeline.discovery().sync_once().await
    }
    .await;
    let flushed = runtime.pipeline.registry().flush_dirty().await;
    runtime.close().await;

    flushed?;
    match result? {
        Some(report) => println!(
            "discovery: {} added, {} removed, {} updated",
            report.added, report.removed, report.updated
        ),
        None => println!("discovery: pass already in progress"),
    }
    Ok(())
}

/// Initializes the tracing subscriber with the given log level.
pub fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "ferry={log_level},ferry_ingest={log_level},ferry_storage={log_level},ferry_upstream={log_level},warn"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn panicked_task_is_logged() {
        let task = tokio::spawn(async { panic!("listener socket closed") });
        assert!(!join_logged("health", task).await);
        assert!(logs_contain("task ended abnormally"));
        assert!(logs_contain("health"));
    }

    #[tokio::test]
    async fn finished_task_joins_cleanly() {
        let task = tokio::spawn(async {});
        assert!(join_logged("health", task).await);
    }
}

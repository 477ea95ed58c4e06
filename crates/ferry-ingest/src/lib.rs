// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The ferry ingestion pipeline.
//!
//! [`Pipeline`] wires the components together around one shared
//! [`SessionManager`] and one shared [`RateController`]:
//! - Channel discovery keeps the [`ChannelRegistry`] in sync with upstream folders
//! - The live listener publishes push events as they arrive
//! - The backfill engine pages through channel history with a bounded worker pool
//! - Every event leaves through the [`QueuePublisher`]

pub mod backfill;
pub mod discovery;
pub mod listener;
pub mod publisher;
pub mod rate;
pub mod registry;
pub mod retry;
pub mod session;
pub mod shutdown;

use std::sync::Arc;
use std::time::Duration;

use ferry_config::model::FerryConfig;
use ferry_core::{
    CatalogStore, CodePrompt, EventSink, FerryError, JobStore, SessionStore, UpstreamAdapter,
};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use backfill::{BackfillEngine, BackfillSettings};
pub use discovery::{ChannelDiscovery, SyncReport};
pub use listener::{ListenerSettings, LiveListener};
pub use publisher::QueuePublisher;
pub use rate::{CostTable, RateBudget, RateController, RateGate};
pub use registry::ChannelRegistry;
pub use retry::RetryPolicy;
pub use session::{SessionManager, SessionState};

/// Interval between retries of catalog writes that failed.
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// External collaborators the pipeline is built on.
pub struct PipelineDeps {
    pub upstream: Arc<dyn UpstreamAdapter>,
    pub catalog: Arc<dyn CatalogStore>,
    pub jobs: Arc<dyn JobStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub sink: Arc<dyn EventSink>,
    pub prompt: Arc<dyn CodePrompt>,
}

pub struct Pipeline {
    config: FerryConfig,
    rate: Arc<RateController>,
    session: Arc<SessionManager>,
    registry: Arc<ChannelRegistry>,
    publisher: Arc<QueuePublisher>,
    backfill: Arc<BackfillEngine>,
    discovery: Arc<ChannelDiscovery>,
    listener: Arc<LiveListener>,
}

impl Pipeline {
    /// Construct every component and rehydrate persisted state.
    ///
    /// Storage failures here are reported as `CatalogStoreUnavailable`: the
    /// pipeline cannot start without its initial state.
    pub async fn build(config: FerryConfig, deps: PipelineDeps) -> Result<Self, FerryError> {
        let rate = Arc::new(RateController::from_config(&config.rate_limit));
        let retry = RetryPolicy::from_config(&config.retry);

        let session = Arc::new(SessionManager::new(
            deps.upstream,
            deps.sessions,
            deps.prompt,
            rate.clone(),
            retry.clone(),
            config.session.phone.clone(),
        ));

        let registry = Arc::new(
            ChannelRegistry::load(deps.catalog)
                .await
                .map_err(startup_error)?,
        );

        let publisher = Arc::new(QueuePublisher::new(
            deps.sink,
            retry
                .clone()
                .with_max_attempts(config.publisher.max_publish_attempts),
        ));

        let backfill = Arc::new(
            BackfillEngine::load(
                session.clone(),
                registry.clone(),
                publisher.clone(),
                deps.jobs,
                BackfillSettings::from_config(&config.backfill),
            )
            .await
            .map_err(startup_error)?,
        );
        let active_backfill = config.backfill.enabled.then(|| backfill.clone());

        let discovery = Arc::new(ChannelDiscovery::new(
            session.clone(),
            registry.clone(),
            config.discovery.groups.clone(),
            active_backfill.clone(),
        ));

        let listener = Arc::new(LiveListener::new(
            session.clone(),
            registry.clone(),
            publisher.clone(),
            active_backfill,
            ListenerSettings::from_config(&config.listener, retry.max_attempts),
        ));

        info!(
            channels = registry.list_all().len(),
            jobs = backfill.jobs().len(),
            backfill_enabled = config.backfill.enabled,
            "ingestion pipeline built"
        );

        Ok(Self {
            config,
            rate,
            session,
            registry,
            publisher,
            backfill,
            discovery,
            listener,
        })
    }

    pub fn rate(&self) -> &Arc<RateController> {
        &self.rate
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn publisher(&self) -> &Arc<QueuePublisher> {
        &self.publisher
    }

    pub fn backfill(&self) -> &Arc<BackfillEngine> {
        &self.backfill
    }

    pub fn discovery(&self) -> &Arc<ChannelDiscovery> {
        &self.discovery
    }

    pub fn listener(&self) -> &Arc<LiveListener> {
        &self.listener
    }

    /// Run every component until `cancel` fires.
    ///
    /// Returns `AuthRequired` when session bootstrap fails terminally; the
    /// other components are stopped first in that case.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), FerryError> {
        info!("ingestion pipeline running");
        let mut tasks = Vec::new();

        tasks.push(("session", self.session.spawn_supervisor(cancel.clone())));

        let discovery = self.discovery.clone();
        let interval = self.config.discovery.interval();
        let token = cancel.clone();
        tasks.push((
            "discovery",
            tokio::spawn(async move { discovery.run(interval, token).await }),
        ));

        let listener = self.listener.clone();
        let token = cancel.clone();
        tasks.push((
            "listener",
            tokio::spawn(async move { listener.run(token).await }),
        ));

        if self.config.backfill.enabled {
            let backfill = self.backfill.clone();
            let concurrency = self.config.backfill.concurrency;
            let token = cancel.clone();
            tasks.push((
                "backfill",
                tokio::spawn(async move { backfill.run_worker_pool(concurrency, token).await }),
            ));
        }

        tasks.push((
            "pruner",
            self.publisher.spawn_pruner(
                Duration::from_secs(self.config.publisher.prune_interval_secs),
                Duration::from_secs(self.config.publisher.dedup_window_secs),
                cancel.clone(),
            ),
        ));
        tasks.push((
            "flusher",
            self.registry.spawn_flusher(FLUSH_INTERVAL, cancel.clone()),
        ));

        let failed = tokio::select! {
            _ = cancel.cancelled() => false,
            _ = session_failed(self.session.subscribe_state()) => true,
        };
        if failed {
            warn!("session bootstrap failed terminally, stopping pipeline");
            cancel.cancel();
        } else {
            info!("shutdown requested, stopping pipeline");
        }

        let timeout = Duration::from_secs(self.config.ingest.shutdown_timeout_secs);
        shutdown::drain_tasks(tasks, timeout).await;

        match self.registry.flush_dirty().await {
            Ok(_) => {}
            Err(e) => warn!(
                error = %e,
                pending = self.registry.dirty_count(),
                "catalog writes still pending at shutdown"
            ),
        }

        if failed {
            return Err(FerryError::AuthRequired(
                "session bootstrap failed".into(),
            ));
        }
        info!("ingestion pipeline stopped");
        Ok(())
    }
}

/// Resolves once the session manager reaches `Failed`.
async fn session_failed(mut state: watch::Receiver<SessionState>) {
    loop {
        if *state.borrow_and_update() == SessionState::Failed {
            return;
        }
        if state.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn startup_error(e: FerryError) -> FerryError {
    match e {
        FerryError::Storage { source } => FerryError::CatalogStoreUnavailable { source },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{Channel, ChannelId, JobStatus};
    use ferry_test_utils::{
        MemoryCatalog, MemoryJobStore, MemorySessionStore, MemorySink, MockPrompt, MockUpstream,
        folder,
    };

    fn deps(
        upstream: Arc<MockUpstream>,
        catalog: Arc<MemoryCatalog>,
        prompt: MockPrompt,
    ) -> (PipelineDeps, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let deps = PipelineDeps {
            upstream,
            catalog,
            jobs: Arc::new(MemoryJobStore::new()),
            sessions: Arc::new(MemorySessionStore::new()),
            sink: sink.clone(),
            prompt: Arc::new(prompt),
        };
        (deps, sink)
    }

    fn config() -> FerryConfig {
        let mut config = FerryConfig::default();
        config.session.phone = Some("+15550001".into());
        config.backfill.batch_size = 10;
        config.listener.resubscribe_delay_secs = 0;
        config
    }

    #[tokio::test]
    async fn unavailable_catalog_fails_startup() {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.set_failing(true);
        let (deps, _) = deps(Arc::new(MockUpstream::new()), catalog, MockPrompt::with_code("12345"));

        let err = Pipeline::build(config(), deps).await.err().unwrap();
        assert!(matches!(err, FerryError::CatalogStoreUnavailable { .. }));
    }

    #[tokio::test]
    async fn terminal_bootstrap_failure_stops_pipeline() {
        let (deps, _) = deps(
            Arc::new(MockUpstream::new()),
            Arc::new(MemoryCatalog::new()),
            MockPrompt::non_interactive(),
        );
        let pipeline = Pipeline::build(config(), deps).await.unwrap();

        let err = pipeline.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, FerryError::AuthRequired(_)));
        assert_eq!(pipeline.session().state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn discovers_and_backfills_new_channel() {
        let upstream = Arc::new(MockUpstream::new());
        upstream.set_folders(vec![folder(1, "archive-1", &[(7, "seven")])]);
        upstream.seed_history(ChannelId(7), 1..=25);
        let (deps, sink) = deps(
            upstream.clone(),
            Arc::new(MemoryCatalog::new()),
            MockPrompt::with_code("12345"),
        );
        let pipeline = Arc::new(Pipeline::build(config(), deps).await.unwrap());
        let cancel = CancellationToken::new();
        let task = {
            let pipeline = pipeline.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { pipeline.run(cancel).await })
        };

        tokio::time::timeout(Duration::from_secs(30), async {
            while pipeline
                .backfill()
                .job(ChannelId(7))
                .is_none_or(|job| job.status != JobStatus::Completed)
            {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(pipeline.registry().cursor(ChannelId(7)), 25);
        assert_eq!(sink.seqs(ChannelId(7)), (1..=25).collect::<Vec<_>>());
        let channel: Channel = pipeline.registry().get(ChannelId(7)).unwrap();
        assert_eq!(channel.group_tag, "archive");

        cancel.cancel();
        task.await.unwrap().unwrap();
    }
}

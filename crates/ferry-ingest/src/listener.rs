// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Live push-event ingestion.
//!
//! Two halves joined by a bounded queue: the pump keeps a subscription open
//! on the current session and pushes raw events; the consumer normalizes,
//! publishes and advances cursors. A full queue blocks the pump, so nothing
//! is dropped between the two.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ferry_config::model::ListenerConfig;
use ferry_core::{ChannelId, Origin, RawMessage, SeqId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backfill::BackfillEngine;
use crate::publisher::QueuePublisher;
use crate::registry::ChannelRegistry;
use crate::session::SessionManager;

#[derive(Debug, Clone)]
pub struct ListenerSettings {
    pub queue_capacity: usize,
    pub resubscribe_delay: Duration,
    /// Consecutive transient subscription failures before the session is
    /// forced to re-validate.
    pub transient_ceiling: u32,
}

impl ListenerSettings {
    pub fn from_config(config: &ListenerConfig, transient_ceiling: u32) -> Self {
        Self {
            queue_capacity: config.queue_capacity.max(1),
            resubscribe_delay: Duration::from_secs(config.resubscribe_delay_secs),
            transient_ceiling: transient_ceiling.max(1),
        }
    }
}

pub struct LiveListener {
    session: Arc<SessionManager>,
    registry: Arc<ChannelRegistry>,
    publisher: Arc<QueuePublisher>,
    backfill: Option<Arc<BackfillEngine>>,
    settings: ListenerSettings,
    /// Cursors captured at subscription start, consumed by the first live
    /// event per channel.
    snapshot: Mutex<HashMap<ChannelId, SeqId>>,
}

impl LiveListener {
    pub fn new(
        session: Arc<SessionManager>,
        registry: Arc<ChannelRegistry>,
        publisher: Arc<QueuePublisher>,
        backfill: Option<Arc<BackfillEngine>>,
        settings: ListenerSettings,
    ) -> Self {
        Self {
            session,
            registry,
            publisher,
            backfill,
            settings,
            snapshot: Mutex::new(HashMap::new()),
        }
    }

    /// Listen until `cancel` fires or bootstrap fails terminally.
    ///
    /// Suspends while the session is invalid and resumes on the next valid
    /// one. Events queued at cancellation are still published.
    pub async fn run(&self, cancel: CancellationToken) {
        let (tx, rx) = mpsc::channel(self.settings.queue_capacity);
        let pump_cancel = cancel.child_token();
        tokio::join!(
            async {
                self.pump(tx, &pump_cancel).await;
                pump_cancel.cancel();
            },
            self.consume(rx, &pump_cancel),
        );
        debug!("live listener stopped");
    }

    async fn pump(&self, tx: mpsc::Sender<RawMessage>, cancel: &CancellationToken) {
        let mut failures = 0u32;
        loop {
            let valid = tokio::select! {
                _ = cancel.cancelled() => break,
                valid = self.session.wait_valid() => valid,
            };
            if let Err(e) = valid {
                error!(error = %e, "live listener stopping, no session available");
                break;
            }

            self.take_snapshot();
            info!(channels = self.registry.list_enabled().len(), "live subscription starting");

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.session.subscribe(tx.clone()) => result,
            };
            match result {
                Ok(()) => {
                    failures = 0;
                    info!("live subscription closed, resubscribing");
                }
                Err(e) if e.is_auth() => {
                    failures = 0;
                    warn!(error = %e, "live listener suspended until the session is renewed");
                }
                Err(e) if e.retry_after().is_some() => {
                    debug!(error = %e, "live subscription deferred by flood wait");
                }
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, failures, "live subscription dropped");
                    if failures >= self.settings.transient_ceiling {
                        self.session.invalidate().await;
                        failures = 0;
                    }
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.resubscribe_delay) => {}
            }
        }
    }

    async fn consume(&self, mut rx: mpsc::Receiver<RawMessage>, cancel: &CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                next = rx.recv() => next,
                _ = cancel.cancelled() => None,
            };
            let Some(raw) = next else { break };
            ferry_prometheus::set_queue_depth(rx.len());
            self.handle(raw).await;
        }

        rx.close();
        while let Some(raw) = rx.recv().await {
            self.handle(raw).await;
        }
        ferry_prometheus::set_queue_depth(0);
    }

    async fn handle(&self, raw: RawMessage) {
        let id = raw.channel_id;
        let seq = raw.seq_id;

        let Some(channel) = self.registry.get(id) else {
            debug!(channel_id = %id, seq_id = seq, "live event for unknown channel dropped");
            ferry_prometheus::record_dropped("unknown_channel");
            return;
        };
        if !channel.enabled {
            debug!(channel_id = %id, seq_id = seq, "live event for disabled channel dropped");
            ferry_prometheus::record_dropped("channel_disabled");
            return;
        }

        if let Some(from) = self.gap_before(id, seq) {
            self.recover(id, from, seq - 1, "gap since last subscription").await;
        }

        match self.publisher.publish(&raw.normalize(Origin::Live)).await {
            Ok(_) => {
                if let Err(e) = self.registry.update_cursor(id, seq).await {
                    warn!(channel_id = %id, seq_id = seq, error = %e, "cursor update failed");
                }
            }
            Err(e) => {
                error!(channel_id = %id, seq_id = seq, error = %e, "live event not accepted by output stream");
                self.recover(id, seq - 1, seq, "publish failure").await;
            }
        }
    }

    fn take_snapshot(&self) {
        let cursors: HashMap<ChannelId, SeqId> = self
            .registry
            .list_enabled()
            .into_iter()
            .map(|c| (c.id, c.cursor))
            .collect();
        *self.lock_snapshot() = cursors;
    }

    /// Start of the gap before live event `seq` for `id`, if there is one.
    ///
    /// The first event after a subscription starts is measured against the
    /// cursor snapshotted at that point. Later events, and channels that had
    /// no cursor yet, are measured against the registry cursor. A channel
    /// still waiting for its initial backfill thereby gets that backfill
    /// bounded below the live event.
    fn gap_before(&self, id: ChannelId, seq: SeqId) -> Option<SeqId> {
        let cursor = match self.lock_snapshot().remove(&id) {
            Some(cursor) if cursor > 0 => cursor,
            _ => self.registry.cursor(id),
        };
        (seq > cursor + 1).then_some(cursor)
    }

    async fn recover(&self, id: ChannelId, from: SeqId, to: SeqId, reason: &'static str) {
        let Some(backfill) = &self.backfill else {
            warn!(channel_id = %id, from, to, reason, "backfill disabled, range not recovered");
            return;
        };
        if let Err(e) = backfill.enqueue_range(id, from, to).await {
            warn!(channel_id = %id, from, to, reason, error = %e, "failed to queue recovery backfill");
        }
    }

    fn lock_snapshot(&self) -> std::sync::MutexGuard<'_, HashMap<ChannelId, SeqId>> {
        self.snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backfill::BackfillSettings;
    use crate::rate::{CostTable, RateController};
    use crate::retry::RetryPolicy;
    use ferry_core::{Channel, JobStatus, Session};
    use ferry_test_utils::{
        MemoryCatalog, MemoryJobStore, MemorySessionStore, MemorySink, MockPrompt, MockUpstream,
    };
    use secrecy::SecretString;

    const A: ChannelId = ChannelId(1);
    const B: ChannelId = ChannelId(2);

    struct Harness {
        upstream: Arc<MockUpstream>,
        registry: Arc<ChannelRegistry>,
        sink: Arc<MemorySink>,
        backfill: Arc<BackfillEngine>,
        listener: Arc<LiveListener>,
    }

    async fn harness() -> Harness {
        let upstream = Arc::new(MockUpstream::new());
        upstream.accept_session("blob");
        let retry = RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_factor: 2.0,
            jitter_percent: 0.0,
            max_attempts: 3,
        };
        let session = Arc::new(SessionManager::new(
            upstream.clone(),
            Arc::new(MemorySessionStore::with_session(Session::new(
                "+15550001",
                SecretString::from("blob".to_string()),
            ))),
            Arc::new(MockPrompt::with_code("12345")),
            Arc::new(RateController::new(
                Duration::from_secs(1),
                1_000,
                CostTable::default(),
            )),
            retry.clone(),
            Some("+15550001".into()),
        ));
        session.bootstrap().await.unwrap();

        let registry = Arc::new(
            ChannelRegistry::load(Arc::new(MemoryCatalog::new()))
                .await
                .unwrap(),
        );
        registry.upsert(Channel::discovered(A, "a", "monitor")).await;

        let sink = Arc::new(MemorySink::new());
        let publisher = Arc::new(QueuePublisher::new(sink.clone(), retry));
        let backfill = Arc::new(
            BackfillEngine::load(
                session.clone(),
                registry.clone(),
                publisher.clone(),
                Arc::new(MemoryJobStore::new()),
                BackfillSettings::default(),
            )
            .await
            .unwrap(),
        );
        let listener = Arc::new(LiveListener::new(
            session,
            registry.clone(),
            publisher,
            Some(backfill.clone()),
            ListenerSettings {
                queue_capacity: 4,
                resubscribe_delay: Duration::from_millis(1),
                transient_ceiling: 3,
            },
        ));
        Harness {
            upstream,
            registry,
            sink,
            backfill,
            listener,
        }
    }

    fn spawn(listener: &Arc<LiveListener>, cancel: &CancellationToken) -> tokio::task::JoinHandle<()> {
        let listener = listener.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { listener.run(cancel).await })
    }

    async fn until(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(30), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("condition never became true");
    }

    #[tokio::test]
    async fn publishes_live_events_and_advances_cursor() {
        let h = harness().await;
        let cancel = CancellationToken::new();
        let task = spawn(&h.listener, &cancel);
        h.upstream.wait_for_subscriptions(1).await;

        for _ in 0..10 {
            assert!(h.upstream.post(A).await);
        }
        until(|| h.registry.cursor(A) == 10).await;

        assert_eq!(h.sink.seqs(A), (1..=10).collect::<Vec<_>>());
        assert!(h.sink.events().iter().all(|e| e.origin == Origin::Live));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn unknown_and_disabled_channels_are_dropped() {
        let h = harness().await;
        h.registry.upsert(Channel::discovered(B, "b", "monitor")).await;
        h.registry.disable(B).await;
        let cancel = CancellationToken::new();
        let task = spawn(&h.listener, &cancel);
        h.upstream.wait_for_subscriptions(1).await;

        h.upstream.post(ChannelId(99)).await;
        h.upstream.post(B).await;
        h.upstream.post(A).await;
        until(|| h.registry.cursor(A) == 1).await;

        assert_eq!(h.sink.events().len(), 1);
        assert_eq!(h.registry.cursor(B), 0);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn gap_after_resubscribe_queues_reconciliation() {
        let h = harness().await;
        h.upstream.seed_history(A, 1..=5);
        h.registry.update_cursor(A, 5).await.unwrap();
        let cancel = CancellationToken::new();
        let task = spawn(&h.listener, &cancel);
        h.upstream.wait_for_subscriptions(1).await;

        h.upstream.drop_subscription();
        h.upstream.seed_history(A, 6..=8);
        h.upstream.wait_for_subscriptions(2).await;
        assert!(h.upstream.post(A).await);
        until(|| h.registry.cursor(A) == 9).await;

        let job = h.backfill.job(A).expect("reconciliation job");
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.from_seq, 5);
        assert_eq!(job.to_seq, Some(8));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn live_event_before_initial_backfill_keeps_history() {
        let h = harness().await;
        h.upstream.seed_history(A, 1..=30);
        assert!(h.backfill.enqueue(A).await.unwrap());
        let cancel = CancellationToken::new();
        let task = spawn(&h.listener, &cancel);
        h.upstream.wait_for_subscriptions(1).await;

        assert!(h.upstream.post(A).await);
        until(|| h.registry.cursor(A) == 31).await;
        let job = h.backfill.job(A).unwrap();
        assert_eq!((job.from_seq, job.to_seq), (0, Some(30)));

        let pool = {
            let backfill = h.backfill.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { backfill.run_worker_pool(1, cancel).await })
        };
        until(|| h.backfill.job(A).is_some_and(|job| job.status == JobStatus::Completed)).await;

        let mut seqs = h.sink.seqs(A);
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=31).collect::<Vec<_>>());

        cancel.cancel();
        task.await.unwrap();
        pool.await.unwrap();
    }

    #[tokio::test]
    async fn jump_in_live_sequence_queues_reconciliation() {
        let h = harness().await;
        let cancel = CancellationToken::new();
        let task = spawn(&h.listener, &cancel);
        h.upstream.wait_for_subscriptions(1).await;

        assert!(h.upstream.post(A).await);
        until(|| h.registry.cursor(A) == 1).await;
        h.upstream.seed_history(A, 2..=4);
        assert!(h.upstream.post(A).await);
        until(|| h.registry.cursor(A) == 5).await;

        let job = h.backfill.job(A).expect("reconciliation job");
        assert_eq!((job.from_seq, job.to_seq), (1, Some(4)));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn failed_publish_queues_recovery_and_keeps_cursor() {
        let h = harness().await;
        let cancel = CancellationToken::new();
        let task = spawn(&h.listener, &cancel);
        h.upstream.wait_for_subscriptions(1).await;

        h.upstream.post(A).await;
        until(|| h.registry.cursor(A) == 1).await;

        h.sink.fail_next(3);
        h.upstream.post(A).await;
        until(|| h.backfill.job(A).is_some()).await;

        assert_eq!(h.registry.cursor(A), 1);
        let job = h.backfill.job(A).unwrap();
        assert_eq!((job.from_seq, job.to_seq), (1, Some(2)));

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn auth_expiry_suspends_until_renewed() {
        let h = harness().await;
        let cancel = CancellationToken::new();
        let supervisor = h.listener.session.spawn_supervisor(cancel.clone());
        let task = spawn(&h.listener, &cancel);
        h.upstream.wait_for_subscriptions(1).await;

        h.upstream.post(A).await;
        until(|| h.registry.cursor(A) == 1).await;

        h.upstream.expire_sessions();
        h.upstream.wait_for_subscriptions(2).await;
        assert!(h.listener.session.is_valid());

        h.upstream.post(A).await;
        until(|| h.registry.cursor(A) == 2).await;
        assert_eq!(h.sink.seqs(A), vec![1, 2]);

        cancel.cancel();
        task.await.unwrap();
        supervisor.await.unwrap();
    }
}

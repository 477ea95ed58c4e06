// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Paginated historical fetch per channel.
//!
//! Jobs move through `pending -> running -> {completed | paused-flood-wait | failed}`
//! and are persisted in the [`JobStore`] after every transition and every
//! confirmed page. A bounded pool of workers pulls runnable jobs from a ready
//! queue; at most one worker holds a given channel at a time.
//!
//! Paging is forward, strictly after the job's progress boundary. Progress
//! only advances once every event of a page was accepted by the publisher,
//! so a cancelled or crashed job resumes without loss.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use ferry_config::model::BackfillConfig;
use ferry_core::{
    BackfillJob, ChannelId, FerryError, HistoryRequest, JobStatus, JobStore, Origin, SeqId,
};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::publisher::QueuePublisher;
use crate::registry::ChannelRegistry;
use crate::session::SessionManager;

/// Tunables for the backfill engine.
#[derive(Debug, Clone)]
pub struct BackfillSettings {
    pub batch_size: u32,
    /// Fresh channels are fetched from at most this many sequence ids below head.
    pub max_history_messages: Option<u32>,
    /// Consecutive non-flood failures before a job is failed.
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl BackfillSettings {
    pub fn from_config(config: &BackfillConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_history_messages: config.max_history_messages,
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        }
    }
}

impl Default for BackfillSettings {
    fn default() -> Self {
        Self::from_config(&BackfillConfig::default())
    }
}

pub struct BackfillEngine {
    session: Arc<SessionManager>,
    registry: Arc<ChannelRegistry>,
    publisher: Arc<QueuePublisher>,
    store: Arc<dyn JobStore>,
    settings: BackfillSettings,
    jobs: DashMap<ChannelId, BackfillJob>,
    /// Channels currently held by a worker, with the token that stops it.
    running: DashMap<ChannelId, CancellationToken>,
    /// Channels whose job must not be picked up until re-enqueued.
    held: DashSet<ChannelId>,
    /// Channels waiting out a retry delay after a failed page.
    cooling: DashSet<ChannelId>,
    /// Channels sitting in the ready queue.
    queued: DashSet<ChannelId>,
    ready_tx: mpsc::UnboundedSender<ChannelId>,
    ready_rx: Mutex<mpsc::UnboundedReceiver<ChannelId>>,
    persist_lock: Mutex<()>,
}

impl BackfillEngine {
    /// Rehydrate jobs from the store.
    ///
    /// Jobs interrupted while running or paused are reset to pending and
    /// queued again.
    pub async fn load(
        session: Arc<SessionManager>,
        registry: Arc<ChannelRegistry>,
        publisher: Arc<QueuePublisher>,
        store: Arc<dyn JobStore>,
        settings: BackfillSettings,
    ) -> Result<Self, FerryError> {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let engine = Self {
            session,
            registry,
            publisher,
            store,
            settings,
            jobs: DashMap::new(),
            running: DashMap::new(),
            held: DashSet::new(),
            cooling: DashSet::new(),
            queued: DashSet::new(),
            ready_tx,
            ready_rx: Mutex::new(ready_rx),
            persist_lock: Mutex::new(()),
        };

        let mut resumed = 0;
        for mut job in engine.store.load_jobs().await? {
            let id = job.channel_id;
            let interrupted = matches!(job.status, JobStatus::Running | JobStatus::PausedFloodWait);
            if interrupted {
                job.transition(JobStatus::Pending);
            }
            let runnable = job.status == JobStatus::Pending;
            engine.jobs.insert(id, job);
            if interrupted {
                engine.persist(id).await;
            }
            if runnable {
                engine.schedule(id);
                resumed += 1;
            }
        }
        info!(jobs = engine.jobs.len(), resumed, "backfill jobs loaded");
        engine.report_counts();
        Ok(engine)
    }

    /// Queue an open-ended job for `id` resuming from the channel's cursor.
    ///
    /// Returns `false` when an active job already exists; that job is
    /// released if it was held and queued again.
    pub async fn enqueue(&self, id: ChannelId) -> Result<bool, FerryError> {
        if self.registry.get(id).is_none() {
            return Err(FerryError::ChannelNotFound { channel_id: id });
        }
        let cursor = self.registry.cursor(id);
        let created = match self.jobs.entry(id) {
            Entry::Occupied(entry) if !entry.get().status.is_terminal() => false,
            Entry::Occupied(mut entry) => {
                entry.insert(BackfillJob::open_ended(id, cursor));
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(BackfillJob::open_ended(id, cursor));
                true
            }
        };
        if created {
            info!(channel_id = %id, from_seq = cursor, "backfill job created");
            self.persist(id).await;
        }
        self.held.remove(&id);
        self.schedule(id);
        Ok(created)
    }

    /// Queue a bounded job covering `(from, to]`.
    ///
    /// An active job for the channel absorbs the range: its progress is
    /// lowered to `from` and its upper bound raised to `to`. An open-ended
    /// job becomes bounded at `to`, since events after `to` reached the
    /// registry live.
    pub async fn enqueue_range(
        &self,
        id: ChannelId,
        from: SeqId,
        to: SeqId,
    ) -> Result<(), FerryError> {
        if to <= from {
            return Ok(());
        }
        if self.registry.get(id).is_none() {
            return Err(FerryError::ChannelNotFound { channel_id: id });
        }
        match self.jobs.entry(id) {
            Entry::Occupied(mut entry) if !entry.get().status.is_terminal() => {
                let job = entry.get_mut();
                job.from_seq = job.from_seq.min(from);
                job.to_seq = Some(job.to_seq.map_or(to, |bound| bound.max(to)));
                job.updated_at = Utc::now();
                debug!(channel_id = %id, from_seq = job.from_seq, to_seq = ?job.to_seq, "backfill range merged into active job");
            }
            Entry::Occupied(mut entry) => {
                entry.insert(BackfillJob::bounded(id, from, to));
            }
            Entry::Vacant(entry) => {
                entry.insert(BackfillJob::bounded(id, from, to));
            }
        }
        info!(channel_id = %id, from, to, "reconciliation backfill queued");
        self.persist(id).await;
        self.held.remove(&id);
        self.schedule(id);
        Ok(())
    }

    /// Stop `id`'s job between pages and hold it as pending.
    ///
    /// Returns `false` when the channel has no active job.
    pub fn cancel(&self, id: ChannelId) -> bool {
        let active = self
            .jobs
            .get(&id)
            .is_some_and(|job| !job.status.is_terminal());
        if !active {
            return false;
        }
        self.held.insert(id);
        if let Some(token) = self.running.get(&id) {
            token.cancel();
        }
        info!(channel_id = %id, "backfill job cancel requested");
        true
    }

    pub fn job(&self, id: ChannelId) -> Option<BackfillJob> {
        self.jobs.get(&id).map(|job| job.clone())
    }

    /// All known jobs, ordered by channel.
    pub fn jobs(&self) -> Vec<BackfillJob> {
        let mut out: Vec<BackfillJob> = self.jobs.iter().map(|job| job.clone()).collect();
        out.sort_by_key(|job| job.channel_id);
        out
    }

    /// Run `concurrency` workers until `cancel` fires.
    ///
    /// Workers finish their current page on cancellation; their jobs return
    /// to pending.
    pub async fn run_worker_pool(self: &Arc<Self>, concurrency: usize, cancel: CancellationToken) {
        let concurrency = concurrency.max(1);
        info!(concurrency, "backfill worker pool started");
        let workers: Vec<_> = (0..concurrency)
            .map(|n| tokio::spawn(Arc::clone(self).worker(n, cancel.clone())))
            .collect();
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!(error = %e, "backfill worker panicked");
            }
        }
        info!("backfill worker pool stopped");
    }

    async fn worker(self: Arc<Self>, n: usize, cancel: CancellationToken) {
        loop {
            let next = {
                let mut ready = self.ready_rx.lock().await;
                tokio::select! {
                    _ = cancel.cancelled() => None,
                    id = ready.recv() => id,
                }
            };
            let Some(id) = next else { break };
            self.queued.remove(&id);
            debug!(worker = n, channel_id = %id, "backfill job picked up");
            self.run_job(id, &cancel).await;
        }
    }

    async fn run_job(self: &Arc<Self>, id: ChannelId, cancel: &CancellationToken) {
        let token = cancel.child_token();
        match self.running.entry(id) {
            Entry::Occupied(_) => return,
            Entry::Vacant(entry) => {
                entry.insert(token.clone());
            }
        }

        let runnable = !self.held.contains(&id)
            && !self.cooling.contains(&id)
            && self.jobs.get(&id).is_some_and(|job| {
                matches!(job.status, JobStatus::Pending | JobStatus::PausedFloodWait)
            });
        if runnable {
            self.drive(id, &token, cancel).await;
        }

        self.running.remove(&id);
        let requeue = !self.held.contains(&id)
            && !self.cooling.contains(&id)
            && self
                .jobs
                .get(&id)
                .is_some_and(|job| job.status == JobStatus::Pending);
        if requeue && !cancel.is_cancelled() {
            self.schedule(id);
        }
    }

    async fn drive(
        self: &Arc<Self>,
        id: ChannelId,
        token: &CancellationToken,
        pool: &CancellationToken,
    ) {
        self.update(id, |job| job.transition(JobStatus::Running));
        self.persist(id).await;
        info!(channel_id = %id, "backfill job running");

        loop {
            if token.is_cancelled() {
                self.update(id, |job| job.transition(JobStatus::Pending));
                self.persist(id).await;
                info!(channel_id = %id, "backfill job stopped, progress kept");
                return;
            }

            let Some(job) = self.job(id) else { return };
            let channel = match self.registry.get(id) {
                Some(channel) if channel.enabled => channel,
                _ => {
                    self.held.insert(id);
                    self.update(id, |job| job.transition(JobStatus::Pending));
                    self.persist(id).await;
                    info!(channel_id = %id, "channel not enabled, backfill job held");
                    return;
                }
            };

            if job.is_open_ended()
                && job.head_seq.is_some_and(|head| job.from_seq >= head)
                && channel.cursor > job.from_seq
            {
                self.complete(id, "live cursor past observed head").await;
                return;
            }

            let after = job.from_seq;
            let request = HistoryRequest {
                channel_id: id,
                after,
                limit: self.settings.batch_size,
            };
            let result = tokio::select! {
                _ = token.cancelled() => continue,
                result = self.session.history(request) => result,
            };
            let page = match result {
                Ok(page) => page,
                Err(e) => {
                    self.fail_attempt(id, e, pool).await;
                    return;
                }
            };

            if let Some(horizon) = self.trim_horizon(&job, page.head) {
                self.update(id, |job| {
                    if job.from_seq == after {
                        job.from_seq = horizon;
                    }
                    job.head_seq = Some(page.head);
                });
                self.persist(id).await;
                debug!(channel_id = %id, horizon, head = page.head, "history limited to recent messages");
                continue;
            }

            // The fetch may have waited out backoffs; live events or a merged
            // range can have changed both the cursor and the job bound since.
            let Some(job) = self.job(id) else { return };
            let cursor = self.registry.cursor(id);
            let full = page.messages.len() >= self.settings.batch_size as usize;
            let end = page.end();
            let covered = job.is_open_ended() && end.is_some_and(|end| end <= cursor);
            let progress = end.map(|end| job.to_seq.map_or(end, |to| end.min(to)));

            if covered {
                debug!(channel_id = %id, after, end = ?end, cursor, "page already covered, skipping");
            } else {
                let mut published = 0usize;
                for message in page.messages {
                    if job.to_seq.is_some_and(|to| message.seq_id > to) {
                        break;
                    }
                    if let Err(e) = self.publisher.publish(&message.normalize(Origin::Backfill)).await {
                        self.fail_attempt(id, e, pool).await;
                        return;
                    }
                    published += 1;
                }
                if let Some(progress) = progress
                    && let Err(e) = self.registry.update_cursor(id, progress).await
                {
                    warn!(channel_id = %id, error = %e, "cursor update after backfill page failed");
                }
                debug!(channel_id = %id, after, end = ?end, published, "backfill page confirmed");
            }

            let mut done = false;
            self.update(id, |job| {
                let advanced = job.from_seq == after;
                if advanced && let Some(progress) = progress {
                    job.from_seq = job.from_seq.max(progress);
                }
                job.head_seq = Some(page.head);
                job.attempts = 0;
                job.last_error = None;
                job.updated_at = Utc::now();
                done = advanced
                    && (!full || job.to_seq.is_some_and(|to| job.from_seq >= to));
            });

            if done {
                self.complete(id, if full { "reached upper bound" } else { "reached head" })
                    .await;
                return;
            }
            self.persist(id).await;
        }
    }

    /// First-page trim for a fresh open-ended job.
    fn trim_horizon(&self, job: &BackfillJob, head: SeqId) -> Option<SeqId> {
        let limit = i64::from(self.settings.max_history_messages?);
        let horizon = head - limit;
        (job.is_open_ended() && job.head_seq.is_none() && job.from_seq == 0 && horizon > 0)
            .then_some(horizon)
    }

    async fn complete(&self, id: ChannelId, reason: &'static str) {
        let snapshot = self.update(id, |job| job.transition(JobStatus::Completed));
        self.persist(id).await;
        if let Some(job) = snapshot {
            info!(channel_id = %id, cursor = job.from_seq, reason, "backfill job completed");
        }
    }

    async fn fail_attempt(self: &Arc<Self>, id: ChannelId, err: FerryError, pool: &CancellationToken) {
        if let Some(retry_after) = err.retry_after() {
            self.update(id, |job| {
                job.transition(JobStatus::PausedFloodWait);
                job.last_error = Some(err.to_string());
            });
            self.persist(id).await;
            info!(channel_id = %id, retry_after_secs = retry_after.as_secs_f64(), "backfill job paused for flood wait");
            self.schedule_after(id, retry_after, pool);
            return;
        }

        let max_attempts = self.settings.max_attempts;
        let snapshot = self.update(id, |job| {
            job.attempts += 1;
            job.last_error = Some(err.to_string());
            if job.attempts >= max_attempts {
                job.transition(JobStatus::Failed);
            } else {
                job.transition(JobStatus::Pending);
            }
        });
        self.persist(id).await;

        match snapshot {
            Some(job) if job.status == JobStatus::Failed => {
                error!(channel_id = %id, attempts = job.attempts, error = %err, "backfill job failed");
            }
            Some(job) => {
                warn!(channel_id = %id, attempts = job.attempts, error = %err, "backfill page failed, will retry");
                self.cool_down(id, self.settings.retry_delay, pool);
            }
            None => {}
        }
    }

    /// Keep `id` off the workers for `delay`, then queue it again.
    fn cool_down(self: &Arc<Self>, id: ChannelId, delay: Duration, pool: &CancellationToken) {
        self.cooling.insert(id);
        let engine = Arc::clone(self);
        let cancel = pool.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
            engine.cooling.remove(&id);
            if !cancel.is_cancelled() {
                engine.schedule(id);
            }
        });
    }

    fn schedule_after(self: &Arc<Self>, id: ChannelId, delay: Duration, pool: &CancellationToken) {
        let engine = Arc::clone(self);
        let cancel = pool.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => engine.schedule(id),
            }
        });
    }

    fn schedule(&self, id: ChannelId) {
        if self.queued.insert(id) && self.ready_tx.send(id).is_err() {
            self.queued.remove(&id);
        }
    }

    fn update(&self, id: ChannelId, f: impl FnOnce(&mut BackfillJob)) -> Option<BackfillJob> {
        let mut job = self.jobs.get_mut(&id)?;
        f(&mut job);
        Some(job.clone())
    }

    /// Write the latest state of `id`'s job. Writes are serialized so the
    /// store never ends on an older snapshot.
    async fn persist(&self, id: ChannelId) {
        let _guard = self.persist_lock.lock().await;
        let Some(job) = self.job(id) else { return };
        if let Err(e) = self.store.save_job(&job).await {
            warn!(channel_id = %id, error = %e, "backfill job write failed");
        }
        self.report_counts();
    }

    fn report_counts(&self) {
        let counts: Vec<(JobStatus, usize)> = JobStatus::ALL
            .iter()
            .map(|status| {
                let n = self.jobs.iter().filter(|job| job.status == *status).count();
                (*status, n)
            })
            .collect();
        ferry_prometheus::set_job_counts(&counts);
    }
}

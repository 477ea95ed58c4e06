// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory implementations of the store and sink traits.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::{
    BackfillJob, CatalogStore, Channel, ChannelId, EventSink, FerryError, JobStore,
    MessageEvent, Origin, PublishOutcome, SeqId, Session, SessionStore,
};

fn unavailable(what: &str) -> FerryError {
    FerryError::Storage {
        source: format!("{what} unavailable").into(),
    }
}

/// Channel catalog held in a map. Cursor writes are monotonic like the SQLite store.
#[derive(Default)]
pub struct MemoryCatalog {
    channels: Mutex<HashMap<ChannelId, Channel>>,
    failing: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate with `channels`, as if loaded from a previous run.
    pub fn with_channels(channels: Vec<Channel>) -> Self {
        let catalog = Self::new();
        {
            let mut map = catalog.channels.lock().unwrap();
            for ch in channels {
                map.insert(ch.id, ch);
            }
        }
        catalog
    }

    /// While set, every call fails with a storage error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn stored(&self, id: ChannelId) -> Option<Channel> {
        self.channels.lock().unwrap().get(&id).cloned()
    }

    /// Successful writes so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn load_channels(&self) -> Result<Vec<Channel>, FerryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(unavailable("catalog"));
        }
        let mut all: Vec<Channel> = self.channels.lock().unwrap().values().cloned().collect();
        all.sort_by_key(|c| c.id);
        Ok(all)
    }

    async fn save_channel(&self, channel: &Channel) -> Result<(), FerryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(unavailable("catalog"));
        }
        let mut map = self.channels.lock().unwrap();
        let cursor = map
            .get(&channel.id)
            .map_or(channel.cursor, |old| old.cursor.max(channel.cursor));
        let mut stored = channel.clone();
        stored.cursor = cursor;
        map.insert(channel.id, stored);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn advance_cursor(&self, id: ChannelId, cursor: SeqId) -> Result<bool, FerryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(unavailable("catalog"));
        }
        let mut map = self.channels.lock().unwrap();
        match map.get_mut(&id) {
            Some(ch) if ch.cursor < cursor => {
                ch.cursor = cursor;
                self.writes.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Backfill jobs held in a map.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<ChannelId, BackfillJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_jobs(jobs: Vec<BackfillJob>) -> Self {
        let store = Self::new();
        {
            let mut map = store.jobs.lock().unwrap();
            for job in jobs {
                map.insert(job.channel_id, job);
            }
        }
        store
    }

    pub fn stored(&self, id: ChannelId) -> Option<BackfillJob> {
        self.jobs.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn load_jobs(&self) -> Result<Vec<BackfillJob>, FerryError> {
        let mut all: Vec<BackfillJob> = self.jobs.lock().unwrap().values().cloned().collect();
        all.sort_by_key(|j| j.channel_id);
        Ok(all)
    }

    async fn save_job(&self, job: &BackfillJob) -> Result<(), FerryError> {
        self.jobs.lock().unwrap().insert(job.channel_id, job.clone());
        Ok(())
    }
}

/// Single persisted session slot.
#[derive(Default)]
pub struct MemorySessionStore {
    session: Mutex<Option<Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(Some(session)),
        }
    }

    pub fn stored(&self) -> Option<Session> {
        self.session.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load_session(&self) -> Result<Option<Session>, FerryError> {
        Ok(self.session.lock().unwrap().clone())
    }

    async fn save_session(&self, session: &Session) -> Result<(), FerryError> {
        *self.session.lock().unwrap() = Some(session.clone());
        Ok(())
    }

    async fn clear_session(&self) -> Result<(), FerryError> {
        *self.session.lock().unwrap() = None;
        Ok(())
    }
}

/// Deduplicating output stream that records everything it was given.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<BTreeMap<(ChannelId, SeqId), MessageEvent>>,
    appends: Mutex<Vec<(ChannelId, SeqId, Origin, PublishOutcome)>>,
    failures_left: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `n` appends fail as if the stream were unreachable.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Distinct events, ordered by `(channel, seq)`.
    pub fn events(&self) -> Vec<MessageEvent> {
        self.events.lock().unwrap().values().cloned().collect()
    }

    /// Distinct sequence ids stored for `channel`, ascending.
    pub fn seqs(&self, channel: ChannelId) -> Vec<SeqId> {
        self.events
            .lock()
            .unwrap()
            .keys()
            .filter(|(c, _)| *c == channel)
            .map(|(_, s)| *s)
            .collect()
    }

    /// Every append call that reached the sink, in call order.
    pub fn appends(&self) -> Vec<(ChannelId, SeqId, Origin, PublishOutcome)> {
        self.appends.lock().unwrap().clone()
    }

    pub fn accepted_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn append(&self, event: &MessageEvent) -> Result<PublishOutcome, FerryError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(unavailable("output stream"));
        }

        let key = (event.channel_id, event.seq_id);
        let outcome = {
            let mut events = self.events.lock().unwrap();
            if events.contains_key(&key) {
                PublishOutcome::DuplicateIgnored
            } else {
                events.insert(key, event.clone());
                PublishOutcome::Accepted
            }
        };
        self.appends
            .lock()
            .unwrap()
            .push((event.channel_id, event.seq_id, event.origin, outcome));
        Ok(outcome)
    }

    async fn prune(&self, _cutoff: DateTime<Utc>) -> Result<usize, FerryError> {
        Ok(0)
    }
}

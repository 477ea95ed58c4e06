// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Canonical catalog of monitored channels.
//!
//! The in-memory index is a [`DashMap`], so mutations lock one shard and
//! unrelated channels never contend. Every mutation is written through to
//! the [`CatalogStore`]; a failed write leaves the channel marked dirty until
//! [`ChannelRegistry::flush_dirty`] succeeds.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use dashmap::mapref::entry::Entry;
use ferry_core::{CatalogStore, Channel, ChannelId, FerryError, SeqId, UpsertOutcome};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct ChannelRegistry {
    channels: DashMap<ChannelId, Channel>,
    dirty: DashSet<ChannelId>,
    store: Arc<dyn CatalogStore>,
}

impl ChannelRegistry {
    /// Rehydrate from the catalog store.
    pub async fn load(store: Arc<dyn CatalogStore>) -> Result<Self, FerryError> {
        let channels = DashMap::new();
        for channel in store.load_channels().await? {
            channels.insert(channel.id, channel);
        }
        info!(count = channels.len(), "channel registry loaded");
        let registry = Self {
            channels,
            dirty: DashSet::new(),
            store,
        };
        registry.report_enabled();
        Ok(registry)
    }

    pub fn get(&self, id: ChannelId) -> Option<Channel> {
        self.channels.get(&id).map(|c| c.clone())
    }

    /// Enabled channels, ordered by id.
    pub fn list_enabled(&self) -> Vec<Channel> {
        let mut out: Vec<Channel> = self
            .channels
            .iter()
            .filter(|c| c.enabled)
            .map(|c| c.clone())
            .collect();
        out.sort_by_key(|c| c.id);
        out
    }

    /// All channels including disabled ones, ordered by id.
    pub fn list_all(&self) -> Vec<Channel> {
        let mut out: Vec<Channel> = self.channels.iter().map(|c| c.clone()).collect();
        out.sort_by_key(|c| c.id);
        out
    }

    pub fn list_by_tag(&self, tag: &str) -> Vec<Channel> {
        let mut out: Vec<Channel> = self
            .channels
            .iter()
            .filter(|c| c.group_tag == tag)
            .map(|c| c.clone())
            .collect();
        out.sort_by_key(|c| c.id);
        out
    }

    /// Insert a channel or replace its discovery-owned attributes.
    ///
    /// The cursor is never taken from `channel` when it would move backward.
    /// Nothing is written when name, tag and enabled flag are unchanged.
    pub async fn upsert(&self, channel: Channel) -> UpsertOutcome {
        let (outcome, snapshot) = match self.channels.entry(channel.id) {
            Entry::Occupied(mut entry) => {
                if !entry.get().differs_from(&channel) {
                    return UpsertOutcome::Unchanged;
                }
                let mut next = channel;
                next.cursor = next.cursor.max(entry.get().cursor);
                entry.insert(next.clone());
                (UpsertOutcome::Updated, next)
            }
            Entry::Vacant(entry) => {
                entry.insert(channel.clone());
                (UpsertOutcome::Inserted, channel)
            }
        };

        debug!(channel_id = %snapshot.id, outcome = ?outcome, tag = %snapshot.group_tag, "channel upserted");
        self.persist(&snapshot).await;
        self.report_enabled();
        outcome
    }

    /// Mark a channel disabled. Returns `false` if unknown or already disabled.
    pub async fn disable(&self, id: ChannelId) -> bool {
        let snapshot = match self.channels.get_mut(&id) {
            Some(mut ch) if ch.enabled => {
                ch.enabled = false;
                ch.last_synced_at = Some(Utc::now());
                ch.clone()
            }
            _ => return false,
        };
        info!(channel_id = %id, "channel disabled");
        self.persist(&snapshot).await;
        self.report_enabled();
        true
    }

    /// Advance the channel's cursor to `cursor`.
    ///
    /// Returns `Ok(false)` when `cursor` is not ahead of the current value;
    /// a cursor never moves backward.
    pub async fn update_cursor(&self, id: ChannelId, cursor: SeqId) -> Result<bool, FerryError> {
        let advanced = match self.channels.get_mut(&id) {
            None => return Err(FerryError::ChannelNotFound { channel_id: id }),
            Some(mut ch) => {
                if cursor > ch.cursor {
                    ch.cursor = cursor;
                    true
                } else {
                    false
                }
            }
        };

        if advanced
            && let Err(e) = self.store.advance_cursor(id, cursor).await
        {
            warn!(channel_id = %id, cursor, error = %e, "cursor write failed, will retry");
            self.dirty.insert(id);
        }
        Ok(advanced)
    }

    /// Current cursor for `id`, or 0 for an unknown channel.
    pub fn cursor(&self, id: ChannelId) -> SeqId {
        self.channels.get(&id).map_or(0, |c| c.cursor)
    }

    /// Retry persisting channels whose last write failed. Returns how many were flushed.
    pub async fn flush_dirty(&self) -> Result<usize, FerryError> {
        let ids: Vec<ChannelId> = self.dirty.iter().map(|id| *id).collect();
        let mut flushed = 0;
        for id in ids {
            let Some(snapshot) = self.get(id) else {
                self.dirty.remove(&id);
                continue;
            };
            self.store.save_channel(&snapshot).await?;
            self.dirty.remove(&id);
            flushed += 1;
        }
        if flushed > 0 {
            info!(flushed, "dirty channels persisted");
        }
        Ok(flushed)
    }

    pub fn dirty_count(&self) -> usize {
        self.dirty.len()
    }

    /// Periodically retry dirty writes until cancelled.
    pub fn spawn_flusher(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
                if registry.dirty_count() == 0 {
                    continue;
                }
                if let Err(e) = registry.flush_dirty().await {
                    warn!(error = %e, pending = registry.dirty_count(), "catalog store still unavailable");
                }
            }
        })
    }

    async fn persist(&self, snapshot: &Channel) {
        if let Err(e) = self.store.save_channel(snapshot).await {
            warn!(channel_id = %snapshot.id, error = %e, "channel write failed, will retry");
            self.dirty.insert(snapshot.id);
        }
    }

    fn report_enabled(&self) {
        let enabled = self.channels.iter().filter(|c| c.enabled).count();
        ferry_prometheus::set_channels_enabled(enabled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_test_utils::MemoryCatalog;
    use proptest::prelude::*;

    async fn registry_with(catalog: Arc<MemoryCatalog>) -> ChannelRegistry {
        ChannelRegistry::load(catalog).await.unwrap()
    }

    #[tokio::test]
    async fn rehydrates_from_store() {
        let mut known = Channel::discovered(ChannelId(3), "three", "archive");
        known.cursor = 77;
        let catalog = Arc::new(MemoryCatalog::with_channels(vec![known]));
        let registry = registry_with(catalog).await;
        assert_eq!(registry.cursor(ChannelId(3)), 77);
        assert_eq!(registry.list_enabled().len(), 1);
    }

    #[tokio::test]
    async fn upsert_reports_outcome_and_skips_noop_writes() {
        let catalog = Arc::new(MemoryCatalog::new());
        let registry = registry_with(catalog.clone()).await;
        let ch = Channel::discovered(ChannelId(1), "one", "monitor");

        assert_eq!(registry.upsert(ch.clone()).await, UpsertOutcome::Inserted);
        assert_eq!(registry.upsert(ch.clone()).await, UpsertOutcome::Unchanged);
        assert_eq!(catalog.write_count(), 1);

        let mut retagged = ch.clone();
        retagged.group_tag = "archive".into();
        assert_eq!(registry.upsert(retagged).await, UpsertOutcome::Updated);
        assert_eq!(registry.list_by_tag("archive").len(), 1);
        assert!(registry.list_by_tag("monitor").is_empty());
    }

    #[tokio::test]
    async fn upsert_keeps_newer_cursor() {
        let registry = registry_with(Arc::new(MemoryCatalog::new())).await;
        let ch = Channel::discovered(ChannelId(1), "one", "monitor");
        registry.upsert(ch.clone()).await;
        registry.update_cursor(ChannelId(1), 50).await.unwrap();

        let mut renamed = ch;
        renamed.name = "uno".into();
        registry.upsert(renamed).await;
        assert_eq!(registry.cursor(ChannelId(1)), 50);
    }

    #[tokio::test]
    async fn disable_keeps_entry() {
        let registry = registry_with(Arc::new(MemoryCatalog::new())).await;
        registry
            .upsert(Channel::discovered(ChannelId(1), "one", "monitor"))
            .await;
        assert!(registry.disable(ChannelId(1)).await);
        assert!(!registry.disable(ChannelId(1)).await);
        assert!(registry.list_enabled().is_empty());
        assert_eq!(registry.list_all().len(), 1);
    }

    #[tokio::test]
    async fn unknown_channel_cursor_is_not_found() {
        let registry = registry_with(Arc::new(MemoryCatalog::new())).await;
        let err = registry.update_cursor(ChannelId(9), 1).await.unwrap_err();
        assert!(matches!(err, FerryError::ChannelNotFound { channel_id } if channel_id == ChannelId(9)));
    }

    #[tokio::test]
    async fn failed_writes_are_flushed_later() {
        let catalog = Arc::new(MemoryCatalog::new());
        let registry = registry_with(catalog.clone()).await;
        registry
            .upsert(Channel::discovered(ChannelId(1), "one", "monitor"))
            .await;

        catalog.set_failing(true);
        assert!(registry.update_cursor(ChannelId(1), 10).await.unwrap());
        assert_eq!(registry.cursor(ChannelId(1)), 10);
        assert_eq!(registry.dirty_count(), 1);
        assert!(registry.flush_dirty().await.is_err());

        catalog.set_failing(false);
        assert_eq!(registry.flush_dirty().await.unwrap(), 1);
        assert_eq!(registry.dirty_count(), 0);
        assert_eq!(catalog.stored(ChannelId(1)).unwrap().cursor, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_converge_on_max() {
        let catalog = Arc::new(MemoryCatalog::new());
        let registry = Arc::new(registry_with(catalog.clone()).await);
        registry
            .upsert(Channel::discovered(ChannelId(1), "one", "monitor"))
            .await;

        let mut handles = Vec::new();
        for writer in 0..4i64 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                for step in 0..200i64 {
                    let seq = (step * 7 + writer * 13) % 500;
                    registry.update_cursor(ChannelId(1), seq).await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let max = (0..4i64)
            .flat_map(|w| (0..200i64).map(move |s| (s * 7 + w * 13) % 500))
            .max()
            .unwrap();
        assert_eq!(registry.cursor(ChannelId(1)), max);
        assert_eq!(catalog.stored(ChannelId(1)).unwrap().cursor, max);
    }

    proptest! {
        #[test]
        fn cursor_never_decreases(
            updates in proptest::collection::vec((0i64..3, 0i64..1_000), 1..200)
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let catalog = Arc::new(MemoryCatalog::new());
                let registry = registry_with(catalog.clone()).await;
                for id in 0..3 {
                    registry.upsert(Channel::discovered(ChannelId(id), "c", "archive")).await;
                }

                let mut high = [0i64; 3];
                for (id, seq) in &updates {
                    let before = registry.cursor(ChannelId(*id));
                    let advanced = registry.update_cursor(ChannelId(*id), *seq).await.unwrap();
                    let after = registry.cursor(ChannelId(*id));

                    prop_assert!(after >= before);
                    prop_assert_eq!(advanced, *seq > before);
                    high[*id as usize] = high[*id as usize].max(*seq);
                    prop_assert_eq!(after, high[*id as usize]);
                }
                for id in 0..3 {
                    let stored = catalog.stored(ChannelId(id)).unwrap().cursor;
                    prop_assert_eq!(stored, high[id as usize]);
                }
                Ok(())
            })?;
        }
    }
}

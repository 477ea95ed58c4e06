// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Reconciles the channel registry against the upstream folder structure.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use ferry_config::model::GroupPattern;
use ferry_core::{Channel, ChannelId, FerryError, UpsertOutcome};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backfill::BackfillEngine;
use crate::registry::ChannelRegistry;
use crate::session::SessionManager;

/// Registry mutations made by one discovery pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub removed: usize,
    pub updated: usize,
}

impl SyncReport {
    pub fn mutations(&self) -> usize {
        self.added + self.removed + self.updated
    }
}

pub struct ChannelDiscovery {
    session: Arc<SessionManager>,
    registry: Arc<ChannelRegistry>,
    groups: Vec<GroupPattern>,
    backfill: Option<Arc<BackfillEngine>>,
    in_flight: AtomicBool,
}

/// Clears the single-flight flag when a pass ends, including on cancellation.
struct FlightGuard<'a>(&'a AtomicBool);

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ChannelDiscovery {
    /// `backfill` is `None` when backfill is disabled; new channels are then
    /// only picked up by the live listener.
    pub fn new(
        session: Arc<SessionManager>,
        registry: Arc<ChannelRegistry>,
        groups: Vec<GroupPattern>,
        backfill: Option<Arc<BackfillEngine>>,
    ) -> Self {
        Self {
            session,
            registry,
            groups,
            backfill,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Run one discovery pass.
    ///
    /// Returns `Ok(None)` without doing anything when another pass is
    /// already in progress.
    pub async fn sync_once(&self) -> Result<Option<SyncReport>, FerryError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("discovery pass already running, trigger ignored");
            ferry_prometheus::record_discovery_sync("skipped");
            return Ok(None);
        }
        let _guard = FlightGuard(&self.in_flight);

        let folders = match self.session.folders().await {
            Ok(folders) => folders,
            Err(e) => {
                ferry_prometheus::record_discovery_sync("error");
                return Err(e);
            }
        };

        let mut matching: Vec<_> = folders
            .iter()
            .filter_map(|folder| {
                self.groups
                    .iter()
                    .find(|group| group.matches(&folder.title))
                    .map(|group| (folder, group.tag()))
            })
            .collect();
        matching.sort_by(|(a, _), (b, _)| a.title.cmp(&b.title));

        // First matching folder in name order decides the tag.
        let mut present: HashMap<ChannelId, (String, String)> = HashMap::new();
        for (folder, tag) in &matching {
            for member in &folder.channels {
                present
                    .entry(member.id)
                    .or_insert_with(|| (member.title.clone(), tag.clone()));
            }
        }

        let mut report = SyncReport::default();
        let now = Utc::now();
        let mut ids: Vec<ChannelId> = present.keys().copied().collect();
        ids.sort();

        for id in ids {
            let Some((name, tag)) = present.remove(&id) else {
                continue;
            };
            let existing = self.registry.get(id);
            let was_enabled = existing.as_ref().is_some_and(|c| c.enabled);
            let mut channel = existing.unwrap_or_else(|| Channel::discovered(id, "", ""));
            channel.name = name;
            channel.group_tag = tag;
            channel.enabled = true;
            channel.last_synced_at = Some(now);

            match self.registry.upsert(channel).await {
                UpsertOutcome::Inserted => report.added += 1,
                UpsertOutcome::Updated => report.updated += 1,
                UpsertOutcome::Unchanged => {}
            }

            if !was_enabled
                && let Some(backfill) = &self.backfill
                && let Err(e) = backfill.enqueue(id).await
            {
                warn!(channel_id = %id, error = %e, "failed to enqueue backfill for new channel");
            }
        }

        let seen: HashSet<ChannelId> = matching
            .iter()
            .flat_map(|(folder, _)| folder.channels.iter().map(|c| c.id))
            .collect();
        for channel in self.registry.list_enabled() {
            if !seen.contains(&channel.id) && self.registry.disable(channel.id).await {
                report.removed += 1;
            }
        }

        ferry_prometheus::record_discovery_sync("ok");
        if report.mutations() > 0 {
            info!(
                added = report.added,
                removed = report.removed,
                updated = report.updated,
                folders = matching.len(),
                "discovery pass changed the registry"
            );
        } else {
            debug!(folders = matching.len(), "discovery pass found no changes");
        }
        Ok(Some(report))
    }

    /// Run a pass immediately and then every `interval` until cancelled.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.sync_once() => result,
            };
            if let Err(e) = result {
                warn!(error = %e, "discovery pass failed");
            }
        }
        debug!("discovery loop stopped");
    }
}

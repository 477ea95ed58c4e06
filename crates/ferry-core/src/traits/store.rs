// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persistence traits for the channel catalog, backfill jobs and the session.

use async_trait::async_trait;

use crate::error::FerryError;
use crate::types::{BackfillJob, Channel, ChannelId, SeqId, Session};

/// Persisted channel catalog. Read once at startup, written on every change.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn load_channels(&self) -> Result<Vec<Channel>, FerryError>;

    /// Inserts or replaces discovery-owned attributes. Never moves the cursor backward.
    async fn save_channel(&self, channel: &Channel) -> Result<(), FerryError>;

    /// Advances the persisted cursor. Returns `false` when `cursor` is not ahead.
    async fn advance_cursor(&self, id: ChannelId, cursor: SeqId) -> Result<bool, FerryError>;
}

/// Persisted backfill jobs, one row per channel.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load_jobs(&self) -> Result<Vec<BackfillJob>, FerryError>;

    async fn save_job(&self, job: &BackfillJob) -> Result<(), FerryError>;
}

/// Persisted upstream session blob.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self) -> Result<Option<Session>, FerryError>;

    async fn save_session(&self, session: &Session) -> Result<(), FerryError>;

    async fn clear_session(&self) -> Result<(), FerryError>;
}

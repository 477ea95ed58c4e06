// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable output stream trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::FerryError;
use crate::types::{MessageEvent, PublishOutcome};

/// Append-only output stream keyed by channel id.
///
/// Implementations deduplicate on `(channel_id, seq_id)` for at least their
/// configured retention window and report a repeat as
/// [`PublishOutcome::DuplicateIgnored`].
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn append(&self, event: &MessageEvent) -> Result<PublishOutcome, FerryError>;

    /// Drops delivered entries published before `cutoff`. Returns the number removed.
    async fn prune(&self, _cutoff: DateTime<Utc>) -> Result<usize, FerryError> {
        Ok(0)
    }
}

// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`EventSink`] backed by the outbox table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::{EventSink, FerryError, MessageEvent, PublishOutcome};

use crate::database::Database;
use crate::queries;

/// Appends published events to the durable output stream.
#[derive(Clone)]
pub struct OutboxSink {
    db: Database,
}

impl OutboxSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl EventSink for OutboxSink {
    async fn append(&self, event: &MessageEvent) -> Result<PublishOutcome, FerryError> {
        queries::outbox::append(&self.db, event).await
    }

    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, FerryError> {
        queries::outbox::prune(&self.db, cutoff).await
    }
}

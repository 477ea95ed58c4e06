// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite implementation of the catalog, job, and session stores.

use async_trait::async_trait;
use tracing::debug;

use ferry_config::model::StorageConfig;
use ferry_core::{
    AdapterType, BackfillJob, CatalogStore, Channel, ChannelId, FerryError, HealthStatus,
    JobStore, PluginAdapter, SeqId, Session, SessionStore,
};

use crate::database::{Database, map_tr_err};
use crate::queries;
use crate::sink::OutboxSink;

/// SQLite-backed storage adapter.
///
/// Wraps the catalog [`Database`] and delegates to the typed query modules.
/// The output stream may live in the same file or in a separate one.
pub struct SqliteStorage {
    catalog: Database,
    output: Database,
}

impl SqliteStorage {
    /// Open the catalog and output databases described by `config`.
    ///
    /// Any failure is [`FerryError::CatalogStoreUnavailable`].
    pub async fn open(config: &StorageConfig) -> Result<Self, FerryError> {
        let catalog = Database::open_with(&config.database_path, config.wal_mode).await?;
        let output_path = config.output_database_path();
        let output = if output_path == config.database_path {
            catalog.clone()
        } else {
            Database::open_with(output_path, config.wal_mode).await?
        };
        debug!(
            catalog = %config.database_path,
            output = %output_path,
            "SQLite storage opened"
        );
        Ok(Self { catalog, output })
    }

    pub fn catalog(&self) -> &Database {
        &self.catalog
    }

    pub fn output(&self) -> &Database {
        &self.output
    }

    /// Sink appending to the output stream database.
    pub fn sink(&self) -> OutboxSink {
        OutboxSink::new(self.output.clone())
    }

    async fn ping(db: &Database) -> Result<(), FerryError> {
        db.connection()
            .call(|conn| -> Result<(), rusqlite::Error> {
                conn.execute_batch("SELECT 1;")?;
                Ok(())
            })
            .await
            .map_err(map_tr_err)
    }
}

#[async_trait]
impl PluginAdapter for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Storage
    }

    async fn health_check(&self) -> Result<HealthStatus, FerryError> {
        if let Err(e) = Self::ping(&self.catalog).await {
            return Ok(HealthStatus::Unhealthy(format!("catalog: {e}")));
        }
        if let Err(e) = Self::ping(&self.output).await {
            return Ok(HealthStatus::Degraded(format!("output stream: {e}")));
        }
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), FerryError> {
        self.catalog.checkpoint().await?;
        if self.output.path() != self.catalog.path() {
            self.output.checkpoint().await?;
        }
        debug!("shutdown: WAL checkpoint complete");
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for SqliteStorage {
    async fn load_channels(&self) -> Result<Vec<Channel>, FerryError> {
        queries::channels::list_channels(&self.catalog).await
    }

    async fn save_channel(&self, channel: &Channel) -> Result<(), FerryError> {
        queries::channels::upsert_channel(&self.catalog, channel).await
    }

    async fn advance_cursor(&self, id: ChannelId, cursor: SeqId) -> Result<bool, FerryError> {
        queries::channels::advance_cursor(&self.catalog, id, cursor).await
    }
}

#[async_trait]
impl JobStore for SqliteStorage {
    async fn load_jobs(&self) -> Result<Vec<BackfillJob>, FerryError> {
        queries::jobs::list_jobs(&self.catalog).await
    }

    async fn save_job(&self, job: &BackfillJob) -> Result<(), FerryError> {
        queries::jobs::upsert_job(&self.catalog, job).await
    }
}

#[async_trait]
impl SessionStore for SqliteStorage {
    async fn load_session(&self) -> Result<Option<Session>, FerryError> {
        queries::session::load_session(&self.catalog).await
    }

    async fn save_session(&self, session: &Session) -> Result<(), FerryError> {
        queries::session::save_session(&self.catalog, session).await
    }

    async fn clear_session(&self) -> Result<(), FerryError> {
        queries::session::clear_session(&self.catalog).await
    }
}

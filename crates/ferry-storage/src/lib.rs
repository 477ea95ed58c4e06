// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the ferry ingestion pipeline.
//!
//! Provides WAL-mode SQLite storage with embedded migrations, a single-writer
//! concurrency model via `tokio-rusqlite`, and typed operations for the channel
//! catalog, backfill jobs, the persisted upstream session, and the durable
//! output stream (outbox) that downstream consumers read from.

pub mod adapter;
pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod sink;

pub use adapter::SqliteStorage;
pub use database::Database;
pub use models::*;
pub use sink::OutboxSink;

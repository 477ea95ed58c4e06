// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the ferry channel ingestion pipeline.
//!
//! This crate provides the error taxonomy, the domain types that flow through
//! the pipeline, and the trait seams (upstream, stores, output stream, code
//! prompt) that the other crates implement or consume.

pub mod error;
pub mod traits;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::FerryError;
pub use types::{
    AdapterType, BackfillJob, Channel, ChannelId, CostClass, Folder, FolderChannel,
    HealthStatus, HistoryPage, HistoryRequest, JobStatus, LoginChallenge, MediaRef,
    MessageEvent, MessagePayload, Origin, PublishOutcome, RawMessage, SeqId, Session,
    UpsertOutcome,
};

pub use traits::{
    CatalogStore, CodePrompt, EventSink, JobStore, PluginAdapter, SessionStore, UpstreamAdapter,
};

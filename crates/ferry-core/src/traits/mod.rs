// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait seams of the ingestion pipeline.
//!
//! Upstream and storage adapters extend or sit beside the [`PluginAdapter`]
//! base trait and use `#[async_trait]` for dynamic dispatch compatibility.

pub mod adapter;
pub mod prompt;
pub mod sink;
pub mod store;
pub mod upstream;

pub use adapter::PluginAdapter;
pub use prompt::CodePrompt;
pub use sink::EventSink;
pub use store::{CatalogStore, JobStore, SessionStore};
pub use upstream::UpstreamAdapter;

// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test doubles for ferry integration tests.
//!
//! Provides a scriptable upstream, in-memory stores and a canned code prompt
//! for fast, deterministic tests without a gateway or a database.
//!
//! # Components
//!
//! - [`MockUpstream`] - Upstream with scripted folders, history, flood and auth failures
//! - [`MemoryCatalog`], [`MemoryJobStore`], [`MemorySessionStore`] - In-memory stores
//! - [`MemorySink`] - Deduplicating output stream with capture
//! - [`MockPrompt`] - Code prompt returning a fixed code

pub mod memory;
pub mod mock_prompt;
pub mod mock_upstream;

pub use memory::{MemoryCatalog, MemoryJobStore, MemorySessionStore, MemorySink};
pub use mock_prompt::MockPrompt;
pub use mock_upstream::{MockUpstream, folder, raw_message};

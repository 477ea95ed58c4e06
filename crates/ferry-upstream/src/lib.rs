// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Upstream adapter speaking to the messaging gateway.
//!
//! The gateway fronts the user account: JSON over HTTP for authentication,
//! folder listing and history pages, and a WebSocket for push updates.
//! Every failure is mapped onto the [`ferry_core::FerryError`] taxonomy so the
//! session manager and rate controller can react to it.

pub mod client;
pub mod types;
pub mod updates;

mod adapter;

pub use client::GatewayClient;

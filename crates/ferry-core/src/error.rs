// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the ferry ingestion pipeline.

use std::time::Duration;

use thiserror::Error;

use crate::types::ChannelId;

/// The primary error type used across all ferry traits and pipeline components.
///
/// Variants follow the pipeline's recovery taxonomy: authentication and flood
/// control errors are recoverable and drive the session manager and rate
/// controller; transient upstream errors are retried at the call site;
/// catalog store errors are fatal only during startup.
#[derive(Debug, Error)]
pub enum FerryError {
    /// Configuration errors (invalid TOML, missing required fields, bad values).
    #[error("configuration error: {0}")]
    Config(String),

    /// No usable session exists and one must be bootstrapped.
    #[error("authentication required: {0}")]
    AuthRequired(String),

    /// The upstream rejected the current session.
    #[error("session expired: {0}")]
    AuthExpired(String),

    /// The upstream asked us to back off for `retry_after`.
    #[error("flood control: retry after {retry_after:?}")]
    FloodControl { retry_after: Duration },

    /// Network or connection level failure that may succeed on retry.
    #[error("transient upstream error: {message}")]
    UpstreamTransient {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The upstream permanently rejected a request (bad channel, malformed call).
    #[error("upstream rejected request: {message}")]
    Upstream { message: String },

    /// The catalog store could not be opened or reached.
    #[error("catalog store unavailable: {source}")]
    CatalogStoreUnavailable {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Storage backend errors (query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A channel is not present in the local registry.
    #[error("channel not found: {channel_id}")]
    ChannelNotFound { channel_id: ChannelId },

    /// The operation was cancelled before completion.
    #[error("operation cancelled")]
    Cancelled,

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl FerryError {
    /// Shorthand for a transient upstream error without a source.
    pub fn transient(message: impl Into<String>) -> Self {
        Self::UpstreamTransient {
            message: message.into(),
            source: None,
        }
    }

    /// Returns the backoff requested by the upstream, if this is a flood rejection.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::FloodControl { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    /// True for errors that invalidate or require a session.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthRequired(_) | Self::AuthExpired(_))
    }

    /// True for errors a caller should retry after a delay rather than give up on.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::AuthRequired(_)
                | Self::AuthExpired(_)
                | Self::FloodControl { .. }
                | Self::UpstreamTransient { .. }
                | Self::CatalogStoreUnavailable { .. }
                | Self::Storage { .. }
                | Self::Timeout { .. }
        )
    }
}

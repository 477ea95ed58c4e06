// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Upstream messaging adapter trait.

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::sync::mpsc;

use crate::error::FerryError;
use crate::traits::adapter::PluginAdapter;
use crate::types::{Folder, HistoryPage, HistoryRequest, LoginChallenge, RawMessage, Session};

/// The rate-limited, singly-authenticated upstream connection.
///
/// Implementations map upstream rejections onto the error taxonomy:
/// flood rejections become [`FerryError::FloodControl`], rejected sessions
/// [`FerryError::AuthExpired`], connection drops
/// [`FerryError::UpstreamTransient`].
#[async_trait]
pub trait UpstreamAdapter: PluginAdapter {
    /// Validates a persisted session and returns the account's user id.
    async fn restore(&self, session: &Session) -> Result<i64, FerryError>;

    /// Starts an interactive login by asking the identity provider to send a code.
    async fn send_code(&self, identity: &str) -> Result<LoginChallenge, FerryError>;

    /// Completes an interactive login with the out-of-band code.
    async fn sign_in(
        &self,
        challenge: &LoginChallenge,
        code: &SecretString,
    ) -> Result<Session, FerryError>;

    /// Returns the current folder/label structure.
    async fn folders(&self, session: &Session) -> Result<Vec<Folder>, FerryError>;

    /// Fetches one ascending page of channel history.
    async fn history(
        &self,
        session: &Session,
        request: &HistoryRequest,
    ) -> Result<HistoryPage, FerryError>;

    /// Streams push events into `updates` until the connection ends.
    ///
    /// Returns `Ok(())` when the stream closed normally or the receiver was
    /// dropped. Sending blocks when `updates` is full.
    async fn subscribe(
        &self,
        session: &Session,
        updates: mpsc::Sender<RawMessage>,
    ) -> Result<(), FerryError>;
}

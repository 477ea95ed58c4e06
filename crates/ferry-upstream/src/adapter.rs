// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! [`UpstreamAdapter`] implementation over [`GatewayClient`].

use async_trait::async_trait;
use ferry_core::{
    AdapterType, FerryError, Folder, HealthStatus, HistoryPage, HistoryRequest, LoginChallenge,
    PluginAdapter, RawMessage, Session, UpstreamAdapter,
};
use secrecy::SecretString;
use tokio::sync::mpsc;

use crate::client::GatewayClient;
use crate::updates;

#[async_trait]
impl PluginAdapter for GatewayClient {
    fn name(&self) -> &str {
        "gateway"
    }

    fn version(&self) -> semver::Version {
        semver::Version::new(0, 1, 0)
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Upstream
    }

    async fn health_check(&self) -> Result<HealthStatus, FerryError> {
        Ok(HealthStatus::Healthy)
    }

    async fn shutdown(&self) -> Result<(), FerryError> {
        Ok(())
    }
}

#[async_trait]
impl UpstreamAdapter for GatewayClient {
    async fn restore(&self, session: &Session) -> Result<i64, FerryError> {
        GatewayClient::restore(self, session).await
    }

    async fn send_code(&self, identity: &str) -> Result<LoginChallenge, FerryError> {
        GatewayClient::send_code(self, identity).await
    }

    async fn sign_in(
        &self,
        challenge: &LoginChallenge,
        code: &SecretString,
    ) -> Result<Session, FerryError> {
        GatewayClient::sign_in(self, challenge, code).await
    }

    async fn folders(&self, session: &Session) -> Result<Vec<Folder>, FerryError> {
        GatewayClient::folders(self, session).await
    }

    async fn history(
        &self,
        session: &Session,
        request: &HistoryRequest,
    ) -> Result<HistoryPage, FerryError> {
        GatewayClient::history(self, session, request).await
    }

    async fn subscribe(
        &self,
        session: &Session,
        updates: mpsc::Sender<RawMessage>,
    ) -> Result<(), FerryError> {
        updates::stream_updates(self.updates_url(), &session.blob, updates).await
    }
}

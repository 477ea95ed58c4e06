// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scriptable upstream adapter for deterministic testing.
//!
//! `MockUpstream` keeps per-channel history, a folder tree, a set of valid
//! session blobs and at most one live subscription. Tests append messages,
//! script failures and end subscriptions to drive the pipeline.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::RangeInclusive;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ferry_core::{
    AdapterType, ChannelId, FerryError, Folder, FolderChannel, HealthStatus, HistoryPage,
    HistoryRequest, LoginChallenge, PluginAdapter, RawMessage, SeqId, Session, UpstreamAdapter,
};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Notify, mpsc, watch};

/// Build a folder listing `channels` as `(id, title)` pairs.
pub fn folder(id: i64, title: &str, channels: &[(i64, &str)]) -> Folder {
    Folder {
        id,
        title: title.to_string(),
        channels: channels
            .iter()
            .map(|(cid, t)| FolderChannel {
                id: ChannelId(*cid),
                title: t.to_string(),
            })
            .collect(),
    }
}

/// A text message with a deterministic timestamp.
pub fn raw_message(channel: ChannelId, seq: SeqId) -> RawMessage {
    RawMessage {
        channel_id: channel,
        seq_id: seq,
        date: 1_700_000_000 + seq,
        text: Some(format!("message {seq}")),
        media: Vec::new(),
    }
}

#[derive(Default)]
struct State {
    folders: Vec<Folder>,
    history: HashMap<ChannelId, Vec<RawMessage>>,
    valid_blobs: HashSet<String>,
    issued: u64,
    expected_code: String,
    history_errors: VecDeque<FerryError>,
    folder_errors: VecDeque<FerryError>,
    history_requests: Vec<HistoryRequest>,
    calls: HashMap<&'static str, usize>,
    end_reason: Option<FerryError>,
}

/// A scriptable upstream.
pub struct MockUpstream {
    state: Mutex<State>,
    live: Mutex<Option<mpsc::Sender<RawMessage>>>,
    subscriptions: watch::Sender<usize>,
    kick: Notify,
}

impl MockUpstream {
    /// An upstream accepting login code `12345` with no valid sessions yet.
    pub fn new() -> Self {
        let (subscriptions, _) = watch::channel(0);
        Self {
            state: Mutex::new(State {
                expected_code: "12345".into(),
                ..State::default()
            }),
            live: Mutex::new(None),
            subscriptions,
            kick: Notify::new(),
        }
    }

    /// Treat `blob` as a valid, restorable session.
    pub fn accept_session(&self, blob: &str) {
        self.state.lock().unwrap().valid_blobs.insert(blob.to_string());
    }

    pub fn set_folders(&self, folders: Vec<Folder>) {
        self.state.lock().unwrap().folders = folders;
    }

    /// Add messages `seqs` to `channel`'s history.
    pub fn seed_history(&self, channel: ChannelId, seqs: RangeInclusive<SeqId>) {
        let mut state = self.state.lock().unwrap();
        let history = state.history.entry(channel).or_default();
        history.extend(seqs.map(|s| raw_message(channel, s)));
        history.sort_by_key(|m| m.seq_id);
        history.dedup_by_key(|m| m.seq_id);
    }

    /// Newest sequence id in `channel`'s history.
    pub fn head(&self, channel: ChannelId) -> SeqId {
        self.state
            .lock()
            .unwrap()
            .history
            .get(&channel)
            .and_then(|h| h.last())
            .map_or(0, |m| m.seq_id)
    }

    /// Post a new message: it lands in history and, if subscribed, on the live stream.
    ///
    /// Returns `true` when a live subscriber received it.
    pub async fn post(&self, channel: ChannelId) -> bool {
        let message = {
            let mut state = self.state.lock().unwrap();
            let history = state.history.entry(channel).or_default();
            let next = history.last().map_or(1, |m| m.seq_id + 1);
            let message = raw_message(channel, next);
            history.push(message.clone());
            message
        };
        let sender = self.live.lock().unwrap().clone();
        match sender {
            Some(tx) => tx.send(message).await.is_ok(),
            None => false,
        }
    }

    /// Fail the next history call with `err`.
    pub fn fail_next_history(&self, err: FerryError) {
        self.state.lock().unwrap().history_errors.push_back(err);
    }

    /// Fail the next history call with a flood wait of `retry_after`.
    pub fn flood_next_history(&self, retry_after: Duration) {
        self.fail_next_history(FerryError::FloodControl { retry_after });
    }

    pub fn fail_next_folders(&self, err: FerryError) {
        self.state.lock().unwrap().folder_errors.push_back(err);
    }

    /// Revoke every session and end the live subscription with an auth error.
    pub fn expire_sessions(&self) {
        {
            let mut state = self.state.lock().unwrap();
            state.valid_blobs.clear();
            state.end_reason = Some(FerryError::AuthExpired("session revoked".into()));
        }
        if self.is_subscribed() {
            self.kick.notify_one();
        }
    }

    /// End the live subscription as a dropped connection.
    pub fn drop_subscription(&self) {
        self.state.lock().unwrap().end_reason = Some(FerryError::transient("connection reset"));
        if self.is_subscribed() {
            self.kick.notify_one();
        }
    }

    /// Wait until at least `n` subscriptions have been started.
    pub async fn wait_for_subscriptions(&self, n: usize) {
        let mut rx = self.subscriptions.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    pub fn is_subscribed(&self) -> bool {
        self.live.lock().unwrap().is_some()
    }

    /// Number of calls made to `method` (e.g. "history", "restore").
    pub fn calls(&self, method: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .get(method)
            .copied()
            .unwrap_or(0)
    }

    /// Every history request received, in order.
    pub fn history_requests(&self) -> Vec<HistoryRequest> {
        self.state.lock().unwrap().history_requests.clone()
    }

    fn record(&self, method: &'static str) {
        *self.state.lock().unwrap().calls.entry(method).or_default() += 1;
    }

    fn check(&self, session: &Session) -> Result<(), FerryError> {
        let valid = self
            .state
            .lock()
            .unwrap()
            .valid_blobs
            .contains(session.blob.expose_secret());
        if valid {
            Ok(())
        } else {
            Err(FerryError::AuthExpired("AUTH_KEY_UNREGISTERED".into()))
        }
    }
}

impl Default for MockUpstream {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PluginAdapter for MockUpstream {
    fn name(&self) -> &str {
        "mock-upstream"
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
impl UpstreamAdapter for MockUpstream {
    async fn restore(&self, session: &Session) -> Result<i64, FerryError> {
        self.record("restore");
        self.check(session)?;
        Ok(1)
    }

    async fn send_code(&self, identity: &str) -> Result<LoginChallenge, FerryError> {
        self.record("send_code");
        Ok(LoginChallenge {
            id: format!("challenge-{identity}"),
            identity: identity.to_string(),
        })
    }

    async fn sign_in(
        &self,
        challenge: &LoginChallenge,
        code: &SecretString,
    ) -> Result<Session, FerryError> {
        self.record("sign_in");
        let mut state = self.state.lock().unwrap();
        if code.expose_secret() != state.expected_code {
            return Err(FerryError::Upstream {
                message: "PHONE_CODE_INVALID".into(),
            });
        }
        state.issued += 1;
        let blob = format!("session-{}", state.issued);
        state.valid_blobs.insert(blob.clone());
        let mut session = Session::new(challenge.identity.clone(), SecretString::from(blob));
        session.user_id = Some(1);
        Ok(session)
    }

    async fn folders(&self, session: &Session) -> Result<Vec<Folder>, FerryError> {
        self.record("folders");
        self.check(session)?;
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.folder_errors.pop_front() {
            return Err(err);
        }
        Ok(state.folders.clone())
    }

    async fn history(
        &self,
        session: &Session,
        request: &HistoryRequest,
    ) -> Result<HistoryPage, FerryError> {
        self.record("history");
        self.check(session)?;
        let mut state = self.state.lock().unwrap();
        state.history_requests.push(*request);
        if let Some(err) = state.history_errors.pop_front() {
            return Err(err);
        }
        let history = state.history.get(&request.channel_id);
        let messages: Vec<RawMessage> = history
            .map(|h| {
                h.iter()
                    .filter(|m| m.seq_id > request.after)
                    .take(request.limit as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        let head = history.and_then(|h| h.last()).map_or(0, |m| m.seq_id);
        Ok(HistoryPage { messages, head })
    }

    async fn subscribe(
        &self,
        session: &Session,
        updates: mpsc::Sender<RawMessage>,
    ) -> Result<(), FerryError> {
        self.record("subscribe");
        self.check(session)?;
        self.state.lock().unwrap().end_reason = None;
        *self.live.lock().unwrap() = Some(updates);
        self.subscriptions.send_modify(|n| *n += 1);

        self.kick.notified().await;

        self.live.lock().unwrap().take();
        match self.state.lock().unwrap().end_reason.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn history_pages_after_cursor() {
        let upstream = MockUpstream::new();
        upstream.accept_session("s");
        upstream.seed_history(ChannelId(1), 1..=5);
        let session = Session::new("+1", SecretString::from("s"));
        let page = upstream
            .history(
                &session,
                &HistoryRequest {
                    channel_id: ChannelId(1),
                    after: 2,
                    limit: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(page.end(), Some(4));
        assert_eq!(page.head, 5);
    }

    #[tokio::test]
    async fn revoked_session_is_rejected() {
        let upstream = MockUpstream::new();
        upstream.accept_session("s");
        upstream.expire_sessions();
        let session = Session::new("+1", SecretString::from("s"));
        assert!(upstream.folders(&session).await.unwrap_err().is_auth());
    }
}

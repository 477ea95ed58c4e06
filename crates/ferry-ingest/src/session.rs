// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Lifecycle of the single authenticated upstream session.
//!
//! The manager moves through an explicit state machine:
//! `Uninitialized -> {Restoring | AwaitingInteractiveAuth} -> Valid -> Invalid -> ...`,
//! with `Failed` as the terminal state when no operator can complete an
//! interactive login. Every upstream call goes through [`SessionManager::call`]
//! (or one of the typed wrappers), so re-authentication is transparent to the
//! components making the calls.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use ferry_core::{
    CodePrompt, CostClass, FerryError, Folder, HistoryPage, HistoryRequest, RawMessage, Session,
    SessionStore, UpstreamAdapter,
};
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::rate::RateGate;
use crate::retry::RetryPolicy;

/// States in the session FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No bootstrap attempted yet.
    Uninitialized,
    /// Validating a persisted session with the upstream.
    Restoring,
    /// Waiting for an operator to supply the out-of-band login code.
    AwaitingInteractiveAuth,
    /// A session is installed and usable.
    Valid,
    /// The session was rejected; a re-bootstrap is due.
    Invalid,
    /// Bootstrap cannot be completed. Terminal.
    Failed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Uninitialized => write!(f, "uninitialized"),
            SessionState::Restoring => write!(f, "restoring"),
            SessionState::AwaitingInteractiveAuth => write!(f, "awaiting-interactive-auth"),
            SessionState::Valid => write!(f, "valid"),
            SessionState::Invalid => write!(f, "invalid"),
            SessionState::Failed => write!(f, "failed"),
        }
    }
}

/// Owns the upstream session and mediates every upstream call.
pub struct SessionManager {
    upstream: Arc<dyn UpstreamAdapter>,
    store: Arc<dyn SessionStore>,
    prompt: Arc<dyn CodePrompt>,
    rate: Arc<dyn RateGate>,
    retry: RetryPolicy,
    /// Identity used for interactive login (phone number).
    identity: Option<String>,
    session: RwLock<Option<Arc<Session>>>,
    bootstrap_lock: Mutex<()>,
    state: watch::Sender<SessionState>,
}

impl SessionManager {
    pub fn new(
        upstream: Arc<dyn UpstreamAdapter>,
        store: Arc<dyn SessionStore>,
        prompt: Arc<dyn CodePrompt>,
        rate: Arc<dyn RateGate>,
        retry: RetryPolicy,
        identity: Option<String>,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Uninitialized);
        Self {
            upstream,
            store,
            prompt,
            rate,
            retry,
            identity,
            session: RwLock::new(None),
            bootstrap_lock: Mutex::new(()),
            state,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn is_valid(&self) -> bool {
        self.state() == SessionState::Valid
    }

    /// Establish a session: restore the persisted one, or fall back to an
    /// interactive login.
    ///
    /// Returns immediately when a session is already installed. Concurrent
    /// callers are serialized and the later ones observe the first result.
    pub async fn bootstrap(&self) -> Result<Arc<Session>, FerryError> {
        let _guard = self.bootstrap_lock.lock().await;

        if let Some(session) = self.session.read().await.clone() {
            return Ok(session);
        }
        if self.state() == SessionState::Failed {
            return Err(FerryError::AuthRequired(
                "interactive login is not possible".into(),
            ));
        }

        let persisted = match self.store.load_session().await {
            Ok(persisted) => persisted,
            Err(e) => {
                self.set_state(SessionState::Invalid);
                return Err(e);
            }
        };

        if let Some(mut session) = persisted {
            self.set_state(SessionState::Restoring);
            info!(identity = %session.identity, "restoring persisted session");
            match self.auth_call(|| self.upstream.restore(&session)).await {
                Ok(user_id) => {
                    session.user_id = Some(user_id);
                    session.renewed_at = Utc::now();
                    self.persist(&session).await;
                    return Ok(self.install(session).await);
                }
                Err(e) if e.is_auth() => {
                    warn!(error = %e, "persisted session rejected, login required");
                    if let Err(e) = self.store.clear_session().await {
                        warn!(error = %e, "failed to clear rejected session");
                    }
                }
                Err(e) => {
                    self.set_state(SessionState::Invalid);
                    return Err(e);
                }
            }
        }

        self.interactive_login().await
    }

    async fn interactive_login(&self) -> Result<Arc<Session>, FerryError> {
        let Some(identity) = self.identity.clone() else {
            return Err(self.fail("no identity configured for login"));
        };
        if !self.prompt.is_interactive() {
            return Err(self.fail("no interactive channel available for login"));
        }

        self.set_state(SessionState::AwaitingInteractiveAuth);
        info!(identity = %identity, "starting interactive login");

        let challenge = match self.auth_call(|| self.upstream.send_code(&identity)).await {
            Ok(challenge) => challenge,
            Err(e) => {
                self.set_state(SessionState::Invalid);
                return Err(e);
            }
        };

        let code = match self.prompt.login_code(&identity).await {
            Ok(code) => code,
            Err(e) => return Err(self.fail(&e.to_string())),
        };

        let session = match self
            .auth_call(|| self.upstream.sign_in(&challenge, &code))
            .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "sign-in rejected");
                self.set_state(SessionState::Invalid);
                return Err(e);
            }
        };

        self.persist(&session).await;
        Ok(self.install(session).await)
    }

    /// Wait for a valid session.
    ///
    /// Fails with `AuthRequired` once bootstrap has failed terminally.
    pub async fn acquire_session(&self) -> Result<Arc<Session>, FerryError> {
        self.wait_valid().await
    }

    pub async fn wait_valid(&self) -> Result<Arc<Session>, FerryError> {
        let mut rx = self.state.subscribe();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                SessionState::Failed => {
                    return Err(FerryError::AuthRequired(
                        "session bootstrap failed".into(),
                    ));
                }
                SessionState::Valid => {
                    if let Some(session) = self.session.read().await.clone() {
                        return Ok(session);
                    }
                }
                _ => {}
            }
            rx.changed()
                .await
                .map_err(|_| FerryError::Internal("session manager dropped".into()))?;
        }
    }

    /// Drop the current session. Calls wait until a re-bootstrap succeeds.
    pub async fn invalidate(&self) {
        let mut slot = self.session.write().await;
        if slot.take().is_some() {
            warn!("session invalidated");
            self.set_state(SessionState::Invalid);
        }
    }

    /// Invalidate only if `stale` is still the installed session, so a late
    /// rejection never discards a session that was renewed meanwhile.
    async fn invalidate_session(&self, stale: &Arc<Session>) {
        let mut slot = self.session.write().await;
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, stale)) {
            slot.take();
            warn!(identity = %stale.identity, "session rejected by upstream");
            self.set_state(SessionState::Invalid);
        }
    }

    /// Run `op` against the current session.
    ///
    /// Acquires the rate gate before every attempt. Flood rejections are
    /// reported to the gate and retried after the backoff. Transient errors
    /// are retried with exponential backoff up to the retry ceiling, after
    /// which the session is forced to re-validate. Auth rejections invalidate
    /// the session and re-run bootstrap before the next attempt; a terminal
    /// bootstrap failure is returned to the caller.
    pub async fn call<T, F, Fut>(&self, class: CostClass, op: F) -> Result<T, FerryError>
    where
        F: FnMut(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T, FerryError>>,
    {
        self.invoke(class, op, true).await
    }

    /// Like [`call`](Self::call) but returns `FloodControl` to the caller
    /// after reporting it to the rate gate.
    pub async fn call_once<T, F, Fut>(&self, class: CostClass, op: F) -> Result<T, FerryError>
    where
        F: FnMut(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T, FerryError>>,
    {
        self.invoke(class, op, false).await
    }

    async fn invoke<T, F, Fut>(
        &self,
        class: CostClass,
        mut op: F,
        absorb_flood: bool,
    ) -> Result<T, FerryError>
    where
        F: FnMut(Arc<Session>) -> Fut,
        Fut: Future<Output = Result<T, FerryError>>,
    {
        let mut transient_failures = 0u32;
        let mut auth_failures = 0u32;
        loop {
            let session = self.wait_valid().await?;
            self.rate.acquire(class).await;
            ferry_prometheus::record_upstream_call(class);

            match op(Arc::clone(&session)).await {
                Ok(value) => return Ok(value),
                Err(FerryError::FloodControl { retry_after }) => {
                    self.rate.report_flood(retry_after);
                    if !absorb_flood {
                        return Err(FerryError::FloodControl { retry_after });
                    }
                    debug!(class = %class, retry_after_secs = retry_after.as_secs_f64(), "flood wait");
                }
                Err(e) if e.is_auth() => {
                    auth_failures += 1;
                    self.invalidate_session(&session).await;
                    if auth_failures >= self.retry.max_attempts {
                        return Err(e);
                    }
                    // No supervisor may be running (one-shot commands).
                    self.bootstrap().await?;
                }
                Err(e @ FerryError::UpstreamTransient { .. }) => {
                    transient_failures += 1;
                    if transient_failures >= self.retry.max_attempts {
                        warn!(class = %class, error = %e, "transient retries exhausted, forcing session revalidation");
                        self.invalidate_session(&session).await;
                        return Err(e);
                    }
                    let delay = self.retry.delay_for_attempt(transient_failures - 1);
                    debug!(class = %class, attempt = transient_failures, delay_ms = delay.as_millis() as u64, error = %e, "retrying upstream call");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn folders(&self) -> Result<Vec<Folder>, FerryError> {
        self.call(CostClass::Discovery, |session| async move {
            self.upstream.folders(&session).await
        })
        .await
    }

    /// Fetch one history page. Flood rejections are surfaced.
    pub async fn history(&self, request: HistoryRequest) -> Result<HistoryPage, FerryError> {
        self.call_once(CostClass::History, |session| async move {
            self.upstream.history(&session, &request).await
        })
        .await
    }

    /// Open the push stream with the current session, forwarding into `updates`.
    ///
    /// A single attempt: the caller owns re-subscription. An auth rejection
    /// invalidates the session before it is returned.
    pub async fn subscribe(&self, updates: mpsc::Sender<RawMessage>) -> Result<(), FerryError> {
        let session = self.wait_valid().await?;
        self.rate.acquire(CostClass::Subscribe).await;
        ferry_prometheus::record_upstream_call(CostClass::Subscribe);

        let result = self.upstream.subscribe(&session, updates).await;
        if let Err(e) = &result {
            if e.is_auth() {
                self.invalidate_session(&session).await;
            } else if let Some(retry_after) = e.retry_after() {
                self.rate.report_flood(retry_after);
            }
        }
        result
    }

    /// Re-run bootstrap whenever the session is uninitialized or invalid.
    ///
    /// Exits when cancelled or once bootstrap has failed terminally.
    pub fn spawn_supervisor(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut rx = manager.subscribe_state();
            let mut attempt = 0u32;
            loop {
                let state = *rx.borrow_and_update();
                match state {
                    SessionState::Uninitialized | SessionState::Invalid => {
                        let result = tokio::select! {
                            _ = cancel.cancelled() => break,
                            r = manager.bootstrap() => r,
                        };
                        match result {
                            Ok(_) => attempt = 0,
                            Err(e) if manager.state() == SessionState::Failed => {
                                error!(error = %e, "session bootstrap failed terminally");
                                break;
                            }
                            Err(e) => {
                                let delay = manager.retry.delay_for_attempt(attempt);
                                attempt = attempt.saturating_add(1);
                                warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "session bootstrap failed, retrying");
                                tokio::select! {
                                    _ = cancel.cancelled() => break,
                                    _ = tokio::time::sleep(delay) => {}
                                }
                                continue;
                            }
                        }
                    }
                    SessionState::Failed => break,
                    _ => {}
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = rx.changed() => if changed.is_err() { break },
                }
            }
            debug!("session supervisor stopped");
        })
    }

    async fn auth_call<T, F, Fut>(&self, mut op: F) -> Result<T, FerryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FerryError>>,
    {
        let mut attempt = 0u32;
        loop {
            self.rate.acquire(CostClass::Auth).await;
            ferry_prometheus::record_upstream_call(CostClass::Auth);
            match op().await {
                Err(FerryError::FloodControl { retry_after }) => {
                    self.rate.report_flood(retry_after);
                }
                Err(e @ FerryError::UpstreamTransient { .. })
                    if attempt + 1 < self.retry.max_attempts =>
                {
                    let delay = self.retry.delay_for_attempt(attempt);
                    attempt += 1;
                    debug!(attempt, error = %e, "retrying auth call");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn persist(&self, session: &Session) {
        if let Err(e) = self.store.save_session(session).await {
            warn!(error = %e, "failed to persist session, it will not survive a restart");
        }
    }

    async fn install(&self, session: Session) -> Arc<Session> {
        let session = Arc::new(session);
        let mut slot = self.session.write().await;
        *slot = Some(Arc::clone(&session));
        info!(identity = %session.identity, user_id = ?session.user_id, "session valid");
        self.set_state(SessionState::Valid);
        session
    }

    fn fail(&self, reason: &str) -> FerryError {
        error!(reason, "session bootstrap cannot proceed");
        self.set_state(SessionState::Failed);
        FerryError::AuthRequired(reason.to_string())
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "session state changed");
        }
        ferry_prometheus::set_session_valid(next == SessionState::Valid);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::rate::{CostTable, RateController};
    use ferry_core::ChannelId;
    use ferry_test_utils::{MemorySessionStore, MockPrompt, MockUpstream, folder};
    use secrecy::{ExposeSecret, SecretString};

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            jitter_percent: 0.0,
            max_attempts: 3,
        }
    }

    fn manager(
        upstream: Arc<MockUpstream>,
        store: Arc<MemorySessionStore>,
        prompt: Arc<MockPrompt>,
    ) -> Arc<SessionManager> {
        let rate = Arc::new(RateController::new(
            Duration::from_secs(1),
            1_000,
            CostTable::default(),
        ));
        Arc::new(SessionManager::new(
            upstream,
            store,
            prompt,
            rate,
            fast_retry(),
            Some("+15550001".into()),
        ))
    }

    #[tokio::test]
    async fn restores_persisted_session_without_prompting() {
        let upstream = Arc::new(MockUpstream::new());
        upstream.accept_session("persisted");
        let store = Arc::new(MemorySessionStore::with_session(Session::new(
            "+15550001",
            SecretString::from("persisted".to_string()),
        )));
        let prompt = Arc::new(MockPrompt::with_code("12345"));
        let mgr = manager(upstream.clone(), store.clone(), prompt.clone());

        let session = mgr.bootstrap().await.unwrap();
        assert_eq!(session.blob.expose_secret(), "persisted");
        assert_eq!(session.user_id, Some(1));
        assert!(mgr.is_valid());
        assert_eq!(prompt.times_asked(), 0);
        assert_eq!(upstream.calls("restore"), 1);
    }

    #[tokio::test]
    async fn first_run_logs_in_interactively_and_persists() {
        let upstream = Arc::new(MockUpstream::new());
        let store = Arc::new(MemorySessionStore::new());
        let prompt = Arc::new(MockPrompt::with_code("12345"));
        let mgr = manager(upstream.clone(), store.clone(), prompt.clone());

        let session = mgr.bootstrap().await.unwrap();
        assert_eq!(session.blob.expose_secret(), "session-1");
        assert_eq!(prompt.times_asked(), 1);
        let stored = store.stored().unwrap();
        assert_eq!(stored.blob.expose_secret(), "session-1");
        assert_eq!(mgr.state(), SessionState::Valid);
    }

    #[tokio::test]
    async fn no_interactive_channel_is_terminal() {
        let upstream = Arc::new(MockUpstream::new());
        let mgr = manager(
            upstream,
            Arc::new(MemorySessionStore::new()),
            Arc::new(MockPrompt::non_interactive()),
        );

        let err = mgr.bootstrap().await.unwrap_err();
        assert!(matches!(err, FerryError::AuthRequired(_)));
        assert_eq!(mgr.state(), SessionState::Failed);
        assert!(matches!(
            mgr.acquire_session().await,
            Err(FerryError::AuthRequired(_))
        ));
    }

    #[tokio::test]
    async fn wrong_code_leaves_session_invalid() {
        let upstream = Arc::new(MockUpstream::new());
        let mgr = manager(
            upstream,
            Arc::new(MemorySessionStore::new()),
            Arc::new(MockPrompt::with_code("00000")),
        );

        let err = mgr.bootstrap().await.unwrap_err();
        assert!(matches!(err, FerryError::Upstream { .. }));
        assert_eq!(mgr.state(), SessionState::Invalid);
    }

    #[tokio::test]
    async fn expired_session_is_renewed_transparently() {
        let upstream = Arc::new(MockUpstream::new());
        upstream.set_folders(vec![folder(1, "archive-1", &[(10, "ten")])]);
        let prompt = Arc::new(MockPrompt::with_code("12345"));
        let mgr = manager(upstream.clone(), Arc::new(MemorySessionStore::new()), prompt.clone());
        let cancel = CancellationToken::new();
        let supervisor = mgr.spawn_supervisor(cancel.clone());

        mgr.wait_valid().await.unwrap();
        upstream.expire_sessions();

        let folders = mgr.folders().await.unwrap();
        assert_eq!(folders[0].channels[0].id, ChannelId(10));
        assert_eq!(prompt.times_asked(), 2);
        assert!(mgr.is_valid());

        cancel.cancel();
        supervisor.await.unwrap();
    }

    #[tokio::test]
    async fn auth_rejection_renews_without_supervisor() {
        let upstream = Arc::new(MockUpstream::new());
        upstream.set_folders(vec![folder(1, "archive-1", &[(10, "ten")])]);
        let prompt = Arc::new(MockPrompt::with_code("12345"));
        let mgr = manager(upstream.clone(), Arc::new(MemorySessionStore::new()), prompt.clone());
        mgr.bootstrap().await.unwrap();
        upstream.expire_sessions();

        let folders = tokio::time::timeout(Duration::from_secs(5), mgr.folders())
            .await
            .expect("call waited for a renewal nobody performs")
            .unwrap();
        assert_eq!(folders.len(), 1);
        assert_eq!(upstream.calls("sign_in"), 2);
        assert!(mgr.is_valid());
    }

    #[tokio::test]
    async fn auth_rejection_without_operator_fails_call() {
        let upstream = Arc::new(MockUpstream::new());
        upstream.accept_session("persisted");
        let store = Arc::new(MemorySessionStore::with_session(Session::new(
            "+15550001",
            SecretString::from("persisted".to_string()),
        )));
        let mgr = manager(upstream.clone(), store, Arc::new(MockPrompt::non_interactive()));
        mgr.bootstrap().await.unwrap();
        upstream.expire_sessions();

        let err = tokio::time::timeout(Duration::from_secs(5), mgr.folders())
            .await
            .expect("call waited for a renewal nobody performs")
            .unwrap_err();
        assert!(matches!(err, FerryError::AuthRequired(_)));
        assert_eq!(mgr.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn transient_ceiling_forces_revalidation() {
        let upstream = Arc::new(MockUpstream::new());
        let mgr = manager(
            upstream.clone(),
            Arc::new(MemorySessionStore::new()),
            Arc::new(MockPrompt::with_code("12345")),
        );
        mgr.bootstrap().await.unwrap();

        for _ in 0..3 {
            upstream.fail_next_history(FerryError::transient("connection reset"));
        }
        let err = mgr
            .history(HistoryRequest {
                channel_id: ChannelId(1),
                after: 0,
                limit: 10,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FerryError::UpstreamTransient { .. }));
        assert_eq!(upstream.calls("history"), 3);
        assert_eq!(mgr.state(), SessionState::Invalid);
    }

    #[tokio::test(start_paused = true)]
    async fn history_surfaces_flood_and_gates_later_calls() {
        let upstream = Arc::new(MockUpstream::new());
        upstream.seed_history(ChannelId(1), 1..=5);
        let mgr = manager(
            upstream.clone(),
            Arc::new(MemorySessionStore::new()),
            Arc::new(MockPrompt::with_code("12345")),
        );
        mgr.bootstrap().await.unwrap();

        upstream.flood_next_history(Duration::from_secs(20));
        let request = HistoryRequest {
            channel_id: ChannelId(1),
            after: 0,
            limit: 10,
        };
        let err = mgr.history(request).await.unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(20)));

        let start = tokio::time::Instant::now();
        let page = mgr.history(request).await.unwrap();
        assert_eq!(page.messages.len(), 5);
        assert!(start.elapsed() >= Duration::from_secs(20));
    }

    #[tokio::test]
    async fn concurrent_bootstraps_prompt_once() {
        let upstream = Arc::new(MockUpstream::new());
        let prompt = Arc::new(MockPrompt::with_code("12345"));
        let mgr = manager(upstream, Arc::new(MemorySessionStore::new()), prompt.clone());

        let (a, b) = tokio::join!(mgr.bootstrap(), mgr.bootstrap());
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(prompt.times_asked(), 1);
    }
}

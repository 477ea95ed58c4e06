// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the gateway's JSON API.
//!
//! Provides [`GatewayClient`], which builds authenticated requests and maps
//! gateway status codes onto the ferry error taxonomy. Retrying is left to
//! the session manager; this client makes exactly one attempt per call.

use std::time::Duration;

use ferry_config::model::SessionConfig;
use ferry_core::{FerryError, Folder, HistoryPage, HistoryRequest, LoginChallenge, Session};
use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::types::{
    GatewayErrorBody, HistoryResponse, RestoreRequest, RestoreResponse, SendCodeRequest, SendCodeResponse,
    SignInRequest, SignInResponse,
};

/// Backoff used when a flood response carries no explicit wait.
const DEFAULT_FLOOD_WAIT: Duration = Duration::from_secs(5);

/// Close code the gateway sends on the update stream when the session is revoked.
pub const CLOSE_AUTH_EXPIRED: u16 = 4001;

/// HTTP client for gateway communication.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
    updates_url: String,
}

impl GatewayClient {
    /// Creates a client from the `[session]` configuration section.
    pub fn new(config: &SessionConfig) -> Result<Self, FerryError> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.api_token {
            headers.insert(
                "x-api-token",
                HeaderValue::from_str(token).map_err(|e| {
                    FerryError::Config(format!("invalid session.api_token header value: {e}"))
                })?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| FerryError::Internal(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.gateway_url.trim_end_matches('/').to_string(),
            updates_url: config.updates_url(),
        })
    }

    /// WebSocket endpoint for the update stream.
    pub fn updates_url(&self) -> &str {
        &self.updates_url
    }

    /// Validates a persisted session blob. Returns the account's user id.
    pub async fn restore(&self, session: &Session) -> Result<i64, FerryError> {
        let body = RestoreRequest {
            session: session.blob.expose_secret(),
        };
        let resp: RestoreResponse = self.post("/auth/restore", &body).await?;
        Ok(resp.user_id)
    }

    /// Asks the identity provider to deliver a login code to `phone`.
    pub async fn send_code(&self, phone: &str) -> Result<LoginChallenge, FerryError> {
        let resp: SendCodeResponse = self
            .post("/auth/send_code", &SendCodeRequest { phone })
            .await?;
        Ok(LoginChallenge {
            id: resp.challenge_id,
            identity: phone.to_string(),
        })
    }

    /// Exchanges a challenge and code for a new session.
    pub async fn sign_in(
        &self,
        challenge: &LoginChallenge,
        code: &SecretString,
    ) -> Result<Session, FerryError> {
        let body = SignInRequest {
            challenge_id: &challenge.id,
            code: code.expose_secret(),
        };
        let resp: SignInResponse = self.post("/auth/sign_in", &body).await?;
        let mut session = Session::new(challenge.identity.clone(), SecretString::from(resp.session));
        session.user_id = resp.user_id;
        Ok(session)
    }

    pub async fn folders(&self, session: &Session) -> Result<Vec<Folder>, FerryError> {
        self.get("/folders", session).await
    }

    pub async fn history(
        &self,
        session: &Session,
        request: &HistoryRequest,
    ) -> Result<HistoryPage, FerryError> {
        let path = format!(
            "/channels/{}/history?after={}&limit={}",
            request.channel_id, request.after, request.limit
        );
        let resp: HistoryResponse = self.get(&path, session).await?;
        Ok(resp.into_page(request.channel_id))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, session: &Session) -> Result<T, FerryError> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(session.blob.expose_secret())
            .send()
            .await
            .map_err(map_send_err)?;
        decode(path, response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, FerryError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(map_send_err)?;
        decode(path, response).await
    }
}

async fn decode<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, FerryError> {
    let status = response.status();
    debug!(path, status = %status, "gateway response received");

    if !status.is_success() {
        return Err(error_from_response(response).await);
    }

    let body = response.text().await.map_err(map_send_err)?;
    serde_json::from_str(&body).map_err(|e| FerryError::Upstream {
        message: format!("failed to parse gateway response for {path}: {e}"),
    })
}

/// Maps a non-2xx response onto the error taxonomy.
pub async fn error_from_response(response: Response) -> FerryError {
    let status = response.status();
    let header_wait = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let text = response.text().await.unwrap_or_default();
    let body: GatewayErrorBody = serde_json::from_str(&text).unwrap_or_default();

    classify(status, header_wait, &body, &text)
}

fn classify(
    status: StatusCode,
    header_wait: Option<u64>,
    body: &GatewayErrorBody,
    raw: &str,
) -> FerryError {
    let flood_body = body.error.as_deref() == Some("FLOOD_WAIT");
    if status.as_u16() == 420 || status == StatusCode::TOO_MANY_REQUESTS || flood_body {
        let secs = header_wait.or(body.retry_after);
        return FerryError::FloodControl {
            retry_after: secs.map(Duration::from_secs).unwrap_or(DEFAULT_FLOOD_WAIT),
        };
    }

    let detail = if body.error.is_some() || body.message.is_some() {
        body.describe()
    } else {
        raw.chars().take(200).collect()
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            FerryError::AuthExpired(format!("gateway returned {status}: {detail}"))
        }
        s if s.is_server_error() => FerryError::UpstreamTransient {
            message: format!("gateway returned {status}: {detail}"),
            source: None,
        },
        _ => FerryError::Upstream {
            message: format!("gateway returned {status}: {detail}"),
        },
    }
}

fn map_send_err(e: reqwest::Error) -> FerryError {
    FerryError::UpstreamTransient {
        message: format!("gateway request failed: {e}"),
        source: Some(Box::new(e)),
    }
}

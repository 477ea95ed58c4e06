// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Unauthenticated `/health` and `/metrics` endpoints built on axum.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use ferry_core::FerryError;
use ferry_ingest::SessionState;
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Shared state for the health and metrics handlers.
#[derive(Clone)]
pub struct HealthState {
    pub start_time: Instant,
    pub session: watch::Receiver<SessionState>,
    /// Renders the Prometheus text exposition. `None` when metrics are off.
    pub prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>>,
}

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub session_valid: bool,
    pub session_state: String,
    pub version: &'static str,
    pub uptime_secs: u64,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/metrics", get(get_metrics))
        .with_state(state)
}

async fn get_health(State(state): State<HealthState>) -> Json<HealthResponse> {
    let session = *state.session.borrow();
    let session_valid = session == SessionState::Valid;
    Json(HealthResponse {
        status: if session_valid { "ok" } else { "degraded" },
        session_valid,
        session_state: session.to_string(),
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

async fn get_metrics(State(state): State<HealthState>) -> impl IntoResponse {
    match &state.prometheus_render {
        Some(render) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics disabled").into_response(),
    }
}

/// Serve the endpoints on `host:port` until `cancel` fires.
pub async fn serve(
    host: &str,
    port: u16,
    state: HealthState,
    cancel: CancellationToken,
) -> Result<(), FerryError> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| FerryError::Internal(format!("failed to bind metrics endpoint to {addr}: {e}")))?;

    info!(addr = %addr, "health and metrics endpoint listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| FerryError::Internal(format!("metrics endpoint error: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(session: SessionState, render: Option<&'static str>) -> HealthState {
        let (_tx, rx) = watch::channel(session);
        HealthState {
            start_time: Instant::now(),
            session: rx,
            prometheus_render: render
                .map(|text| Arc::new(move || text.to_string()) as Arc<dyn Fn() -> String + Send + Sync>),
        }
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn health_reports_valid_session() {
        let (status, body) = get(router(state(SessionState::Valid, None)), "/health").await;
        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["session_valid"], true);
        assert!(json["uptime_secs"].is_u64());
    }

    #[tokio::test]
    async fn health_degrades_while_session_invalid() {
        let (_, body) = get(router(state(SessionState::Invalid, None)), "/health").await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["session_valid"], false);
    }

    #[tokio::test]
    async fn metrics_render_text() {
        let app = router(state(SessionState::Valid, Some("ferry_session_valid 1\n")));
        let (status, body) = get(app, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("ferry_session_valid 1"));
    }

    #[tokio::test]
    async fn metrics_missing_when_disabled() {
        let (status, _) = get(router(state(SessionState::Valid, None)), "/metrics").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

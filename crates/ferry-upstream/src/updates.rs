// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebSocket push stream of new channel messages.
//!
//! One JSON text frame per update. The stream runs until the gateway closes
//! it, the socket drops, or the receiving side goes away.

use ferry_core::{FerryError, RawMessage};
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, info, warn};

use crate::client::CLOSE_AUTH_EXPIRED;

/// Connect to `url` with the session token and forward updates into `updates`.
///
/// Sending into `updates` awaits capacity, so a full queue slows reading
/// from the socket rather than dropping events.
pub async fn stream_updates(
    url: &str,
    token: &SecretString,
    updates: mpsc::Sender<RawMessage>,
) -> Result<(), FerryError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| FerryError::Config(format!("invalid updates url {url}: {e}")))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", token.expose_secret()))
        .map_err(|e| FerryError::AuthExpired(format!("session token is not a valid header: {e}")))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    let (mut socket, _) = connect_async(request).await.map_err(map_handshake_err)?;
    info!(url, "update stream connected");

    while let Some(frame) = socket.next().await {
        let frame = frame.map_err(|e| FerryError::UpstreamTransient {
            message: format!("update stream read failed: {e}"),
            source: Some(Box::new(e)),
        })?;

        match frame {
            Message::Text(text) => match serde_json::from_str::<RawMessage>(text.as_str()) {
                Ok(message) => {
                    if updates.send(message).await.is_err() {
                        debug!("update receiver dropped, closing stream");
                        let _ = socket.close(None).await;
                        return Ok(());
                    }
                }
                Err(e) => warn!(error = %e, "skipping malformed update frame"),
            },
            Message::Close(frame) => {
                if let Some(frame) = frame
                    && u16::from(frame.code) == CLOSE_AUTH_EXPIRED
                {
                    return Err(FerryError::AuthExpired(format!(
                        "update stream closed: {}",
                        frame.reason.as_str()
                    )));
                }
                info!("update stream closed by gateway");
                return Ok(());
            }
            // Pings are answered by tungstenite; binary frames are not updates.
            _ => {}
        }
    }

    Err(FerryError::transient("update stream ended without close frame"))
}

fn map_handshake_err(e: tungstenite::Error) -> FerryError {
    match e {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 || status.as_u16() == 403 {
                FerryError::AuthExpired(format!("update stream rejected: {status}"))
            } else if status.is_server_error() {
                FerryError::transient(format!("update stream handshake failed: {status}"))
            } else {
                FerryError::Upstream {
                    message: format!("update stream handshake failed: {status}"),
                }
            }
        }
        other => FerryError::UpstreamTransient {
            message: format!("update stream connect failed: {other}"),
            source: Some(Box::new(other)),
        },
    }
}

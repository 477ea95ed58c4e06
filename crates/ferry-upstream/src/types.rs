// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway request and response bodies.

use ferry_core::{ChannelId, HistoryPage, MediaRef, RawMessage, SeqId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub struct RestoreRequest<'a> {
    pub session: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct RestoreResponse {
    pub user_id: i64,
}

#[derive(Debug, Serialize)]
pub struct SendCodeRequest<'a> {
    pub phone: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct SendCodeResponse {
    pub challenge_id: String,
}

#[derive(Debug, Serialize)]
pub struct SignInRequest<'a> {
    pub challenge_id: &'a str,
    pub code: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct SignInResponse {
    pub session: String,
    #[serde(default)]
    pub user_id: Option<i64>,
}

/// A history message. The channel is implied by the request path.
#[derive(Debug, Deserialize)]
pub struct HistoryMessage {
    pub seq_id: SeqId,
    pub date: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub media: Vec<MediaRef>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryResponse {
    pub messages: Vec<HistoryMessage>,
    pub head: SeqId,
}

impl HistoryResponse {
    /// Attach the channel id and order messages ascending.
    pub fn into_page(self, channel_id: ChannelId) -> HistoryPage {
        let mut messages: Vec<RawMessage> = self
            .messages
            .into_iter()
            .map(|m| RawMessage {
                channel_id,
                seq_id: m.seq_id,
                date: m.date,
                text: m.text,
                media: m.media,
            })
            .collect();
        messages.sort_by_key(|m| m.seq_id);
        HistoryPage {
            messages,
            head: self.head,
        }
    }
}

/// Error body returned by the gateway on non-2xx responses.
#[derive(Debug, Default, Deserialize)]
pub struct GatewayErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Seconds to wait, present on `FLOOD_WAIT`.
    #[serde(default)]
    pub retry_after: Option<u64>,
}

impl GatewayErrorBody {
    /// Human-readable summary for error messages.
    pub fn describe(&self) -> String {
        match (&self.error, &self.message) {
            (Some(code), Some(msg)) => format!("{code}: {msg}"),
            (Some(code), None) => code.clone(),
            (None, Some(msg)) => msg.clone(),
            (None, None) => "no error body".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flood_body_parses() {
        let body: GatewayErrorBody =
            serde_json::from_str(r#"{"error":"FLOOD_WAIT","retry_after":17}"#).unwrap();
        assert_eq!(body.retry_after, Some(17));
        assert_eq!(body.describe(), "FLOOD_WAIT");
    }

    #[test]
    fn history_page_is_sorted_and_tagged() {
        let resp: HistoryResponse = serde_json::from_str(
            r#"{"messages":[{"seq_id":3,"date":10},{"seq_id":2,"date":9,"text":"hi"}],"head":7}"#,
        )
        .unwrap();
        let page = resp.into_page(ChannelId(-55));
        assert_eq!(page.head, 7);
        assert_eq!(page.end(), Some(3));
        assert_eq!(page.messages[0].seq_id, 2);
        assert!(page.messages.iter().all(|m| m.channel_id == ChannelId(-55)));
    }

    #[test]
    fn sign_in_user_id_is_optional() {
        let resp: SignInResponse = serde_json::from_str(r#"{"session":"abc"}"#).unwrap();
        assert_eq!(resp.session, "abc");
        assert!(resp.user_id.is_none());
    }
}

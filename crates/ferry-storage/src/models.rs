// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types and column conversions.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use ferry_core::{ChannelId, FerryError, MessageEvent, MessagePayload, Origin, SeqId};
use rusqlite::types::Type;

/// Delivery state of an outbox row.
pub const STATUS_PENDING: &str = "pending";
pub const STATUS_CLAIMED: &str = "claimed";
pub const STATUS_DELIVERED: &str = "delivered";

/// One row of the durable output stream.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: i64,
    pub channel_id: ChannelId,
    pub seq_id: SeqId,
    pub origin: Origin,
    pub event_ts: DateTime<Utc>,
    /// JSON-encoded [`MessagePayload`].
    pub payload: String,
    pub status: String,
    pub published_at: String,
    pub delivered_at: Option<String>,
}

impl OutboxEntry {
    /// Decode the row back into the event that was published.
    pub fn event(&self) -> Result<MessageEvent, FerryError> {
        let payload: MessagePayload =
            serde_json::from_str(&self.payload).map_err(|e| FerryError::Storage {
                source: Box::new(e),
            })?;
        Ok(MessageEvent {
            channel_id: self.channel_id,
            seq_id: self.seq_id,
            timestamp: self.event_ts,
            payload,
            origin: self.origin,
        })
    }
}

/// Format a timestamp the way every table stores it.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored timestamp column. `idx` is the column index for error reporting.
pub(crate) fn parse_ts(idx: usize, raw: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Parse a strum-backed enum column.
pub(crate) fn parse_enum<T>(idx: usize, raw: &str) -> Result<T, rusqlite::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    T::from_str(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

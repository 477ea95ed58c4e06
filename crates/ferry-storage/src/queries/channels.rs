// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Channel catalog operations.

use ferry_core::{Channel, ChannelId, FerryError, SeqId};
use rusqlite::{OptionalExtension, Row, params};

use crate::database::{Database, map_tr_err};
use crate::models::{format_ts, parse_ts};

const SELECT_COLUMNS: &str =
    "SELECT id, name, group_tag, enabled, cursor, last_synced_at FROM channels";

fn row_to_channel(row: &Row<'_>) -> Result<Channel, rusqlite::Error> {
    let synced: Option<String> = row.get(5)?;
    Ok(Channel {
        id: ChannelId(row.get(0)?),
        name: row.get(1)?,
        group_tag: row.get(2)?,
        enabled: row.get(3)?,
        cursor: row.get(4)?,
        last_synced_at: synced.as_deref().map(|s| parse_ts(5, s)).transpose()?,
    })
}

/// All channels ordered by id.
pub async fn list_channels(db: &Database) -> Result<Vec<Channel>, FerryError> {
    db.connection()
        .call(|conn| -> Result<Vec<Channel>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id"))?;
            let rows = stmt.query_map([], row_to_channel)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn get_channel(db: &Database, id: ChannelId) -> Result<Option<Channel>, FerryError> {
    db.connection()
        .call(move |conn| -> Result<Option<Channel>, rusqlite::Error> {
            conn.query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.0],
                row_to_channel,
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

/// Insert a channel or replace its discovery-owned attributes.
///
/// The stored cursor only ever moves forward, even if `channel.cursor` is stale.
pub async fn upsert_channel(db: &Database, channel: &Channel) -> Result<(), FerryError> {
    let channel = channel.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO channels (id, name, group_tag, enabled, cursor, last_synced_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(id) DO UPDATE SET
                    name = excluded.name,
                    group_tag = excluded.group_tag,
                    enabled = excluded.enabled,
                    cursor = MAX(channels.cursor, excluded.cursor),
                    last_synced_at = excluded.last_synced_at",
                params![
                    channel.id.0,
                    channel.name,
                    channel.group_tag,
                    channel.enabled,
                    channel.cursor,
                    channel.last_synced_at.as_ref().map(format_ts),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Move the cursor forward. Returns `false` if the channel is unknown or
/// its stored cursor is already at or past `cursor`.
pub async fn advance_cursor(
    db: &Database,
    id: ChannelId,
    cursor: SeqId,
) -> Result<bool, FerryError> {
    db.connection()
        .call(move |conn| -> Result<bool, rusqlite::Error> {
            let changed = conn.execute(
                "UPDATE channels SET cursor = ?2 WHERE id = ?1 AND cursor < ?2",
                params![id.0, cursor],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(map_tr_err)
}

// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Durable output stream.
//!
//! Every published event lands here exactly once per `(channel_id, seq_id)`.
//! Downstream consumers either read by channel position or claim batches and
//! acknowledge them.

use chrono::{DateTime, Utc};
use ferry_core::{ChannelId, FerryError, MessageEvent, Origin, PublishOutcome, SeqId};
use rusqlite::{Row, params};

use crate::database::{Database, map_tr_err};
use crate::models::{
    OutboxEntry, STATUS_CLAIMED, STATUS_DELIVERED, STATUS_PENDING, format_ts, parse_enum,
    parse_ts,
};

const SELECT_COLUMNS: &str = "SELECT id, channel_id, seq_id, origin, event_ts, payload, status,
                                     published_at, delivered_at
                              FROM outbox";

fn row_to_entry(row: &Row<'_>) -> Result<OutboxEntry, rusqlite::Error> {
    let origin: String = row.get(3)?;
    let event_ts: String = row.get(4)?;
    Ok(OutboxEntry {
        id: row.get(0)?,
        channel_id: ChannelId(row.get(1)?),
        seq_id: row.get(2)?,
        origin: parse_enum::<Origin>(3, &origin)?,
        event_ts: parse_ts(4, &event_ts)?,
        payload: row.get(5)?,
        status: row.get(6)?,
        published_at: row.get(7)?,
        delivered_at: row.get(8)?,
    })
}

/// Append an event. A second append of the same key is ignored.
pub async fn append(db: &Database, event: &MessageEvent) -> Result<PublishOutcome, FerryError> {
    let payload = serde_json::to_string(&event.payload).map_err(|e| FerryError::Storage {
        source: Box::new(e),
    })?;
    let channel_id = event.channel_id.0;
    let seq_id = event.seq_id;
    let origin = event.origin.to_string();
    let event_ts = format_ts(&event.timestamp);
    db.connection()
        .call(move |conn| -> Result<PublishOutcome, rusqlite::Error> {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO outbox (channel_id, seq_id, origin, event_ts, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![channel_id, seq_id, origin, event_ts, payload],
            )?;
            Ok(if inserted == 0 {
                PublishOutcome::DuplicateIgnored
            } else {
                PublishOutcome::Accepted
            })
        })
        .await
        .map_err(map_tr_err)
}

/// Entries for one channel with `seq_id > after`, ascending.
pub async fn read_after(
    db: &Database,
    channel_id: ChannelId,
    after: SeqId,
    limit: u32,
) -> Result<Vec<OutboxEntry>, FerryError> {
    db.connection()
        .call(move |conn| -> Result<Vec<OutboxEntry>, rusqlite::Error> {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE channel_id = ?1 AND seq_id > ?2 ORDER BY seq_id LIMIT ?3"
            ))?;
            let rows = stmt.query_map(params![channel_id.0, after, limit], row_to_entry)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Atomically take up to `limit` pending entries, oldest first, and mark them claimed.
pub async fn claim_batch(db: &Database, limit: u32) -> Result<Vec<OutboxEntry>, FerryError> {
    db.connection()
        .call(move |conn| -> Result<Vec<OutboxEntry>, rusqlite::Error> {
            let tx = conn.transaction()?;
            let mut entries = {
                let mut stmt = tx.prepare(&format!(
                    "{SELECT_COLUMNS} WHERE status = ?1 ORDER BY id LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![STATUS_PENDING, limit], row_to_entry)?;
                rows.collect::<Result<Vec<_>, _>>()?
            };
            for entry in &mut entries {
                tx.execute(
                    "UPDATE outbox SET status = ?2 WHERE id = ?1",
                    params![entry.id, STATUS_CLAIMED],
                )?;
                entry.status = STATUS_CLAIMED.to_string();
            }
            tx.commit()?;
            Ok(entries)
        })
        .await
        .map_err(map_tr_err)
}

/// Mark claimed entries as delivered. Returns the number of rows acknowledged.
pub async fn ack(db: &Database, ids: &[i64]) -> Result<usize, FerryError> {
    let ids = ids.to_vec();
    db.connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            let tx = conn.transaction()?;
            let mut acked = 0;
            for id in ids {
                acked += tx.execute(
                    "UPDATE outbox SET status = ?2,
                        delivered_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                     WHERE id = ?1 AND status != ?2",
                    params![id, STATUS_DELIVERED],
                )?;
            }
            tx.commit()?;
            Ok(acked)
        })
        .await
        .map_err(map_tr_err)
}

/// Return claimed-but-unacknowledged entries to pending. Run at consumer startup.
pub async fn release_claims(db: &Database) -> Result<usize, FerryError> {
    db.connection()
        .call(|conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                "UPDATE outbox SET status = ?1 WHERE status = ?2",
                params![STATUS_PENDING, STATUS_CLAIMED],
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Delete delivered entries published before `cutoff`.
///
/// Undelivered entries are kept regardless of age so their dedup keys stay live.
pub async fn prune(db: &Database, cutoff: DateTime<Utc>) -> Result<usize, FerryError> {
    let cutoff = format_ts(&cutoff);
    db.connection()
        .call(move |conn| -> Result<usize, rusqlite::Error> {
            conn.execute(
                "DELETE FROM outbox WHERE status = ?1 AND published_at < ?2",
                params![STATUS_DELIVERED, cutoff],
            )
        })
        .await
        .map_err(map_tr_err)
}

/// Total rows per channel, used by `channels` and tests.
pub async fn count_for_channel(db: &Database, channel_id: ChannelId) -> Result<i64, FerryError> {
    db.connection()
        .call(move |conn| -> Result<i64, rusqlite::Error> {
            conn.query_row(
                "SELECT COUNT(*) FROM outbox WHERE channel_id = ?1",
                params![channel_id.0],
                |row| row.get(0),
            )
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ferry_core::MessagePayload;
    use tempfile::tempdir;

    fn event(channel: i64, seq: SeqId, origin: Origin) -> MessageEvent {
        MessageEvent {
            channel_id: ChannelId(channel),
            seq_id: seq,
            timestamp: DateTime::from_timestamp(1_700_000_000 + seq, 0).unwrap(),
            payload: MessagePayload {
                text: Some(format!("message {seq}")),
                media: Vec::new(),
            },
            origin,
        }
    }

    async fn open() -> (tempfile::TempDir, Database) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("out.db").to_str().unwrap())
            .await
            .unwrap();
        (dir, db)
    }

    #[tokio::test]
    async fn duplicate_key_is_ignored_across_origins() {
        let (_dir, db) = open().await;
        assert_eq!(
            append(&db, &event(1, 10, Origin::Live)).await.unwrap(),
            PublishOutcome::Accepted
        );
        assert_eq!(
            append(&db, &event(1, 10, Origin::Backfill)).await.unwrap(),
            PublishOutcome::DuplicateIgnored
        );
        assert_eq!(
            append(&db, &event(2, 10, Origin::Live)).await.unwrap(),
            PublishOutcome::Accepted
        );

        let rows = read_after(&db, ChannelId(1), 0, 100).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].origin, Origin::Live);
        assert_eq!(rows[0].event().unwrap(), event(1, 10, Origin::Live));
    }

    #[tokio::test]
    async fn read_after_is_ascending_and_exclusive() {
        let (_dir, db) = open().await;
        for seq in [5, 3, 4, 1, 2] {
            append(&db, &event(7, seq, Origin::Backfill)).await.unwrap();
        }
        let seqs: Vec<SeqId> = read_after(&db, ChannelId(7), 2, 2)
            .await
            .unwrap()
            .iter()
            .map(|e| e.seq_id)
            .collect();
        assert_eq!(seqs, vec![3, 4]);
    }

    #[tokio::test]
    async fn claim_ack_prune_cycle() {
        let (_dir, db) = open().await;
        for seq in 1..=3 {
            append(&db, &event(1, seq, Origin::Live)).await.unwrap();
        }

        let first = claim_batch(&db, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|e| e.status == STATUS_CLAIMED));

        let second = claim_batch(&db, 10).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].seq_id, 3);

        let ids: Vec<i64> = first.iter().map(|e| e.id).collect();
        assert_eq!(ack(&db, &ids).await.unwrap(), 2);
        assert_eq!(ack(&db, &ids).await.unwrap(), 0);

        // Third entry is claimed, never acked; release puts it back.
        assert_eq!(release_claims(&db).await.unwrap(), 1);

        let pruned = prune(&db, Utc::now() + Duration::seconds(60)).await.unwrap();
        assert_eq!(pruned, 2);
        assert_eq!(count_for_channel(&db, ChannelId(1)).await.unwrap(), 1);

        // The surviving undelivered row still deduplicates.
        assert_eq!(
            append(&db, &event(1, 3, Origin::Backfill)).await.unwrap(),
            PublishOutcome::DuplicateIgnored
        );
    }

    #[tokio::test]
    async fn prune_keeps_recent_delivered_rows() {
        let (_dir, db) = open().await;
        append(&db, &event(1, 1, Origin::Live)).await.unwrap();
        let claimed = claim_batch(&db, 1).await.unwrap();
        ack(&db, &[claimed[0].id]).await.unwrap();

        let pruned = prune(&db, Utc::now() - Duration::days(7)).await.unwrap();
        assert_eq!(pruned, 0);
        assert_eq!(
            append(&db, &event(1, 1, Origin::Live)).await.unwrap(),
            PublishOutcome::DuplicateIgnored
        );
    }

    proptest::proptest! {
        #![proptest_config(proptest::prelude::ProptestConfig::with_cases(24))]

        #[test]
        fn stored_keys_are_distinct_regardless_of_order(
            seqs in proptest::collection::vec(1i64..40, 1..60),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let (_dir, db) = open().await;
                for (i, seq) in seqs.iter().enumerate() {
                    let origin = if i % 2 == 0 { Origin::Live } else { Origin::Backfill };
                    append(&db, &event(1, *seq, origin)).await.unwrap();
                }

                let mut expected = seqs.clone();
                expected.sort_unstable();
                expected.dedup();
                let stored: Vec<SeqId> = read_after(&db, ChannelId(1), 0, 1_000)
                    .await
                    .unwrap()
                    .iter()
                    .map(|e| e.seq_id)
                    .collect();
                assert_eq!(stored, expected);
            });
        }
    }
}

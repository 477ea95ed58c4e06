// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Backfill job persistence. One row per channel.

use ferry_core::{BackfillJob, ChannelId, FerryError, JobStatus};
use rusqlite::{Row, params};

use crate::database::{Database, map_tr_err};
use crate::models::{format_ts, parse_enum, parse_ts};

fn row_to_job(row: &Row<'_>) -> Result<BackfillJob, rusqlite::Error> {
    let status: String = row.get(4)?;
    let updated_at: String = row.get(7)?;
    Ok(BackfillJob {
        channel_id: ChannelId(row.get(0)?),
        from_seq: row.get(1)?,
        to_seq: row.get(2)?,
        head_seq: row.get(3)?,
        status: parse_enum::<JobStatus>(4, &status)?,
        attempts: row.get(5)?,
        last_error: row.get(6)?,
        updated_at: parse_ts(7, &updated_at)?,
    })
}

pub async fn list_jobs(db: &Database) -> Result<Vec<BackfillJob>, FerryError> {
    db.connection()
        .call(|conn| -> Result<Vec<BackfillJob>, rusqlite::Error> {
            let mut stmt = conn.prepare(
                "SELECT channel_id, from_seq, to_seq, head_seq, status, attempts,
                        last_error, updated_at
                 FROM backfill_jobs
                 ORDER BY updated_at, channel_id",
            )?;
            let rows = stmt.query_map([], row_to_job)?;
            rows.collect()
        })
        .await
        .map_err(map_tr_err)
}

/// Insert or replace the job for its channel.
pub async fn upsert_job(db: &Database, job: &BackfillJob) -> Result<(), FerryError> {
    let job = job.clone();
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO backfill_jobs
                    (channel_id, from_seq, to_seq, head_seq, status, attempts, last_error, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(channel_id) DO UPDATE SET
                    from_seq = excluded.from_seq,
                    to_seq = excluded.to_seq,
                    head_seq = excluded.head_seq,
                    status = excluded.status,
                    attempts = excluded.attempts,
                    last_error = excluded.last_error,
                    updated_at = excluded.updated_at",
                params![
                    job.channel_id.0,
                    job.from_seq,
                    job.to_seq,
                    job.head_seq,
                    job.status.to_string(),
                    job.attempts,
                    job.last_error,
                    format_ts(&job.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

/// Count jobs per status, for the `jobs` CLI summary.
pub async fn count_by_status(db: &Database) -> Result<Vec<(JobStatus, u64)>, FerryError> {
    let jobs = list_jobs(db).await?;
    Ok(JobStatus::ALL
        .iter()
        .map(|s| (*s, jobs.iter().filter(|j| j.status == *s).count() as u64))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn upsert_replaces_existing_row() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("jobs.db").to_str().unwrap())
            .await
            .unwrap();

        let mut job = BackfillJob::open_ended(ChannelId(3), 0);
        upsert_job(&db, &job).await.unwrap();

        job.from_seq = 100;
        job.head_seq = Some(250);
        job.attempts = 2;
        job.last_error = Some("transient upstream error: reset".into());
        job.transition(JobStatus::PausedFloodWait);
        upsert_job(&db, &job).await.unwrap();

        let jobs = list_jobs(&db).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].status, JobStatus::PausedFloodWait);
        assert_eq!(jobs[0].from_seq, 100);
        assert_eq!(jobs[0].head_seq, Some(250));
        assert_eq!(jobs[0].to_seq, None);
        assert_eq!(jobs[0].attempts, 2);
    }

    #[tokio::test]
    async fn bounded_jobs_keep_upper_bound() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("jobs.db").to_str().unwrap())
            .await
            .unwrap();

        upsert_job(&db, &BackfillJob::bounded(ChannelId(1), 100, 150))
            .await
            .unwrap();
        let mut done = BackfillJob::open_ended(ChannelId(2), 0);
        done.transition(JobStatus::Completed);
        upsert_job(&db, &done).await.unwrap();

        let jobs = list_jobs(&db).await.unwrap();
        let bounded = jobs.iter().find(|j| j.channel_id == ChannelId(1)).unwrap();
        assert_eq!(bounded.to_seq, Some(150));

        let counts = count_by_status(&db).await.unwrap();
        assert!(counts.contains(&(JobStatus::Pending, 1)));
        assert!(counts.contains(&(JobStatus::Completed, 1)));
        assert!(counts.contains(&(JobStatus::Failed, 0)));
    }
}

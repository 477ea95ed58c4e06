// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persisted upstream session. The table holds at most one row.

use ferry_core::{FerryError, Session};
use rusqlite::{OptionalExtension, params};
use secrecy::{ExposeSecret, SecretString};

use crate::database::{Database, map_tr_err};
use crate::models::{format_ts, parse_ts};

pub async fn load_session(db: &Database) -> Result<Option<Session>, FerryError> {
    db.connection()
        .call(|conn| -> Result<Option<Session>, rusqlite::Error> {
            conn.query_row(
                "SELECT identity, blob, user_id, renewed_at FROM upstream_session WHERE id = 1",
                [],
                |row| {
                    let blob: String = row.get(1)?;
                    let renewed_at: String = row.get(3)?;
                    Ok(Session {
                        identity: row.get(0)?,
                        blob: SecretString::from(blob),
                        user_id: row.get(2)?,
                        renewed_at: parse_ts(3, &renewed_at)?,
                    })
                },
            )
            .optional()
        })
        .await
        .map_err(map_tr_err)
}

pub async fn save_session(db: &Database, session: &Session) -> Result<(), FerryError> {
    let identity = session.identity.clone();
    let blob = session.blob.expose_secret().to_string();
    let user_id = session.user_id;
    let renewed_at = format_ts(&session.renewed_at);
    db.connection()
        .call(move |conn| -> Result<(), rusqlite::Error> {
            conn.execute(
                "INSERT INTO upstream_session (id, identity, blob, user_id, renewed_at)
                 VALUES (1, ?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET
                    identity = excluded.identity,
                    blob = excluded.blob,
                    user_id = excluded.user_id,
                    renewed_at = excluded.renewed_at",
                params![identity, blob, user_id, renewed_at],
            )?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

pub async fn clear_session(db: &Database) -> Result<(), FerryError> {
    db.connection()
        .call(|conn| -> Result<(), rusqlite::Error> {
            conn.execute("DELETE FROM upstream_session", [])?;
            Ok(())
        })
        .await
        .map_err(map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn save_load_clear() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("s.db").to_str().unwrap())
            .await
            .unwrap();
        assert!(load_session(&db).await.unwrap().is_none());

        let mut session = Session::new("+15550100", SecretString::from("blob-1"));
        session.user_id = Some(42);
        save_session(&db, &session).await.unwrap();

        let replaced = Session::new("+15550100", SecretString::from("blob-2"));
        save_session(&db, &replaced).await.unwrap();

        let loaded = load_session(&db).await.unwrap().unwrap();
        assert_eq!(loaded.identity, "+15550100");
        assert_eq!(loaded.blob.expose_secret(), "blob-2");
        assert_eq!(loaded.user_id, None);

        clear_session(&db).await.unwrap();
        assert!(load_session(&db).await.unwrap().is_none());
    }
}

//! Event Log: ordered movement events per session.
//!
//! Every mutation rewrites the owning session's `kick_count` inside the same
//! transaction, so the cached count never disagrees with the log.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_datetime, parse_source, to_u32},
    models::{KickEvent, KickSource},
};

use super::sessions::require_session;

fn row_to_kick(row: &Row) -> Result<KickEvent> {
    let occurred_at: String = row.get("occurred_at")?;
    let ordinal: i64 = row.get("ordinal")?;
    let source: String = row.get("source")?;

    Ok(KickEvent {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        occurred_at: parse_datetime(&occurred_at, "occurred_at")?,
        ordinal: to_u32(ordinal, "ordinal")?,
        source: parse_source(&source)?,
    })
}

fn list_kicks_in(conn: &Connection, session_id: &str) -> Result<Vec<KickEvent>> {
    let mut stmt = conn.prepare(
        "SELECT id, session_id, occurred_at, ordinal, source
         FROM kick_events
         WHERE session_id = ?1
         ORDER BY ordinal ASC",
    )?;

    let mut rows = stmt.query(params![session_id])?;
    let mut kicks = Vec::new();
    while let Some(row) = rows.next()? {
        kicks.push(row_to_kick(row)?);
    }
    Ok(kicks)
}

fn count_kicks_in(conn: &Connection, session_id: &str) -> Result<u32> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM kick_events WHERE session_id = ?1",
        params![session_id],
        |row| row.get(0),
    )?;
    to_u32(count, "kick count")
}

/// Recomputes the cached count from the log and stores it on the session.
fn sync_kick_count_in(conn: &Connection, session_id: &str) -> Result<u32> {
    let count = count_kicks_in(conn, session_id)?;
    conn.execute(
        "UPDATE sessions SET kick_count = ?1 WHERE id = ?2",
        params![count, session_id],
    )
    .with_context(|| format!("failed to update kick_count for session {session_id}"))?;
    Ok(count)
}

pub(crate) fn delete_kicks_in(conn: &Connection, session_id: &str) -> Result<usize> {
    conn.execute(
        "DELETE FROM kick_events WHERE session_id = ?1",
        params![session_id],
    )
    .with_context(|| format!("failed to delete kick events for session {session_id}"))
}

impl Database {
    /// Appends one event with `ordinal = max(existing) + 1`.
    pub async fn append_kick(
        &self,
        session_id: &str,
        source: KickSource,
        occurred_at: DateTime<Utc>,
    ) -> Result<KickEvent> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            require_session(&tx, &session_id)?;

            let max_ordinal: i64 = tx.query_row(
                "SELECT COALESCE(MAX(ordinal), 0) FROM kick_events WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )?;

            let kick = KickEvent {
                id: Uuid::new_v4().to_string(),
                session_id: session_id.clone(),
                occurred_at,
                ordinal: to_u32(max_ordinal + 1, "ordinal")?,
                source,
            };

            tx.execute(
                "INSERT INTO kick_events (id, session_id, occurred_at, ordinal, source)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    kick.id,
                    kick.session_id,
                    format_datetime(&kick.occurred_at),
                    kick.ordinal,
                    kick.source.as_str(),
                ],
            )
            .with_context(|| "failed to insert kick event")?;

            let total = sync_kick_count_in(&tx, &session_id)?;
            tx.commit()?;

            debug!(
                "Recorded kick #{} for session {} ({} total)",
                kick.ordinal, session_id, total
            );
            Ok(kick)
        })
        .await
    }

    pub async fn list_kicks(&self, session_id: &str) -> Result<Vec<KickEvent>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| list_kicks_in(conn, &session_id)).await
    }

    /// Removes the highest-ordinal event. `None` when the log was already empty.
    pub async fn remove_last_kick(&self, session_id: &str) -> Result<Option<KickEvent>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            require_session(&tx, &session_id)?;

            let last = {
                let mut stmt = tx.prepare(
                    "SELECT id, session_id, occurred_at, ordinal, source
                     FROM kick_events
                     WHERE session_id = ?1
                     ORDER BY ordinal DESC
                     LIMIT 1",
                )?;
                let mut rows = stmt.query(params![session_id])?;
                let last = match rows.next()? {
                    Some(row) => Some(row_to_kick(row)?),
                    None => None,
                };
                last
            };

            let Some(kick) = last else {
                sync_kick_count_in(&tx, &session_id)?;
                tx.commit()?;
                return Ok(None);
            };

            tx.execute("DELETE FROM kick_events WHERE id = ?1", params![kick.id])
                .with_context(|| "failed to delete kick event")?;
            let total = sync_kick_count_in(&tx, &session_id)?;
            tx.commit()?;

            debug!(
                "Removed kick #{} from session {} ({} left)",
                kick.ordinal, session_id, total
            );
            Ok(Some(kick))
        })
        .await
    }

    pub async fn count_kicks(&self, session_id: &str) -> Result<u32> {
        let session_id = session_id.to_string();
        self.execute(move |conn| count_kicks_in(conn, &session_id)).await
    }

    pub async fn delete_kicks_for_session(&self, session_id: &str) -> Result<usize> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let removed = delete_kicks_in(&tx, &session_id)?;
            sync_kick_count_in(&tx, &session_id)?;
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    /// Rewrites the session's cached `kick_count` from the log.
    pub async fn resync_kick_count(&self, session_id: &str) -> Result<u32> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            require_session(conn, &session_id)?;
            sync_kick_count_in(conn, &session_id)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::Session;
    use crate::error::SessionError;
    use chrono::Duration;

    async fn setup() -> (Database, DateTime<Utc>) {
        let db = Database::in_memory().unwrap();
        let now = Utc::now();
        db.insert_session(&Session::new("s1".into(), now, 10, 7200, "UTC".into()))
            .await
            .unwrap();
        (db, now)
    }

    async fn cached_count(db: &Database) -> u32 {
        db.get_session("s1").await.unwrap().unwrap().kick_count
    }

    #[tokio::test]
    async fn append_assigns_gapless_ordinals_and_updates_count() {
        let (db, now) = setup().await;
        for i in 0..3 {
            db.append_kick("s1", KickSource::Tap, now + Duration::seconds(i))
                .await
                .unwrap();
        }

        let kicks = db.list_kicks("s1").await.unwrap();
        let ordinals = kicks.iter().map(|k| k.ordinal).collect::<Vec<_>>();
        assert_eq!(ordinals, vec![1, 2, 3]);
        assert_eq!(db.count_kicks("s1").await.unwrap(), 3);
        assert_eq!(cached_count(&db).await, 3);
    }

    #[tokio::test]
    async fn append_to_unknown_session_is_not_found() {
        let (db, now) = setup().await;
        let err = db
            .append_kick("ghost", KickSource::Tap, now)
            .await
            .unwrap_err();
        assert!(SessionError::from(err).is_not_found());
        assert_eq!(db.count_kicks("ghost").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn remove_last_takes_the_tail_and_reuses_max_plus_one() {
        let (db, now) = setup().await;
        for i in 0..3 {
            db.append_kick("s1", KickSource::Tap, now + Duration::seconds(i))
                .await
                .unwrap();
        }

        let removed = db.remove_last_kick("s1").await.unwrap().unwrap();
        assert_eq!(removed.ordinal, 3);
        assert_eq!(cached_count(&db).await, 2);

        let next = db
            .append_kick("s1", KickSource::ManualEdit, now + Duration::seconds(10))
            .await
            .unwrap();
        assert_eq!(next.ordinal, 3);
        assert_eq!(next.source, KickSource::ManualEdit);
        assert_eq!(db.count_kicks("s1").await.unwrap(), 3);
        assert_eq!(cached_count(&db).await, 3);
    }

    #[tokio::test]
    async fn ordinal_follows_max_not_count() {
        let (db, now) = setup().await;
        db.execute(move |conn| {
            conn.execute(
                "INSERT INTO kick_events (id, session_id, occurred_at, ordinal, source)
                 VALUES ('skewed', 's1', ?1, 5, 'manual_edit')",
                params![format_datetime(&now)],
            )?;
            Ok(())
        })
        .await
        .unwrap();

        let kick = db.append_kick("s1", KickSource::Tap, now).await.unwrap();
        assert_eq!(kick.ordinal, 6);
        assert_eq!(cached_count(&db).await, 2);
    }

    #[tokio::test]
    async fn remove_last_on_empty_log_is_a_no_op() {
        let (db, _) = setup().await;
        assert!(db.remove_last_kick("s1").await.unwrap().is_none());
        assert!(db.remove_last_kick("s1").await.unwrap().is_none());
        assert_eq!(cached_count(&db).await, 0);
        assert!(db.list_kicks("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resync_repairs_a_stale_cached_count() {
        let (db, now) = setup().await;
        db.append_kick("s1", KickSource::Tap, now).await.unwrap();
        db.execute(|conn| {
            conn.execute("UPDATE sessions SET kick_count = 9 WHERE id = 's1'", [])?;
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(db.resync_kick_count("s1").await.unwrap(), 1);
        assert_eq!(cached_count(&db).await, 1);
    }

    #[tokio::test]
    async fn deleting_a_session_removes_its_events() {
        let (db, now) = setup().await;
        db.insert_session(&Session::new("s2".into(), now, 10, 7200, "UTC".into()))
            .await
            .unwrap();
        for session_id in ["s1", "s1", "s2"] {
            db.append_kick(session_id, KickSource::Tap, now).await.unwrap();
        }

        db.delete_session("s1").await.unwrap();

        assert!(db.get_session("s1").await.unwrap().is_none());
        assert_eq!(db.count_kicks("s1").await.unwrap(), 0);
        assert_eq!(db.count_kicks("s2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn delete_all_for_session_resets_count() {
        let (db, now) = setup().await;
        db.append_kick("s1", KickSource::Tap, now).await.unwrap();
        db.append_kick("s1", KickSource::Tap, now).await.unwrap();

        assert_eq!(db.delete_kicks_for_session("s1").await.unwrap(), 2);
        assert_eq!(cached_count(&db).await, 0);
    }
}

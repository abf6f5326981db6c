//! Session Store: persistence of session records.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{
        format_datetime, format_optional_datetime, parse_datetime, parse_optional_datetime,
        parse_status, to_u32,
    },
    models::{Session, SessionPatch},
};
use crate::error::SessionError;

use super::kick_events::delete_kicks_in;

const SESSION_COLUMNS: &str = "id, created_at, started_at, ended_at, status, target_count, \
     time_limit_sec, kick_count, duration_sec, strength_rating, notes, timezone, \
     schema_version, paused_duration_sec, paused_at";

fn row_to_session(row: &Row) -> Result<Session> {
    let created_at: String = row.get("created_at")?;
    let started_at: Option<String> = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let status: String = row.get("status")?;
    let target_count: i64 = row.get("target_count")?;
    let time_limit_sec: i64 = row.get("time_limit_sec")?;
    let kick_count: i64 = row.get("kick_count")?;
    let strength_rating: Option<i64> = row.get("strength_rating")?;
    let schema_version: i64 = row.get("schema_version")?;
    let paused_at: Option<String> = row.get("paused_at")?;

    Ok(Session {
        id: row.get("id")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        started_at: parse_optional_datetime(started_at, "started_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
        status: parse_status(&status)?,
        target_count: to_u32(target_count, "target_count")?,
        time_limit_sec: to_u32(time_limit_sec, "time_limit_sec")?,
        kick_count: to_u32(kick_count, "kick_count")?,
        duration_sec: row.get("duration_sec")?,
        strength_rating: strength_rating
            .map(|rating| u8::try_from(rating))
            .transpose()
            .context("strength_rating out of range")?,
        notes: row.get("notes")?,
        timezone: row.get("timezone")?,
        schema_version: to_u32(schema_version, "schema_version")?,
        paused_duration_sec: row.get("paused_duration_sec")?,
        paused_at: parse_optional_datetime(paused_at, "paused_at")?,
    })
}

fn query_sessions(
    conn: &Connection,
    sql: &str,
    args: impl rusqlite::Params,
) -> Result<Vec<Session>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(args)?;
    let mut sessions = Vec::new();
    while let Some(row) = rows.next()? {
        sessions.push(row_to_session(row)?);
    }
    Ok(sessions)
}

fn text_value(value: Option<String>) -> Value {
    value.map(Value::Text).unwrap_or(Value::Null)
}

fn datetime_value(value: Option<&DateTime<Utc>>) -> Value {
    text_value(format_optional_datetime(value))
}

/// Loads a session inside an open connection or transaction.
pub(crate) fn load_session(conn: &Connection, session_id: &str) -> Result<Option<Session>> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![session_id])?;
    let session = match rows.next()? {
        Some(row) => Some(row_to_session(row)?),
        None => None,
    };
    Ok(session)
}

pub(crate) fn require_session(conn: &Connection, session_id: &str) -> Result<Session> {
    load_session(conn, session_id)?
        .ok_or_else(|| SessionError::not_found(session_id).into())
}

/// Writes only the columns named by `patch`. Returns the affected row count.
pub(crate) fn apply_patch(conn: &Connection, session_id: &str, patch: &SessionPatch) -> Result<usize> {
    let mut assignments: Vec<(&'static str, Value)> = Vec::new();

    if let Some(status) = patch.status {
        assignments.push(("status", Value::Text(status.as_str().to_string())));
    }
    if let Some(started_at) = &patch.started_at {
        assignments.push(("started_at", datetime_value(started_at.as_ref())));
    }
    if let Some(ended_at) = &patch.ended_at {
        assignments.push(("ended_at", datetime_value(ended_at.as_ref())));
    }
    if let Some(kick_count) = patch.kick_count {
        assignments.push(("kick_count", Value::Integer(i64::from(kick_count))));
    }
    if let Some(duration_sec) = patch.duration_sec {
        assignments.push(("duration_sec", duration_sec.map(Value::Real).unwrap_or(Value::Null)));
    }
    if let Some(rating) = patch.strength_rating {
        assignments.push((
            "strength_rating",
            rating.map(|r| Value::Integer(i64::from(r))).unwrap_or(Value::Null),
        ));
    }
    if let Some(notes) = &patch.notes {
        assignments.push(("notes", text_value(notes.clone())));
    }
    if let Some(paused_duration_sec) = patch.paused_duration_sec {
        assignments.push(("paused_duration_sec", Value::Real(paused_duration_sec)));
    }
    if let Some(paused_at) = &patch.paused_at {
        assignments.push(("paused_at", datetime_value(paused_at.as_ref())));
    }

    if assignments.is_empty() {
        let exists: Option<i64> = conn
            .query_row("SELECT 1 FROM sessions WHERE id = ?1", params![session_id], |row| {
                row.get(0)
            })
            .optional()?;
        return Ok(exists.map_or(0, |_| 1));
    }

    let set_clause = assignments
        .iter()
        .enumerate()
        .map(|(index, (column, _))| format!("{column} = ?{}", index + 1))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE sessions SET {set_clause} WHERE id = ?{}",
        assignments.len() + 1
    );

    let mut values: Vec<Value> = assignments.into_iter().map(|(_, value)| value).collect();
    values.push(Value::Text(session_id.to_string()));

    conn.execute(&sql, params_from_iter(values))
        .with_context(|| format!("failed to update session {session_id}"))
}

/// The single active or paused session, if any.
pub(crate) fn current_session(conn: &Connection) -> Result<Option<Session>> {
    let sql = format!(
        "SELECT {SESSION_COLUMNS} FROM sessions
         WHERE status IN ('active', 'paused')
         ORDER BY created_at DESC"
    );
    let mut sessions = query_sessions(conn, &sql, [])?;
    if sessions.len() > 1 {
        let ids = sessions
            .iter()
            .map(|session| session.id.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        return Err(SessionError::Corrupted(format!(
            "{} sessions are active or paused: {ids}",
            sessions.len()
        ))
        .into());
    }
    Ok(sessions.pop())
}

impl Database {
    pub async fn insert_session(&self, session: &Session) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, created_at, started_at, ended_at, status, target_count,
                     time_limit_sec, kick_count, duration_sec, strength_rating, notes, timezone,
                     schema_version, paused_duration_sec, paused_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                params![
                    record.id,
                    format_datetime(&record.created_at),
                    format_optional_datetime(record.started_at.as_ref()),
                    format_optional_datetime(record.ended_at.as_ref()),
                    record.status.as_str(),
                    record.target_count,
                    record.time_limit_sec,
                    record.kick_count,
                    record.duration_sec,
                    record.strength_rating,
                    record.notes,
                    record.timezone,
                    record.schema_version,
                    record.paused_duration_sec,
                    format_optional_datetime(record.paused_at.as_ref()),
                ],
            )
            .with_context(|| "failed to insert session")?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| load_session(conn, &session_id)).await
    }

    /// Merges `patch` into the stored row. Fails with `NotFound` for unknown ids.
    pub async fn update_session(&self, session_id: &str, patch: SessionPatch) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let rows_affected = apply_patch(conn, &session_id, &patch)?;
            if rows_affected == 0 {
                return Err(SessionError::not_found(session_id).into());
            }
            Ok(())
        })
        .await
    }

    /// Deletes a session together with every kick event it owns.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            delete_kicks_in(&tx, &session_id)?;
            let rows_affected =
                tx.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
            if rows_affected == 0 {
                return Err(SessionError::not_found(session_id).into());
            }

            tx.commit()?;
            Ok(())
        })
        .await
    }

    /// Fails with `Corrupted` when more than one session is active or paused.
    pub async fn find_active_or_paused(&self) -> Result<Option<Session>> {
        self.execute(|conn| current_session(conn)).await
    }

    /// Sessions created within `[start, end]`, oldest first.
    pub async fn find_by_created_date_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Session>> {
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE created_at BETWEEN ?1 AND ?2
                 ORDER BY created_at ASC"
            );
            query_sessions(
                conn,
                &sql,
                params![format_datetime(&start), format_datetime(&end)],
            )
        })
        .await
    }

    /// Every session, most recently created first.
    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.execute(|conn| {
            let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at DESC");
            query_sessions(conn, &sql, [])
        })
        .await
    }

    /// Finished sessions that were actually started, ordered by `started_at`.
    pub async fn list_exportable_sessions(&self) -> Result<Vec<Session>> {
        self.execute(|conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE status IN ('complete', 'timeout', 'ended_early')
                   AND started_at IS NOT NULL
                 ORDER BY started_at ASC"
            );
            query_sessions(conn, &sql, [])
        })
        .await
    }
}

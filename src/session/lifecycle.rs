//! Persisted session transitions.
//!
//! Each transition reads the stored session, validates it through
//! [`state::apply`](super::state::apply) and writes the result inside one
//! database task, so a stale caller always sees the current status and fails
//! with `InvalidTransition` instead of overwriting it.

use chrono::{DateTime, Utc};
use log::info;
use uuid::Uuid;

use crate::db::{
    models::{Session, SessionPatch, UserPreferences},
    repositories::sessions::{apply_patch, current_session, require_session},
    Database,
};

use crate::error::{SessionError, SessionResult};
use super::state::{self, Transition};

/// Creates and stores an `idle` session using the current preference defaults.
pub async fn create_session(
    db: &Database,
    prefs: &UserPreferences,
    timezone: String,
    at: DateTime<Utc>,
) -> SessionResult<Session> {
    if prefs.default_target_count == 0 || prefs.default_time_limit_sec == 0 {
        return Err(SessionError::InvalidInput(
            "target count and time limit must be positive".into(),
        ));
    }

    let session = Session::new(
        Uuid::new_v4().to_string(),
        at,
        prefs.default_target_count,
        prefs.default_time_limit_sec,
        timezone,
    );
    db.insert_session(&session).await?;

    info!(
        "Created session {} (target {}, limit {}s)",
        session.id, session.target_count, session.time_limit_sec
    );
    Ok(session)
}

pub async fn transition(
    db: &Database,
    session_id: &str,
    transition: Transition,
    at: DateTime<Utc>,
) -> SessionResult<Session> {
    let session_id = session_id.to_string();
    let next = db
        .execute(move |conn| {
            let tx = conn.transaction()?;
            let session = require_session(&tx, &session_id)?;

            if matches!(transition, Transition::Start | Transition::Resume) {
                if let Some(current) = current_session(&tx)? {
                    if current.id != session.id {
                        return Err(SessionError::AnotherSessionInProgress { id: current.id }.into());
                    }
                }
            }

            let next = state::apply(&session, transition, at)?;
            apply_patch(&tx, &session_id, &SessionPatch::lifecycle(&next))?;
            tx.commit()?;

            info!(
                "Session {}: {} -> {} ({})",
                next.id, session.status, next.status, transition
            );
            Ok(next)
        })
        .await?;
    Ok(next)
}

pub async fn start_session(db: &Database, session_id: &str, at: DateTime<Utc>) -> SessionResult<Session> {
    transition(db, session_id, Transition::Start, at).await
}

pub async fn pause_session(db: &Database, session_id: &str, at: DateTime<Utc>) -> SessionResult<Session> {
    transition(db, session_id, Transition::Pause, at).await
}

pub async fn resume_session(db: &Database, session_id: &str, at: DateTime<Utc>) -> SessionResult<Session> {
    transition(db, session_id, Transition::Resume, at).await
}

pub async fn complete_session(db: &Database, session_id: &str, at: DateTime<Utc>) -> SessionResult<Session> {
    transition(db, session_id, Transition::Complete, at).await
}

pub async fn timeout_session(db: &Database, session_id: &str, at: DateTime<Utc>) -> SessionResult<Session> {
    transition(db, session_id, Transition::Timeout, at).await
}

pub async fn end_session_early(db: &Database, session_id: &str, at: DateTime<Utc>) -> SessionResult<Session> {
    transition(db, session_id, Transition::EndEarly, at).await
}

/// True when the stored session is active and its event log has reached the
/// target.
pub async fn check_auto_complete(db: &Database, session_id: &str) -> SessionResult<bool> {
    let session = db
        .get_session(session_id)
        .await?
        .ok_or_else(|| SessionError::not_found(session_id))?;
    let count = db.count_kicks(session_id).await?;
    Ok(state::should_auto_complete(&session, count))
}

/// Updates the post-hoc rating and notes; allowed in any status.
pub async fn save_details(
    db: &Database,
    session_id: &str,
    strength_rating: Option<u8>,
    notes: Option<String>,
) -> SessionResult<SessionPatch> {
    if let Some(rating) = strength_rating {
        if !(1..=5).contains(&rating) {
            return Err(SessionError::InvalidInput(format!(
                "strength rating must be between 1 and 5, got {rating}"
            )));
        }
    }
    let notes = notes.filter(|text| !text.trim().is_empty());

    let patch = SessionPatch::details(strength_rating, notes);
    db.update_session(session_id, patch.clone()).await?;
    Ok(patch)
}

//! Session data models.
//!
//! A session is one attempt at counting `target_count` movements within
//! `time_limit_sec` seconds of active (non-paused) time.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_TARGET_COUNT: u32 = 10;
pub const DEFAULT_TIME_LIMIT_SEC: u32 = 7200;
pub const SESSION_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Active,
    Paused,
    Complete,
    Timeout,
    EndedEarly,
}

impl SessionStatus {
    pub const ALL: [SessionStatus; 6] = [
        SessionStatus::Idle,
        SessionStatus::Active,
        SessionStatus::Paused,
        SessionStatus::Complete,
        SessionStatus::Timeout,
        SessionStatus::EndedEarly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
            SessionStatus::Complete => "complete",
            SessionStatus::Timeout => "timeout",
            SessionStatus::EndedEarly => "ended_early",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == value)
    }

    /// Terminal statuses have no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Complete | SessionStatus::Timeout | SessionStatus::EndedEarly
        )
    }

    /// At most one session may be in one of these statuses at a time.
    pub fn is_current(&self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::Paused)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event and the statuses it connects.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Start,
    Pause,
    Resume,
    Complete,
    Timeout,
    EndEarly,
}

impl Transition {
    pub const ALL: [Transition; 6] = [
        Transition::Start,
        Transition::Pause,
        Transition::Resume,
        Transition::Complete,
        Transition::Timeout,
        Transition::EndEarly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Pause => "pause",
            Transition::Resume => "resume",
            Transition::Complete => "complete",
            Transition::Timeout => "timeout",
            Transition::EndEarly => "end",
        }
    }

    /// Statuses this transition may leave from.
    pub fn sources(&self) -> &'static [SessionStatus] {
        match self {
            Transition::Start => &[SessionStatus::Idle],
            Transition::Pause | Transition::Complete | Transition::Timeout => {
                &[SessionStatus::Active]
            }
            Transition::Resume => &[SessionStatus::Paused],
            Transition::EndEarly => &[SessionStatus::Active, SessionStatus::Paused],
        }
    }

    pub fn target(&self) -> SessionStatus {
        match self {
            Transition::Start | Transition::Resume => SessionStatus::Active,
            Transition::Pause => SessionStatus::Paused,
            Transition::Complete => SessionStatus::Complete,
            Transition::Timeout => SessionStatus::Timeout,
            Transition::EndEarly => SessionStatus::EndedEarly,
        }
    }

    pub fn allowed_from(&self, status: SessionStatus) -> bool {
        self.sources().contains(&status)
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub target_count: u32,
    pub time_limit_sec: u32,
    /// Cached count of kick events; kept equal to the event log by every
    /// event mutation.
    pub kick_count: u32,
    pub duration_sec: Option<f64>,
    pub strength_rating: Option<u8>,
    pub notes: Option<String>,
    pub timezone: String,
    pub schema_version: u32,
    pub paused_duration_sec: f64,
    pub paused_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Builds a fresh `idle` session. Nothing is persisted.
    pub fn new(
        id: String,
        created_at: DateTime<Utc>,
        target_count: u32,
        time_limit_sec: u32,
        timezone: String,
    ) -> Self {
        Self {
            id,
            created_at,
            started_at: None,
            ended_at: None,
            status: SessionStatus::Idle,
            target_count,
            time_limit_sec,
            kick_count: 0,
            duration_sec: None,
            strength_rating: None,
            notes: None,
            timezone,
            schema_version: SESSION_SCHEMA_VERSION,
            paused_duration_sec: 0.0,
            paused_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Field-level update for a session row.
///
/// `None` leaves a column untouched. Nullable columns use a nested option so
/// that `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionPatch {
    pub status: Option<SessionStatus>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub ended_at: Option<Option<DateTime<Utc>>>,
    pub kick_count: Option<u32>,
    pub duration_sec: Option<Option<f64>>,
    pub strength_rating: Option<Option<u8>>,
    pub notes: Option<Option<String>>,
    pub paused_duration_sec: Option<f64>,
    pub paused_at: Option<Option<DateTime<Utc>>>,
}

impl SessionPatch {
    /// Patch carrying every lifecycle column of `session`. Kick count and the
    /// post-hoc details are left alone.
    pub fn lifecycle(session: &Session) -> Self {
        Self {
            status: Some(session.status),
            started_at: Some(session.started_at),
            ended_at: Some(session.ended_at),
            duration_sec: Some(session.duration_sec),
            paused_duration_sec: Some(session.paused_duration_sec),
            paused_at: Some(session.paused_at),
            ..Self::default()
        }
    }

    pub fn details(strength_rating: Option<u8>, notes: Option<String>) -> Self {
        Self {
            strength_rating: Some(strength_rating),
            notes: Some(notes),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies the patch to an in-memory copy.
    pub fn apply_to(&self, session: &mut Session) {
        if let Some(status) = self.status {
            session.status = status;
        }
        if let Some(started_at) = self.started_at {
            session.started_at = started_at;
        }
        if let Some(ended_at) = self.ended_at {
            session.ended_at = ended_at;
        }
        if let Some(kick_count) = self.kick_count {
            session.kick_count = kick_count;
        }
        if let Some(duration_sec) = self.duration_sec {
            session.duration_sec = duration_sec;
        }
        if let Some(strength_rating) = self.strength_rating {
            session.strength_rating = strength_rating;
        }
        if let Some(notes) = &self.notes {
            session.notes = notes.clone();
        }
        if let Some(paused_duration_sec) = self.paused_duration_sec {
            session.paused_duration_sec = paused_duration_sec;
        }
        if let Some(paused_at) = self.paused_at {
            session.paused_at = paused_at;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in SessionStatus::ALL {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("running"), None);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&SessionStatus::EndedEarly).unwrap();
        assert_eq!(json, "\"ended_early\"");
    }

    #[test]
    fn patch_only_touches_named_fields() {
        let mut session = Session::new("s1".into(), Utc::now(), 10, 7200, "UTC".into());
        session.kick_count = 4;

        let patch = SessionPatch::details(Some(3), Some("strong".into()));
        patch.apply_to(&mut session);

        assert_eq!(session.strength_rating, Some(3));
        assert_eq!(session.notes.as_deref(), Some("strong"));
        assert_eq!(session.kick_count, 4);
        assert_eq!(session.status, SessionStatus::Idle);
        assert!(SessionPatch::default().is_empty());
        assert!(!patch.is_empty());
    }
}

use thiserror::Error;

use crate::db::models::{SessionStatus, Transition};

/// Errors surfaced by the session core.
///
/// Storage code returns `anyhow::Error`; a `SessionError` raised inside a
/// database task travels inside it and is recovered by the `From` impl below.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session not found: {id}")]
    NotFound { id: String },

    #[error("cannot {transition} session in status: {status}")]
    InvalidTransition {
        transition: Transition,
        status: SessionStatus,
    },

    #[error("another session is already in progress: {id}")]
    AnotherSessionInProgress { id: String },

    #[error("session store is corrupted: {0}")]
    Corrupted(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

impl SessionError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn invalid_transition(transition: Transition, status: SessionStatus) -> Self {
        Self::InvalidTransition { transition, status }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }
}

impl From<anyhow::Error> for SessionError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<SessionError>() {
            Ok(session_err) => session_err,
            Err(other) => SessionError::Storage(other),
        }
    }
}

pub type SessionResult<T> = std::result::Result<T, SessionError>;

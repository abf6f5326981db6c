//! Data behind the session export: finished sessions with their kicks.
//!
//! Formatting (CSV, locale dates) belongs to whoever renders the report.

use anyhow::Result;
use serde::Serialize;

use crate::db::{
    models::{kick_intervals, KickEvent, Session},
    Database,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionReport {
    pub session: Session,
    pub kicks: Vec<KickEvent>,
    /// Seconds between consecutive kicks.
    pub intervals_sec: Vec<f64>,
}

/// Every terminal session that actually started, oldest first.
pub async fn collect(db: &Database) -> Result<Vec<SessionReport>> {
    let sessions = db.list_exportable_sessions().await?;

    let mut reports = Vec::with_capacity(sessions.len());
    for session in sessions {
        let kicks = db.list_kicks(&session.id).await?;
        let intervals_sec = kick_intervals(&kicks);
        reports.push(SessionReport {
            session,
            kicks,
            intervals_sec,
        });
    }
    Ok(reports)
}

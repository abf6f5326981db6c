use anyhow::{Context, Result};
use chrono::Utc;
use log::warn;
use rusqlite::{params, OptionalExtension};

use crate::db::{connection::Database, helpers::format_datetime, models::UserPreferences};

/// The preferences table holds a single row under this id.
pub const PREFERENCES_ID: &str = "user_prefs";

impl Database {
    /// Stored preferences merged over defaults. A missing or unreadable
    /// document yields the defaults.
    pub async fn get_preferences(&self) -> Result<UserPreferences> {
        self.execute(|conn| {
            let stored: Option<String> = conn
                .query_row(
                    "SELECT data FROM preferences WHERE id = ?1",
                    params![PREFERENCES_ID],
                    |row| row.get(0),
                )
                .optional()?;

            let Some(raw) = stored else {
                return Ok(UserPreferences::default());
            };

            match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(value) => Ok(UserPreferences::from_stored(value)),
                Err(err) => {
                    warn!("Ignoring unreadable preferences document: {err}");
                    Ok(UserPreferences::default())
                }
            }
        })
        .await
    }

    pub async fn put_preferences(&self, prefs: &UserPreferences) -> Result<()> {
        let data = serde_json::to_string(prefs).context("failed to serialize preferences")?;
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO preferences (id, data, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at",
                params![PREFERENCES_ID, data, format_datetime(&Utc::now())],
            )
            .with_context(|| "failed to store preferences")?;
            Ok(())
        })
        .await
    }
}

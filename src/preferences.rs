use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Result};
use log::info;

use crate::db::{
    models::{PreferencesPatch, UserPreferences},
    Database,
};

/// Cached user preferences backed by the preferences table.
///
/// Sessions copy the defaults they need when they are created, so updating
/// preferences never changes an existing session.
pub struct PreferencesStore {
    db: Database,
    data: RwLock<UserPreferences>,
}

impl PreferencesStore {
    pub async fn load(db: Database) -> Result<Self> {
        let data = db.get_preferences().await?;
        Ok(Self {
            db,
            data: RwLock::new(data),
        })
    }

    pub fn get(&self) -> UserPreferences {
        self.read().clone()
    }

    pub async fn update(&self, patch: PreferencesPatch) -> Result<UserPreferences> {
        let mut updated = self.get();
        updated.apply(&patch);
        validate(&updated)?;

        self.db.put_preferences(&updated).await?;
        *self.write() = updated.clone();
        info!("Preferences updated");
        Ok(updated)
    }

    pub async fn reset(&self) -> Result<UserPreferences> {
        let defaults = UserPreferences::default();
        self.db.put_preferences(&defaults).await?;
        *self.write() = defaults.clone();
        info!("Preferences reset to defaults");
        Ok(defaults)
    }

    /// Re-reads the stored document, e.g. after another process changed it.
    pub async fn reload(&self) -> Result<UserPreferences> {
        let data = self.db.get_preferences().await?;
        *self.write() = data.clone();
        Ok(data)
    }

    fn read(&self) -> RwLockReadGuard<'_, UserPreferences> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, UserPreferences> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn validate(prefs: &UserPreferences) -> Result<()> {
    if prefs.default_target_count == 0 {
        bail!("default target count must be greater than zero");
    }
    if prefs.default_time_limit_sec == 0 {
        bail!("default time limit must be greater than zero");
    }
    Ok(())
}

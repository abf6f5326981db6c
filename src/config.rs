use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};

use crate::session::ControllerConfig;

pub const DATA_DIR_ENV: &str = "BABYBEAT_DATA_DIR";
pub const DEBUG_ENV: &str = "BABYBEAT_DEBUG";
pub const POLL_INTERVAL_ENV: &str = "BABYBEAT_POLL_MS";

const DATABASE_FILE: &str = "babybeat.sqlite3";
const APP_DIR: &str = "babybeat";

/// Process-level settings. Session defaults are user preferences and live in
/// the database instead.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub debug: bool,
    pub poll_interval: Duration,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = match lookup(DATA_DIR_ENV).filter(|dir| !dir.trim().is_empty()) {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir(),
        };

        let debug = lookup(DEBUG_ENV)
            .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let poll_interval = match lookup(POLL_INTERVAL_ENV) {
            Some(raw) => {
                let millis: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("{POLL_INTERVAL_ENV} must be milliseconds, got {raw:?}"))?;
                Duration::from_millis(millis.max(1))
            }
            None => ControllerConfig::default().poll_interval,
        };

        Ok(Self {
            data_dir,
            debug,
            poll_interval,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            poll_interval: self.poll_interval,
        }
    }

    pub fn log_level(&self) -> log::LevelFilter {
        if self.debug {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from(".babybeat"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_without_environment() {
        let config = config_from(&[]).unwrap();
        assert!(config.data_dir.ends_with(APP_DIR) || config.data_dir.ends_with(".babybeat"));
        assert!(!config.debug);
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            (DATA_DIR_ENV, "/tmp/bb"),
            (DEBUG_ENV, "true"),
            (POLL_INTERVAL_ENV, "250"),
        ])
        .unwrap();
        assert_eq!(config.database_path(), PathBuf::from("/tmp/bb/babybeat.sqlite3"));
        assert!(config.debug);
        assert_eq!(config.controller_config().poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn rejects_garbage_poll_interval() {
        assert!(config_from(&[(POLL_INTERVAL_ENV, "soon")]).is_err());
    }
}

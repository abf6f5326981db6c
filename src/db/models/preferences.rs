//! User preference models.
//!
//! Stored documents are merged over [`UserPreferences::default`] on read, so
//! fields added later fall back to their defaults and unknown fields are
//! ignored. Fields are merged one at a time, so a single malformed value
//! only loses that value.

use log::warn;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use super::session::{DEFAULT_TARGET_COUNT, DEFAULT_TIME_LIMIT_SEC};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum SoundOption {
    #[default]
    SoftClick,
    Pop,
    Heartbeat,
    Bubble,
    None,
}

impl SoundOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            SoundOption::SoftClick => "soft-click",
            SoundOption::Pop => "pop",
            SoundOption::Heartbeat => "heartbeat",
            SoundOption::Bubble => "bubble",
            SoundOption::None => "none",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        [
            SoundOption::SoftClick,
            SoundOption::Pop,
            SoundOption::Heartbeat,
            SoundOption::Bubble,
            SoundOption::None,
        ]
        .into_iter()
        .find(|option| option.as_str() == value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct UserPreferences {
    pub default_target_count: u32,
    pub default_time_limit_sec: u32,
    pub sound_option: SoundOption,
    pub vibration_enabled: bool,
    pub keep_screen_awake: bool,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            default_target_count: DEFAULT_TARGET_COUNT,
            default_time_limit_sec: DEFAULT_TIME_LIMIT_SEC,
            sound_option: SoundOption::default(),
            vibration_enabled: true,
            keep_screen_awake: true,
        }
    }
}

impl UserPreferences {
    /// Reads a stored document, migrating the legacy `soundEnabled` flag.
    pub fn from_stored(value: Value) -> Self {
        let mut prefs = Self::default();
        let Value::Object(mut map) = value else {
            warn!("Ignoring preferences document that is not an object");
            return prefs;
        };

        if let Some(legacy) = map.remove("soundEnabled") {
            if !map.contains_key("soundOption") {
                let option = match legacy.as_bool() {
                    Some(false) => SoundOption::None,
                    _ => SoundOption::SoftClick,
                };
                map.insert("soundOption".into(), Value::from(option.as_str()));
            }
        }

        merge_field(&map, "defaultTargetCount", &mut prefs.default_target_count);
        merge_field(&map, "defaultTimeLimitSec", &mut prefs.default_time_limit_sec);
        merge_field(&map, "soundOption", &mut prefs.sound_option);
        merge_field(&map, "vibrationEnabled", &mut prefs.vibration_enabled);
        merge_field(&map, "keepScreenAwake", &mut prefs.keep_screen_awake);

        if prefs.default_target_count == 0 {
            warn!("Ignoring stored defaultTargetCount of 0");
            prefs.default_target_count = DEFAULT_TARGET_COUNT;
        }
        if prefs.default_time_limit_sec == 0 {
            warn!("Ignoring stored defaultTimeLimitSec of 0");
            prefs.default_time_limit_sec = DEFAULT_TIME_LIMIT_SEC;
        }
        prefs
    }

    pub fn apply(&mut self, patch: &PreferencesPatch) {
        if let Some(target) = patch.default_target_count {
            self.default_target_count = target;
        }
        if let Some(limit) = patch.default_time_limit_sec {
            self.default_time_limit_sec = limit;
        }
        if let Some(sound) = patch.sound_option {
            self.sound_option = sound;
        }
        if let Some(vibration) = patch.vibration_enabled {
            self.vibration_enabled = vibration;
        }
        if let Some(awake) = patch.keep_screen_awake {
            self.keep_screen_awake = awake;
        }
    }
}

/// Overwrites `slot` with `map[key]` when present and well-formed.
fn merge_field<T: DeserializeOwned>(map: &Map<String, Value>, key: &str, slot: &mut T) {
    let Some(raw) = map.get(key) else {
        return;
    };
    match T::deserialize(raw) {
        Ok(value) => *slot = value,
        Err(err) => warn!("Ignoring stored preference {key}: {err}"),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct PreferencesPatch {
    pub default_target_count: Option<u32>,
    pub default_time_limit_sec: Option<u32>,
    pub sound_option: Option<SoundOption>,
    pub vibration_enabled: Option<bool>,
    pub keep_screen_awake: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let prefs = UserPreferences::from_stored(json!({ "defaultTargetCount": 12 }));
        assert_eq!(prefs.default_target_count, 12);
        assert_eq!(prefs.default_time_limit_sec, DEFAULT_TIME_LIMIT_SEC);
        assert_eq!(prefs.sound_option, SoundOption::SoftClick);
        assert!(prefs.vibration_enabled);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let prefs = UserPreferences::from_stored(json!({ "theme": "serene" }));
        assert_eq!(prefs, UserPreferences::default());
    }

    #[test]
    fn legacy_sound_flag_migrates() {
        let off = UserPreferences::from_stored(json!({ "soundEnabled": false }));
        assert_eq!(off.sound_option, SoundOption::None);

        let on = UserPreferences::from_stored(json!({ "soundEnabled": true }));
        assert_eq!(on.sound_option, SoundOption::SoftClick);
    }

    #[test]
    fn explicit_sound_option_wins_over_legacy_flag() {
        let prefs = UserPreferences::from_stored(json!({
            "soundEnabled": false,
            "soundOption": "bubble"
        }));
        assert_eq!(prefs.sound_option, SoundOption::Bubble);
    }

    #[test]
    fn malformed_field_only_loses_that_field() {
        let prefs = UserPreferences::from_stored(json!({
            "defaultTargetCount": "ten",
            "defaultTimeLimitSec": 3600,
            "soundOption": "trumpet",
            "vibrationEnabled": false
        }));
        assert_eq!(prefs.default_target_count, DEFAULT_TARGET_COUNT);
        assert_eq!(prefs.default_time_limit_sec, 3600);
        assert_eq!(prefs.sound_option, SoundOption::SoftClick);
        assert!(!prefs.vibration_enabled);
        assert!(prefs.keep_screen_awake);
    }

    #[test]
    fn zero_limits_and_non_objects_fall_back() {
        let prefs = UserPreferences::from_stored(json!({
            "defaultTargetCount": 0,
            "defaultTimeLimitSec": 0
        }));
        assert_eq!(prefs, UserPreferences::default());
        assert_eq!(UserPreferences::from_stored(json!([1, 2])), UserPreferences::default());
    }

    #[test]
    fn sound_option_uses_kebab_case() {
        assert_eq!(serde_json::to_string(&SoundOption::SoftClick).unwrap(), "\"soft-click\"");
        assert_eq!(SoundOption::parse("heartbeat"), Some(SoundOption::Heartbeat));
    }
}

use serde::Serialize;
use serde_json::Value;

use crate::{
    db::models::{PreferencesPatch, Session, SoundOption, UserPreferences},
    report::{self, SessionReport},
    session::{SessionController, SessionSnapshot},
    AppState,
};

fn controller_from_state(state: &AppState) -> SessionController {
    state.controller.clone()
}

pub async fn get_session_state(state: &AppState) -> Result<SessionSnapshot, String> {
    let controller = controller_from_state(state);
    Ok(controller.snapshot().await)
}

pub async fn register_kick(state: &AppState) -> Result<SessionSnapshot, String> {
    let controller = controller_from_state(state);
    controller.tap().await.map_err(|e| e.to_string())
}

pub async fn undo_kick(state: &AppState) -> Result<SessionSnapshot, String> {
    let controller = controller_from_state(state);
    controller.undo().await.map_err(|e| e.to_string())
}

pub async fn pause_session(state: &AppState) -> Result<SessionSnapshot, String> {
    let controller = controller_from_state(state);
    controller.pause().await.map_err(|e| e.to_string())
}

pub async fn resume_session(state: &AppState) -> Result<SessionSnapshot, String> {
    let controller = controller_from_state(state);
    controller.resume().await.map_err(|e| e.to_string())
}

pub async fn end_session(state: &AppState) -> Result<SessionSnapshot, String> {
    let controller = controller_from_state(state);
    controller.end_early().await.map_err(|e| e.to_string())
}

pub async fn save_session_details(
    state: &AppState,
    strength_rating: Option<u8>,
    notes: Option<String>,
) -> Result<SessionSnapshot, String> {
    let controller = controller_from_state(state);
    controller
        .save_details(strength_rating, notes)
        .await
        .map_err(|e| e.to_string())
}

pub async fn start_new_session(state: &AppState) -> Result<SessionSnapshot, String> {
    let controller = controller_from_state(state);
    controller.start_new().await.map_err(|e| e.to_string())
}

pub async fn list_sessions(state: &AppState) -> Result<Vec<Session>, String> {
    state.db.list_sessions().await.map_err(|e| e.to_string())
}

pub async fn delete_session(state: &AppState, session_id: String) -> Result<SessionSnapshot, String> {
    let controller = controller_from_state(state);
    controller
        .delete_session(&session_id)
        .await
        .map_err(|e| e.to_string())
}

pub async fn get_session_report(state: &AppState) -> Result<Vec<SessionReport>, String> {
    report::collect(&state.db).await.map_err(|e| e.to_string())
}

pub fn get_preferences(state: &AppState) -> Result<UserPreferences, String> {
    Ok(state.preferences.get())
}

pub async fn update_preferences(
    state: &AppState,
    patch: PreferencesPatch,
) -> Result<UserPreferences, String> {
    state
        .preferences
        .update(patch)
        .await
        .map_err(|e| e.to_string())
}

pub async fn reset_preferences(state: &AppState) -> Result<UserPreferences, String> {
    state.preferences.reset().await.map_err(|e| e.to_string())
}

/// One line of the command shell.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Tap,
    Undo,
    Pause,
    Resume,
    End,
    Details {
        strength_rating: Option<u8>,
        notes: Option<String>,
    },
    New,
    Status,
    History,
    Delete(String),
    Report,
    Prefs,
    ResetPrefs,
    SetTarget(u32),
    SetLimit(u32),
    SetSound(SoundOption),
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  tap                       record a kick (starts a session if needed)
  undo                      remove the last kick
  pause | resume | end      control the current session
  details <1-5|-> [notes]   rate the current session and add notes
  new                       forget the finished session and start fresh
  status                    show the current session
  history                   list stored sessions, newest first
  delete <session-id>       delete a session and its kicks
  report                    finished sessions with kicks and intervals
  prefs | reset-prefs       show or reset preferences
  set-target <n>            default kick target for new sessions
  set-limit <seconds>       default time limit for new sessions
  set-sound <option>        soft-click | pop | heartbeat | bubble | none
  help | quit";

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };

        let command = match name.to_ascii_lowercase().as_str() {
            "tap" | "kick" => Command::Tap,
            "undo" => Command::Undo,
            "pause" => Command::Pause,
            "resume" => Command::Resume,
            "end" => Command::End,
            "details" => parse_details(rest)?,
            "new" => Command::New,
            "status" | "" => Command::Status,
            "history" => Command::History,
            "delete" => {
                if rest.is_empty() {
                    return Err("usage: delete <session-id>".into());
                }
                Command::Delete(rest.to_string())
            }
            "report" => Command::Report,
            "prefs" => Command::Prefs,
            "reset-prefs" => Command::ResetPrefs,
            "set-target" => Command::SetTarget(parse_number(rest, "set-target <n>")?),
            "set-limit" => Command::SetLimit(parse_number(rest, "set-limit <seconds>")?),
            "set-sound" => Command::SetSound(
                SoundOption::parse(rest).ok_or_else(|| format!("unknown sound option: {rest:?}"))?,
            ),
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            other => return Err(format!("unknown command: {other} (try `help`)")),
        };
        Ok(command)
    }
}

fn parse_details(rest: &str) -> Result<Command, String> {
    let (rating, notes) = match rest.split_once(char::is_whitespace) {
        Some((rating, notes)) => (rating, Some(notes.trim().to_string())),
        None => (rest, None),
    };

    let strength_rating = match rating {
        "" => return Err("usage: details <1-5|-> [notes]".into()),
        "-" => None,
        value => Some(
            value
                .parse::<u8>()
                .map_err(|_| format!("strength rating must be a number, got {value:?}"))?,
        ),
    };
    Ok(Command::Details {
        strength_rating,
        notes,
    })
}

fn parse_number(raw: &str, usage: &str) -> Result<u32, String> {
    raw.parse().map_err(|_| format!("usage: {usage}"))
}

fn to_json<T: Serialize>(value: T) -> Result<Value, String> {
    serde_json::to_value(value).map_err(|e| e.to_string())
}

/// Runs a parsed command and returns its JSON result.
pub async fn dispatch(state: &AppState, command: Command) -> Result<Value, String> {
    match command {
        Command::Tap => to_json(register_kick(state).await?),
        Command::Undo => to_json(undo_kick(state).await?),
        Command::Pause => to_json(pause_session(state).await?),
        Command::Resume => to_json(resume_session(state).await?),
        Command::End => to_json(end_session(state).await?),
        Command::Details {
            strength_rating,
            notes,
        } => to_json(save_session_details(state, strength_rating, notes).await?),
        Command::New => to_json(start_new_session(state).await?),
        Command::Status => to_json(get_session_state(state).await?),
        Command::History => to_json(list_sessions(state).await?),
        Command::Delete(session_id) => to_json(delete_session(state, session_id).await?),
        Command::Report => to_json(get_session_report(state).await?),
        Command::Prefs => to_json(get_preferences(state)?),
        Command::ResetPrefs => to_json(reset_preferences(state).await?),
        Command::SetTarget(target) => to_json(
            update_preferences(
                state,
                PreferencesPatch {
                    default_target_count: Some(target),
                    ..PreferencesPatch::default()
                },
            )
            .await?,
        ),
        Command::SetLimit(limit) => to_json(
            update_preferences(
                state,
                PreferencesPatch {
                    default_time_limit_sec: Some(limit),
                    ..PreferencesPatch::default()
                },
            )
            .await?,
        ),
        Command::SetSound(sound_option) => to_json(
            update_preferences(
                state,
                PreferencesPatch {
                    sound_option: Some(sound_option),
                    ..PreferencesPatch::default()
                },
            )
            .await?,
        ),
        Command::Help => Ok(Value::String(HELP.to_string())),
        Command::Quit => Ok(Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::db::Database;
    use crate::session::ControllerConfig;
    use std::sync::Arc;

    async fn app_state() -> AppState {
        let db = Database::in_memory().unwrap();
        AppState::new(db, Arc::new(SystemClock), ControllerConfig::default())
            .await
            .unwrap()
    }

    #[test]
    fn parses_commands_with_arguments() {
        assert_eq!(Command::parse("tap").unwrap(), Command::Tap);
        assert_eq!(Command::parse("  END ").unwrap(), Command::End);
        assert_eq!(
            Command::parse("details 4 strong and steady").unwrap(),
            Command::Details {
                strength_rating: Some(4),
                notes: Some("strong and steady".into()),
            }
        );
        assert_eq!(
            Command::parse("details -").unwrap(),
            Command::Details {
                strength_rating: None,
                notes: None,
            }
        );
        assert_eq!(Command::parse("set-target 12").unwrap(), Command::SetTarget(12));
        assert_eq!(
            Command::parse("set-sound heartbeat").unwrap(),
            Command::SetSound(SoundOption::Heartbeat)
        );
        assert_eq!(
            Command::parse("delete abc-123").unwrap(),
            Command::Delete("abc-123".into())
        );
    }

    #[test]
    fn rejects_malformed_commands() {
        assert!(Command::parse("dance").is_err());
        assert!(Command::parse("delete").is_err());
        assert!(Command::parse("set-limit soon").is_err());
        assert!(Command::parse("set-sound trumpet").is_err());
        assert!(Command::parse("details").is_err());
        assert!(Command::parse("details lots").is_err());
    }

    #[tokio::test]
    async fn dispatch_returns_camel_case_snapshots() {
        let state = app_state().await;
        let value = dispatch(&state, Command::Tap).await.unwrap();
        assert_eq!(value["kickCount"], 1);
        assert_eq!(value["session"]["status"], "active");
        assert_eq!(value["isActive"], true);

        let history = dispatch(&state, Command::History).await.unwrap();
        assert_eq!(history.as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn errors_become_strings() {
        let state = app_state().await;
        dispatch(&state, Command::Tap).await.unwrap();

        let err = dispatch(
            &state,
            Command::Details {
                strength_rating: Some(9),
                notes: None,
            },
        )
        .await
        .unwrap_err();
        assert!(err.contains("strength rating"), "{err}");

        let err = dispatch(&state, Command::Delete("missing".into()))
            .await
            .unwrap_err();
        assert_eq!(err, "session not found: missing");

        let err = dispatch(&state, Command::SetTarget(0)).await.unwrap_err();
        assert!(err.contains("greater than zero"), "{err}");
    }

    #[tokio::test]
    async fn preference_commands_round_trip() {
        let state = app_state().await;
        let prefs = dispatch(&state, Command::SetLimit(3600)).await.unwrap();
        assert_eq!(prefs["defaultTimeLimitSec"], 3600);

        let snapshot = dispatch(&state, Command::Tap).await.unwrap();
        assert_eq!(snapshot["session"]["timeLimitSec"], 3600);

        let prefs = dispatch(&state, Command::ResetPrefs).await.unwrap();
        assert_eq!(prefs["defaultTimeLimitSec"], 7200);
        assert_eq!(prefs["soundOption"], "soft-click");
    }
}

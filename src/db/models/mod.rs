pub mod kick_event;
pub mod preferences;
pub mod session;

pub use kick_event::{kick_intervals, KickEvent, KickSource};
pub use preferences::{PreferencesPatch, SoundOption, UserPreferences};
pub use session::{
    Session, SessionPatch, SessionStatus, Transition, DEFAULT_TARGET_COUNT, DEFAULT_TIME_LIMIT_SEC,
};

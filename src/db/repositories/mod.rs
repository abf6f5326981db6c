pub mod kick_events;
pub mod preferences;
pub mod sessions;

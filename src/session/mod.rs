pub mod commands;
pub mod controller;
pub mod lifecycle;
pub mod state;

pub use controller::{ControllerConfig, SessionController, SessionEvent, SessionSnapshot};
pub use crate::error::{SessionError, SessionResult};
pub use state::Transition;

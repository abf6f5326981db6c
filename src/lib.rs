pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod preferences;
pub mod report;
pub mod session;

use std::sync::Arc;

use anyhow::Result;
use clock::{Clock, SystemClock};
use config::AppConfig;
use db::Database;
use log::{error, info, warn};
use preferences::PreferencesStore;
use session::{
    commands::{self, Command},
    ControllerConfig, SessionController, SessionEvent,
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::broadcast,
};

pub struct AppState {
    pub db: Database,
    pub controller: SessionController,
    pub preferences: Arc<PreferencesStore>,
}

impl AppState {
    /// Loads preferences and restores any session left active or paused.
    ///
    /// A failed restore is not fatal: the controller starts empty with the
    /// error in its snapshot, so `history` and `delete` can still repair the
    /// store.
    pub async fn new(db: Database, clock: Arc<dyn Clock>, config: ControllerConfig) -> Result<Self> {
        let preferences = Arc::new(PreferencesStore::load(db.clone()).await?);
        let controller = SessionController::new(db.clone(), preferences.clone(), clock, config);
        if let Err(err) = controller.load().await {
            error!("Starting without a restored session: {err}");
        }

        Ok(Self {
            db,
            controller,
            preferences,
        })
    }
}

pub async fn run() -> Result<()> {
    let config = AppConfig::from_env()?;

    env_logger::Builder::from_default_env()
        .filter_level(config.log_level())
        .init();

    info!("BabyBeat starting up...");

    std::fs::create_dir_all(&config.data_dir)?;
    let database = Database::new(config.database_path())?;
    let state = AppState::new(database, Arc::new(SystemClock), config.controller_config()).await?;

    let finished_printer = tokio::spawn(print_finished_sessions(state.controller.subscribe()));

    println!("{}", commands::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(err) => {
                eprintln!("error: {err}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }

        match commands::dispatch(&state, command).await {
            Ok(serde_json::Value::String(text)) => println!("{text}"),
            Ok(value) => match serde_json::to_string_pretty(&value) {
                Ok(json) => println!("{json}"),
                Err(err) => eprintln!("error: {err}"),
            },
            Err(err) => eprintln!("error: {err}"),
        }
    }

    state.controller.shutdown();
    finished_printer.abort();
    info!("BabyBeat shutting down");
    Ok(())
}

async fn print_finished_sessions(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::SessionFinished { session }) => {
                println!(
                    "session {} finished: {} with {} kicks",
                    session.id, session.status, session.kick_count
                );
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Dropped {skipped} session events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

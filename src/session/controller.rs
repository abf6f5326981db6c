use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    clock::{local_timezone, Clock},
    db::{
        models::{KickEvent, KickSource, Session, SessionStatus, UserPreferences},
        Database,
    },
    preferences::PreferencesStore,
};

use crate::error::{SessionError, SessionResult};

use super::{
    lifecycle,
    state::{self, Transition},
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Cadence of the timeout poll while a session is active.
    pub poll_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Everything a UI needs to render the current session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session: Option<Session>,
    pub kicks: Vec<KickEvent>,
    pub elapsed_seconds: f64,
    pub remaining_seconds: f64,
    pub is_active: bool,
    pub is_paused: bool,
    pub kick_count: u32,
    pub target_count: u32,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    StateChanged(SessionSnapshot),
    #[serde(rename_all = "camelCase")]
    Heartbeat {
        session_id: String,
        elapsed_seconds: f64,
        remaining_seconds: f64,
    },
    #[serde(rename_all = "camelCase")]
    SessionFinished { session: Session },
}

#[derive(Debug, Default)]
struct ControllerState {
    session: Option<Session>,
    kicks: Vec<KickEvent>,
    error: Option<String>,
}

impl ControllerState {
    fn snapshot(&self, now: DateTime<Utc>, prefs: &UserPreferences) -> SessionSnapshot {
        let session = self.session.as_ref();
        let status = session.map(|s| s.status);
        SessionSnapshot {
            session: self.session.clone(),
            kicks: self.kicks.clone(),
            elapsed_seconds: session.map_or(0.0, |s| state::elapsed_seconds(s, now)),
            remaining_seconds: session.map_or(f64::from(prefs.default_time_limit_sec), |s| {
                state::remaining_seconds(s, now)
            }),
            is_active: status.is_some_and(|s| s.is_current()),
            is_paused: status == Some(SessionStatus::Paused),
            kick_count: self.kicks.len() as u32,
            target_count: session.map_or(prefs.default_target_count, |s| s.target_count),
            error: self.error.clone(),
        }
    }

    fn session_id(&self) -> Option<String> {
        self.session.as_ref().map(|s| s.id.clone())
    }

    fn status(&self) -> Option<SessionStatus> {
        self.session.as_ref().map(|s| s.status)
    }

    fn set_kick_count(&mut self, count: u32) {
        if let Some(session) = self.session.as_mut() {
            session.kick_count = count;
        }
    }

    /// Keeps the in-memory copy unchanged on failure and stores a message
    /// the UI can show.
    fn record<T>(&mut self, action: &str, result: SessionResult<T>) -> SessionResult<T> {
        match &result {
            Ok(_) => self.error = None,
            Err(err) => {
                error!("Failed to {action}: {err}");
                self.error = Some(format!("Failed to {action}: {err}"));
            }
        }
        result
    }
}

struct Poller {
    session_id: String,
    token: CancellationToken,
    _handle: JoinHandle<()>,
}

/// Coordinates the loaded session, its kick log and the timeout poll.
///
/// Every operation holds the state lock from its first read to its last
/// write, and the poller only acts while holding the same lock, so user
/// actions and poll ticks never interleave.
#[derive(Clone)]
pub struct SessionController {
    state: Arc<Mutex<ControllerState>>,
    db: Database,
    preferences: Arc<PreferencesStore>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<SessionEvent>,
    poller: Arc<std::sync::Mutex<Option<Poller>>>,
    config: ControllerConfig,
}

impl SessionController {
    pub fn new(
        db: Database,
        preferences: Arc<PreferencesStore>,
        clock: Arc<dyn Clock>,
        config: ControllerConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state: Arc::new(Mutex::new(ControllerState::default())),
            db,
            preferences,
            clock,
            events,
            poller: Arc::new(std::sync::Mutex::new(None)),
            config,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Restores the active or paused session left by a previous run.
    pub async fn load(&self) -> SessionResult<SessionSnapshot> {
        let mut guard = self.state.lock().await;
        let result = self.load_current(&mut guard).await;
        guard.record("load session", result)?;
        Ok(self.publish(&guard))
    }

    async fn load_current(&self, guard: &mut ControllerState) -> SessionResult<()> {
        let Some(mut session) = self.db.find_active_or_paused().await? else {
            return Ok(());
        };

        let kicks = self.db.list_kicks(&session.id).await?;
        if session.kick_count as usize != kicks.len() {
            warn!(
                "Session {} cached kick_count {} disagrees with {} logged kicks; resyncing",
                session.id,
                session.kick_count,
                kicks.len()
            );
            session.kick_count = self.db.resync_kick_count(&session.id).await?;
        }

        info!(
            "Restored {} session {} with {} kicks",
            session.status,
            session.id,
            kicks.len()
        );
        let active = session.status == SessionStatus::Active;
        let session_id = session.id.clone();
        guard.session = Some(session);
        guard.kicks = kicks;
        if active {
            self.spawn_poller(session_id);
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let guard = self.state.lock().await;
        guard.snapshot(self.clock.now(), &self.preferences.get())
    }

    pub async fn elapsed_seconds(&self) -> f64 {
        self.snapshot().await.elapsed_seconds
    }

    pub async fn remaining_seconds(&self) -> f64 {
        self.snapshot().await.remaining_seconds
    }

    pub async fn is_active(&self) -> bool {
        self.snapshot().await.is_active
    }

    pub async fn is_paused(&self) -> bool {
        self.snapshot().await.is_paused
    }

    pub async fn kick_count(&self) -> u32 {
        self.snapshot().await.kick_count
    }

    pub async fn target_count(&self) -> u32 {
        self.snapshot().await.target_count
    }

    /// Records one movement, creating and starting a session when needed and
    /// completing it once the target is reached.
    pub async fn tap(&self) -> SessionResult<SessionSnapshot> {
        let mut guard = self.state.lock().await;
        let result = self.tap_locked(&mut guard).await;
        guard.record("register kick", result)?;
        Ok(self.publish(&guard))
    }

    async fn tap_locked(&self, guard: &mut ControllerState) -> SessionResult<()> {
        if guard.session.is_none() {
            let prefs = self.preferences.get();
            let session =
                lifecycle::create_session(&self.db, &prefs, local_timezone(), self.clock.now())
                    .await?;
            guard.session = Some(session);
            guard.kicks.clear();
        }

        if guard.status() == Some(SessionStatus::Idle) {
            self.apply_transition(guard, Transition::Start).await?;
        }

        let Some(session_id) = guard.session_id() else {
            return Ok(());
        };
        if guard.status() != Some(SessionStatus::Active) {
            debug!("Ignoring tap for session {session_id} in status {:?}", guard.status());
            return Ok(());
        }

        let kick = self
            .db
            .append_kick(&session_id, KickSource::Tap, self.clock.now())
            .await?;
        guard.kicks.push(kick);
        let count = self.db.count_kicks(&session_id).await?;
        guard.set_kick_count(count);

        let reached = guard
            .session
            .as_ref()
            .is_some_and(|session| state::should_auto_complete(session, count));
        if reached {
            self.apply_transition(guard, Transition::Complete).await?;
        }
        Ok(())
    }

    /// Removes the most recent kick; nothing happens when none are recorded.
    pub async fn undo(&self) -> SessionResult<SessionSnapshot> {
        let mut guard = self.state.lock().await;
        let Some(session_id) = guard.session_id() else {
            return Ok(self.publish(&guard));
        };
        if guard.kicks.is_empty() {
            return Ok(self.publish(&guard));
        }

        let result = self.undo_locked(&mut guard, &session_id).await;
        guard.record("undo kick", result)?;
        Ok(self.publish(&guard))
    }

    async fn undo_locked(&self, guard: &mut ControllerState, session_id: &str) -> SessionResult<()> {
        let removed = self.db.remove_last_kick(session_id).await?;
        let count = self.db.count_kicks(session_id).await?;
        if let Some(removed) = removed {
            guard.kicks.retain(|kick| kick.id != removed.id);
        }
        guard.set_kick_count(count);
        Ok(())
    }

    pub async fn pause(&self) -> SessionResult<SessionSnapshot> {
        self.user_transition(Transition::Pause, "pause session").await
    }

    pub async fn resume(&self) -> SessionResult<SessionSnapshot> {
        self.user_transition(Transition::Resume, "resume session").await
    }

    pub async fn end_early(&self) -> SessionResult<SessionSnapshot> {
        self.user_transition(Transition::EndEarly, "end session").await
    }

    /// Runs a user-requested transition. Without a loaded session, or from a
    /// status the UI should not have offered, this is a no-op.
    async fn user_transition(
        &self,
        transition: Transition,
        action: &str,
    ) -> SessionResult<SessionSnapshot> {
        let mut guard = self.state.lock().await;
        match guard.status() {
            Some(status) if transition.allowed_from(status) => {}
            other => {
                debug!("Ignoring {transition} with session status {other:?}");
                return Ok(self.publish(&guard));
            }
        }

        let result = self.apply_transition(&mut guard, transition).await;
        guard.record(action, result)?;
        Ok(self.publish(&guard))
    }

    /// Persists `transition` for the loaded session and mirrors the result,
    /// starting or stopping the timeout poll to match the new status.
    async fn apply_transition(
        &self,
        guard: &mut ControllerState,
        transition: Transition,
    ) -> SessionResult<()> {
        let session_id = guard
            .session_id()
            .ok_or_else(|| SessionError::not_found("<none loaded>"))?;
        let next =
            lifecycle::transition(&self.db, &session_id, transition, self.clock.now()).await?;

        let status = next.status;
        guard.session = Some(next);

        if status == SessionStatus::Active {
            self.spawn_poller(session_id);
        } else {
            self.stop_poller();
        }
        if status.is_terminal() {
            if let Some(session) = guard.session.clone() {
                let _ = self.events.send(SessionEvent::SessionFinished { session });
            }
        }
        Ok(())
    }

    /// Sets the post-hoc rating and notes on the loaded session, whatever its
    /// status.
    pub async fn save_details(
        &self,
        strength_rating: Option<u8>,
        notes: Option<String>,
    ) -> SessionResult<SessionSnapshot> {
        let mut guard = self.state.lock().await;
        let Some(session_id) = guard.session_id() else {
            return Ok(self.publish(&guard));
        };

        let result = lifecycle::save_details(&self.db, &session_id, strength_rating, notes).await;
        let patch = guard.record("save session details", result)?;
        if let Some(session) = guard.session.as_mut() {
            patch.apply_to(session);
        }
        Ok(self.publish(&guard))
    }

    /// Forgets the loaded session so the next tap begins a new one; nothing
    /// is deleted.
    ///
    /// A session still active or paused is ended early on purpose. Leaving it
    /// current in the store would make the next start fail with
    /// `AnotherSessionInProgress` and bring it back on the next load.
    pub async fn start_new(&self) -> SessionResult<SessionSnapshot> {
        let mut guard = self.state.lock().await;
        if guard.status().is_some_and(|status| status.is_current()) {
            debug!(
                "Ending session {:?} early before starting a new one",
                guard.session_id()
            );
            let result = self.apply_transition(&mut guard, Transition::EndEarly).await;
            guard.record("end session", result)?;
        }

        self.stop_poller();
        *guard = ControllerState::default();
        info!("Ready for a new session");
        Ok(self.publish(&guard))
    }

    /// Deletes a stored session and its kicks, unloading it if it is current.
    pub async fn delete_session(&self, session_id: &str) -> SessionResult<SessionSnapshot> {
        let mut guard = self.state.lock().await;
        let result = self.db.delete_session(session_id).await.map_err(SessionError::from);
        guard.record("delete session", result)?;

        if guard.session_id().as_deref() == Some(session_id) {
            self.stop_poller();
            *guard = ControllerState::default();
        }
        info!("Deleted session {session_id}");
        Ok(self.publish(&guard))
    }

    /// Stops the timeout poll; call when the UI goes away.
    pub fn shutdown(&self) {
        self.stop_poller();
    }

    fn publish(&self, guard: &ControllerState) -> SessionSnapshot {
        let snapshot = guard.snapshot(self.clock.now(), &self.preferences.get());
        let _ = self.events.send(SessionEvent::StateChanged(snapshot.clone()));
        snapshot
    }

    fn spawn_poller(&self, session_id: String) {
        let mut slot = lock_poller(&self.poller);
        if let Some(existing) = slot.as_ref() {
            if existing.session_id == session_id && !existing.token.is_cancelled() {
                return;
            }
            existing.token.cancel();
        }

        let token = CancellationToken::new();
        let handle = tokio::spawn(poll_timeout(
            PollContext {
                state: self.state.clone(),
                db: self.db.clone(),
                preferences: self.preferences.clone(),
                clock: self.clock.clone(),
                events: self.events.clone(),
                poll_interval: self.config.poll_interval,
            },
            session_id.clone(),
            token.clone(),
        ));
        debug!("Timeout poll started for session {session_id}");

        *slot = Some(Poller {
            session_id,
            token,
            _handle: handle,
        });
    }

    fn stop_poller(&self) {
        if let Some(poller) = lock_poller(&self.poller).take() {
            poller.token.cancel();
            debug!("Timeout poll stopped for session {}", poller.session_id);
        }
    }
}

fn lock_poller(
    poller: &std::sync::Mutex<Option<Poller>>,
) -> std::sync::MutexGuard<'_, Option<Poller>> {
    match poller.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct PollContext {
    state: Arc<Mutex<ControllerState>>,
    db: Database,
    preferences: Arc<PreferencesStore>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<SessionEvent>,
    poll_interval: Duration,
}

/// Checks the timeout predicate on every tick while `session_id` stays active.
async fn poll_timeout(ctx: PollContext, session_id: String, token: CancellationToken) {
    let mut ticker = time::interval(ctx.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let mut guard = ctx.state.lock().await;
        if token.is_cancelled() {
            break;
        }
        let Some(session) = guard.session.clone() else {
            break;
        };
        if session.id != session_id || session.status != SessionStatus::Active {
            break;
        }

        let now = ctx.clock.now();
        if !state::is_timed_out(&session, now) {
            let _ = ctx.events.send(SessionEvent::Heartbeat {
                session_id: session_id.clone(),
                elapsed_seconds: state::elapsed_seconds(&session, now),
                remaining_seconds: state::remaining_seconds(&session, now),
            });
            continue;
        }

        match lifecycle::timeout_session(&ctx.db, &session_id, now).await {
            Ok(timed_out) => {
                guard.session = Some(timed_out.clone());
                guard.error = None;
                let _ = ctx
                    .events
                    .send(SessionEvent::SessionFinished { session: timed_out });
                let snapshot = guard.snapshot(now, &ctx.preferences.get());
                let _ = ctx.events.send(SessionEvent::StateChanged(snapshot));
                break;
            }
            Err(err) if err.is_invalid_transition() => {
                // Someone else already moved the session on; adopt the stored state.
                debug!("Timeout for session {session_id} lost a race: {err}");
                match ctx.db.get_session(&session_id).await {
                    Ok(Some(fresh)) => guard.session = Some(fresh),
                    Ok(None) => {}
                    Err(err) => warn!("Failed to refresh session {session_id}: {err:#}"),
                }
                break;
            }
            Err(err) => {
                error!("Failed to time out session {session_id}: {err}");
                guard.error = Some(format!("Failed to time out session: {err}"));
            }
        }
    }

    debug!("Timeout poll for session {session_id} exited");
}

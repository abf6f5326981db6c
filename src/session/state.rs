//! Pure session lifecycle rules.
//!
//! Nothing here touches storage or reads the clock; every function takes the
//! instant it should evaluate at. Elapsed time is always recomputed from the
//! stored timestamps plus the accumulated paused duration.

use chrono::{DateTime, Utc};

pub use crate::db::models::Transition;
use crate::db::models::{Session, SessionStatus};
use crate::error::{SessionError, SessionResult};

/// Statuses reachable from `status` in one step.
pub fn valid_transitions(status: SessionStatus) -> Vec<SessionStatus> {
    Transition::ALL
        .iter()
        .filter(|transition| transition.allowed_from(status))
        .map(Transition::target)
        .collect()
}

/// Validates `transition` against the session's status and returns the next
/// session value.
pub fn apply(session: &Session, transition: Transition, at: DateTime<Utc>) -> SessionResult<Session> {
    if !transition.allowed_from(session.status) {
        return Err(SessionError::invalid_transition(transition, session.status));
    }

    let mut next = session.clone();
    match transition {
        Transition::Start => {
            next.started_at = Some(at);
        }
        Transition::Pause => {
            next.paused_at = Some(at);
        }
        Transition::Resume => {
            let paused_at = session.paused_at.ok_or_else(|| {
                SessionError::Corrupted(format!("paused session {} has no paused_at", session.id))
            })?;
            next.paused_duration_sec += seconds_between(paused_at, at).max(0.0);
            next.paused_at = None;
        }
        Transition::Complete | Transition::Timeout | Transition::EndEarly => {
            next.ended_at = Some(at);
            next.duration_sec = Some(elapsed_seconds(session, at));
            // Close an open pause so the stored paused total includes it.
            next.paused_at = None;
            if session.status == SessionStatus::Paused {
                if let Some(paused_at) = session.paused_at {
                    next.paused_duration_sec += seconds_between(paused_at, at).max(0.0);
                }
            }
        }
    }
    next.status = transition.target();

    Ok(next)
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

/// Active (non-paused) seconds as of `as_of`; zero before the session starts
/// and frozen at `duration_sec` once the session has ended.
pub fn elapsed_seconds(session: &Session, as_of: DateTime<Utc>) -> f64 {
    if let (true, Some(duration)) = (session.is_terminal(), session.duration_sec) {
        return duration;
    }
    let Some(started_at) = session.started_at else {
        return 0.0;
    };

    let mut elapsed = seconds_between(started_at, as_of) - session.paused_duration_sec;
    if session.status == SessionStatus::Paused {
        if let Some(paused_at) = session.paused_at {
            elapsed -= seconds_between(paused_at, as_of);
        }
    }

    elapsed.max(0.0)
}

pub fn remaining_seconds(session: &Session, as_of: DateTime<Utc>) -> f64 {
    (f64::from(session.time_limit_sec) - elapsed_seconds(session, as_of)).max(0.0)
}

/// Only active sessions can time out; idle and paused ones never do.
pub fn is_timed_out(session: &Session, now: DateTime<Utc>) -> bool {
    session.status == SessionStatus::Active
        && session.started_at.is_some()
        && elapsed_seconds(session, now) >= f64::from(session.time_limit_sec)
}

pub fn should_auto_complete(session: &Session, kick_count: u32) -> bool {
    session.status == SessionStatus::Active && kick_count >= session.target_count
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 10, 0, 0).unwrap()
    }

    fn secs(n: i64) -> DateTime<Utc> {
        t0() + Duration::seconds(n)
    }

    fn idle() -> Session {
        Session::new("s1".into(), t0(), 10, 7200, "UTC".into())
    }

    fn with_status(status: SessionStatus) -> Session {
        let mut session = idle();
        session.status = status;
        if status != SessionStatus::Idle {
            session.started_at = Some(t0());
        }
        if status == SessionStatus::Paused {
            session.paused_at = Some(t0());
        }
        session
    }

    #[test]
    fn start_sets_started_at() {
        let started = apply(&idle(), Transition::Start, secs(5)).unwrap();
        assert_eq!(started.status, SessionStatus::Active);
        assert_eq!(started.started_at, Some(secs(5)));
        assert!(started.ended_at.is_none());
    }

    #[test]
    fn every_listed_transition_succeeds_from_its_sources() {
        for transition in Transition::ALL {
            for &status in transition.sources() {
                let next = apply(&with_status(status), transition, secs(60)).unwrap();
                assert_eq!(next.status, transition.target(), "{transition} from {status}");
            }
        }
    }

    #[test]
    fn every_unlisted_pair_is_an_invalid_transition() {
        for transition in Transition::ALL {
            for status in SessionStatus::ALL {
                if transition.allowed_from(status) {
                    continue;
                }
                let err = apply(&with_status(status), transition, secs(60)).unwrap_err();
                match err {
                    SessionError::InvalidTransition {
                        transition: attempted,
                        status: actual,
                    } => {
                        assert_eq!(attempted, transition);
                        assert_eq!(actual, status);
                    }
                    other => panic!("expected InvalidTransition, got {other:?}"),
                }
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for status in [
            SessionStatus::Complete,
            SessionStatus::Timeout,
            SessionStatus::EndedEarly,
        ] {
            assert!(valid_transitions(status).is_empty());
        }
        assert_eq!(valid_transitions(SessionStatus::Idle), vec![SessionStatus::Active]);
        assert_eq!(
            valid_transitions(SessionStatus::Paused),
            vec![SessionStatus::Active, SessionStatus::EndedEarly]
        );
        assert_eq!(valid_transitions(SessionStatus::Active).len(), 4);
    }

    #[test]
    fn pause_resume_accounting() {
        let session = apply(&idle(), Transition::Start, t0()).unwrap();
        let session = apply(&session, Transition::Pause, secs(100)).unwrap();
        assert_eq!(elapsed_seconds(&session, secs(100)), 100.0);
        assert_eq!(elapsed_seconds(&session, secs(140)), 100.0);

        let session = apply(&session, Transition::Resume, secs(150)).unwrap();
        assert_eq!(session.paused_duration_sec, 50.0);
        assert!(session.paused_at.is_none());

        let session = apply(&session, Transition::Pause, secs(250)).unwrap();
        assert_eq!(session.paused_duration_sec, 50.0);
        assert_eq!(elapsed_seconds(&session, secs(250)), 200.0);
        assert_eq!(elapsed_seconds(&session, secs(900)), 200.0);
    }

    #[test]
    fn elapsed_is_monotonic_while_active() {
        let session = apply(&idle(), Transition::Start, t0()).unwrap();
        let mut previous = 0.0;
        for n in 0..50 {
            let elapsed = elapsed_seconds(&session, secs(n * 7));
            assert!(elapsed >= previous);
            previous = elapsed;
        }
    }

    #[test]
    fn elapsed_is_zero_before_start_and_never_negative() {
        assert_eq!(elapsed_seconds(&idle(), secs(500)), 0.0);
        let session = apply(&idle(), Transition::Start, secs(10)).unwrap();
        assert_eq!(elapsed_seconds(&session, t0()), 0.0);
    }

    #[test]
    fn remaining_counts_down_and_clamps() {
        let session = apply(&idle(), Transition::Start, t0()).unwrap();
        assert_eq!(remaining_seconds(&session, secs(200)), 7000.0);
        assert_eq!(remaining_seconds(&session, secs(9000)), 0.0);
        assert_eq!(remaining_seconds(&idle(), secs(9000)), 7200.0);
    }

    #[test]
    fn terminal_transition_freezes_duration() {
        let session = apply(&idle(), Transition::Start, t0()).unwrap();
        let done = apply(&session, Transition::Complete, secs(600)).unwrap();
        assert_eq!(done.ended_at, Some(secs(600)));
        assert_eq!(done.duration_sec, Some(600.0));
    }

    #[test]
    fn ending_while_paused_excludes_open_pause() {
        let session = apply(&idle(), Transition::Start, t0()).unwrap();
        let session = apply(&session, Transition::Pause, secs(300)).unwrap();
        let ended = apply(&session, Transition::EndEarly, secs(1000)).unwrap();
        assert_eq!(ended.status, SessionStatus::EndedEarly);
        assert_eq!(ended.duration_sec, Some(300.0));
        assert_eq!(ended.paused_duration_sec, 700.0);
        assert!(ended.paused_at.is_none());
        assert_eq!(elapsed_seconds(&ended, secs(5000)), 300.0);
    }

    #[test]
    fn resume_without_paused_at_is_corruption() {
        let mut session = with_status(SessionStatus::Paused);
        session.paused_at = None;
        let err = apply(&session, Transition::Resume, secs(10)).unwrap_err();
        assert!(matches!(err, SessionError::Corrupted(_)));
    }

    #[test]
    fn timeout_predicate_only_flags_active_sessions() {
        let session = apply(&idle(), Transition::Start, t0()).unwrap();
        assert!(is_timed_out(&session, secs(8000)));
        assert!(is_timed_out(&session, secs(7200)));
        assert!(!is_timed_out(&session, secs(7199)));

        let paused = apply(&session, Transition::Pause, secs(8000)).unwrap();
        assert!(!is_timed_out(&paused, secs(8000)));
        assert!(!is_timed_out(&idle(), secs(8000)));
    }

    #[test]
    fn auto_complete_predicate() {
        let mut session = apply(&idle(), Transition::Start, t0()).unwrap();
        session.target_count = 3;
        assert!(!should_auto_complete(&session, 2));
        assert!(should_auto_complete(&session, 3));

        let paused = apply(&session, Transition::Pause, secs(1)).unwrap();
        assert!(!should_auto_complete(&paused, 3));
    }
}

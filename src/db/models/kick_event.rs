use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum KickSource {
    #[default]
    Tap,
    ManualEdit,
}

impl KickSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            KickSource::Tap => "tap",
            KickSource::ManualEdit => "manual_edit",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "tap" => Some(KickSource::Tap),
            "manual_edit" => Some(KickSource::ManualEdit),
            _ => None,
        }
    }
}

/// One recorded movement. `ordinal` is 1-based within its session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KickEvent {
    pub id: String,
    pub session_id: String,
    pub occurred_at: DateTime<Utc>,
    pub ordinal: u32,
    pub source: KickSource,
}

/// Seconds between consecutive events, in the order given.
pub fn kick_intervals(kicks: &[KickEvent]) -> Vec<f64> {
    kicks
        .windows(2)
        .map(|pair| (pair[1].occurred_at - pair[0].occurred_at).num_milliseconds() as f64 / 1000.0)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn kick(ordinal: u32, at: DateTime<Utc>) -> KickEvent {
        KickEvent {
            id: format!("k{ordinal}"),
            session_id: "s1".into(),
            occurred_at: at,
            ordinal,
            source: KickSource::Tap,
        }
    }

    #[test]
    fn intervals_between_consecutive_kicks() {
        let t0 = Utc::now();
        let kicks = vec![
            kick(1, t0),
            kick(2, t0 + Duration::seconds(30)),
            kick(3, t0 + Duration::milliseconds(95_500)),
        ];
        assert_eq!(kick_intervals(&kicks), vec![30.0, 65.5]);
    }

    #[test]
    fn no_intervals_for_fewer_than_two_kicks() {
        assert!(kick_intervals(&[]).is_empty());
        assert!(kick_intervals(&[kick(1, Utc::now())]).is_empty());
    }
}

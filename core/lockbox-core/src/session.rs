//! Session and unlock-attempt records.
//!
//! A session is one locked-box attempt. It is created `Locked` and ends in
//! exactly one terminal state: `Completed` when the timer elapses, or
//! `Premature` when an override is granted (or when a stale row is repaired
//! at the next lock). Attempts are append-only audit rows referencing a
//! session by id; they are never mutated.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;

/// Fixed textual timestamp format used for every persisted instant.
/// All records use UTC; mixing zones across rows would corrupt the
/// remaining-time arithmetic.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionStatus {
    Locked,
    Completed,
    Premature,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Locked => "LOCKED",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Premature => "PREMATURE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "LOCKED" => Some(SessionStatus::Locked),
            "COMPLETED" => Some(SessionStatus::Completed),
            "PREMATURE" => Some(SessionStatus::Premature),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_minutes: i64,
    pub status: SessionStatus,
    pub emergency_unlocked: bool,
}

/// Audit record for one override request, granted or refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnlockAttempt {
    pub session_id: i64,
    pub reason: String,
    pub decision: bool,
    pub timestamp: DateTime<Utc>,
}

pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.format(DATETIME_FORMAT).to_string()
}

pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value, DATETIME_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            SessionStatus::Locked,
            SessionStatus::Completed,
            SessionStatus::Premature,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("locked"), None);
    }

    #[test]
    fn instants_round_trip_without_subseconds() {
        let now = Utc::now().with_nanosecond(0).expect("truncate");
        let text = format_instant(now);
        assert_eq!(parse_instant(&text), Some(now));
    }

    #[test]
    fn rejects_other_timestamp_shapes() {
        assert!(parse_instant("2026-01-31T12:00:00Z").is_none());
        assert!(parse_instant("not-a-time").is_none());
    }
}

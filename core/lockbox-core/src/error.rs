//! Error types for lockbox-core operations.
//!
//! Caller-facing rejections (bad input, conflict, no active session) are
//! separate variants so the daemon can map them to stable protocol codes.
//! Timer cancellation never appears here: "nothing left to cancel" is an
//! expected outcome, modeled as [`crate::timer::CancelOutcome`].

#[derive(Debug, thiserror::Error)]
pub enum LockboxError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("a session is already locked (id {active_session_id})")]
    Conflict { active_session_id: i64 },

    #[error("no active locked session")]
    NotLocked,

    #[error("storage error: {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("actuator error: {context}: {source}")]
    Actuator {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timer error: {0}")]
    Timer(String),

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl LockboxError {
    pub(crate) fn storage(context: impl Into<String>, source: rusqlite::Error) -> Self {
        LockboxError::Storage {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn actuator(context: impl Into<String>, source: std::io::Error) -> Self {
        LockboxError::Actuator {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        LockboxError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Convenience type alias for Results using LockboxError.
pub type Result<T> = std::result::Result<T, LockboxError>;

use ulid::Ulid;

use crate::model::{Ms, Weekday};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The requested appointment span overlaps an existing appointment.
    Conflict(Ulid),
    /// A recurring-schedule row with exactly one of start/end set.
    IncompleteRule(Weekday),
    /// Seconds-of-day out of range, or start after end.
    InvalidWindow(&'static str),
    /// Non-positive slot or appointment-type duration.
    InvalidDuration(Ms),
    /// Appointment span length does not match the appointment type.
    WrongDuration { expected_min: u32, got_ms: Ms },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Conflict(id) => write!(f, "conflict with appointment: {id}"),
            EngineError::IncompleteRule(weekday) => {
                write!(
                    f,
                    "schedule row for {weekday} has only one of start/end set"
                )
            }
            EngineError::InvalidWindow(msg) => write!(f, "invalid window: {msg}"),
            EngineError::InvalidDuration(ms) => {
                write!(f, "duration must be positive, got {ms}ms")
            }
            EngineError::WrongDuration { expected_min, got_ms } => {
                write!(
                    f,
                    "span length {got_ms}ms does not match appointment type ({expected_min}min)"
                )
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

use thiserror::Error;

/// A command was applied to a state that does not allow it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Already running")]
    AlreadyRunning,
    #[error("Not running")]
    NotRunning,
    #[error("Lap timestamp out of order: {now_ms} is not after {previous_ms}")]
    LapOutOfOrder { now_ms: u64, previous_ms: u64 },
}

/// A timer state failed one or more rules. Carries every violation, joined.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid timer state: {}", .errors.join("; "))]
pub struct ValidationError {
    pub errors: Vec<String>,
}

/// Laps exist but there is no start time to measure them from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Cannot derive laps: {laps} lap(s) recorded but start time is missing")]
pub struct PreconditionError {
    pub laps: usize,
}

pub type EngineResult<T> = Result<T, EngineError>;

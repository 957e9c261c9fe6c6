//! Stopwatch transitions. Each operation takes the current state and a time
//! source and returns the next state; the input is never modified.

use crate::clock::TimeSource;
use crate::error::{EngineError, EngineResult};
use crate::state::TimerState;

pub fn start(state: &TimerState, time: &impl TimeSource) -> EngineResult<TimerState> {
    if state.is_running {
        return Err(EngineError::AlreadyRunning);
    }
    Ok(TimerState {
        start_time: Some(time.now_ms()),
        is_running: true,
        laps: Vec::new(),
        elapsed_time: 0,
    })
}

pub fn stop(state: &TimerState, time: &impl TimeSource) -> EngineResult<TimerState> {
    let start = running_start(state)?;
    Ok(TimerState {
        start_time: Some(start),
        is_running: false,
        laps: state.laps.clone(),
        elapsed_time: time.now_ms().saturating_sub(start),
    })
}

pub fn lap(state: &TimerState, time: &impl TimeSource) -> EngineResult<TimerState> {
    let start = running_start(state)?;
    let now_ms = time.now_ms();
    // Laps must be strictly after the previous one and never before start.
    match state.last_lap() {
        Some(previous_ms) if now_ms <= previous_ms => {
            return Err(EngineError::LapOutOfOrder { now_ms, previous_ms });
        }
        None if now_ms < start => {
            return Err(EngineError::LapOutOfOrder { now_ms, previous_ms: start });
        }
        _ => {}
    }
    let mut next = state.clone();
    next.laps.push(now_ms);
    Ok(next)
}

/// Always succeeds. A running stopwatch is stopped without recording a lap.
pub fn reset(state: &TimerState) -> TimerState {
    if state.is_running {
        log::debug!("reset while running, discarding {} lap(s)", state.laps.len());
    }
    TimerState::new()
}

/// Live elapsed time while running, the retained total otherwise.
pub fn elapsed_ms(state: &TimerState, now_ms: u64) -> u64 {
    match (state.is_running, state.start_time) {
        (true, Some(start)) => now_ms.saturating_sub(start),
        _ => state.elapsed_time,
    }
}

fn running_start(state: &TimerState) -> EngineResult<u64> {
    match (state.is_running, state.start_time) {
        (true, Some(start)) => Ok(start),
        _ => Err(EngineError::NotRunning),
    }
}

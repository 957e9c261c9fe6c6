//! Pure stopwatch logic with no platform dependencies.
//! State, transitions, lap derivation and table export; all testable on host.
//!
//! Time is always passed in as integer milliseconds through a [`TimeSource`],
//! so every function here is deterministic under a [`ManualClock`].

pub mod clock;
pub mod engine;
pub mod error;
pub mod export;
pub mod laps;
pub mod state;

pub use clock::{ManualClock, TimeSource};
pub use error::{EngineError, EngineResult, PreconditionError, ValidationError};
pub use export::{to_table, Delimiter, RowShape};
pub use laps::{derive, LapDisplay, LapRecord};
pub use state::{create_state, validate, TimerState, ValidationReport, MAX_CLOCK_SKEW_MS};

/// Format milliseconds as "HH:MM:SS". Hours are not capped, so a
/// 100 hour session renders as "100:00:00". Used for export and long sessions.
pub fn format_clock_time(ms: u64) -> String {
    let total_secs = ms / 1000;
    let h = total_secs / 3600;
    let m = (total_secs % 3600) / 60;
    let s = total_secs % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}

/// Format milliseconds as "MM:SS.mmm". Minutes are not capped.
pub fn format_lap_time(ms: u64) -> String {
    let total_secs = ms / 1000;
    let m = total_secs / 60;
    let s = total_secs % 60;
    format!("{:02}:{:02}.{:03}", m, s, ms % 1000)
}

/// Format milliseconds as "MM:SS.cs" (centiseconds) for the live counter.
pub fn format_live_time(ms: u64) -> String {
    let total_secs = ms / 1000;
    let cs = (ms % 1000) / 10;
    let m = total_secs / 60;
    let s = total_secs % 60;
    format!("{:02}:{:02}.{:02}", m, s, cs)
}

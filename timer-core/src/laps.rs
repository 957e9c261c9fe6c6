use serde::Serialize;

use crate::error::PreconditionError;
use crate::state::TimerState;
use crate::{format_clock_time, format_lap_time};

/// Display-ready view of one lap. Recomputed on demand, never persisted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LapRecord {
    /// 1-based.
    pub lap_number: usize,
    pub recorded_at: u64,
    pub absolute_elapsed_time: u64,
    /// Time since the previous lap. The first lap measures from start.
    pub lap_duration: u64,
    pub display: LapDisplay,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct LapDisplay {
    /// `HH:MM:SS` of the absolute elapsed time.
    pub elapsed: String,
    /// `HH:MM:SS` of the lap duration.
    pub duration: String,
    /// `MM:SS.mmm` of the lap duration.
    pub split: String,
}

pub fn derive(state: &TimerState) -> Result<Vec<LapRecord>, PreconditionError> {
    if state.laps.is_empty() {
        return Ok(Vec::new());
    }
    let start = state.start_time.ok_or(PreconditionError { laps: state.laps.len() })?;

    let mut previous = start;
    let records = state
        .laps
        .iter()
        .enumerate()
        .map(|(i, &recorded_at)| {
            let absolute_elapsed_time = recorded_at.saturating_sub(start);
            let lap_duration = recorded_at.saturating_sub(previous);
            previous = recorded_at;
            LapRecord {
                lap_number: i + 1,
                recorded_at,
                absolute_elapsed_time,
                lap_duration,
                display: LapDisplay {
                    elapsed: format_clock_time(absolute_elapsed_time),
                    duration: format_clock_time(lap_duration),
                    split: format_lap_time(lap_duration),
                },
            }
        })
        .collect();
    Ok(records)
}

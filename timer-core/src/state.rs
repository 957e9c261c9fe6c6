//! Canonical stopwatch state and the rules every instance must satisfy.
//!
//! Rules checked by both validators:
//! - `isRunning` implies `startTime` is present
//! - `laps` is strictly ascending and no lap precedes `startTime`
//! - `startTime` is not more than [`MAX_CLOCK_SKEW_MS`] ahead of now
//!
//! [`validate`] works on untrusted JSON and additionally checks field types.
//! It never stops at the first problem; every violation is reported.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// How far in the future a start time may be before it is treated as corrupt.
pub const MAX_CLOCK_SKEW_MS: u64 = 60_000;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    /// Absolute start timestamp. Kept after `stop` so laps stay derivable.
    pub start_time: Option<u64>,
    pub is_running: bool,
    /// Absolute lap timestamps. Durations are derived, never stored.
    pub laps: Vec<u64>,
    /// Total retained by `stop`. Zero while running.
    #[serde(default)]
    pub elapsed_time: u64,
}

impl TimerState {
    /// The reset state: `{null, false, [], 0}`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_reset(&self) -> bool {
        *self == Self::default()
    }

    pub fn last_lap(&self) -> Option<u64> {
        self.laps.last().copied()
    }

    pub fn validate(&self, now_ms: u64) -> ValidationReport {
        let mut errors = Vec::new();
        check_rules(
            self.start_time,
            Some(self.is_running),
            Some(self.laps.as_slice()),
            now_ms,
            &mut errors,
        );
        ValidationReport::from_errors(errors)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self { is_valid: errors.is_empty(), errors }
    }

    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.is_valid {
            Ok(())
        } else {
            Err(ValidationError { errors: self.errors })
        }
    }
}

/// Validate an untrusted JSON rendition of a [`TimerState`].
pub fn validate(value: &Value, now_ms: u64) -> ValidationReport {
    let mut errors = Vec::new();
    let Some(obj) = value.as_object() else {
        errors.push("timer state must be a JSON object".to_string());
        return ValidationReport::from_errors(errors);
    };

    // Outer None: the field failed its type check, skip rules that need it.
    let start_time = match obj.get("startTime") {
        Some(Value::Null) => Some(None),
        Some(v) => match non_negative_int(v) {
            Ok(t) => Some(Some(t)),
            Err(msg) => {
                errors.push(format!("startTime {}", msg));
                None
            }
        },
        None => {
            errors.push("startTime must be an integer (milliseconds) or null".to_string());
            None
        }
    };

    let is_running = match obj.get("isRunning") {
        Some(Value::Bool(b)) => Some(*b),
        _ => {
            errors.push("isRunning must be a boolean".to_string());
            None
        }
    };

    let laps = match obj.get("laps") {
        Some(Value::Array(items)) => {
            let mut parsed = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match non_negative_int(item) {
                    Ok(t) => parsed.push(t),
                    Err(msg) => errors.push(format!("laps[{}] {}", i, msg)),
                }
            }
            if parsed.len() == items.len() { Some(parsed) } else { None }
        }
        _ => {
            errors.push("laps must be an array of integer timestamps".to_string());
            None
        }
    };

    if let Some(v) = obj.get("elapsedTime") {
        if let Err(msg) = non_negative_int(v) {
            errors.push(format!("elapsedTime {}", msg));
        }
    }

    // A mistyped startTime must not also be reported as missing.
    let is_running = if start_time.is_some() { is_running } else { None };
    check_rules(start_time.flatten(), is_running, laps.as_deref(), now_ms, &mut errors);

    ValidationReport::from_errors(errors)
}

/// Build a state from a partial JSON object, filling defaults for missing
/// fields. Fails with every violated rule when the result is invalid.
pub fn create_state(partial: &Value, now_ms: u64) -> Result<TimerState, ValidationError> {
    let mut obj = match partial {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        _ => {
            return Err(ValidationError {
                errors: vec!["timer state must be a JSON object".to_string()],
            })
        }
    };
    obj.entry("startTime").or_insert(Value::Null);
    obj.entry("isRunning").or_insert(Value::Bool(false));
    obj.entry("laps").or_insert_with(|| Value::Array(Vec::new()));
    obj.entry("elapsedTime").or_insert_with(|| Value::from(0u64));

    let value = Value::Object(obj);
    validate(&value, now_ms).into_result()?;
    serde_json::from_value(value).map_err(|e| ValidationError {
        errors: vec![e.to_string()],
    })
}

fn non_negative_int(v: &Value) -> Result<u64, &'static str> {
    match v {
        Value::Number(n) => match n.as_u64() {
            Some(t) => Ok(t),
            None if n.is_i64() => Err("must be non-negative"),
            None => Err("must be an integer (milliseconds) or null"),
        },
        _ => Err("must be an integer (milliseconds) or null"),
    }
}

fn check_rules(
    start_time: Option<u64>,
    is_running: Option<bool>,
    laps: Option<&[u64]>,
    now_ms: u64,
    errors: &mut Vec<String>,
) {
    if is_running == Some(true) && start_time.is_none() {
        errors.push("isRunning is true but startTime is null".to_string());
    }
    if let Some(start) = start_time {
        let limit = now_ms.saturating_add(MAX_CLOCK_SKEW_MS);
        if start > limit {
            errors.push(format!(
                "startTime {} is more than {} ms ahead of now ({})",
                start, MAX_CLOCK_SKEW_MS, now_ms
            ));
        }
    }
    if let (Some(start), Some(laps)) = (start_time, laps) {
        for (i, lap) in laps.iter().enumerate() {
            if *lap < start {
                errors.push(format!("laps[{}]={} is before startTime {}", i, lap, start));
            }
        }
    }
    if let Some(laps) = laps {
        for (i, pair) in laps.windows(2).enumerate() {
            if pair[1] <= pair[0] {
                errors.push(format!(
                    "laps must be strictly ascending: laps[{}]={} is not after laps[{}]={}",
                    i + 1,
                    pair[1],
                    i,
                    pair[0]
                ));
            }
        }
    }
}

use chrono::Utc;
use timer_core::TimeSource;

/// Wall clock in Unix epoch milliseconds, so saved sessions resume correctly
/// after a restart.
pub struct SystemClock;

impl TimeSource for SystemClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
    }
}

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use timer_core::{engine, derive, format_clock_time, format_lap_time, format_live_time};
use timer_core::{EngineError, LapRecord, PreconditionError, TimeSource, TimerState};

use crate::export::{export_to_file, ExportTarget};
use crate::storage::{KeyValueStore, StopwatchStorage};
use crate::ui::{lap_line, RenderSink};

pub struct StopwatchSettings {
    /// Laps closer than this to the previous accepted lap are rejected.
    pub lap_debounce_ms: u64,
    pub max_laps: usize,
    pub export: ExportTarget,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Stopped,
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Lap ignored: only {since_ms} ms since the last lap, wait at least {window_ms} ms")]
    Debounced { since_ms: u64, window_ms: u64 },
    #[error("Lap limit reached ({0} laps)")]
    LapLimit(usize),
    #[error(transparent)]
    Derive(#[from] PreconditionError),
    #[error("Export failed: {0}")]
    Export(String),
}

pub type CommandResult<T> = Result<T, CommandError>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event")]
pub enum StopwatchEvent {
    #[serde(rename = "stopwatch:start", rename_all = "camelCase")]
    Started { start_time: u64 },
    #[serde(rename = "stopwatch:stop", rename_all = "camelCase")]
    Stopped { elapsed_time: u64 },
    #[serde(rename = "stopwatch:lap", rename_all = "camelCase")]
    Lap { lap_number: usize, recorded_at: u64, lap_duration: u64 },
    #[serde(rename = "stopwatch:reset")]
    Reset,
    #[serde(rename = "stopwatch:export")]
    Exported { filename: String, laps: usize },
}

impl StopwatchEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StopwatchEvent::Started { .. } => "stopwatch:start",
            StopwatchEvent::Stopped { .. } => "stopwatch:stop",
            StopwatchEvent::Lap { .. } => "stopwatch:lap",
            StopwatchEvent::Reset => "stopwatch:reset",
            StopwatchEvent::Exported { .. } => "stopwatch:export",
        }
    }
}

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Started {
    pub start_time: u64,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stopped {
    pub elapsed_time: u64,
    pub display: String,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LapRecorded {
    pub lap_number: usize,
    pub recorded_at: u64,
    pub lap_duration: u64,
    pub display: String,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Exported {
    pub filename: String,
    pub csv_data: String,
}

/// `{ success, ...payload }` or `{ success: false, error }`.
#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl CommandResponse {
    pub fn from_result<T: Serialize>(result: &CommandResult<T>) -> Self {
        match result {
            Ok(payload) => {
                let payload = match serde_json::to_value(payload) {
                    Ok(Value::Object(map)) => map,
                    _ => Map::new(),
                };
                Self { success: true, error: None, payload }
            }
            Err(e) => Self { success: false, error: Some(e.to_string()), payload: Map::new() },
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        let mut payload = Map::new();
        payload.insert("message".to_string(), Value::String(message.into()));
        Self { success: true, error: None, payload }
    }
}

type Subscriber = Box<dyn FnMut(&StopwatchEvent)>;

/// Owns the session: applies commands, persists after each change, redraws
/// and notifies subscribers.
pub struct Stopwatch<C, S> {
    clock: C,
    storage: StopwatchStorage<S>,
    state: TimerState,
    settings: StopwatchSettings,
    /// Timestamp of the last accepted lap, for debouncing.
    last_lap_at: Option<u64>,
    sink: Box<dyn RenderSink>,
    subscribers: Vec<Subscriber>,
}

impl<C: TimeSource, S: KeyValueStore> Stopwatch<C, S> {
    /// Resumes whatever session the store holds, or starts idle.
    pub fn new(clock: C, store: S, settings: StopwatchSettings, sink: Box<dyn RenderSink>) -> Self {
        let storage = StopwatchStorage::new(store);
        let state = storage.load(clock.now_ms());
        if state.is_running {
            log::info!("Resuming running stopwatch with {} lap(s)", state.laps.len());
        }
        let mut sw = Self {
            clock,
            storage,
            last_lap_at: state.last_lap(),
            state,
            settings,
            sink,
            subscribers: Vec::new(),
        };
        sw.render();
        sw
    }

    pub fn subscribe(&mut self, subscriber: impl FnMut(&StopwatchEvent) + 'static) {
        self.subscribers.push(Box::new(subscriber));
    }

    pub fn state(&self) -> &TimerState {
        &self.state
    }

    #[cfg(test)]
    pub fn storage(&self) -> &StopwatchStorage<S> {
        &self.storage
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running
    }

    pub fn phase(&self) -> Phase {
        if self.state.is_running {
            Phase::Running
        } else if self.state.is_reset() {
            Phase::Idle
        } else {
            Phase::Stopped
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        engine::elapsed_ms(&self.state, self.clock.now_ms())
    }

    /// `HH:MM:SS (n laps)`, for status lines on long sessions.
    pub fn summary(&self) -> String {
        let laps = self.state.laps.len();
        let plural = if laps == 1 { "" } else { "s" };
        format!("{} ({} lap{})", format_clock_time(self.elapsed_ms()), laps, plural)
    }

    pub fn laps(&self) -> CommandResult<Vec<LapRecord>> {
        Ok(derive(&self.state)?)
    }

    pub fn start(&mut self) -> CommandResult<Started> {
        let next = match engine::start(&self.state, &self.clock) {
            Ok(next) => next,
            Err(e) => return Err(self.fail(e.into())),
        };
        let start_time = next.start_time.unwrap_or_default();
        self.last_lap_at = None;
        self.commit(next, StopwatchEvent::Started { start_time });
        Ok(Started { start_time })
    }

    pub fn stop(&mut self) -> CommandResult<Stopped> {
        let next = match engine::stop(&self.state, &self.clock) {
            Ok(next) => next,
            Err(e) => return Err(self.fail(e.into())),
        };
        let elapsed_time = next.elapsed_time;
        self.commit(next, StopwatchEvent::Stopped { elapsed_time });
        Ok(Stopped { elapsed_time, display: format_live_time(elapsed_time) })
    }

    pub fn lap(&mut self) -> CommandResult<LapRecorded> {
        if !self.state.is_running {
            return Err(self.fail(EngineError::NotRunning.into()));
        }
        let now_ms = self.clock.now_ms();
        // A clock that went backwards is the engine's to reject, not debounce.
        if let Some(last) = self.last_lap_at.filter(|&last| now_ms >= last) {
            let since_ms = now_ms - last;
            if since_ms < self.settings.lap_debounce_ms {
                let window_ms = self.settings.lap_debounce_ms;
                return Err(self.fail(CommandError::Debounced { since_ms, window_ms }));
            }
        }
        if self.state.laps.len() >= self.settings.max_laps {
            return Err(self.fail(CommandError::LapLimit(self.settings.max_laps)));
        }

        let previous = self.state.last_lap().or(self.state.start_time).unwrap_or_default();
        let next = match engine::lap(&self.state, &self.clock) {
            Ok(next) => next,
            Err(e) => return Err(self.fail(e.into())),
        };
        let recorded_at = next.last_lap().unwrap_or(now_ms);
        let lap_number = next.laps.len();
        let lap_duration = recorded_at.saturating_sub(previous);

        self.last_lap_at = Some(recorded_at);
        self.commit(next, StopwatchEvent::Lap { lap_number, recorded_at, lap_duration });
        Ok(LapRecorded {
            lap_number,
            recorded_at,
            lap_duration,
            display: format_lap_time(lap_duration),
        })
    }

    /// Always succeeds, also while running. Clears the saved session.
    pub fn reset(&mut self) -> CommandResult<()> {
        self.state = engine::reset(&self.state);
        self.last_lap_at = None;
        self.storage.clear();
        self.render();
        self.dispatch(StopwatchEvent::Reset);
        Ok(())
    }

    pub fn export_csv(&mut self) -> CommandResult<Exported> {
        let records = match derive(&self.state) {
            Ok(records) => records,
            Err(e) => return Err(self.fail(e.into())),
        };
        let outcome = export_to_file(&records, &self.settings.export, self.clock.now_ms());
        if !outcome.success {
            let message = outcome.error.unwrap_or_else(|| "unknown error".to_string());
            return Err(self.fail(CommandError::Export(message)));
        }
        self.dispatch(StopwatchEvent::Exported {
            filename: outcome.filename.clone(),
            laps: records.len(),
        });
        Ok(Exported { filename: outcome.filename, csv_data: outcome.csv_data })
    }

    /// Display refresh. Reads state only.
    pub fn tick(&mut self) {
        self.render();
    }

    fn commit(&mut self, next: TimerState, event: StopwatchEvent) {
        log::debug!("{} -> {:?}", event.name(), next);
        self.state = next;
        self.storage.save(&self.state);
        self.render();
        self.dispatch(event);
    }

    fn fail(&mut self, err: CommandError) -> CommandError {
        log::debug!("command rejected: {}", err);
        self.sink.show_error(&err.to_string());
        err
    }

    fn render(&mut self) {
        let elapsed = format_live_time(self.elapsed_ms());
        let laps: Vec<String> = match derive(&self.state) {
            Ok(records) => records
                .iter()
                .map(|r| lap_line(r.lap_number, &r.display.split, &r.display.elapsed))
                .collect(),
            Err(e) => {
                log::warn!("{}", e);
                Vec::new()
            }
        };
        self.sink.render(&elapsed, &laps);
    }

    fn dispatch(&mut self, event: StopwatchEvent) {
        for subscriber in self.subscribers.iter_mut() {
            subscriber(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::rc::Rc;

    use timer_core::{ManualClock, RowShape};

    use crate::storage::MemoryStore;

    #[derive(Clone, Default)]
    struct Recorder {
        frames: Rc<RefCell<Vec<(String, Vec<String>)>>>,
        errors: Rc<RefCell<Vec<String>>>,
    }

    impl RenderSink for Recorder {
        fn render(&mut self, elapsed: &str, laps: &[String]) {
            self.frames.borrow_mut().push((elapsed.to_string(), laps.to_vec()));
        }

        fn show_error(&mut self, message: &str) {
            self.errors.borrow_mut().push(message.to_string());
        }
    }

    fn settings(export_dir: PathBuf) -> StopwatchSettings {
        StopwatchSettings {
            lap_debounce_ms: 100,
            max_laps: 99,
            export: ExportTarget { dir: export_dir, prefix: "laps".into(), shape: RowShape::Split },
        }
    }

    fn stopwatch(clock: &ManualClock) -> (Stopwatch<&ManualClock, MemoryStore>, Recorder) {
        let recorder = Recorder::default();
        let sw = Stopwatch::new(
            clock,
            MemoryStore::new(),
            settings(std::env::temp_dir()),
            Box::new(recorder.clone()),
        );
        (sw, recorder)
    }

    fn stored_is_empty(sw: &Stopwatch<&ManualClock, MemoryStore>) -> bool {
        sw.storage().store().get("lapwatch", "stopwatch_state").unwrap().is_none()
    }

    #[test]
    fn test_phases() {
        let clock = ManualClock::new(1000);
        let (mut sw, _) = stopwatch(&clock);
        assert_eq!(sw.phase(), Phase::Idle);
        sw.start().unwrap();
        assert_eq!(sw.phase(), Phase::Running);
        clock.advance(500);
        sw.stop().unwrap();
        assert_eq!(sw.phase(), Phase::Stopped);
        sw.start().unwrap();
        assert_eq!(sw.phase(), Phase::Running);
        sw.reset().unwrap();
        assert_eq!(sw.phase(), Phase::Idle);
    }

    #[test]
    fn test_start_twice_fails() {
        let clock = ManualClock::new(0);
        let (mut sw, recorder) = stopwatch(&clock);
        sw.start().unwrap();
        let err = sw.start().unwrap_err();
        assert_eq!(err.to_string(), "Already running");
        assert_eq!(*recorder.errors.borrow(), vec!["Already running".to_string()]);
    }

    #[test]
    fn test_stop_twice() {
        let clock = ManualClock::new(1000);
        let (mut sw, _) = stopwatch(&clock);
        sw.start().unwrap();
        clock.set(1750);
        assert_eq!(sw.stop().unwrap().elapsed_time, 750);
        clock.set(9000);
        let err = sw.stop().unwrap_err();
        assert_eq!(err.to_string(), "Not running");
        assert_eq!(sw.state().elapsed_time, 750);
        assert_eq!(sw.elapsed_ms(), 750);
    }

    #[test]
    fn test_lap_debounce() {
        let clock = ManualClock::new(0);
        let (mut sw, _) = stopwatch(&clock);
        sw.start().unwrap();
        clock.set(500);
        assert_eq!(sw.lap().unwrap().lap_number, 1);

        clock.set(550);
        let err = sw.lap().unwrap_err();
        assert!(matches!(err, CommandError::Debounced { since_ms: 50, window_ms: 100 }));
        assert_eq!(sw.state().laps, vec![500]);

        clock.set(601);
        assert_eq!(sw.lap().unwrap().lap_number, 2);
        assert_eq!(sw.state().laps, vec![500, 601]);
    }

    #[test]
    fn test_debounce_window_is_inclusive_at_limit() {
        let clock = ManualClock::new(0);
        let (mut sw, _) = stopwatch(&clock);
        sw.start().unwrap();
        clock.set(200);
        sw.lap().unwrap();
        clock.set(300);
        assert!(sw.lap().is_ok());
    }

    #[test]
    fn test_rejected_lap_does_not_move_window() {
        let clock = ManualClock::new(0);
        let (mut sw, _) = stopwatch(&clock);
        sw.start().unwrap();
        clock.set(1000);
        sw.lap().unwrap();
        clock.set(1060);
        assert!(sw.lap().is_err());
        clock.set(1100);
        assert!(sw.lap().is_ok());
    }

    #[test]
    fn test_lap_after_clock_went_backwards() {
        let clock = ManualClock::new(0);
        let (mut sw, recorder) = stopwatch(&clock);
        sw.start().unwrap();
        clock.set(500);
        sw.lap().unwrap();

        clock.set(450);
        let err = sw.lap().unwrap_err();
        assert!(matches!(
            err,
            CommandError::Engine(EngineError::LapOutOfOrder { now_ms: 450, previous_ms: 500 })
        ));
        assert_eq!(sw.state().laps, vec![500]);
        assert!(recorder.errors.borrow()[0].contains("out of order"));
    }

    #[test]
    fn test_lap_when_not_running() {
        let clock = ManualClock::new(0);
        let (mut sw, _) = stopwatch(&clock);
        assert_eq!(sw.lap().unwrap_err().to_string(), "Not running");
    }

    #[test]
    fn test_lap_limit() {
        let clock = ManualClock::new(0);
        let recorder = Recorder::default();
        let mut s = settings(std::env::temp_dir());
        s.max_laps = 2;
        let mut sw = Stopwatch::new(&clock, MemoryStore::new(), s, Box::new(recorder));
        sw.start().unwrap();
        for _ in 0..2 {
            clock.advance(200);
            sw.lap().unwrap();
        }
        clock.advance(200);
        assert!(matches!(sw.lap(), Err(CommandError::LapLimit(2))));
    }

    #[test]
    fn test_lap_payload_and_event() {
        let clock = ManualClock::new(1000);
        let (mut sw, _) = stopwatch(&clock);
        let events = Rc::new(RefCell::new(Vec::new()));
        let seen = events.clone();
        sw.subscribe(move |e: &StopwatchEvent| seen.borrow_mut().push(e.clone()));

        sw.start().unwrap();
        clock.set(1600);
        let first = sw.lap().unwrap();
        assert_eq!(first.lap_duration, 600);
        assert_eq!(first.display, "00:00.600");
        clock.set(2400);
        let second = sw.lap().unwrap();
        assert_eq!(second.lap_duration, 800);

        let events = events.borrow();
        assert_eq!(events[0], StopwatchEvent::Started { start_time: 1000 });
        assert_eq!(
            events[2],
            StopwatchEvent::Lap { lap_number: 2, recorded_at: 2400, lap_duration: 800 }
        );
        assert_eq!(events[2].name(), "stopwatch:lap");
    }

    #[test]
    fn test_each_change_is_persisted() {
        let clock = ManualClock::new(1000);
        let (mut sw, _) = stopwatch(&clock);
        sw.start().unwrap();
        clock.set(1300);
        sw.lap().unwrap();
        assert_eq!(sw.storage().load(clock.now_ms()), *sw.state());
        clock.set(2000);
        sw.stop().unwrap();
        let saved = sw.storage().load(clock.now_ms());
        assert_eq!(saved.laps, vec![1300]);
        assert_eq!(saved.elapsed_time, 1000);
        assert!(!saved.is_running);
    }

    #[test]
    fn test_reset_while_running_clears_snapshot() {
        let clock = ManualClock::new(1000);
        let (mut sw, _) = stopwatch(&clock);
        sw.start().unwrap();
        clock.set(1500);
        sw.lap().unwrap();
        assert!(!stored_is_empty(&sw));

        assert!(sw.reset().is_ok());
        assert_eq!(
            *sw.state(),
            TimerState { start_time: None, is_running: false, laps: vec![], elapsed_time: 0 }
        );
        assert!(stored_is_empty(&sw));
    }

    #[test]
    fn test_reset_clears_debounce() {
        let clock = ManualClock::new(0);
        let (mut sw, _) = stopwatch(&clock);
        sw.start().unwrap();
        clock.set(10);
        sw.lap().unwrap();
        sw.reset().unwrap();
        sw.start().unwrap();
        clock.set(20);
        assert!(sw.lap().is_ok());
    }

    #[test]
    fn test_resume_from_storage() {
        let clock = ManualClock::new(1000);
        let store = {
            let (mut sw, _) = stopwatch(&clock);
            sw.start().unwrap();
            clock.set(1400);
            sw.lap().unwrap();
            let data = sw.storage().store().get("lapwatch", "stopwatch_state").unwrap().unwrap();
            let mut store = MemoryStore::new();
            store.set("lapwatch", "stopwatch_state", &data).unwrap();
            store
        };

        clock.set(1450);
        let mut sw = Stopwatch::new(
            &clock,
            store,
            settings(std::env::temp_dir()),
            Box::new(Recorder::default()),
        );
        assert_eq!(sw.phase(), Phase::Running);
        assert_eq!(sw.elapsed_ms(), 450);
        // Debounce window survives the reload.
        assert!(sw.lap().is_err());
        clock.set(1500);
        assert!(sw.lap().is_ok());
    }

    #[test]
    fn test_unavailable_storage_still_works() {
        let clock = ManualClock::new(0);
        let mut sw = Stopwatch::new(
            &clock,
            MemoryStore::unavailable(),
            settings(std::env::temp_dir()),
            Box::new(Recorder::default()),
        );
        sw.start().unwrap();
        clock.set(300);
        sw.lap().unwrap();
        assert!(!sw.storage().is_enabled());
        assert_eq!(sw.state().laps, vec![300]);
        assert!(sw.reset().is_ok());
    }

    #[test]
    fn test_render_and_tick() {
        let clock = ManualClock::new(0);
        let (mut sw, recorder) = stopwatch(&clock);
        sw.start().unwrap();
        clock.set(1234);
        sw.lap().unwrap();
        clock.set(2500);
        let before = sw.state().clone();
        sw.tick();
        assert_eq!(*sw.state(), before);

        let frames = recorder.frames.borrow();
        let (elapsed, laps) = frames.last().unwrap();
        assert_eq!(elapsed, "00:02.50");
        assert_eq!(laps, &vec!["Lap  1: 00:01.234  (00:00:01)".to_string()]);
    }

    #[test]
    fn test_export_csv() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(1000);
        let recorder = Recorder::default();
        let mut sw = Stopwatch::new(
            &clock,
            MemoryStore::new(),
            settings(dir.path().to_path_buf()),
            Box::new(recorder),
        );
        sw.start().unwrap();
        clock.set(1600);
        sw.lap().unwrap();
        clock.set(2200);
        sw.lap().unwrap();
        clock.set(3000);
        sw.stop().unwrap();

        let exported = sw.export_csv().unwrap();
        assert_eq!(exported.filename, "laps_3000.csv");
        let lines: Vec<&str> = exported.csv_data.lines().collect();
        assert_eq!(lines, vec!["Lap,Time", "1,00:00.600", "2,00:00.600"]);
        assert!(dir.path().join("laps_3000.csv").exists());
    }

    #[test]
    fn test_export_failure_is_a_result() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        let clock = ManualClock::new(0);
        let mut sw = Stopwatch::new(
            &clock,
            MemoryStore::new(),
            settings(blocker),
            Box::new(Recorder::default()),
        );
        let response = CommandResponse::from_result(&sw.export_csv());
        assert!(!response.success);
        assert!(response.error.unwrap().starts_with("Export failed"));
    }

    #[test]
    fn test_command_response_json() {
        let ok: CommandResult<Started> = Ok(Started { start_time: 5 });
        let json = serde_json::to_value(CommandResponse::from_result(&ok)).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "startTime": 5}));

        let err: CommandResult<Started> = Err(EngineError::NotRunning.into());
        let json = serde_json::to_value(CommandResponse::from_result(&err)).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "error": "Not running"}));

        let reset: CommandResult<()> = Ok(());
        let json = serde_json::to_value(CommandResponse::from_result(&reset)).unwrap();
        assert_eq!(json, serde_json::json!({"success": true}));
    }

    #[test]
    fn test_event_serialization() {
        let event = StopwatchEvent::Lap { lap_number: 1, recorded_at: 10, lap_duration: 10 };
        let json = serde_json::to_value(event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "event": "stopwatch:lap",
                "lapNumber": 1,
                "recordedAt": 10,
                "lapDuration": 10
            })
        );
    }

    #[test]
    fn test_summary() {
        let clock = ManualClock::new(0);
        let (mut sw, _) = stopwatch(&clock);
        sw.start().unwrap();
        clock.set(500);
        sw.lap().unwrap();
        clock.set(3_661_000);
        assert_eq!(sw.summary(), "01:01:01 (1 lap)");
        sw.reset().unwrap();
        assert_eq!(sw.summary(), "00:00:00 (0 laps)");
    }
}

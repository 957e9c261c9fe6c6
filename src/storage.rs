use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;
use tempfile::NamedTempFile;
use thiserror::Error;
use timer_core::{create_state, TimerState, ValidationError};

const DICT_NAME: &str = "lapwatch";
const KEY_STOPWATCH: &str = "stopwatch_state";
const SNAPSHOT_VERSION: u64 = 1;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable")]
    Unavailable,
    #[error("I/O error at {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable key-value storage, grouped into dictionaries.
pub trait KeyValueStore {
    fn get(&self, dict: &str, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&mut self, dict: &str, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&mut self, dict: &str, key: &str) -> Result<(), StorageError>;
}

/// One file per key under `<root>/<dict>/<key>.json`. Writes are atomic.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn key_path(&self, dict: &str, key: &str) -> PathBuf {
        self.root.join(dict).join(format!("{}.json", key))
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, dict: &str, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.key_path(dict, key);
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }

    fn set(&mut self, dict: &str, key: &str, value: &str) -> Result<(), StorageError> {
        let dir = self.root.join(dict);
        let io_err = |source| StorageError::Io { path: dir.clone(), source };
        fs::create_dir_all(&dir).map_err(io_err)?;

        let mut tmp = NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(value.as_bytes()).map_err(io_err)?;
        tmp.flush().map_err(io_err)?;

        let path = self.key_path(dict, key);
        tmp.persist(&path).map_err(|e| StorageError::Io { path, source: e.error })?;
        Ok(())
    }

    fn remove(&mut self, dict: &str, key: &str) -> Result<(), StorageError> {
        let path = self.key_path(dict, key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StorageError::Io { path, source }),
        }
    }
}

/// Session-only store. Can be built unavailable to exercise degraded paths.
#[derive(Default)]
pub struct MemoryStore {
    entries: HashMap<(String, String), String>,
    unavailable: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn unavailable() -> Self {
        Self { entries: HashMap::new(), unavailable: true }
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable {
            Err(StorageError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, dict: &str, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        Ok(self.entries.get(&(dict.to_string(), key.to_string())).cloned())
    }

    fn set(&mut self, dict: &str, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        self.entries.insert((dict.to_string(), key.to_string()), value.to_string());
        Ok(())
    }

    fn remove(&mut self, dict: &str, key: &str) -> Result<(), StorageError> {
        self.check()?;
        self.entries.remove(&(dict.to_string(), key.to_string()));
        Ok(())
    }
}

#[derive(Serialize)]
struct Snapshot<'a> {
    version: u64,
    state: &'a TimerState,
}

/// Persists the stopwatch snapshot. Storage failures are logged, never
/// returned; after a failed write persistence stays off for the session and
/// the stale snapshot is removed if the store still allows it, so the next
/// launch does not resume an outdated session.
pub struct StopwatchStorage<S> {
    store: S,
    enabled: bool,
}

impl<S: KeyValueStore> StopwatchStorage<S> {
    pub fn new(store: S) -> Self {
        Self { store, enabled: true }
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[cfg(test)]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn save(&mut self, state: &TimerState) {
        if !self.enabled {
            return;
        }
        let result = serde_json::to_string(&Snapshot { version: SNAPSHOT_VERSION, state })
            .map_err(StorageError::from)
            .and_then(|data| self.store.set(DICT_NAME, KEY_STOPWATCH, &data));
        if let Err(e) = result {
            log::warn!(
                "Failed to save stopwatch state, persistence disabled for this session: {}",
                e
            );
            self.enabled = false;
            if let Err(e) = self.store.remove(DICT_NAME, KEY_STOPWATCH) {
                log::debug!("Stale stopwatch state left in place: {}", e);
            }
        }
    }

    pub fn load(&self, now_ms: u64) -> TimerState {
        match self.store.get(DICT_NAME, KEY_STOPWATCH) {
            Ok(Some(data)) => match parse_snapshot(&data, now_ms) {
                Ok(state) => state,
                Err(e) => {
                    log::warn!("Discarding stored stopwatch state: {}", e);
                    TimerState::new()
                }
            },
            Ok(None) => TimerState::new(),
            Err(e) => {
                log::warn!("Failed to load stopwatch state: {}", e);
                TimerState::new()
            }
        }
    }

    pub fn clear(&mut self) {
        if let Err(e) = self.store.remove(DICT_NAME, KEY_STOPWATCH) {
            log::warn!("Failed to clear stopwatch state: {}", e);
        }
    }
}

/// Decode a stored snapshot. Anything malformed is a [`ValidationError`].
pub fn parse_snapshot(data: &str, now_ms: u64) -> Result<TimerState, ValidationError> {
    let invalid = |msg: String| ValidationError { errors: vec![msg] };
    let value: Value = serde_json::from_str(data)
        .map_err(|e| invalid(format!("snapshot is not valid JSON: {}", e)))?;
    match value.get("version").and_then(Value::as_u64) {
        Some(SNAPSHOT_VERSION) => {}
        Some(v) => return Err(invalid(format!("unsupported snapshot version {}", v))),
        None => return Err(invalid("snapshot version is missing".to_string())),
    }
    let state = value
        .get("state")
        .ok_or_else(|| invalid("snapshot has no state".to_string()))?;
    create_state(state, now_ms)
}

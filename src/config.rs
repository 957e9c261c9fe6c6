//! Settings for the stopwatch front end.
//!
//! Values come from defaults, then an optional TOML file, then command line
//! flags. The merged result is validated as a whole and every bad field is
//! reported at once.

use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use directories::{ProjectDirs, UserDirs};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use timer_core::RowShape;

const CONFIG_FILE_NAME: &str = "lapwatch.toml";

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {source}")]
    ReadError { path: PathBuf, source: std::io::Error },

    #[error("Failed to parse config file at {path}: {source}")]
    ParseError { path: PathBuf, source: toml::de::Error },

    #[error("Config validation failed: {0}")]
    ValidationError(String),

    #[error("Could not determine a home directory for lapwatch data")]
    NoHomeDirectory,
}

#[derive(Debug, Parser)]
#[command(name = "lapwatch", version, about = "Stopwatch with laps, CSV export and saved sessions")]
pub struct Cli {
    /// Config file (defaults to lapwatch.toml in the user config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory holding the saved session
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Directory CSV exports are written to
    #[arg(long)]
    pub export_dir: Option<PathBuf>,

    /// Filename prefix for CSV exports
    #[arg(long)]
    pub export_prefix: Option<String>,

    /// Export columns: "split" or "detailed"
    #[arg(long, value_parser = parse_shape)]
    pub export_shape: Option<RowShape>,

    /// Display refresh interval while running
    #[arg(long)]
    pub tick_ms: Option<u64>,

    /// Minimum gap between accepted laps
    #[arg(long)]
    pub debounce_ms: Option<u64>,

    /// Keep the session in memory only
    #[arg(long)]
    pub no_persist: bool,

    /// Answer every command with one JSON line instead of drawing
    #[arg(long)]
    pub json: bool,

    /// Log filter, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

fn parse_shape(s: &str) -> Result<RowShape, String> {
    match s {
        "split" => Ok(RowShape::Split),
        "detailed" => Ok(RowShape::Detailed),
        other => Err(format!("unknown export shape '{}', expected split or detailed", other)),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data_dir: Option<PathBuf>,
    pub export_dir: Option<PathBuf>,
    pub export_prefix: String,
    pub export_shape: RowShape,
    pub tick_interval_ms: u64,
    pub lap_debounce_ms: u64,
    pub max_laps: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            export_dir: None,
            export_prefix: "laps".to_string(),
            export_shape: RowShape::Split,
            tick_interval_ms: 10,
            lap_debounce_ms: 100,
            max_laps: 99,
        }
    }
}

impl AppConfig {
    /// Resolve the config file, apply flags, validate.
    pub fn load(cli: &Cli) -> ConfigResult<Self> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    fn apply_cli(&mut self, cli: &Cli) {
        if let Some(dir) = &cli.data_dir {
            self.data_dir = Some(dir.clone());
        }
        if let Some(dir) = &cli.export_dir {
            self.export_dir = Some(dir.clone());
        }
        if let Some(prefix) = &cli.export_prefix {
            self.export_prefix = prefix.clone();
        }
        if let Some(shape) = cli.export_shape {
            self.export_shape = shape;
        }
        if let Some(ms) = cli.tick_ms {
            self.tick_interval_ms = ms;
        }
        if let Some(ms) = cli.debounce_ms {
            self.lap_debounce_ms = ms;
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        if !(1..=1000).contains(&self.tick_interval_ms) {
            errors.push(format!(
                "tick_interval_ms must be between 1 and 1000 (got: {})",
                self.tick_interval_ms
            ));
        }
        if self.lap_debounce_ms > 10_000 {
            errors.push(format!(
                "lap_debounce_ms must be at most 10000 (got: {})",
                self.lap_debounce_ms
            ));
        }
        if self.export_prefix.trim().is_empty() {
            errors.push("export_prefix must not be empty".to_string());
        } else if self.export_prefix.contains(['/', '\\']) {
            errors.push(format!(
                "export_prefix must not contain path separators (got: {})",
                self.export_prefix
            ));
        }
        if self.max_laps == 0 {
            errors.push("max_laps must be at least 1".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError(errors.join("; ")))
        }
    }

    pub fn resolved_data_dir(&self) -> ConfigResult<PathBuf> {
        if let Some(dir) = &self.data_dir {
            return Ok(dir.clone());
        }
        project_dirs()
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or(ConfigError::NoHomeDirectory)
    }

    /// Explicit directory, else the user's downloads folder, else the
    /// working directory.
    pub fn resolved_export_dir(&self) -> PathBuf {
        if let Some(dir) = &self.export_dir {
            return dir.clone();
        }
        UserDirs::new()
            .and_then(|dirs| dirs.download_dir().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "lapwatch")
}

fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
}

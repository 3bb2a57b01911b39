//! Configuration loading
//!
//! Every setting resolves in priority order: CLI argument (applied by the
//! binary), environment variable, TOML config file, compiled default. A
//! missing config file is not an error — the defaults are a complete,
//! runnable configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::{Error, Result};

/// Which adapter backs the broker or the feature store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Memory,
    Sqlite,
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "memory" => Ok(BackendKind::Memory),
            "sqlite" => Ok(BackendKind::Sqlite),
            other => Err(Error::Config(format!(
                "unknown backend '{other}' (expected 'memory' or 'sqlite')"
            ))),
        }
    }
}

/// Runtime configuration shared by the pipeline and the read surface
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Read-surface listen address
    pub bind_addr: String,
    pub broker_backend: BackendKind,
    pub store_backend: BackendKind,
    /// Database file used by the sqlite backends
    pub database_path: PathBuf,
    /// Bearer tokens accepted by the read surface
    pub api_tokens: Vec<String>,
    /// Max requests per client within the rate-limit window
    pub rate_limit_max: u32,
    pub rate_limit_window_secs: u64,
    /// How long feature records stay in the real-time cache
    pub cache_window_secs: u64,
    pub sensor_id: String,
    /// Milliseconds between synthetic sensor publishes
    pub sensor_interval_ms: u64,
    /// Milliseconds between writer flush cycles
    pub writer_flush_ms: u64,
    /// Stage back-off when its input source is empty
    pub idle_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5800".to_string(),
            broker_backend: BackendKind::Memory,
            store_backend: BackendKind::Memory,
            database_path: PathBuf::from("afp.db"),
            api_tokens: vec!["test-token".to_string(), "valid-token".to_string()],
            rate_limit_max: 100,
            rate_limit_window_secs: 60,
            cache_window_secs: 300,
            sensor_id: "sensor-01".to_string(),
            sensor_interval_ms: 100,
            writer_flush_ms: 500,
            idle_backoff_ms: 10,
        }
    }
}

impl Config {
    /// Load configuration: TOML file (if present), then environment overrides.
    ///
    /// `config_path` comes from the binary's CLI; when `None` the default
    /// `./afp.toml` is tried. A missing file falls back to defaults with a
    /// warning, matching zero-config startup; a file that exists but does
    /// not parse is a hard error.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let path = config_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("afp.toml"));

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            toml::from_str(&content)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
        } else {
            if config_path.is_some() {
                warn!("Config file not found: {} (using defaults)", path.display());
            }
            Self::default()
        };

        config.apply_env();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("AFP_BIND_ADDR") {
            self.bind_addr = value;
        }
        if let Ok(value) = std::env::var("AFP_BROKER_BACKEND") {
            match value.parse() {
                Ok(kind) => self.broker_backend = kind,
                Err(e) => warn!("Ignoring AFP_BROKER_BACKEND: {e}"),
            }
        }
        if let Ok(value) = std::env::var("AFP_STORE_BACKEND") {
            match value.parse() {
                Ok(kind) => self.store_backend = kind,
                Err(e) => warn!("Ignoring AFP_STORE_BACKEND: {e}"),
            }
        }
        if let Ok(value) = std::env::var("AFP_DATABASE_PATH") {
            self.database_path = PathBuf::from(value);
        }
        if let Ok(value) = std::env::var("AFP_API_TOKENS") {
            let tokens: Vec<String> = value
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_owned)
                .collect();
            if !tokens.is_empty() {
                self.api_tokens = tokens;
            }
        }
    }

    pub fn sensor_interval(&self) -> Duration {
        Duration::from_millis(self.sensor_interval_ms)
    }

    pub fn writer_flush_interval(&self) -> Duration {
        Duration::from_millis(self.writer_flush_ms)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }

    pub fn cache_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_window_secs as i64)
    }
}

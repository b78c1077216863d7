//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::models::listener::ListenerOptions;
use crate::{AppError, Result};

fn default_bus_capacity() -> usize {
    256
}

fn default_delay() -> u32 {
    60
}

fn default_jitter() -> f64 {
    0.0
}

fn default_lost_limit() -> u32 {
    60
}

/// Default cadence parameters seeded into new listener definitions.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct SessionDefaults {
    /// Check-in interval in seconds.
    #[serde(default = "default_delay")]
    pub delay: u32,
    /// Jitter fraction within `[0, 1]`.
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Consecutive missed check-ins tolerated by the agent.
    #[serde(default = "default_lost_limit")]
    pub lost_limit: u32,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            delay: default_delay(),
            jitter: default_jitter(),
            lost_limit: default_lost_limit(),
        }
    }
}

/// Initial IP allow/deny patterns for the global filter.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct FilterConfig {
    /// Patterns admitted; empty means allow-all.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Patterns rejected; deny wins over allow.
    #[serde(default)]
    pub deny: Vec<String>,
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Directory holding the database and other server state.
    pub data_dir: PathBuf,
    /// Buffered capacity of the event bus per subscriber.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
    /// Default session cadence parameters.
    #[serde(default)]
    pub defaults: SessionDefaults,
    /// Initial IP filter lists.
    #[serde(default)]
    pub filter: FilterConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Path of the `SQLite` database file under the data directory.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("cinder.db")
    }

    /// Listener options pre-seeded with the configured session defaults.
    #[must_use]
    pub fn listener_defaults(&self) -> ListenerOptions {
        ListenerOptions {
            default_delay: self.defaults.delay,
            default_jitter: self.defaults.jitter,
            default_lost_limit: self.defaults.lost_limit,
            ..ListenerOptions::default()
        }
    }

    fn validate(&self) -> Result<()> {
        if self.bus_capacity == 0 {
            return Err(AppError::Config("bus_capacity must be greater than zero".into()));
        }
        if self.defaults.delay == 0 {
            return Err(AppError::Config("defaults.delay must be greater than zero".into()));
        }
        if !(0.0..=1.0).contains(&self.defaults.jitter) {
            return Err(AppError::Config(format!(
                "defaults.jitter must be within [0, 1], got {}",
                self.defaults.jitter
            )));
        }
        Ok(())
    }
}

//! Process-level simulation configuration.
//!
//! A [`SimulationConfig`] is read once at startup (usually from TOML) and
//! handed explicitly to [`WorkerPool::new`](crate::pool::WorkerPool::new) and
//! [`CellGraphManager::new`](crate::manager::CellGraphManager::new).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The worker pool must have at least one thread.
    #[error("worker_threads must be nonzero")]
    ZeroWorkers,

    /// The tick period must be at least one millisecond.
    #[error("tick_interval_ms must be nonzero")]
    ZeroInterval,

    /// The simulated timestep must be finite and positive.
    #[error("timestep must be finite and positive, got {0}")]
    InvalidTimestep(f64),

    /// The TOML source could not be parsed.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// SimulationConfig
// ===========================================================================

/// Static configuration shared by every graph in a simulation domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Number of threads in the shared worker pool. Fixed at startup.
    pub worker_threads: usize,
    /// Wall-clock period between two ticks of one graph.
    pub tick_interval_ms: u64,
    /// Simulated seconds advanced by each tick, independent of wall-clock drift.
    pub timestep: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            worker_threads: 2,
            tick_interval_ms: 50,
            timestep: 0.05,
        }
    }
}

impl SimulationConfig {
    /// Parse and validate a TOML document.
    ///
    /// ```toml
    /// worker_threads = 4
    /// tick_interval_ms = 20
    /// timestep = 0.02
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Self::parse(source, Path::new("<inline>"))
    }

    /// Read, parse, and validate a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, path)
    }

    fn parse(source: &str, file: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse {
            file: file.to_path_buf(),
            detail: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the scheduler cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if !self.timestep.is_finite() || self.timestep <= 0.0 {
            return Err(ConfigError::InvalidTimestep(self.timestep));
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

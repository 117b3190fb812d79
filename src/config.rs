//! Worker configuration.
//!
//! [`WorkerConfig`] gathers every knob of the producer and the consumer.
//! It can be built in code or read from a JSON file; missing fields take
//! their defaults.
//!
//! ```
//! use trial_worker::WorkerConfig;
//!
//! let config: WorkerConfig =
//!     serde_json::from_str(r#"{"pool_size": 4, "strategy": {"of_type": "mean"}}"#).unwrap();
//! assert_eq!(config.pool_size, 4);
//! assert_eq!(config.max_attempts, 100);
//! ```

use core::time::Duration;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::strategy::StrategyConfig;

/// Configuration of a worker: producer, consumer and outer loop.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of new trials each `produce` call registers.
    pub pool_size: usize,
    /// Suggestion rounds allowed per `produce` call.
    pub max_attempts: usize,
    /// Pacemaker heartbeat interval in milliseconds.
    pub heartbeat_ms: u64,
    /// Root under which trial working directories are created.
    pub working_dir: PathBuf,
    /// Exit code by which the evaluated program reports an interruption.
    pub interrupt_code: i32,
    /// Run trials even if the program's code changed since experiment creation.
    pub ignore_code_changes: bool,
    /// Parallel strategy used to lie about in-flight trials.
    pub strategy: StrategyConfig,
    /// Stop once this many trials are completed.
    pub max_trials: Option<usize>,
    /// Give up once this many trials broke in one worker loop.
    pub max_broken: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            pool_size: 1,
            max_attempts: 100,
            heartbeat_ms: 60_000,
            working_dir: std::env::temp_dir().join("trial-worker"),
            interrupt_code: 130,
            ignore_code_changes: false,
            strategy: StrategyConfig::default(),
            max_trials: None,
            max_broken: 3,
        }
    }
}

impl WorkerConfig {
    /// Reads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an I/O or JSON error if the file cannot be read or parsed,
    /// and [`Error::InvalidConfig`] if a value is out of range.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that every value is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::InvalidConfig("pool_size must be at least 1".into()));
        }
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.heartbeat_ms == 0 {
            return Err(Error::InvalidConfig("heartbeat_ms must be positive".into()));
        }
        if self.max_broken == 0 {
            return Err(Error::InvalidConfig("max_broken must be at least 1".into()));
        }
        Ok(())
    }

    /// The heartbeat interval.
    #[must_use]
    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
}

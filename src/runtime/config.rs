//! Event-loop configuration.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic** — values set on a [`LoopConfig`] before construction
//! 2. **Environment variables** — values from `FILAMENT_*` env vars
//! 3. **Defaults** — built-in defaults from [`LoopConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `FILAMENT_DEFAULT_CONCURRENCY` | `usize` | `default_concurrency` |
//! | `FILAMENT_FIBER_STACK_SIZE` | `usize` | `fiber_stack_size` |
//! | `FILAMENT_FIBER_NAME_PREFIX` | `String` | `fiber_name_prefix` |
//! | `FILAMENT_MAX_IDLE_WAIT_MS` | `u64` | `max_idle_wait` |

use std::time::Duration;

/// Environment variable name for the default concurrency cap.
pub const ENV_DEFAULT_CONCURRENCY: &str = "FILAMENT_DEFAULT_CONCURRENCY";
/// Environment variable name for the fiber thread stack size.
pub const ENV_FIBER_STACK_SIZE: &str = "FILAMENT_FIBER_STACK_SIZE";
/// Environment variable name for the fiber thread name prefix.
pub const ENV_FIBER_NAME_PREFIX: &str = "FILAMENT_FIBER_NAME_PREFIX";
/// Environment variable name for the idle-sleep cap in milliseconds.
pub const ENV_MAX_IDLE_WAIT_MS: &str = "FILAMENT_MAX_IDLE_WAIT_MS";

/// Error raised while building a [`LoopConfig`] from the environment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable was set but could not be parsed.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidEnvValue {
        /// The variable name.
        var: &'static str,
        /// The expected type description.
        expected: &'static str,
        /// The raw value found.
        value: String,
    },
}

/// Event-loop configuration.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Default concurrency cap used by `concurrent` when no limit is given.
    pub default_concurrency: usize,
    /// Stack size per fiber thread.
    pub fiber_stack_size: usize,
    /// Name prefix for fiber threads.
    pub fiber_name_prefix: String,
    /// Upper bound on a single idle sleep while waiting for the next timer.
    pub max_idle_wait: Duration,
}

impl LoopConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.default_concurrency == 0 {
            self.default_concurrency = 1;
        }
        if self.fiber_stack_size == 0 {
            self.fiber_stack_size = 2 * 1024 * 1024;
        }
        if self.fiber_name_prefix.is_empty() {
            self.fiber_name_prefix = "filament-fiber".to_string();
        }
        if self.max_idle_wait.is_zero() {
            self.max_idle_wait = Duration::from_millis(50);
        }
    }

    /// Builds a config from defaults plus environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnvValue`] if a variable is set but
    /// contains an unparseable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.normalize();
        Ok(config)
    }

    /// Apply environment variable overrides to this config.
    ///
    /// Only variables that are set in the environment are applied.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnvValue`] for unparseable values.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(val) = read_env(ENV_DEFAULT_CONCURRENCY) {
            self.default_concurrency = parse_usize(ENV_DEFAULT_CONCURRENCY, &val)?;
        }
        if let Some(val) = read_env(ENV_FIBER_STACK_SIZE) {
            self.fiber_stack_size = parse_usize(ENV_FIBER_STACK_SIZE, &val)?;
        }
        if let Some(val) = read_env(ENV_FIBER_NAME_PREFIX) {
            self.fiber_name_prefix = val;
        }
        if let Some(val) = read_env(ENV_MAX_IDLE_WAIT_MS) {
            self.max_idle_wait = Duration::from_millis(parse_u64(ENV_MAX_IDLE_WAIT_MS, &val)?);
        }
        Ok(())
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            default_concurrency: 10,
            fiber_stack_size: 2 * 1024 * 1024,
            fiber_name_prefix: "filament-fiber".to_string(),
            max_idle_wait: Duration::from_millis(50),
        }
    }
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidEnvValue {
            var,
            expected: "unsigned integer",
            value: val.to_string(),
        })
}

fn parse_u64(var: &'static str, val: &str) -> Result<u64, ConfigError> {
    val.trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::InvalidEnvValue {
            var,
            expected: "u64",
            value: val.to_string(),
        })
}

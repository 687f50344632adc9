//! # Runtime Configuration
//!
//! Configuration for the runtime, set programmatically through the builder
//! or loaded from environment variables.
//!
//! # Environment Variables
//!
//! All variables use the `WEFT_` prefix:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `WEFT_NUM_WORKERS` | Number of worker threads | CPU count |
//! | `WEFT_STACK_SIZE` | Fiber stack size in bytes | 131072 (128 KiB) |
//! | `WEFT_WORK_STEALING` | Enable work stealing ("true"/"false") | true |
//! | `WEFT_LOG` | Log level (off/error/warn/info/debug/trace) | off |
//!
//! Malformed values fall back to the default for that variable.

use std::env;
use std::fmt;

use crate::log::LogLevel;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of worker threads.
    /// Default: number of available CPUs.
    pub num_workers: usize,

    /// Fiber stack size in bytes.
    /// Default: 128 KiB.
    pub stack_size: usize,

    /// Enable work stealing between workers.
    /// Default: true.
    pub work_stealing: bool,

    /// Log level for runtime diagnostics.
    /// Default: off.
    pub log_level: LogLevel,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_workers: num_cpus(),
            stack_size: 128 * 1024,
            work_stealing: true,
            log_level: LogLevel::Off,
        }
    }
}

impl RuntimeConfig {
    /// Start building a configuration.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Load configuration from `WEFT_*` environment variables, falling back
    /// to defaults for unset or malformed values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            num_workers: env_parse("WEFT_NUM_WORKERS").unwrap_or(defaults.num_workers),
            stack_size: env_parse("WEFT_STACK_SIZE").unwrap_or(defaults.stack_size),
            work_stealing: env::var("WEFT_WORK_STEALING")
                .ok()
                .and_then(|v| match v.to_lowercase().as_str() {
                    "true" | "1" | "yes" => Some(true),
                    "false" | "0" | "no" => Some(false),
                    _ => None,
                })
                .unwrap_or(defaults.work_stealing),
            log_level: env::var("WEFT_LOG")
                .ok()
                .and_then(|v| LogLevel::parse(&v))
                .unwrap_or(defaults.log_level),
        }
    }
}

fn env_parse(key: &str) -> Option<usize> {
    env::var(key).ok().and_then(|v| v.parse().ok()).filter(|&v| v > 0)
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Builder for [`RuntimeConfig`].
#[derive(Debug, Default)]
pub struct RuntimeConfigBuilder {
    num_workers: Option<usize>,
    stack_size: Option<usize>,
    work_stealing: Option<bool>,
    log_level: Option<LogLevel>,
}

impl RuntimeConfigBuilder {
    /// Set the worker thread count.
    pub fn num_workers(mut self, n: usize) -> Self {
        self.num_workers = Some(n);
        self
    }

    /// Set the fiber stack size in bytes.
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Enable or disable work stealing.
    pub fn work_stealing(mut self, enabled: bool) -> Self {
        self.work_stealing = Some(enabled);
        self
    }

    /// Set the log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = Some(level);
        self
    }

    /// Validate and produce the configuration.
    pub fn build(self) -> Result<RuntimeConfig, ConfigError> {
        let defaults = RuntimeConfig::default();
        let config = RuntimeConfig {
            num_workers: self.num_workers.unwrap_or(defaults.num_workers),
            stack_size: self.stack_size.unwrap_or(defaults.stack_size),
            work_stealing: self.work_stealing.unwrap_or(defaults.work_stealing),
            log_level: self.log_level.unwrap_or(defaults.log_level),
        };
        if config.num_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if config.stack_size < 16 * 1024 {
            return Err(ConfigError::StackTooSmall(config.stack_size));
        }
        Ok(config)
    }
}

/// Error from [`RuntimeConfigBuilder::build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Worker count must be at least one.
    ZeroWorkers,
    /// Fiber stacks below 16 KiB cannot hold the runtime's own frames.
    StackTooSmall(usize),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::ZeroWorkers => write!(f, "at least one worker thread is required"),
            ConfigError::StackTooSmall(got) => {
                write!(f, "fiber stack of {got} bytes is below the 16 KiB minimum")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert!(config.num_workers >= 1);
        assert_eq!(config.stack_size, 128 * 1024);
        assert!(config.work_stealing);
    }

    #[test]
    fn test_builder() {
        let config = RuntimeConfig::builder()
            .num_workers(2)
            .stack_size(64 * 1024)
            .work_stealing(false)
            .build()
            .unwrap();
        assert_eq!(config.num_workers, 2);
        assert_eq!(config.stack_size, 64 * 1024);
        assert!(!config.work_stealing);
    }

    #[test]
    fn test_builder_validation() {
        assert_eq!(
            RuntimeConfig::builder().num_workers(0).build().unwrap_err(),
            ConfigError::ZeroWorkers
        );
        assert!(matches!(
            RuntimeConfig::builder().stack_size(1024).build().unwrap_err(),
            ConfigError::StackTooSmall(1024)
        ));
    }
}

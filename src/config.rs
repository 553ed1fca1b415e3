//! Runtime Configuration
//!
//! Configuration for the runtime's subsystems, settable programmatically or
//! from environment variables.
//!
//! # Environment Variables
//!
//! All environment variables use the `SPECTER_` prefix:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SPECTER_ARENA_SIZE` | Ghost arena reservation in bytes | 1099511627776 (1 TiB) |
//! | `SPECTER_STACK_SIZE` | Fiber stack size in bytes | 1048576 (1 MiB) |
//! | `SPECTER_SLAB_SIZE` | Index slab backing region in bytes | 1048576 (1 MiB) |
//! | `SPECTER_LOG_LEVEL` | Log level (off/error/warn/info/debug/trace) | info |
//!
//! # Example
//!
//! ```rust,ignore
//! use specter::config::RuntimeConfig;
//!
//! let config = RuntimeConfig::builder()
//!     .arena_size(64 << 30)
//!     .stack_size(512 * 1024)
//!     .build();
//! config.validate().unwrap();
//! ```

use std::env;

use crate::log::LogLevel;

/// Ghost arena configuration.
#[derive(Debug, Clone)]
pub struct ArenaConfig {
    /// Size of the virtual address reservation in bytes.
    /// Default: 1 TiB.
    pub size: usize,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self { size: 1 << 40 }
    }
}

/// Fiber scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Fiber stack size in bytes (excluding the guard page).
    /// Default: 1 MiB.
    pub stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            stack_size: 1024 * 1024,
        }
    }
}

/// Document pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Backing region size for the index slab in bytes.
    /// Default: 1 MiB.
    pub slab_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            slab_size: 1024 * 1024,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default)]
pub struct LogConfig {
    /// Minimum level for emitted records.
    pub level: LogLevel,
}

/// Complete runtime configuration.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// Ghost arena settings.
    pub arena: ArenaConfig,
    /// Fiber scheduler settings.
    pub scheduler: SchedulerConfig,
    /// Document pipeline settings.
    pub pipeline: PipelineConfig,
    /// Logging settings.
    pub log: LogConfig,
}

impl RuntimeConfig {
    /// Create a new builder with default values.
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::default()
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults; unparsable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(val) = parse_env_usize("SPECTER_ARENA_SIZE") {
            if val > 0 {
                config.arena.size = val;
            }
        }

        if let Some(val) = parse_env_usize("SPECTER_STACK_SIZE") {
            if val >= 64 * 1024 {
                config.scheduler.stack_size = val;
            }
        }

        if let Some(val) = parse_env_usize("SPECTER_SLAB_SIZE") {
            if val >= 4096 {
                config.pipeline.slab_size = val;
            }
        }

        if let Ok(val) = env::var("SPECTER_LOG_LEVEL") {
            if let Some(level) = LogLevel::parse(&val) {
                config.log.level = level;
            }
        }

        config
    }

    /// Validate the configuration and return the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.arena.size < 1024 * 1024 {
            return Err(ConfigError::InvalidValue {
                field: "arena.size",
                message: "must be at least 1 MiB".into(),
            });
        }
        if !self.arena.size.is_power_of_two() {
            return Err(ConfigError::InvalidValue {
                field: "arena.size",
                message: "must be a power of two".into(),
            });
        }
        if self.scheduler.stack_size < 64 * 1024 {
            return Err(ConfigError::InvalidValue {
                field: "scheduler.stack_size",
                message: "must be at least 64 KiB".into(),
            });
        }
        if self.pipeline.slab_size < 4096 {
            return Err(ConfigError::InvalidValue {
                field: "pipeline.slab_size",
                message: "must be at least 4096 bytes".into(),
            });
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Clone)]
pub enum ConfigError {
    /// A field holds an out-of-range or malformed value.
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// Error message.
        message: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue { field, message } => {
                write!(f, "invalid configuration for '{}': {}", field, message)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Builder for [`RuntimeConfig`].
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfigBuilder {
    config: RuntimeConfig,
}

impl RuntimeConfigBuilder {
    /// Set the arena reservation size in bytes.
    pub fn arena_size(mut self, size: usize) -> Self {
        self.config.arena.size = size;
        self
    }

    /// Set the fiber stack size in bytes.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.config.scheduler.stack_size = size;
        self
    }

    /// Set the index slab backing size in bytes.
    pub fn slab_size(mut self, size: usize) -> Self {
        self.config.pipeline.slab_size = size;
        self
    }

    /// Set the minimum log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log.level = level;
        self
    }

    /// Finish building.
    pub fn build(self) -> RuntimeConfig {
        self.config
    }
}

/// Parse an environment variable as usize, returning None if unset or invalid.
fn parse_env_usize(name: &str) -> Option<usize> {
    env::var(name).ok()?.trim().parse().ok()
}

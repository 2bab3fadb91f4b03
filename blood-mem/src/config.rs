//! Memory Runtime Configuration
//!
//! Tunables for the arenas, the hash tables and the sync primitives. A
//! configuration can be built programmatically or loaded from environment
//! variables, then installed once per process with [`init_with_config`].
//! Components that are constructed without explicit parameters read their
//! defaults from [`config()`].
//!
//! # Environment Variables
//!
//! All environment variables use the `BLOOD_` prefix:
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `BLOOD_PAGE_SIZE` | Arena page size in bytes (power of two) | 65536 |
//! | `BLOOD_DEFAULT_ALIGNMENT` | Alignment used by `alloc_default` | 8 |
//! | `BLOOD_PROBE_MODE` | Hash-map prober (`auto`/`simd`/`portable`) | auto |
//! | `BLOOD_INITIAL_CAPACITY` | First allocation size of growable containers | 4 |
//! | `BLOOD_SPIN_COUNT` | Spin rounds before a sync primitive parks | 64 |
//! | `BLOOD_LOG_LEVEL` | Log level (off/error/warn/info/debug/trace) | info |
//! | `BLOOD_LOG_FORMAT` | Log format (plain/json) | plain |
//!
//! # Example
//!
//! ```rust,ignore
//! use blood_mem::config::{MemoryConfig, ProbeMode};
//!
//! let config = MemoryConfig::builder()
//!     .page_size(4096)
//!     .probe_mode(ProbeMode::Portable)
//!     .build()?;
//! blood_mem::config::init_with_config(config);
//! ```

use std::env;
use std::fmt;
use std::sync::OnceLock;

use thiserror::Error;

use crate::log::{self, LogFormat, LogLevel};

/// Smallest accepted arena page size.
pub const MIN_PAGE_SIZE: usize = 64;

/// Which group prober the tagged hash map uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeMode {
    /// SIMD when the CPU supports it, portable otherwise.
    #[default]
    Auto,
    /// Request the SIMD prober; falls back to portable with a warning when
    /// the CPU lacks support.
    Simd,
    /// Always use the portable prober.
    Portable,
}

impl ProbeMode {
    /// Parse a probe mode name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Some(ProbeMode::Auto),
            "simd" | "avx2" => Some(ProbeMode::Simd),
            "portable" | "swar" => Some(ProbeMode::Portable),
            _ => None,
        }
    }

    /// Lower-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeMode::Auto => "auto",
            ProbeMode::Simd => "simd",
            ProbeMode::Portable => "portable",
        }
    }
}

impl fmt::Display for ProbeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogConfig {
    /// Minimum level.
    /// Default: Info.
    pub level: LogLevel,

    /// Output format.
    /// Default: Plain.
    pub format: LogFormat,
}

/// Complete memory runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryConfig {
    /// Arena page size in bytes.
    /// Default: 64KB.
    pub page_size: usize,

    /// Alignment used when callers do not pass one.
    /// Default: 8.
    pub default_alignment: usize,

    /// Hash-map prober selection.
    /// Default: Auto.
    pub probe_mode: ProbeMode,

    /// Capacity of the first allocation made by a growable container.
    /// Default: 4.
    pub initial_capacity: usize,

    /// Spin rounds before a blocking primitive yields or parks.
    /// Default: 64.
    pub spin_count: u32,

    /// Logging configuration.
    pub log: LogConfig,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            page_size: 64 * 1024,
            default_alignment: 8,
            probe_mode: ProbeMode::Auto,
            initial_capacity: 4,
            spin_count: 64,
            log: LogConfig::default(),
        }
    }
}

impl MemoryConfig {
    /// Create a new builder.
    pub fn builder() -> MemoryConfigBuilder {
        MemoryConfigBuilder::new()
    }

    /// Load configuration from environment variables.
    ///
    /// Unset variables keep their defaults. A variable that is set but cannot
    /// be parsed is reported as [`ConfigError::EnvParse`]; range checks are
    /// left to [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(val) = parse_env("BLOOD_PAGE_SIZE", |s| s.parse::<usize>().ok())? {
            config.page_size = val;
        }
        if let Some(val) = parse_env("BLOOD_DEFAULT_ALIGNMENT", |s| s.parse::<usize>().ok())? {
            config.default_alignment = val;
        }
        if let Some(val) = parse_env("BLOOD_PROBE_MODE", ProbeMode::parse)? {
            config.probe_mode = val;
        }
        if let Some(val) = parse_env("BLOOD_INITIAL_CAPACITY", |s| s.parse::<usize>().ok())? {
            config.initial_capacity = val;
        }
        if let Some(val) = parse_env("BLOOD_SPIN_COUNT", |s| s.parse::<u32>().ok())? {
            config.spin_count = val;
        }
        if let Some(val) = parse_env("BLOOD_LOG_LEVEL", LogLevel::parse)? {
            config.log.level = val;
        }
        if let Some(val) = parse_env("BLOOD_LOG_FORMAT", LogFormat::parse)? {
            config.log.format = val;
        }

        Ok(config)
    }

    /// Validate the configuration and return the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.page_size.is_power_of_two() || self.page_size < MIN_PAGE_SIZE {
            return Err(ConfigError::InvalidValue {
                field: "page_size",
                message: format!("must be a power of two of at least {MIN_PAGE_SIZE} bytes"),
            });
        }

        if !self.default_alignment.is_power_of_two() {
            return Err(ConfigError::InvalidValue {
                field: "default_alignment",
                message: "must be a power of two".into(),
            });
        }

        if self.default_alignment > self.page_size {
            return Err(ConfigError::InvalidValue {
                field: "default_alignment",
                message: "must not exceed page_size".into(),
            });
        }

        if self.initial_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "initial_capacity",
                message: "must be at least 1".into(),
            });
        }

        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field holds a value outside its accepted range.
    #[error("invalid config value for {field}: {message}")]
    InvalidValue {
        /// Field name.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },
    /// An environment variable could not be parsed.
    #[error("failed to parse environment variable {var}: {value:?}")]
    EnvParse {
        /// Variable name.
        var: &'static str,
        /// The raw value.
        value: String,
    },
}

/// Builder for [`MemoryConfig`].
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigBuilder {
    config: MemoryConfig,
}

impl MemoryConfigBuilder {
    /// Start from the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the arena page size.
    pub fn page_size(mut self, size: usize) -> Self {
        self.config.page_size = size;
        self
    }

    /// Set the default allocation alignment.
    pub fn default_alignment(mut self, align: usize) -> Self {
        self.config.default_alignment = align;
        self
    }

    /// Set the prober selection.
    pub fn probe_mode(mut self, mode: ProbeMode) -> Self {
        self.config.probe_mode = mode;
        self
    }

    /// Set the first capacity of growable containers.
    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.config.initial_capacity = capacity;
        self
    }

    /// Set the spin budget of blocking primitives.
    pub fn spin_count(mut self, count: u32) -> Self {
        self.config.spin_count = count;
        self
    }

    /// Set the log level.
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log.level = level;
        self
    }

    /// Set the log format.
    pub fn log_format(mut self, format: LogFormat) -> Self {
        self.config.log.format = format;
        self
    }

    /// Validate and build.
    pub fn build(self) -> Result<MemoryConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }

    /// Build without validation.
    pub fn build_unchecked(self) -> MemoryConfig {
        self.config
    }
}

fn parse_env<T>(
    var: &'static str,
    parse: impl FnOnce(&str) -> Option<T>,
) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => match parse(&value) {
            Some(parsed) => Ok(Some(parsed)),
            None => Err(ConfigError::EnvParse { var, value }),
        },
        Err(_) => Ok(None),
    }
}

// ============================================================================
// Global configuration
// ============================================================================

static MEMORY_CONFIG: OnceLock<MemoryConfig> = OnceLock::new();
static DEFAULT_CONFIG: OnceLock<MemoryConfig> = OnceLock::new();

/// Install the process-wide configuration and apply its log settings.
///
/// The first call wins. Returns `false` if a configuration was already
/// installed, in which case `config` is discarded.
pub fn init_with_config(config: MemoryConfig) -> bool {
    let (level, format) = (config.log.level, config.log.format);
    let installed = MEMORY_CONFIG.set(config).is_ok();
    if installed {
        log::set_level(level);
        log::set_format(format);
        log::LogBuilder::new(LogLevel::Info, "config")
            .message("memory configuration installed")
            .field_bytes("page_size", self::config().page_size)
            .field_str("probe_mode", self::config().probe_mode.as_str())
            .emit();
    }
    installed
}

/// Load from the environment, validate, and install.
pub fn init_from_env() -> Result<bool, ConfigError> {
    let config = MemoryConfig::from_env()?;
    config.validate()?;
    Ok(init_with_config(config))
}

/// The installed configuration, or the defaults if none was installed.
pub fn config() -> &'static MemoryConfig {
    MEMORY_CONFIG
        .get()
        .unwrap_or_else(|| DEFAULT_CONFIG.get_or_init(MemoryConfig::default))
}

/// Whether [`init_with_config`] has installed a configuration.
pub fn is_initialized() -> bool {
    MEMORY_CONFIG.get().is_some()
}

//! Environment variable and config file support for [`RuntimeBuilder`](super::builder::RuntimeBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`burst_limit(16)`)
//! 2. **Environment variables**: values from `PGASYNC_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: built-in defaults from [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `PGASYNC_BURST_LIMIT` | `usize` | `burst_limit` |
//! | `PGASYNC_SPIN_BEFORE_YIELD` | `u32` | `spin_before_yield` |
//! | `PGASYNC_MAX_LIVE_HEADERS` | `usize` or `none` | `max_live_headers` |
//! | `PGASYNC_POLL_TRANSPORT` | `bool` | `poll_transport_on_progress` |
//! | `PGASYNC_DISCHARGE_SPIN_LIMIT` | `u64` or `none` | `discharge_spin_limit` |

use crate::error::{Error, ErrorKind};
use crate::runtime::config::RuntimeConfig;

/// Environment variable name for the per-inbox burst limit.
pub const ENV_BURST_LIMIT: &str = "PGASYNC_BURST_LIMIT";
/// Environment variable name for the MPSC spin count.
pub const ENV_SPIN_BEFORE_YIELD: &str = "PGASYNC_SPIN_BEFORE_YIELD";
/// Environment variable name for the live-header budget.
pub const ENV_MAX_LIVE_HEADERS: &str = "PGASYNC_MAX_LIVE_HEADERS";
/// Environment variable name for the transport-poll toggle.
pub const ENV_POLL_TRANSPORT: &str = "PGASYNC_POLL_TRANSPORT";
/// Environment variable name for the discharge round cap.
pub const ENV_DISCHARGE_SPIN_LIMIT: &str = "PGASYNC_DISCHARGE_SPIN_LIMIT";

/// Errors raised while reading configuration sources.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable holds an unparseable value.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Human-readable expected type.
        expected: &'static str,
        /// Raw value.
        value: String,
    },
    /// A config file could not be read.
    #[cfg(feature = "config-file")]
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Path that failed.
        path: std::path::PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A config file is not valid TOML for [`RuntimeTomlConfig`].
    #[cfg(feature = "config-file")]
    #[error("failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Self::new(ErrorKind::Config)
            .with_message(err.to_string())
            .with_source(err)
    }
}

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_BURST_LIMIT) {
        config.burst_limit = parse_usize(ENV_BURST_LIMIT, &val)?;
    }
    if let Some(val) = read_env(ENV_SPIN_BEFORE_YIELD) {
        config.spin_before_yield = parse_u32(ENV_SPIN_BEFORE_YIELD, &val)?;
    }
    if let Some(val) = read_env(ENV_MAX_LIVE_HEADERS) {
        config.max_live_headers = parse_optional(ENV_MAX_LIVE_HEADERS, &val, parse_usize)?;
    }
    if let Some(val) = read_env(ENV_POLL_TRANSPORT) {
        config.poll_transport_on_progress = parse_bool(ENV_POLL_TRANSPORT, &val)?;
    }
    if let Some(val) = read_env(ENV_DISCHARGE_SPIN_LIMIT) {
        config.discharge_spin_limit =
            parse_optional(ENV_DISCHARGE_SPIN_LIMIT, &val, parse_u64)?;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn invalid(var: &'static str, expected: &'static str, val: &str) -> ConfigError {
    ConfigError::InvalidEnv {
        var,
        expected,
        value: val.to_string(),
    }
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| invalid(var, "unsigned integer", val))
}

fn parse_u32(var: &'static str, val: &str) -> Result<u32, ConfigError> {
    val.trim().parse::<u32>().map_err(|_| invalid(var, "u32", val))
}

fn parse_u64(var: &'static str, val: &str) -> Result<u64, ConfigError> {
    val.trim().parse::<u64>().map_err(|_| invalid(var, "u64", val))
}

/// `none` / `unbounded` clear the setting; anything else goes to `parse`.
fn parse_optional<T>(
    var: &'static str,
    val: &str,
    parse: fn(&'static str, &str) -> Result<T, ConfigError>,
) -> Result<Option<T>, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "none" | "unbounded" => Ok(None),
        _ => parse(var, val).map(Some),
    }
}

fn parse_bool(var: &'static str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(var, "bool (true/false/1/0/yes/no)", val)),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable runtime configuration.
///
/// ```toml
/// [scheduler]
/// burst_limit = 64
/// spin_before_yield = 128
/// poll_transport_on_progress = true
/// discharge_spin_limit = 100000
///
/// [headers]
/// max_live = 65536
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct RuntimeTomlConfig {
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerToml,
    /// Result header settings.
    #[serde(default)]
    pub headers: HeadersToml,
}

/// Scheduler section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct SchedulerToml {
    /// Maximum lpcs per inbox per progress call.
    pub burst_limit: Option<usize>,
    /// MPSC consumer spins before yielding.
    pub spin_before_yield: Option<u32>,
    /// Poll the transport inside progress.
    pub poll_transport_on_progress: Option<bool>,
    /// Maximum discharge rounds.
    pub discharge_spin_limit: Option<u64>,
}

/// Header section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct HeadersToml {
    /// Live shared-header budget.
    pub max_live: Option<usize>,
}

/// Apply a parsed TOML config to a [`RuntimeConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut RuntimeConfig, toml: &RuntimeTomlConfig) {
    if let Some(v) = toml.scheduler.burst_limit {
        config.burst_limit = v;
    }
    if let Some(v) = toml.scheduler.spin_before_yield {
        config.spin_before_yield = v;
    }
    if let Some(v) = toml.scheduler.poll_transport_on_progress {
        config.poll_transport_on_progress = v;
    }
    if let Some(v) = toml.scheduler.discharge_spin_limit {
        config.discharge_spin_limit = Some(v);
    }
    if let Some(v) = toml.headers.max_live {
        config.max_live_headers = Some(v);
    }
}

/// Parse a TOML string into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<RuntimeTomlConfig, ConfigError> {
    Ok(toml::from_str(toml_str)?)
}

/// Read and parse a TOML file into a [`RuntimeTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<RuntimeTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================

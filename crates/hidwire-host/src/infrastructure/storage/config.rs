//! TOML configuration for the hidwire host.
//!
//! Configuration is read-only: it is loaded once at start-up and never
//! written back.
//!
//! # Example
//!
//! ```toml
//! [transport]
//! report_size = 64
//! request_timeout_ms = 5000
//! query_timeout_ms = 1000
//! report_id = 0
//!
//! [simulation]
//! layers = 4
//! rows = 6
//! cols = 18
//! macro_count = 16
//! macro_buffer_size = 1024
//! protocol_version = 12
//!
//! [logging]
//! level = "info"
//! ```
//!
//! # Serde default values
//!
//! Every field is annotated with `#[serde(default = "some_fn")]`, so a
//! missing file, a missing section, or a missing key all fall back to the
//! values shown above.

use std::path::{Path, PathBuf};
use std::time::Duration;

use hidwire_core::VirtualDeviceConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level host configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct HidwireConfig {
    #[serde(default)]
    pub transport: TransportConfig,
    /// Shape of the simulated keyboard.
    #[serde(default)]
    pub simulation: VirtualDeviceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Framing and timeout settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransportConfig {
    /// Bytes per HID report.  Must be at least 16.
    #[serde(default = "default_report_size")]
    pub report_size: usize,
    /// Deadline for request/response exchanges.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Deadline for light protocol queries.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// HID report id every message is sent on.
    #[serde(default)]
    pub report_id: u8,
}

impl TransportConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoggingConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_report_size() -> usize {
    64
}
fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_query_timeout_ms() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            report_size: default_report_size(),
            request_timeout_ms: default_request_timeout_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            report_id: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Parses configuration from TOML text.
///
/// # Errors
///
/// Returns [`ConfigError::Parse`] for malformed TOML or mistyped values.
pub fn parse_config(text: &str) -> Result<HidwireConfig, ConfigError> {
    Ok(toml::from_str(text)?)
}

/// Loads configuration from `path`.
///
/// Returns the defaults if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file exists but cannot be read, or
/// [`ConfigError::Parse`] if its contents are not valid.
pub fn load_config(path: &Path) -> Result<HidwireConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => parse_config(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HidwireConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

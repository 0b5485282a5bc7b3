//! Server configuration loading.
//!
//! The harness hands `init` a single string that is either a path to a
//! configuration file or the configuration itself as inline JSON:
//!
//! ```text
//! "{\"timeout\": 3000}"        → inline JSON (longer than one char, starts with '{')
//! "/etc/seip/server.toml"      → TOML file
//! "C:\\seip\\server.json"      → JSON file (any extension other than .toml)
//! ```
//!
//! # Example (TOML)
//!
//! ```toml
//! timeout = 5000
//! accept_timeout = 200
//! response_margin = 1000
//! max_packet_size = 16384
//! oversize_policy = "truncate"
//! log_level = "debug"
//! ```
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "some_fn")]`, so `{}` is a valid
//! configuration and older files keep working when fields are added.
//!
//! Millisecond fields accept either a number or a numeric string
//! (`"timeout": "3000"`), because harness-generated configs commonly quote
//! every value.

use std::path::{Path, PathBuf};
use std::time::Duration;

use seip_core::{FrameLimits, OversizePolicy, DEFAULT_BUFLEN};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Socket receive timeout used when the configuration does not set one.
pub const DEFAULT_SOCKET_TIMEOUT_MS: u64 = 5000;
/// Margin added to a caller budget when computing the exchange socket timeout.
pub const DEFAULT_ADDED_TIME_MS: u64 = 1000;

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

    /// The JSON content could not be parsed.
    #[error("failed to parse config JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    /// The content parsed but a value is out of range.
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

// ── Config schema ─────────────────────────────────────────────────────────────

/// Settings of one server instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Socket receive timeout in milliseconds.
    #[serde(default = "default_timeout", deserialize_with = "millis")]
    pub timeout: u64,
    /// How long one `accept` waits before the stop flag is re-checked, in ms.
    #[serde(default = "default_accept_timeout", deserialize_with = "millis")]
    pub accept_timeout: u64,
    /// Added to a caller budget to get the exchange socket timeout, in ms.
    #[serde(default = "default_response_margin", deserialize_with = "millis")]
    pub response_margin: u64,
    /// Caller budget for the disconnect notification sent on client stop, in ms.
    #[serde(default = "default_disconnect_timeout", deserialize_with = "millis")]
    pub disconnect_timeout: u64,
    /// Upper bound on one packet's payload, in bytes.
    #[serde(default = "default_max_packet_size")]
    pub max_packet_size: usize,
    /// What to do with a packet that exceeds `max_packet_size`.
    #[serde(default)]
    pub oversize_policy: OversizePolicy,
    /// Maximum number of orphaned exchanges kept alive at once.
    #[serde(default = "default_max_pending_exchanges")]
    pub max_pending_exchanges: usize,
    /// `tracing` level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_timeout() -> u64 {
    DEFAULT_SOCKET_TIMEOUT_MS
}
fn default_accept_timeout() -> u64 {
    200
}
fn default_response_margin() -> u64 {
    DEFAULT_ADDED_TIME_MS
}
fn default_disconnect_timeout() -> u64 {
    2000
}
fn default_max_packet_size() -> usize {
    DEFAULT_BUFLEN
}
fn default_max_pending_exchanges() -> usize {
    64
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            accept_timeout: default_accept_timeout(),
            response_margin: default_response_margin(),
            disconnect_timeout: default_disconnect_timeout(),
            max_packet_size: default_max_packet_size(),
            oversize_policy: OversizePolicy::default(),
            max_pending_exchanges: default_max_pending_exchanges(),
            log_level: default_log_level(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Number(u64),
    Text(String),
}

fn millis<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Number(n) => Ok(n),
        NumberOrString::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("expected milliseconds, got {s:?}"))),
    }
}

impl ServerConfig {
    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    pub fn accept_timeout(&self) -> Duration {
        Duration::from_millis(self.accept_timeout)
    }

    pub fn response_margin(&self) -> Duration {
        Duration::from_millis(self.response_margin)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnect_timeout)
    }

    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits {
            max_payload: self.max_packet_size,
            oversize: self.oversize_policy,
        }
    }

    /// Rejects values that would make the server unusable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout == 0 {
            return Err(invalid("timeout", "must be greater than zero"));
        }
        if self.accept_timeout == 0 {
            return Err(invalid("accept_timeout", "must be greater than zero"));
        }
        if self.max_packet_size == 0 {
            return Err(invalid("max_packet_size", "must be greater than zero"));
        }
        if u32::try_from(self.max_packet_size).is_err() {
            return Err(invalid("max_packet_size", "must fit in a 32-bit length prefix"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Where a configuration string points.
#[derive(Debug, PartialEq, Eq)]
pub enum ConfigSource<'a> {
    Inline(&'a str),
    File(&'a Path),
}

impl<'a> ConfigSource<'a> {
    /// Inline JSON if `input` is longer than one character and starts with
    /// `{`; otherwise a file path.
    pub fn classify(input: &'a str) -> Self {
        if input.len() > 1 && input.starts_with('{') {
            ConfigSource::Inline(input)
        } else {
            ConfigSource::File(Path::new(input))
        }
    }
}

/// Loads and validates a configuration from a path or inline JSON.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read, a parse error if
/// the content is malformed, or [`ConfigError::Invalid`] if a value is out
/// of range.
pub fn load_config(input: &str) -> Result<ServerConfig, ConfigError> {
    let config = match ConfigSource::classify(input) {
        ConfigSource::Inline(json) => serde_json::from_str(json)?,
        ConfigSource::File(path) => {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            parse_file_content(path, &content)?
        }
    };
    config.validate()?;
    Ok(config)
}

fn parse_file_content(path: &Path, content: &str) -> Result<ServerConfig, ConfigError> {
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    if is_toml {
        Ok(toml::from_str(content)?)
    } else {
        Ok(serde_json::from_str(content)?)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

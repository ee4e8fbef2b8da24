//! # Configuration Management
//!
//! Centralized configuration for miIO sessions and the reference peer.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment overrides via `from_env()`
//!
//! ## Example
//! ```toml
//! [session]
//! address = "192.168.1.20"
//! token = "000102030405060708090a0b0c0d0e0f"
//! port = 54321
//! timeout = 1000
//! retries = 2
//! allowed_models = ["rockrobo.vacuum.v1"]
//! ```

use crate::core::token::{Token, TOKEN_LEN};
use crate::error::{MiioError, Result};
use crate::protocol::handshake::MIIO_PORT;
use crate::utils::timeout;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;
use tracing::Level;

/// Upper bound on the retry budget accepted by validation
pub const MAX_RETRIES: u32 = 20;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MiioConfig {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub peer: PeerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl MiioConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| MiioError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| MiioError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| MiioError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Defaults overridden by `MIIO_*` environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("MIIO_ADDRESS") {
            config.session.address = Some(addr);
        }

        if let Ok(token) = std::env::var("MIIO_TOKEN") {
            config.session.token = Some(token);
        }

        if let Ok(port) = std::env::var("MIIO_PORT") {
            config.session.port = port
                .parse::<u16>()
                .map_err(|e| MiioError::ConfigError(format!("Invalid MIIO_PORT: {e}")))?;
        }

        if let Ok(timeout) = std::env::var("MIIO_TIMEOUT_MS") {
            if let Ok(val) = timeout.parse::<u64>() {
                config.session.timeout = Duration::from_millis(val);
            }
        }

        if let Ok(retries) = std::env::var("MIIO_RETRIES") {
            if let Ok(val) = retries.parse::<u32>() {
                config.session.retries = val;
            }
        }

        Ok(config)
    }

    /// Apply overrides to the default configuration
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Generate example configuration file content
    pub fn example_config() -> String {
        toml::to_string_pretty(&Self::default())
            .unwrap_or_else(|_| String::from("# Failed to generate example config"))
    }

    /// Save configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| MiioError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| MiioError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration. An empty list means it is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.session.validate());
        errors.extend(self.peer.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(MiioError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

fn validate_token(field: &str, token: &str, errors: &mut Vec<String>) {
    match Token::from_hex(token) {
        Ok(t) if t.is_valid_length() => {}
        Ok(t) => errors.push(format!(
            "{field} must be {TOKEN_LEN} bytes ({} hex chars), got {} bytes",
            TOKEN_LEN * 2,
            t.as_bytes().len()
        )),
        Err(_) => errors.push(format!("{field} is not valid hex: '{token}'")),
    }
}

/// Client session configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Device IP; discovered by broadcast when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Device token as hex; learned from the hello reply when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// Device UDP port
    pub port: u16,

    /// Wait for a single reply
    #[serde(with = "duration_serde")]
    pub timeout: Duration,

    /// Retransmissions after the first attempt
    pub retries: u32,

    /// Accept only these models after discovery (empty = any)
    #[serde(default)]
    pub allowed_models: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: None,
            token: None,
            port: MIIO_PORT,
            timeout: timeout::DEFAULT_TIMEOUT,
            retries: timeout::DEFAULT_RETRIES,
            allowed_models: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Parsed device address, if configured
    pub fn ip(&self) -> Result<Option<IpAddr>> {
        self.address
            .as_deref()
            .map(|addr| {
                addr.parse::<IpAddr>().map_err(|e| {
                    MiioError::InvalidParameters(format!("Invalid device address '{addr}': {e}"))
                })
            })
            .transpose()
    }

    /// Parsed token, if configured
    pub fn token(&self) -> Result<Option<Token>> {
        self.token.as_deref().map(Token::from_hex).transpose()
    }

    /// Validate session configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if let Some(ref addr) = self.address {
            if addr.parse::<IpAddr>().is_err() {
                errors.push(format!(
                    "Invalid device address format: '{addr}' (expected format: '192.168.1.20')"
                ));
            }
        }

        if let Some(ref token) = self.token {
            validate_token("Session token", token, &mut errors);
        }

        if self.port == 0 {
            errors.push("Device port cannot be 0".to_string());
        }

        if self.timeout.as_millis() < 10 {
            errors.push("Timeout too short (minimum: 10ms)".to_string());
        } else if self.timeout.as_secs() > 60 {
            errors.push("Timeout too long (maximum: 60s)".to_string());
        }

        if self.retries > MAX_RETRIES {
            errors.push(format!(
                "Retry budget too large: {} (maximum: {MAX_RETRIES})",
                self.retries
            ));
        }

        if self.allowed_models.iter().any(|m| m.trim().is_empty()) {
            errors.push("Allowed model names cannot be empty".to_string());
        }

        errors
    }
}

/// Reference peer configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PeerConfig {
    /// Listen address (e.g., "0.0.0.0:54321")
    pub address: String,

    /// Device token as hex
    pub token: String,

    /// Device id reported in every frame
    pub device_id: u32,

    /// Model string reported by `miIO.info`
    pub model: String,

    /// Starting value of the device timestamp counter
    pub timestamp: u32,

    /// Hand the token out in hello replies (unprovisioned device)
    pub reveal_token: bool,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{MIIO_PORT}"),
            token: "00112233445566778899aabbccddeeff".to_string(),
            device_id: 0x0000_0001,
            model: String::from("miio.reference.v1"),
            timestamp: 1,
            reveal_token: true,
        }
    }
}

impl PeerConfig {
    /// Validate peer configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.address.is_empty() {
            errors.push("Peer address cannot be empty".to_string());
        } else if self.address.parse::<std::net::SocketAddr>().is_err() {
            errors.push(format!(
                "Invalid peer address format: '{}' (expected format: '0.0.0.0:54321')",
                self.address
            ));
        }

        validate_token("Peer token", &self.token, &mut errors);

        if self.device_id == u32::MAX {
            errors.push("Peer device id cannot be the unknown sentinel 0xFFFFFFFF".to_string());
        }

        if self.timestamp == u32::MAX {
            errors.push("Peer timestamp cannot be the unknown sentinel 0xFFFFFFFF".to_string());
        }

        if self.model.is_empty() {
            errors.push("Peer model cannot be empty".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Application name for logs
    pub app_name: String,

    /// Log level
    #[serde(with = "log_level_serde")]
    pub log_level: Level,

    /// Whether to use JSON formatting for logs
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            app_name: String::from("miio-protocol"),
            log_level: Level::INFO,
            json_format: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.app_name.is_empty() {
            errors.push("Application name cannot be empty".to_string());
        } else if self.app_name.len() > 64 {
            errors.push(format!(
                "Application name too long: {} characters (maximum: 64)",
                self.app_name.len()
            ));
        }

        errors
    }
}

/// Helper module for Duration serialization/deserialization
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let millis = duration.as_millis() as u64;
        millis.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Helper module for tracing::Level serialization/deserialization
mod log_level_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::str::FromStr;
    use tracing::Level;

    pub fn serialize<S>(level: &Level, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let level_str = match *level {
            Level::TRACE => "trace",
            Level::DEBUG => "debug",
            Level::INFO => "info",
            Level::WARN => "warn",
            Level::ERROR => "error",
        };
        level_str.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Level, D::Error>
    where
        D: Deserializer<'de>,
    {
        let level_str = String::deserialize(deserializer)?;
        Level::from_str(&level_str)
            .map_err(|_| serde::de::Error::custom(format!("Invalid log level: {level_str}")))
    }
}

//! # Configuration Management
//!
//! Centralized configuration for the connection core.
//!
//! This module provides structured configuration for connections,
//! including wire limits, compression settings, queue capacities, and
//! logging options.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()`
//! - Direct instantiation with defaults
//! - Environment-specific overrides

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{ProtocolError, Result};

/// Max allowed frame size on the wire (2 MiB, the vanilla limit)
pub const MAX_FRAME_LEN: usize = 2 * 1024 * 1024;

/// Default body size at or above which outbound frames are compressed
pub const DEFAULT_COMPRESSION_THRESHOLD: i32 = 256;

/// Default capacity of the outbound-bytes queue
pub const DEFAULT_WRITE_QUEUE_CAPACITY: usize = 256;

/// Default capacity of the decoded-inbound queue
pub const DEFAULT_HANDLE_QUEUE_CAPACITY: usize = 256;

/// Main configuration structure that contains all configurable settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct NetworkConfig {
    /// Per-connection configuration
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl NetworkConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to open config file: {e}")))?;

        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to read config file: {e}")))?;

        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str::<Self>(content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to parse TOML: {e}")))
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Start with defaults
        let mut config = Self::default();

        // Override with environment variables
        if let Ok(threshold) = std::env::var("CRAFT_PROTOCOL_COMPRESSION_THRESHOLD") {
            if let Ok(val) = threshold.parse::<i32>() {
                config.connection.compression_threshold = val;
            }
        }

        if let Ok(capacity) = std::env::var("CRAFT_PROTOCOL_WRITE_QUEUE_CAPACITY") {
            if let Ok(val) = capacity.parse::<usize>() {
                config.connection.write_queue_capacity = val;
            }
        }

        if let Ok(capacity) = std::env::var("CRAFT_PROTOCOL_HANDLE_QUEUE_CAPACITY") {
            if let Ok(val) = capacity.parse::<usize>() {
                config.connection.handle_queue_capacity = val;
            }
        }

        if let Ok(level) = std::env::var("CRAFT_PROTOCOL_LOG_LEVEL") {
            config.logging.level = level;
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
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path, content)
            .map_err(|e| ProtocolError::ConfigError(format!("Failed to write config file: {e}")))?;

        Ok(())
    }

    /// Validate the configuration for common issues and misconfigurations
    ///
    /// Returns a list of validation errors. Empty list means configuration is valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        errors.extend(self.connection.validate());
        errors.extend(self.logging.validate());
        errors
    }

    /// Validate and return Result - convenience method
    pub fn validate_strict(&self) -> Result<()> {
        let errors = self.validate();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::ConfigError(format!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            )))
        }
    }
}

/// Per-connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConnectionConfig {
    /// Maximum frame size accepted off the wire, and the cap applied to
    /// claimed decompressed sizes
    pub max_frame_len: usize,

    /// Body size at or above which outbound frames are compressed, once
    /// compression has been negotiated
    pub compression_threshold: i32,

    /// Capacity of the outbound-bytes queue feeding the write loop
    pub write_queue_capacity: usize,

    /// Capacity of the decoded-inbound queue feeding the dispatch loop
    pub handle_queue_capacity: usize,

    /// Whether read/write faults are logged. Callers driving expected
    /// disconnects can turn this off.
    pub log_faults: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_frame_len: MAX_FRAME_LEN,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            write_queue_capacity: DEFAULT_WRITE_QUEUE_CAPACITY,
            handle_queue_capacity: DEFAULT_HANDLE_QUEUE_CAPACITY,
            log_faults: true,
        }
    }
}

impl ConnectionConfig {
    /// Validate connection configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_frame_len == 0 {
            errors.push("Maximum frame length must be greater than 0".to_string());
        } else if self.max_frame_len > 64 * 1024 * 1024 {
            errors.push(format!(
                "Maximum frame length too large: {} (max recommended: 64 MiB)",
                self.max_frame_len
            ));
        }

        if self.compression_threshold < 0 {
            errors.push(format!(
                "Compression threshold must be non-negative, got {}",
                self.compression_threshold
            ));
        }

        if self.write_queue_capacity == 0 {
            errors.push("Write queue capacity must be greater than 0".to_string());
        }

        if self.handle_queue_capacity == 0 {
            errors.push("Handle queue capacity must be greater than 0".to_string());
        }

        errors
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is not set (e.g. "info")
    pub level: String,

    /// Whether log lines include the module target
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            include_target: false,
        }
    }
}

impl LoggingConfig {
    /// Validate logging configuration
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.level.is_empty() {
            errors.push("Log level cannot be empty".to_string());
        } else {
            let bare_level = self.level.split(',').next().unwrap_or("");
            let known = ["trace", "debug", "info", "warn", "error", "off"];
            if !bare_level.contains('=') && !known.contains(&bare_level) {
                errors.push(format!("Unknown log level: '{bare_level}'"));
            }
        }

        errors
    }
}

//! Configuration management for codec-pump
//!
//! This module handles loading and managing pump configuration from
//! config files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::error::{IntoPumpError, PumpError, Result};

/// Upper bound for the input slot wait; anything longer starves control messages
const MAX_INPUT_SLOT_TIMEOUT_US: u64 = 100_000;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Decode pump configuration
    pub pump: PumpConfig,

    /// General application settings
    pub general: GeneralConfig,
}

/// Decode pump configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PumpConfig {
    /// Bounded wait for a free decoder input slot, in microseconds
    pub input_slot_timeout_us: u64,

    /// MIME prefix a track must carry to be decoded
    pub decodable_mime_prefix: String,

    /// Name of the per-session worker thread
    pub worker_thread_name: String,
}

/// General application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            input_slot_timeout_us: 2_000,
            decodable_mime_prefix: "video/".to_string(),
            worker_thread_name: "codec-pump".to_string(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl PumpConfig {
    /// Input slot wait as a Duration
    pub fn input_slot_timeout(&self) -> Duration {
        Duration::from_micros(self.input_slot_timeout_us)
    }

    /// Validate pump settings
    pub fn validate(&self) -> Result<()> {
        if self.input_slot_timeout_us == 0 {
            return Err(PumpError::Config(
                "input_slot_timeout_us must be non-zero".to_string(),
            ));
        }

        if self.input_slot_timeout_us > MAX_INPUT_SLOT_TIMEOUT_US {
            return Err(PumpError::Config(format!(
                "input_slot_timeout_us must be at most {}",
                MAX_INPUT_SLOT_TIMEOUT_US
            )));
        }

        if self.decodable_mime_prefix.is_empty() {
            return Err(PumpError::Config(
                "decodable_mime_prefix must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl Config {
    /// Load configuration from various sources
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. System config file (/etc/codec-pump/config.toml on Linux)
    /// 3. User config file (~/.config/codec-pump/config.toml on Linux)
    /// 4. Environment variables (CODEC_PUMP_* prefix)
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(system_path) = Self::system_config_path() {
            if system_path.exists() {
                config = Self::read_file(&system_path)?;
            }
        }

        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                config = Self::read_file(&user_path)?;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from an explicit file, then apply environment overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::read_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the user config file
    pub fn save(&self) -> Result<()> {
        let path = Self::user_config_path()
            .ok_or_else(|| PumpError::Config("Cannot determine user config path".to_string()))?;
        self.save_to(&path)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).config_err("Failed to create config directory")?;
        }

        let toml = toml::to_string_pretty(self).config_err("Failed to serialize config")?;
        std::fs::write(path, toml).config_err("Failed to write config file")?;

        Ok(())
    }

    fn read_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).config_err("Failed to read config file")?;
        toml::from_str(&contents).config_err("Failed to parse config file")
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) -> Result<()> {
        // Example: CODEC_PUMP_INPUT_SLOT_TIMEOUT_US=5000
        if let Ok(timeout) = std::env::var("CODEC_PUMP_INPUT_SLOT_TIMEOUT_US") {
            self.pump.input_slot_timeout_us = timeout.parse().map_err(|_| {
                PumpError::Config("Invalid CODEC_PUMP_INPUT_SLOT_TIMEOUT_US".to_string())
            })?;
        }

        if let Ok(prefix) = std::env::var("CODEC_PUMP_MIME_PREFIX") {
            self.pump.decodable_mime_prefix = prefix;
        }

        if let Ok(log_level) = std::env::var("CODEC_PUMP_LOG_LEVEL") {
            self.general.log_level = log_level;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.pump.validate()?;

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.general.log_level.as_str()) {
            return Err(PumpError::Config(format!(
                "Invalid log level '{}', must be one of: {:?}",
                self.general.log_level, valid_log_levels
            )));
        }

        Ok(())
    }

    /// Get system config file path
    fn system_config_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        return Some(PathBuf::from("/etc/codec-pump/config.toml"));

        #[cfg(target_os = "macos")]
        return Some(PathBuf::from("/Library/Application Support/codec-pump/config.toml"));

        #[allow(unreachable_code)]
        None
    }

    /// Get user config file path
    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("codec-pump").join("config.toml"))
    }
}

//! Configuration file management.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use time::UtcOffset;
use wta_core::SessionConfig;

use crate::cli::{ConfigKey, OutputFormat};

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "WTA_CONFIG";

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Default controller address
    #[serde(default)]
    pub device: Option<String>,

    /// Default output format
    #[serde(default)]
    pub format: Option<String>,

    /// Connection timeout in seconds
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Controller clock offset from UTC in hours (system offset if unset)
    #[serde(default)]
    pub utc_offset_hours: Option<i8>,

    /// Advertised name prefix used to filter scan results
    #[serde(default)]
    pub name_prefix: Option<String>,

    /// Last successfully connected controller (auto-updated)
    #[serde(default)]
    pub last_device: Option<String>,
}

impl Config {
    /// Get the config file path
    pub fn path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("wta")
            .join("config.toml")
    }

    /// Load config from the default location, or return default if not found
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load config from `path`.
    ///
    /// A missing file yields the defaults. An unreadable or malformed file
    /// yields the defaults with a warning on stderr.
    pub fn load_from(path: &Path) -> Self {
        if path.exists() {
            match fs::read_to_string(path) {
                Ok(content) => match toml::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        eprintln!("Warning: Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    eprintln!("Warning: Failed to read config: {}", e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the default location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::path())
    }

    /// Save config to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(())
    }

    /// Read one key as a display string.
    pub fn get(&self, key: ConfigKey) -> Option<String> {
        match key {
            ConfigKey::Device => self.device.clone(),
            ConfigKey::Format => self.format.clone(),
            ConfigKey::Timeout => self.timeout.map(|t| t.to_string()),
            ConfigKey::UtcOffsetHours => self.utc_offset_hours.map(|h| h.to_string()),
            ConfigKey::NamePrefix => self.name_prefix.clone(),
        }
    }

    /// Set one key from its string form, validating the value.
    pub fn set(&mut self, key: ConfigKey, value: &str) -> Result<()> {
        match key {
            ConfigKey::Device => self.device = Some(value.to_string()),
            ConfigKey::Format => {
                if OutputFormat::from_name(value).is_none() {
                    bail!("Invalid format '{}'. Use: text, json", value);
                }
                self.format = Some(value.to_lowercase());
            }
            ConfigKey::Timeout => {
                let timeout: u64 = value
                    .parse()
                    .with_context(|| format!("Invalid timeout '{}'", value))?;
                if timeout == 0 {
                    bail!("Timeout must be at least 1 second");
                }
                self.timeout = Some(timeout);
            }
            ConfigKey::UtcOffsetHours => {
                let hours: i8 = value
                    .parse()
                    .with_context(|| format!("Invalid UTC offset '{}'", value))?;
                utc_offset(hours)?;
                self.utc_offset_hours = Some(hours);
            }
            ConfigKey::NamePrefix => self.name_prefix = Some(value.to_string()),
        }
        Ok(())
    }

    /// Remove one key.
    pub fn unset(&mut self, key: ConfigKey) {
        match key {
            ConfigKey::Device => self.device = None,
            ConfigKey::Format => self.format = None,
            ConfigKey::Timeout => self.timeout = None,
            ConfigKey::UtcOffsetHours => self.utc_offset_hours = None,
            ConfigKey::NamePrefix => self.name_prefix = None,
        }
    }

    /// The output format to use when no flag is given.
    pub fn output_format(&self) -> OutputFormat {
        self.format
            .as_deref()
            .and_then(OutputFormat::from_name)
            .unwrap_or_default()
    }

    /// Build the session configuration for a command.
    pub fn session_config(&self, connect_timeout: Duration) -> Result<SessionConfig> {
        let offset = match self.utc_offset_hours {
            Some(hours) => utc_offset(hours)?,
            None => UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC),
        };
        let mut config = SessionConfig::default()
            .connect_timeout(connect_timeout)
            .utc_offset(offset);
        if let Some(prefix) = &self.name_prefix {
            config = config.name_prefix(prefix.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

fn utc_offset(hours: i8) -> Result<UtcOffset> {
    UtcOffset::from_hms(hours, 0, 0)
        .with_context(|| format!("UTC offset {} h is out of range", hours))
}

/// Resolve the controller: explicit flag or `WTA_DEVICE` (merged by clap),
/// then the configured default, then the last connected controller.
pub fn resolve_device(device: Option<String>, config: &Config) -> Option<String> {
    device
        .or_else(|| config.device.clone())
        .or_else(|| config.last_device.clone())
}

/// Resolve timeout: use provided value, fall back to config, then default
pub fn resolve_timeout(cmd_timeout: u64, config: &Config, default: u64) -> u64 {
    if cmd_timeout != default {
        cmd_timeout
    } else {
        config.timeout.unwrap_or(default)
    }
}

/// Update the last connected controller in the config file.
pub fn update_last_device(identifier: &str) -> Result<()> {
    let mut config = Config::load();
    if config.last_device.as_deref() == Some(identifier) {
        return Ok(());
    }
    config.last_device = Some(identifier.to_string());
    config.save()
}

//! User configuration for retrace
//!
//! Stored at `~/.config/retrace/config.toml` (Linux/macOS) or
//! `%APPDATA%\retrace\config.toml` (Windows). `RETRACE_CONFIG` points at a
//! different file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "RETRACE_CONFIG";

const BYTES_PER_MB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    pub retention: RetentionConfig,
    pub storage: StorageConfig,
}

/// Journal retention limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Operations kept before the oldest are deleted (default: 10000)
    pub max_operations: u64,

    /// Age in days after which operations are deleted (default: 30)
    pub max_age_days: u32,

    /// Store size ceiling in megabytes (default: 100)
    pub max_size_mb: u64,

    /// Run cleanup after mutating commands when a limit is exceeded
    pub auto_cleanup_enabled: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_operations: 10_000,
            max_age_days: 30,
            max_size_mb: 100,
            auto_cleanup_enabled: true,
        }
    }
}

impl RetentionConfig {
    /// Convert to journal::RetentionPolicy
    pub fn to_retention_policy(&self) -> journal::RetentionPolicy {
        journal::RetentionPolicy {
            max_operations: self.max_operations,
            max_age_days: self.max_age_days,
            max_size_bytes: self.max_size_mb.saturating_mul(BYTES_PER_MB),
            auto_cleanup_enabled: self.auto_cleanup_enabled,
        }
    }
}

/// Where the journal lives and how carefully undo checks files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory override (default: platform data dir + `retrace`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Compare content hashes before moving files back
    pub verify_integrity: bool,
}

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "macos")]
    {
        dirs::home_dir().map(|h| h.join(".config/retrace"))
    }

    #[cfg(not(target_os = "macos"))]
    {
        dirs::config_dir().map(|c| c.join("retrace"))
    }
}

/// Get the config file path, honouring `RETRACE_CONFIG`
pub fn config_file_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration, falling back to defaults when no file exists
pub fn load() -> Result<SystemConfig> {
    let config_path = match config_file_path() {
        Some(p) => p,
        None => {
            tracing::debug!("Could not determine config directory, using defaults");
            return Ok(SystemConfig::default());
        }
    };

    if !config_path.exists() {
        tracing::debug!("Config not found at {}, using defaults", config_path.display());
        return Ok(SystemConfig::default());
    }

    let content = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config at {}", config_path.display()))?;

    let config: SystemConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config at {}", config_path.display()))?;

    tracing::debug!("Loaded config from {}", config_path.display());
    Ok(config)
}

/// Save configuration
pub fn save(config: &SystemConfig) -> Result<PathBuf> {
    let config_path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create config directory at {}", parent.display()))?;
    }

    fs::write(&config_path, render(config)?)
        .with_context(|| format!("Failed to write config to {}", config_path.display()))?;

    tracing::info!("Saved config to {}", config_path.display());
    Ok(config_path)
}

/// Write a default config file unless one already exists.
///
/// Returns the path when a file was created.
pub fn init_if_missing() -> Result<Option<PathBuf>> {
    match config_file_path() {
        Some(p) if p.exists() => Ok(None),
        Some(_) => save(&SystemConfig::default()).map(Some),
        None => Ok(None),
    }
}

/// Render a config with the explanatory header used on disk
pub fn render(config: &SystemConfig) -> Result<String> {
    let mut content = String::from("# retrace configuration\n");
    content.push_str("#\n");
    content.push_str("# [retention] bounds how much history the journal keeps.\n");
    content.push_str("# [storage] selects the data directory and undo integrity checks.\n\n");
    content.push_str(&toml::to_string_pretty(config).context("Failed to serialize config")?);
    Ok(content)
}

//! Configuration file handling.
//!
//! Reads from `~/.config/passcomm-import/config.toml`

use anyhow::{Context, Result};
use passcomm_core::{AssembleOptions, DecodeOptions};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Importer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Encoding label used when the export has no byte order mark.
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// How the export text is read.
    #[serde(default)]
    pub decode: DecodeOptions,
    /// How the KeePass database is built.
    #[serde(default)]
    pub assemble: AssembleOptions,
}

fn default_encoding() -> String {
    // Password Commander ran on Windows and wrote the ANSI code page.
    "windows-1252".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            encoding: default_encoding(),
            decode: DecodeOptions::default(),
            assemble: AssembleOptions::default(),
        }
    }
}

impl Config {
    /// Load configuration from the config file.
    ///
    /// If `custom_path` is provided, load from that path.
    /// Otherwise, load from the default XDG config location.
    /// Creates a default config file if it doesn't exist (only for default path).
    /// Failing to create it is logged and the defaults are used.
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self> {
        let is_custom = custom_path.is_some();
        let config_path = match custom_path {
            Some(path) => path,
            None => match Self::config_path() {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!("Using built-in defaults: {:#}", e);
                    return Ok(Config::default());
                }
            },
        };

        if !config_path.exists() {
            if is_custom {
                anyhow::bail!("Config file not found: {}", config_path.display());
            }
            let config = Config::default();
            match config.save_to(&config_path) {
                Ok(()) => tracing::info!("Created default config at {}", config_path.display()),
                Err(e) => tracing::warn!("Using built-in defaults: {:#}", e),
            }
            return Ok(config);
        }

        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        tracing::debug!("Loaded config from {}: {:?}", config_path.display(), config);
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Save configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }

    /// Get the path to the config file.
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("passcomm-import").join("config.toml"))
    }
}

//! # Configuration Management Module
//!
//! Process-level configuration for the `modpromote` binary: where forum data lives and
//! how logging behaves. The promotion rule itself is *not* part of this file; it is
//! stored in the forum's settings store and edited through the settings page.
//!
//! ## Configuration File Format
//!
//! ```toml
//! [forum]
//! name = "My Forum"
//!
//! [storage]
//! data_dir = "./data"
//!
//! [logging]
//! level = "info"
//! file = "modpromote.log"
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use modpromote::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Data directory: {}", config.storage.data_dir);
//!     Config::create_default("config.toml").await?;
//!     Ok(())
//! }
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForumConfig {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// One of "error", "warn", "info", "debug", "trace". `-v` on the command line overrides it.
    #[serde(default = "default_log_level")]
    pub level: String,
    pub file: Option<String>,
    /// Separate file receiving only `security` target lines (role changes, rule edits)
    #[serde(default)]
    pub security_file: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LoggingConfig {
    pub fn level_filter(&self) -> log::LevelFilter {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "off" => log::LevelFilter::Off,
            "error" => log::LevelFilter::Error,
            "warn" | "warning" => log::LevelFilter::Warn,
            "debug" => log::LevelFilter::Debug,
            "trace" => log::LevelFilter::Trace,
            _ => log::LevelFilter::Info,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub forum: ForumConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        if config.storage.data_dir.trim().is_empty() {
            return Err(anyhow!("Config file {}: storage.data_dir must not be empty", path));
        }

        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            forum: ForumConfig {
                name: "My Forum".to_string(),
            },
            storage: StorageConfig {
                data_dir: "./data".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                file: Some("modpromote.log".to_string()),
                security_file: Some("modpromote-security.log".to_string()),
            },
        }
    }
}

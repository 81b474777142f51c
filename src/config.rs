//! Configuration for the watcher and its logging.
//!
//! Layered with figment:
//! - Default values
//! - TOML configuration file (`.treewatch/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables are prefixed with `TREEWATCH_` and use double
//! underscores to separate nested levels:
//! - `TREEWATCH_WATCHER__EVENT_CAPACITY=64` sets `watcher.event_capacity`
//! - `TREEWATCH_LOGGING__DEFAULT=debug` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::watcher::WatchError;

const CONFIG_DIR: &str = ".treewatch";
const CONFIG_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "TREEWATCH_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Watcher buffering
    #[serde(default)]
    pub watcher: WatcherConfig,

    /// Log levels
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatcherConfig {
    /// Capacity of the caller-facing event channel. The dispatch loop blocks
    /// once this many events are waiting.
    #[serde(default = "default_capacity")]
    pub event_capacity: usize,

    /// Capacity of the caller-facing error channel.
    #[serde(default = "default_capacity")]
    pub error_capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for every target
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `treewatch = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_capacity() -> usize {
    10
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            watcher: WatcherConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_capacity(),
            error_capacity: default_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: HashMap::new(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources.
    ///
    /// The settings file is looked up in `.treewatch/` from the current
    /// directory upwards; a missing file leaves the defaults in place.
    pub fn load() -> Result<Self, WatchError> {
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(CONFIG_FILE));

        Self::load_from(config_path)
    }

    /// Load configuration from a specific file, still honoring env overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, WatchError> {
        Self::figment(path.as_ref(), ENV_PREFIX)
            .extract()
            .map_err(|e| WatchError::Config {
                reason: e.to_string(),
            })
    }

    fn figment(path: &Path, env_prefix: &str) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            // Double underscore becomes a dot; single underscores stay in field names
            .merge(Env::prefixed(env_prefix).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find `.treewatch/settings.toml` in the current directory or an ancestor.
    fn find_workspace_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;

        current
            .ancestors()
            .map(|ancestor| ancestor.join(CONFIG_DIR))
            .find(|dir| dir.is_dir())
            .map(|dir| dir.join(CONFIG_FILE))
    }

    /// Save current configuration to file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), WatchError> {
        let path = path.as_ref();
        let config_err = |reason: String| WatchError::Config { reason };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| config_err(e.to_string()))?;
        }

        let toml_string = toml::to_string_pretty(self).map_err(|e| config_err(e.to_string()))?;
        std::fs::write(path, toml_string).map_err(|e| config_err(e.to_string()))?;

        Ok(())
    }
}

//! Plugin configuration
//!
//! Handles loading of the module enablement map, lifecycle timeouts and
//! directories. Files may be JSON or TOML (chosen by extension).
//!
//! ```toml
//! config_dir = "plugins/survival"
//! shutdown_timeout_secs = 30
//!
//! [modules]
//! traders = true
//! hud = false
//!
//! [logging]
//! filter = "survival_modules=debug"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::{DEFAULT_MODULE_SHUTDOWN_TIMEOUT, DEFAULT_SHUTDOWN_TIMEOUT};

/// Top-level plugin configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Module id -> enabled. Ids not listed use the module's own default.
    #[serde(default)]
    pub modules: BTreeMap<String, bool>,

    /// Root of the per-module configuration directories
    #[serde(default = "default_config_dir")]
    pub config_dir: String,

    /// Directory scanned for `module.toml` manifests (used by the CLI planner)
    #[serde(default = "default_manifests_dir")]
    pub manifests_dir: String,

    /// Upper bound for the whole shutdown pass
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Window given to each module's shutdown hook
    #[serde(default = "default_module_shutdown_timeout")]
    pub module_shutdown_timeout_secs: u64,

    /// Logging configuration
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. `info` or `survival_modules=debug`
    #[serde(default)]
    pub filter: Option<String>,

    /// Emit JSON lines (requires the `json-logging` feature)
    #[serde(default)]
    pub json_format: bool,
}

fn default_config_dir() -> String {
    "config/modules".to_string()
}

fn default_manifests_dir() -> String {
    "modules".to_string()
}

fn default_shutdown_timeout() -> u64 {
    DEFAULT_SHUTDOWN_TIMEOUT.as_secs()
}

fn default_module_shutdown_timeout() -> u64 {
    DEFAULT_MODULE_SHUTDOWN_TIMEOUT.as_secs()
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            modules: BTreeMap::new(),
            config_dir: default_config_dir(),
            manifests_dir: default_manifests_dir(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            module_shutdown_timeout_secs: default_module_shutdown_timeout(),
            logging: None,
        }
    }
}

impl PluginConfig {
    /// Load configuration, picking the format from the file extension
    ///
    /// `.toml` is parsed as TOML; anything else as JSON.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::from_toml_file(path),
            _ => Self::from_json_file(path),
        }
    }

    /// Load configuration from JSON file
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PluginConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from TOML file
    pub fn from_toml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PluginConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to JSON file
    pub fn to_json_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Effective enablement for `id`
    pub fn is_module_enabled(&self, id: &str, default: bool) -> bool {
        self.modules.get(id).copied().unwrap_or(default)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn module_shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.module_shutdown_timeout_secs)
    }

    pub fn config_dir(&self) -> PathBuf {
        PathBuf::from(&self.config_dir)
    }

    pub fn manifests_dir(&self) -> PathBuf {
        PathBuf::from(&self.manifests_dir)
    }
}

//! Configuration management for docloom.
//!
//! Handles loading configuration from TOML files. All settings are
//! construction-time: a [`Config`] is handed to the
//! [`PluginManager`](crate::plugin::PluginManager) when it is created.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::plugin::{ConflictResolution, Priority};

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Registry behaviour
    pub registry: RegistryConfig,

    /// Host identity and per-plugin option overrides
    pub host: HostConfig,

    /// Manifest discovery
    pub discovery: DiscoveryConfig,
}

/// Registry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// What to do when a registration collides with existing state
    pub conflict_resolution: ConflictResolution,

    /// Priority for plugins and capabilities that declare none
    pub default_priority: Priority,

    /// Whether registrations run conflict detection
    pub auto_detect_conflicts: bool,

    /// Global kill switch; when false nothing can be registered
    pub enable_plugins: bool,

    /// Maximum number of registered plugins
    pub max_plugins: usize,

    /// Whether a plugin may re-register a capability it already owns
    pub allow_override: bool,
}

/// Host settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Host version checked against a manifest's `engines.host`
    pub version: String,

    /// Option overrides keyed by plugin id
    pub options: HashMap<String, serde_json::Map<String, serde_json::Value>>,
}

/// Discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Directories searched for plugin manifests
    pub paths: Vec<PathBuf>,

    /// Maximum directory depth below each path
    pub max_depth: usize,

    /// File names recognised as manifests
    pub manifest_names: Vec<String>,
}

impl Config {
    /// Load configuration from the default location.
    ///
    /// Looks for config in:
    /// 1. `docloom.toml` in current directory
    /// 2. `~/.config/docloom/config.toml`
    /// 3. Falls back to defaults
    pub fn load() -> anyhow::Result<Self> {
        let local_config = PathBuf::from("docloom.toml");
        if local_config.exists() {
            return Self::load_from_file(&local_config);
        }

        if let Some(config_dir) = Self::config_dir() {
            let global_config = config_dir.join("config.toml");
            if global_config.exists() {
                return Self::load_from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        tracing::debug!(path = ?path, "Loaded configuration");
        Ok(config)
    }

    /// Get the config directory path.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("docloom"))
    }

    /// Option overrides for a plugin.
    pub fn plugin_options(&self, plugin_id: &str) -> serde_json::Map<String, serde_json::Value> {
        self.host.options.get(plugin_id).cloned().unwrap_or_default()
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            conflict_resolution: ConflictResolution::Error,
            default_priority: Priority::NORMAL,
            auto_detect_conflicts: true,
            enable_plugins: true,
            max_plugins: 100,
            allow_override: false,
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self { version: crate::VERSION.to_string(), options: HashMap::new() }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            max_depth: 3,
            manifest_names: vec!["plugin.json".to_string(), "plugin.toml".to_string()],
        }
    }
}

//! Host-side plugin interface.
//!
//! This module defines the lifecycle trait every plugin implements and the
//! context the host grants a plugin when it is initialized.

use async_trait::async_trait;

use super::{RendererPlugin, TransformerPlugin};

/// Log level for plugin logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Trace level (most verbose).
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

/// Logger handed to a plugin, tagged with its id.
#[derive(Debug, Clone)]
pub struct PluginLogger {
    plugin_id: String,
}

impl PluginLogger {
    /// Create a logger for a plugin.
    pub fn new(plugin_id: &str) -> Self {
        Self { plugin_id: plugin_id.to_string() }
    }

    /// Log a message.
    pub fn log(&self, level: LogLevel, message: &str) {
        let plugin = self.plugin_id.as_str();
        match level {
            LogLevel::Trace => tracing::trace!(plugin, "{}", message),
            LogLevel::Debug => tracing::debug!(plugin, "{}", message),
            LogLevel::Info => tracing::info!(plugin, "{}", message),
            LogLevel::Warn => tracing::warn!(plugin, "{}", message),
            LogLevel::Error => tracing::error!(plugin, "{}", message),
        }
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }
}

/// What the host grants a plugin: a logger and its resolved configuration.
#[derive(Debug, Clone)]
pub struct PluginContext {
    /// Plugin the context belongs to.
    pub plugin_id: String,
    /// Host version string.
    pub host_version: String,
    /// Option defaults from the manifest overlaid with host overrides.
    pub config: serde_json::Map<String, serde_json::Value>,
    /// Logger tagged with the plugin id.
    pub logger: PluginLogger,
}

impl PluginContext {
    /// Create a context with empty configuration.
    pub fn new(plugin_id: &str, host_version: &str) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            host_version: host_version.to_string(),
            config: serde_json::Map::new(),
            logger: PluginLogger::new(plugin_id),
        }
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: serde_json::Map<String, serde_json::Value>) -> Self {
        self.config = config;
        self
    }

    /// Get a typed config value.
    pub fn get_config<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.config.get(key).and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Set a config value.
    pub fn set_config(&mut self, key: &str, value: serde_json::Value) {
        self.config.insert(key.to_string(), value);
    }
}

/// Lifecycle interface every plugin implements.
///
/// Hooks are invoked by the [`PluginManager`](super::PluginManager) only on
/// legal status transitions, so an implementation never sees `activate`
/// twice without a `deactivate` in between.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Called once while loading, with the context the host grants.
    async fn initialize(&mut self, context: &PluginContext) -> anyhow::Result<()>;

    /// Called when moving to `active`.
    async fn activate(&mut self) -> anyhow::Result<()>;

    /// Called when moving from `active` to `inactive`.
    async fn deactivate(&mut self) -> anyhow::Result<()>;

    /// Called once while unloading.
    async fn dispose(&mut self) -> anyhow::Result<()>;

    /// Renderers to register after a successful `initialize`.
    fn renderers(&self) -> Vec<RendererPlugin> {
        Vec::new()
    }

    /// Transformers to register after a successful `initialize`.
    fn transformers(&self) -> Vec<TransformerPlugin> {
        Vec::new()
    }
}

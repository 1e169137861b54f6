//! Resolving a manifest entry point to a plugin instance.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{Plugin, PluginError, PluginManifest, PluginResult};

/// Turns a manifest's `entry` into a live plugin.
#[async_trait]
pub trait PluginLoader: Send + Sync {
    /// Whether this loader understands the manifest's entry point.
    fn can_load(&self, manifest: &PluginManifest) -> bool;

    /// Instantiate the plugin. No lifecycle hook has run yet.
    async fn load(&self, manifest: &PluginManifest) -> PluginResult<Box<dyn Plugin>>;
}

type Factory = Arc<dyn Fn(&PluginManifest) -> Box<dyn Plugin> + Send + Sync>;

/// Loader for plugins compiled into the host.
///
/// Maps entry strings such as `builtin:docx` to factory closures.
#[derive(Clone, Default)]
pub struct StaticLoader {
    factories: HashMap<String, Factory>,
}

impl std::fmt::Debug for StaticLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut entries: Vec<&String> = self.factories.keys().collect();
        entries.sort();
        f.debug_struct("StaticLoader").field("entries", &entries).finish()
    }
}

impl StaticLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory for an entry point, replacing any previous one.
    pub fn register<F>(&mut self, entry: impl Into<String>, factory: F)
    where
        F: Fn(&PluginManifest) -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.factories.insert(entry.into(), Arc::new(factory));
    }

    /// Builder form of [`register`](Self::register).
    pub fn with<F>(mut self, entry: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&PluginManifest) -> Box<dyn Plugin> + Send + Sync + 'static,
    {
        self.register(entry, factory);
        self
    }

    /// Registered entry points.
    pub fn entries(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

#[async_trait]
impl PluginLoader for StaticLoader {
    fn can_load(&self, manifest: &PluginManifest) -> bool {
        self.factories.contains_key(&manifest.entry)
    }

    async fn load(&self, manifest: &PluginManifest) -> PluginResult<Box<dyn Plugin>> {
        let factory = self
            .factories
            .get(&manifest.entry)
            .ok_or_else(|| PluginError::LoaderNotFound(manifest.entry.clone()))?;
        tracing::debug!(plugin = %manifest.id, entry = %manifest.entry, "Instantiating plugin");
        Ok(factory(manifest))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::testing::NoopPlugin;

    #[tokio::test]
    async fn test_static_loader_resolves_entry() {
        let loader = StaticLoader::new().with("builtin:noop", |_| Box::new(NoopPlugin));
        let manifest = PluginManifest::new("noop", "Noop", "1.0.0", "builtin:noop");

        assert!(loader.can_load(&manifest));
        assert!(loader.load(&manifest).await.is_ok());
        assert_eq!(loader.entries().collect::<Vec<_>>(), vec!["builtin:noop"]);
    }

    #[tokio::test]
    async fn test_unknown_entry() {
        let loader = StaticLoader::new();
        let manifest = PluginManifest::new("noop", "Noop", "1.0.0", "./dist/index.js");

        assert!(!loader.can_load(&manifest));
        let err = loader.load(&manifest).await.err().unwrap();
        assert!(matches!(err, PluginError::LoaderNotFound(ref entry) if entry == "./dist/index.js"));
    }
}

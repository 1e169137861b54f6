//! Plugin manager: drives plugins through their lifecycle.
//!
//! The manager owns a [`PluginRegistry`] and an [`EventBus`]. Each lifecycle
//! operation checks the transition table before calling a plugin hook, so
//! an illegal request fails without side effects. A failing hook moves the
//! plugin to `error` before the wrapped error is returned.

use std::fmt;
use std::sync::Arc;

use crate::core::Config;

use super::{
    can_transition, Capability, CapabilityType, EventBus, LifecyclePhase, ManifestSource, Plugin,
    PluginConflict, PluginContext, PluginError, PluginEvent, PluginEventKind, PluginLoader,
    PluginManifest, PluginRegistry, PluginResult, PluginStatus, Priority, RegistrationOutcome,
    RendererPlugin, StaticLoader, Subscription, TransformerPlugin,
};

/// A loaded plugin and its lifecycle state.
pub struct PluginInstance {
    pub id: String,
    pub name: String,
    pub version: String,
    pub manifest: Arc<PluginManifest>,
    pub status: PluginStatus,
    /// Message of the failure that moved the plugin to `error`.
    pub error: Option<String>,
    pub priority: Priority,
    /// Independent of `status`; disabled plugins are hidden from lookups.
    pub enabled: bool,
    /// Context granted at `initialize`.
    pub context: Option<PluginContext>,
    /// Capability registrations rejected while loading.
    pub conflicts: Vec<PluginConflict>,
    plugin: Box<dyn Plugin>,
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("id", &self.id)
            .field("version", &self.version)
            .field("status", &self.status)
            .field("enabled", &self.enabled)
            .field("priority", &self.priority)
            .field("error", &self.error)
            .finish()
    }
}

impl PluginInstance {
    /// Wrap a plugin in `discovered` status.
    pub fn new(manifest: PluginManifest, plugin: Box<dyn Plugin>, default_priority: Priority) -> Self {
        Self {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            priority: manifest.priority.unwrap_or(default_priority),
            manifest: Arc::new(manifest),
            status: PluginStatus::Discovered,
            error: None,
            enabled: true,
            context: None,
            conflicts: Vec::new(),
            plugin,
        }
    }

    /// Declared capabilities.
    pub fn capabilities(&self) -> &[Capability] {
        &self.manifest.capabilities
    }

    pub fn is_active(&self) -> bool {
        self.status == PluginStatus::Active
    }

    fn transition(&mut self, to: PluginStatus) -> PluginResult<()> {
        if !can_transition(self.status, to) {
            return Err(PluginError::InvalidTransition { id: self.id.clone(), from: self.status, to });
        }
        tracing::trace!(plugin = %self.id, from = %self.status, to = %to, "Status transition");
        self.status = to;
        Ok(())
    }

    fn fail(&mut self, error: &PluginError) {
        tracing::error!(plugin = %self.id, error = %error, "Plugin failed");
        if can_transition(self.status, PluginStatus::Error) {
            self.status = PluginStatus::Error;
        }
        self.error = Some(error.to_string());
    }

    fn event(&self, kind: PluginEventKind) -> PluginEvent {
        PluginEvent::new(kind, &self.id, &self.version, self.status)
    }
}

/// Result of a best-effort bulk operation.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    /// Ids processed without error.
    pub succeeded: Vec<String>,
    /// Ids (or manifest paths) that failed, with the error.
    pub failures: Vec<(String, PluginError)>,
}

impl BulkOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_ids(&self) -> Vec<&str> {
        self.failures.iter().map(|(id, _)| id.as_str()).collect()
    }

    fn record(&mut self, id: String, result: PluginResult<()>) {
        match result {
            Ok(()) => self.succeeded.push(id),
            Err(e) => {
                tracing::warn!(plugin = %id, error = %e, "Bulk operation failed for plugin");
                self.failures.push((id, e));
            }
        }
    }
}

/// Orchestrates plugin loading, activation and teardown.
pub struct PluginManager {
    config: Config,
    loader: Arc<dyn PluginLoader>,
    registry: PluginRegistry,
    events: EventBus,
}

impl fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginManager")
            .field("registry", &self.registry)
            .field("events", &self.events)
            .finish()
    }
}

impl PluginManager {
    /// Create a manager with the given configuration and loader.
    pub fn new(config: Config, loader: Arc<dyn PluginLoader>) -> Self {
        let registry = PluginRegistry::new(config.registry.clone());
        Self { config, loader, registry, events: EventBus::new() }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribe to every lifecycle event.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&PluginEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(handler)
    }

    /// Checks that run before a plugin is instantiated.
    fn preflight(&self, manifest: &PluginManifest) -> PluginResult<()> {
        let warnings = manifest.validate().into_result(&manifest.id)?;
        for warning in warnings {
            tracing::warn!(plugin = %manifest.id, "{}", warning);
        }

        let registry = self.registry.config();
        if !registry.enable_plugins {
            return Err(PluginError::PluginsDisabled);
        }
        if self.registry.contains(&manifest.id) {
            return Err(PluginError::AlreadyLoaded(manifest.id.clone()));
        }
        if self.registry.len() >= registry.max_plugins {
            return Err(PluginError::CapacityExceeded { max: registry.max_plugins });
        }

        manifest.check_host_engine(&self.config.host.version)?;

        let report = self.registry.detect_conflicts(manifest);
        if !report.can_register {
            if let Some(conflict) = report.conflicts.into_iter().next() {
                return Err(PluginError::Conflict(conflict));
            }
        }
        Ok(())
    }

    fn context_for(&self, manifest: &PluginManifest) -> PluginContext {
        let mut config = manifest.option_defaults();
        config.extend(self.config.plugin_options(&manifest.id));
        PluginContext::new(&manifest.id, &self.config.host.version).with_config(config)
    }

    /// Validate a manifest, instantiate it through the loader and load it.
    pub async fn load_plugin(&mut self, manifest: PluginManifest) -> PluginResult<&PluginInstance> {
        self.preflight(&manifest)?;
        let plugin = self.loader.load(&manifest).await?;
        self.initialize_and_register(manifest, plugin).await
    }

    /// Load an already constructed plugin.
    pub async fn load_instance(
        &mut self,
        manifest: PluginManifest,
        plugin: Box<dyn Plugin>,
    ) -> PluginResult<&PluginInstance> {
        self.preflight(&manifest)?;
        self.initialize_and_register(manifest, plugin).await
    }

    async fn initialize_and_register(
        &mut self,
        manifest: PluginManifest,
        plugin: Box<dyn Plugin>,
    ) -> PluginResult<&PluginInstance> {
        let context = self.context_for(&manifest);
        let mut instance =
            PluginInstance::new(manifest, plugin, self.registry.config().default_priority);
        let id = instance.id.clone();

        instance.transition(PluginStatus::Validated)?;
        instance.transition(PluginStatus::Loading)?;

        let result = instance.plugin.initialize(&context).await;
        instance.context = Some(context);

        if let Err(e) = result {
            let error = PluginError::runtime(LifecyclePhase::Load, &id, &instance.version, e);
            instance.fail(&error);
            let event = instance.event(PluginEventKind::Error).with_message(error.to_string());
            // Keep the failed instance addressable so callers can inspect it.
            if let Err(register_error) = self.registry.register(instance) {
                tracing::warn!(plugin = %id, error = %register_error, "Could not keep failed plugin");
            }
            self.events.emit(&event);
            return Err(error);
        }

        instance.transition(PluginStatus::Loaded)?;
        let renderers = instance.plugin.renderers();
        let transformers = instance.plugin.transformers();

        let outcome = self.registry.register(instance)?;
        if !outcome.success {
            let conflict = outcome
                .conflict
                .unwrap_or_else(|| PluginConflict::duplicate_id(&id));
            return Err(PluginError::Conflict(conflict));
        }

        let mut rejected = Vec::new();
        for renderer in renderers {
            let name = renderer.name.clone();
            collect_rejection(&id, &name, self.registry.register_renderer(&id, renderer)?, &mut rejected);
        }
        for transformer in transformers {
            let name = transformer.name.clone();
            collect_rejection(&id, &name, self.registry.register_transformer(&id, transformer)?, &mut rejected);
        }

        let instance = self.registry.get_mut(&id).ok_or_else(|| PluginError::NotFound(id.clone()))?;
        instance.conflicts = rejected;
        tracing::info!(plugin = %id, version = %instance.version, "Plugin loaded");
        self.events.emit(&instance.event(PluginEventKind::Loaded));

        self.registry.get(&id).ok_or(PluginError::NotFound(id))
    }

    /// Move a `loaded` or `inactive` plugin to `active`.
    ///
    /// Activating an already active plugin is a no-op.
    pub async fn activate_plugin(&mut self, id: &str) -> PluginResult<()> {
        let instance = self.registry.get_mut(id).ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        if instance.status == PluginStatus::Active {
            tracing::debug!(plugin = %id, "Plugin already active");
            return Ok(());
        }

        instance.transition(PluginStatus::Activating)?;
        if let Err(e) = instance.plugin.activate().await {
            let error = PluginError::runtime(LifecyclePhase::Activate, id, &instance.version, e);
            instance.fail(&error);
            self.events.emit(&instance.event(PluginEventKind::Error).with_message(error.to_string()));
            return Err(error);
        }
        instance.transition(PluginStatus::Active)?;

        tracing::info!(plugin = %id, "Plugin activated");
        self.events.emit(&instance.event(PluginEventKind::Activated));
        Ok(())
    }

    /// Move an `active` plugin to `inactive`.
    ///
    /// Deactivating an inactive plugin is a no-op.
    pub async fn deactivate_plugin(&mut self, id: &str) -> PluginResult<()> {
        let instance = self.registry.get_mut(id).ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        if instance.status == PluginStatus::Inactive {
            tracing::debug!(plugin = %id, "Plugin already inactive");
            return Ok(());
        }

        instance.transition(PluginStatus::Deactivating)?;
        if let Err(e) = instance.plugin.deactivate().await {
            let error = PluginError::runtime(LifecyclePhase::Deactivate, id, &instance.version, e);
            instance.fail(&error);
            self.events.emit(&instance.event(PluginEventKind::Error).with_message(error.to_string()));
            return Err(error);
        }
        instance.transition(PluginStatus::Inactive)?;

        tracing::info!(plugin = %id, "Plugin deactivated");
        self.events.emit(&instance.event(PluginEventKind::Deactivated));
        Ok(())
    }

    /// Dispose a plugin and remove it with all its capabilities.
    ///
    /// An active plugin is deactivated first. The plugin is removed even if
    /// a hook fails; the first failure is returned afterwards.
    pub async fn unload_plugin(&mut self, id: &str) -> PluginResult<()> {
        let status = self
            .registry
            .get(id)
            .map(|p| p.status)
            .ok_or_else(|| PluginError::NotFound(id.to_string()))?;

        let mut first_error = None;
        if status == PluginStatus::Active {
            if let Err(e) = self.deactivate_plugin(id).await {
                first_error = Some(e);
            }
        }

        if let Some(instance) = self.registry.get_mut(id) {
            if let Err(e) = instance.plugin.dispose().await {
                let error = PluginError::runtime(LifecyclePhase::Unload, id, &instance.version, e);
                instance.fail(&error);
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }

        let instance = self.registry.unregister(id).ok_or_else(|| PluginError::NotFound(id.to_string()))?;
        tracing::info!(plugin = %id, "Plugin unloaded");
        self.events.emit(&instance.event(PluginEventKind::Unloaded));

        first_error.map_or(Ok(()), Err)
    }

    /// Hide a plugin's capabilities from lookups. Returns `false` for unknown ids.
    pub fn disable_plugin(&mut self, id: &str) -> bool {
        let was_enabled = self.registry.is_enabled(id);
        if !self.registry.disable_plugin(id) {
            return false;
        }
        if was_enabled == Some(true) {
            if let Some(instance) = self.registry.get(id) {
                tracing::info!(plugin = %id, "Plugin disabled");
                self.events.emit(&instance.event(PluginEventKind::Disabled));
            }
        }
        true
    }

    /// Restore a disabled plugin's capabilities. Returns `false` for unknown ids.
    pub fn enable_plugin(&mut self, id: &str) -> bool {
        let was_enabled = self.registry.is_enabled(id);
        if !self.registry.enable_plugin(id) {
            return false;
        }
        if was_enabled == Some(false) {
            if let Some(instance) = self.registry.get(id) {
                tracing::info!(plugin = %id, "Plugin enabled");
                self.events.emit(&instance.event(PluginEventKind::Enabled));
            }
        }
        true
    }

    /// Register a renderer on behalf of a loaded plugin.
    pub fn register_renderer(
        &mut self,
        plugin_id: &str,
        renderer: RendererPlugin,
    ) -> PluginResult<RegistrationOutcome> {
        self.registry.register_renderer(plugin_id, renderer)
    }

    /// Register a transformer on behalf of a loaded plugin.
    pub fn register_transformer(
        &mut self,
        plugin_id: &str,
        transformer: TransformerPlugin,
    ) -> PluginResult<RegistrationOutcome> {
        self.registry.register_transformer(plugin_id, transformer)
    }

    /// Deactivate every active plugin, continuing past failures.
    pub async fn deactivate_all(&mut self) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        let active: Vec<String> = self
            .registry
            .plugins()
            .into_iter()
            .filter(|p| p.is_active())
            .map(|p| p.id.clone())
            .collect();

        for id in active {
            let result = self.deactivate_plugin(&id).await;
            outcome.record(id, result);
        }
        outcome
    }

    /// Unload every plugin, continuing past failures.
    pub async fn unload_all(&mut self) -> BulkOutcome {
        let mut outcome = BulkOutcome::default();
        for id in self.registry.ids() {
            let result = self.unload_plugin(&id).await;
            outcome.record(id, result);
        }
        outcome
    }

    /// Tear everything down and drop all event subscriptions.
    ///
    /// The manager stays usable afterwards, with nothing loaded.
    pub async fn dispose(&mut self) -> BulkOutcome {
        let mut outcome = self.deactivate_all().await;
        let unloaded = self.unload_all().await;

        let failed: Vec<String> = outcome.failures.iter().map(|(id, _)| id.clone()).collect();
        outcome.succeeded = unloaded.succeeded.into_iter().filter(|id| !failed.contains(id)).collect();
        outcome.failures.extend(unloaded.failures);

        self.events.clear();
        tracing::debug!(failures = outcome.failures.len(), "Plugin manager disposed");
        outcome
    }

    /// Load every manifest a source yields, continuing past failures.
    pub async fn discover_and_load(&mut self, source: &dyn ManifestSource) -> BulkOutcome {
        let report = source.discover();
        let mut outcome = BulkOutcome::default();

        for failure in report.failures {
            let origin = failure.path.display().to_string();
            outcome.failures.push((
                origin.clone(),
                PluginError::Parse { origin, message: failure.error },
            ));
        }

        for discovered in report.manifests {
            let id = discovered.manifest.id.clone();
            let result = self.load_plugin(discovered.manifest).await.map(|_| ());
            outcome.record(id, result);
        }
        outcome
    }

    pub fn get_plugin(&self, id: &str) -> Option<&PluginInstance> {
        self.registry.get(id)
    }

    /// All plugins in load order.
    pub fn get_plugins(&self) -> Vec<&PluginInstance> {
        self.registry.plugins()
    }

    pub fn get_plugins_by_status(&self, status: PluginStatus) -> Vec<&PluginInstance> {
        self.registry.plugins().into_iter().filter(|p| p.status == status).collect()
    }

    /// Plugins whose manifest declares a capability of this type.
    pub fn get_plugins_by_capability(&self, capability_type: &CapabilityType) -> Vec<&PluginInstance> {
        self.registry
            .plugins()
            .into_iter()
            .filter(|p| p.manifest.declares(capability_type))
            .collect()
    }

    /// All plugins, highest priority first.
    pub fn get_plugins_by_priority(&self) -> Vec<&PluginInstance> {
        self.registry.plugins_by_priority()
    }

    pub fn plugin_count(&self) -> usize {
        self.registry.len()
    }

    pub fn get_renderer(&self, name: &str) -> Option<&RendererPlugin> {
        self.registry.get_renderer(name)
    }

    pub fn get_transformer(&self, name: &str) -> Option<&TransformerPlugin> {
        self.registry.get_transformer(name)
    }

    pub fn get_renderers_by_extension(&self, extension: &str) -> Vec<&RendererPlugin> {
        self.registry.get_renderers_by_extension(extension)
    }

    pub fn get_transformers_by_input_type(&self, input_type: &str) -> Vec<&TransformerPlugin> {
        self.registry.get_transformers_by_input_type(input_type)
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new(Config::default(), Arc::new(StaticLoader::new()))
    }
}

fn collect_rejection(
    plugin_id: &str,
    capability: &str,
    outcome: RegistrationOutcome,
    rejected: &mut Vec<PluginConflict>,
) {
    if outcome.success {
        return;
    }
    if let Some(conflict) = outcome.conflict {
        tracing::warn!(plugin = %plugin_id, capability, %conflict, "Capability not registered");
        rejected.push(conflict);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::core::RegistryConfig;
    use crate::plugin::testing::{renderer, NoopPlugin};
    use crate::plugin::{ConflictResolution, PluginEventKind};

    #[derive(Default)]
    struct Calls {
        initialize: AtomicUsize,
        activate: AtomicUsize,
        deactivate: AtomicUsize,
        dispose: AtomicUsize,
    }

    /// Counts hook calls and fails the hook named in `fail_on`.
    struct CountingPlugin {
        calls: Arc<Calls>,
        fail_on: Option<LifecyclePhase>,
        seen_config: Arc<Mutex<Option<serde_json::Map<String, serde_json::Value>>>>,
    }

    impl CountingPlugin {
        fn new(calls: Arc<Calls>) -> Self {
            Self { calls, fail_on: None, seen_config: Arc::default() }
        }

        fn failing(calls: Arc<Calls>, phase: LifecyclePhase) -> Self {
            Self { fail_on: Some(phase), ..Self::new(calls) }
        }

        fn check(&self, phase: LifecyclePhase) -> anyhow::Result<()> {
            if self.fail_on == Some(phase) {
                anyhow::bail!("{phase} exploded");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl Plugin for CountingPlugin {
        async fn initialize(&mut self, context: &PluginContext) -> anyhow::Result<()> {
            self.calls.initialize.fetch_add(1, Ordering::SeqCst);
            *self.seen_config.lock() = Some(context.config.clone());
            self.check(LifecyclePhase::Load)
        }

        async fn activate(&mut self) -> anyhow::Result<()> {
            self.calls.activate.fetch_add(1, Ordering::SeqCst);
            self.check(LifecyclePhase::Activate)
        }

        async fn deactivate(&mut self) -> anyhow::Result<()> {
            self.calls.deactivate.fetch_add(1, Ordering::SeqCst);
            self.check(LifecyclePhase::Deactivate)
        }

        async fn dispose(&mut self) -> anyhow::Result<()> {
            self.calls.dispose.fetch_add(1, Ordering::SeqCst);
            self.check(LifecyclePhase::Unload)
        }

        fn renderers(&self) -> Vec<RendererPlugin> {
            vec![renderer("counting", &["cnt"])]
        }
    }

    fn manifest(id: &str) -> PluginManifest {
        PluginManifest::new(id, id, "1.0.0", format!("builtin:{id}"))
            .with_capability(Capability::new(CapabilityType::Renderer, id))
    }

    fn record_events(manager: &PluginManager) -> Arc<Mutex<Vec<String>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.subscribe(move |e| sink.lock().push(e.kind.as_str().to_string()));
        seen
    }

    #[tokio::test]
    async fn test_load_runs_initialize_and_registers_capabilities() {
        let mut manager = PluginManager::default();
        let calls = Arc::new(Calls::default());

        let plugin = manager
            .load_instance(manifest("cnt"), Box::new(CountingPlugin::new(Arc::clone(&calls))))
            .await
            .unwrap();
        assert_eq!(plugin.status, PluginStatus::Loaded);
        assert!(plugin.context.is_some());
        assert_eq!(calls.initialize.load(Ordering::SeqCst), 1);

        let renderer = manager.get_renderer("counting").unwrap();
        assert_eq!(renderer.plugin_id, "cnt");
    }

    #[tokio::test]
    async fn test_invalid_manifest_never_reaches_registry() {
        let mut manager = PluginManager::default();
        let bad = PluginManifest::new("Bad Id", "Bad", "1.0", "x");
        let err = manager.load_instance(bad, Box::new(NoopPlugin)).await.unwrap_err();

        match err {
            PluginError::InvalidManifest { errors, .. } => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(manager.plugin_count(), 0);
    }

    #[tokio::test]
    async fn test_already_loaded() {
        let mut manager = PluginManager::default();
        manager.load_instance(manifest("a"), Box::new(NoopPlugin)).await.unwrap();
        let err = manager.load_instance(manifest("a"), Box::new(NoopPlugin)).await.unwrap_err();
        assert!(matches!(err, PluginError::AlreadyLoaded(ref id) if id == "a"));
    }

    #[tokio::test]
    async fn test_initialize_failure_moves_to_error() {
        let mut manager = PluginManager::default();
        let events = record_events(&manager);
        let calls = Arc::new(Calls::default());

        let err = manager
            .load_instance(manifest("boom"), Box::new(CountingPlugin::failing(calls, LifecyclePhase::Load)))
            .await
            .unwrap_err();
        assert_eq!(err.phase(), Some(LifecyclePhase::Load));

        let plugin = manager.get_plugin("boom").unwrap();
        assert_eq!(plugin.status, PluginStatus::Error);
        assert!(plugin.error.as_deref().unwrap().contains("load exploded"));
        assert!(manager.get_renderer("counting").is_none());
        assert_eq!(*events.lock(), vec!["error"]);

        // Terminal until unloaded.
        assert!(matches!(
            manager.activate_plugin("boom").await,
            Err(PluginError::InvalidTransition { .. })
        ));
        manager.unload_plugin("boom").await.unwrap();
        assert!(manager.get_plugin("boom").is_none());
    }

    #[tokio::test]
    async fn test_activate_is_idempotent() {
        let mut manager = PluginManager::default();
        let calls = Arc::new(Calls::default());
        manager
            .load_instance(manifest("cnt"), Box::new(CountingPlugin::new(Arc::clone(&calls))))
            .await
            .unwrap();

        manager.activate_plugin("cnt").await.unwrap();
        manager.activate_plugin("cnt").await.unwrap();
        assert_eq!(manager.get_plugin("cnt").unwrap().status, PluginStatus::Active);
        assert_eq!(calls.activate.load(Ordering::SeqCst), 1);

        manager.deactivate_plugin("cnt").await.unwrap();
        manager.deactivate_plugin("cnt").await.unwrap();
        assert_eq!(manager.get_plugin("cnt").unwrap().status, PluginStatus::Inactive);
        assert_eq!(calls.deactivate.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deactivate_before_activate_is_rejected() {
        let mut manager = PluginManager::default();
        let calls = Arc::new(Calls::default());
        manager
            .load_instance(manifest("cnt"), Box::new(CountingPlugin::new(Arc::clone(&calls))))
            .await
            .unwrap();

        let err = manager.deactivate_plugin("cnt").await.unwrap_err();
        assert!(matches!(
            err,
            PluginError::InvalidTransition { from: PluginStatus::Loaded, to: PluginStatus::Deactivating, .. }
        ));
        assert_eq!(calls.deactivate.load(Ordering::SeqCst), 0);
        assert_eq!(manager.get_plugin("cnt").unwrap().status, PluginStatus::Loaded);
    }

    #[tokio::test]
    async fn test_activate_failure() {
        let mut manager = PluginManager::default();
        let calls = Arc::new(Calls::default());
        manager
            .load_instance(
                manifest("cnt"),
                Box::new(CountingPlugin::failing(calls, LifecyclePhase::Activate)),
            )
            .await
            .unwrap();

        let err = manager.activate_plugin("cnt").await.unwrap_err();
        assert_eq!(err.phase(), Some(LifecyclePhase::Activate));
        assert_eq!(manager.get_plugin("cnt").unwrap().status, PluginStatus::Error);
    }

    #[tokio::test]
    async fn test_not_found() {
        let mut manager = PluginManager::default();
        assert!(matches!(manager.activate_plugin("x").await, Err(PluginError::NotFound(_))));
        assert!(matches!(manager.deactivate_plugin("x").await, Err(PluginError::NotFound(_))));
        assert!(matches!(manager.unload_plugin("x").await, Err(PluginError::NotFound(_))));
        assert!(!manager.disable_plugin("x"));
        assert!(!manager.enable_plugin("x"));
    }

    #[tokio::test]
    async fn test_unload_active_plugin_deactivates_first() {
        let mut manager = PluginManager::default();
        let events = record_events(&manager);
        let calls = Arc::new(Calls::default());
        manager
            .load_instance(manifest("cnt"), Box::new(CountingPlugin::new(Arc::clone(&calls))))
            .await
            .unwrap();
        manager.activate_plugin("cnt").await.unwrap();

        manager.unload_plugin("cnt").await.unwrap();
        assert_eq!(calls.deactivate.load(Ordering::SeqCst), 1);
        assert_eq!(calls.dispose.load(Ordering::SeqCst), 1);
        assert!(manager.get_renderer("counting").is_none());
        assert_eq!(*events.lock(), vec!["loaded", "activated", "deactivated", "unloaded"]);
    }

    #[tokio::test]
    async fn test_failing_dispose_still_removes_plugin() {
        let mut manager = PluginManager::default();
        let calls = Arc::new(Calls::default());
        manager
            .load_instance(
                manifest("cnt"),
                Box::new(CountingPlugin::failing(calls, LifecyclePhase::Unload)),
            )
            .await
            .unwrap();

        let err = manager.unload_plugin("cnt").await.unwrap_err();
        assert_eq!(err.phase(), Some(LifecyclePhase::Unload));
        assert_eq!(manager.plugin_count(), 0);
        assert!(manager.get_renderer("counting").is_none());
    }

    #[tokio::test]
    async fn test_context_merges_defaults_and_overrides() {
        let mut config = Config::default();
        let mut overrides = serde_json::Map::new();
        overrides.insert("theme".to_string(), serde_json::json!("dark"));
        config.host.options.insert("cnt".to_string(), overrides);

        let mut manager = PluginManager::new(config, Arc::new(StaticLoader::new()));
        let plugin = CountingPlugin::new(Arc::new(Calls::default()));
        let seen = Arc::clone(&plugin.seen_config);

        let manifest = manifest("cnt").with_options(serde_json::json!({
            "properties": {
                "theme": { "default": "light" },
                "embedImages": { "default": true }
            }
        }));
        manager.load_instance(manifest, Box::new(plugin)).await.unwrap();

        let seen = seen.lock().clone().unwrap();
        assert_eq!(seen.get("theme"), Some(&serde_json::json!("dark")));
        assert_eq!(seen.get("embedImages"), Some(&serde_json::json!(true)));
    }

    #[tokio::test]
    async fn test_incompatible_engine_skips_hooks() {
        let mut manager = PluginManager::default();
        let calls = Arc::new(Calls::default());
        let manifest = manifest("future").with_engine("host", ">=99.0.0");

        let err = manager
            .load_instance(manifest, Box::new(CountingPlugin::new(Arc::clone(&calls))))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::IncompatibleEngine { .. }));
        assert_eq!(calls.initialize.load(Ordering::SeqCst), 0);
        assert_eq!(manager.plugin_count(), 0);
    }

    #[tokio::test]
    async fn test_contributed_capability_conflict_is_recorded() {
        let mut manager = PluginManager::default();
        let calls = Arc::new(Calls::default());
        manager
            .load_instance(
                PluginManifest::new("first", "First", "1.0.0", "x"),
                Box::new(CountingPlugin::new(Arc::clone(&calls))),
            )
            .await
            .unwrap();

        let second = manager
            .load_instance(
                PluginManifest::new("second", "Second", "1.0.0", "x"),
                Box::new(CountingPlugin::new(Arc::clone(&calls))),
            )
            .await
            .unwrap();
        assert_eq!(second.status, PluginStatus::Loaded);
        assert_eq!(second.conflicts.len(), 1);
        assert_eq!(second.conflicts[0].existing_plugin_id, "first");
        assert_eq!(manager.get_renderer("counting").unwrap().plugin_id, "first");
    }

    #[tokio::test]
    async fn test_declared_capability_conflict_fails_before_hooks() {
        let mut manager = PluginManager::default();
        manager.load_instance(manifest("md"), Box::new(NoopPlugin)).await.unwrap();
        manager.register_renderer("md", renderer("md", &["md"])).unwrap();

        let calls = Arc::new(Calls::default());
        let clash = PluginManifest::new("md-fork", "Fork", "1.0.0", "x")
            .with_capability(Capability::new(CapabilityType::Renderer, "md"));
        let err = manager
            .load_instance(clash, Box::new(CountingPlugin::new(Arc::clone(&calls))))
            .await
            .unwrap_err();

        assert!(matches!(err, PluginError::Conflict(_)));
        assert!(err.suggestion().unwrap().contains("override"));
        assert_eq!(calls.initialize.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_override_policy_lets_declared_clash_through() {
        let config = Config {
            registry: RegistryConfig {
                conflict_resolution: ConflictResolution::Override,
                ..RegistryConfig::default()
            },
            ..Config::default()
        };
        let mut manager = PluginManager::new(config, Arc::new(StaticLoader::new()));
        manager.load_instance(manifest("md"), Box::new(NoopPlugin)).await.unwrap();
        manager.register_renderer("md", renderer("md", &["md"])).unwrap();

        let clash = PluginManifest::new("md-fork", "Fork", "1.0.0", "x")
            .with_capability(Capability::new(CapabilityType::Renderer, "md"));
        manager.load_instance(clash, Box::new(NoopPlugin)).await.unwrap();
        assert_eq!(manager.plugin_count(), 2);
    }

    #[tokio::test]
    async fn test_load_plugin_uses_loader() {
        let loader = StaticLoader::new().with("builtin:noop", |_| Box::new(NoopPlugin));
        let mut manager = PluginManager::new(Config::default(), Arc::new(loader));

        let ok = PluginManifest::new("noop", "Noop", "1.0.0", "builtin:noop");
        assert_eq!(manager.load_plugin(ok).await.unwrap().status, PluginStatus::Loaded);

        let missing = PluginManifest::new("other", "Other", "1.0.0", "builtin:other");
        assert!(matches!(manager.load_plugin(missing).await, Err(PluginError::LoaderNotFound(_))));
        assert_eq!(manager.plugin_count(), 1);
    }

    #[tokio::test]
    async fn test_enable_disable_emit_on_change_only() {
        let mut manager = PluginManager::default();
        manager.load_instance(manifest("md"), Box::new(NoopPlugin)).await.unwrap();
        let events = record_events(&manager);

        assert!(manager.disable_plugin("md"));
        assert!(manager.disable_plugin("md"));
        assert!(manager.enable_plugin("md"));
        assert!(manager.enable_plugin("md"));
        assert_eq!(*events.lock(), vec!["disabled", "enabled"]);
    }

    #[tokio::test]
    async fn test_queries() {
        let mut manager = PluginManager::default();
        manager
            .load_instance(manifest("low").with_priority(Priority::LOW), Box::new(NoopPlugin))
            .await
            .unwrap();
        manager
            .load_instance(
                PluginManifest::new("tx", "Tx", "1.0.0", "x")
                    .with_priority(Priority::HIGH)
                    .with_capability(Capability::new(CapabilityType::Transformer, "tx")),
                Box::new(NoopPlugin),
            )
            .await
            .unwrap();
        manager.activate_plugin("tx").await.unwrap();

        let ids = |plugins: Vec<&PluginInstance>| -> Vec<String> {
            plugins.iter().map(|p| p.id.clone()).collect()
        };
        assert_eq!(ids(manager.get_plugins()), vec!["low", "tx"]);
        assert_eq!(ids(manager.get_plugins_by_priority()), vec!["tx", "low"]);
        assert_eq!(ids(manager.get_plugins_by_status(PluginStatus::Active)), vec!["tx"]);
        assert_eq!(ids(manager.get_plugins_by_capability(&CapabilityType::Renderer)), vec!["low"]);
        assert_eq!(ids(manager.get_plugins_by_capability(&CapabilityType::Transformer)), vec!["tx"]);
        assert!(manager.get_plugins_by_capability(&CapabilityType::Exporter).is_empty());
    }

    #[tokio::test]
    async fn test_bulk_operations_are_best_effort() {
        let mut manager = PluginManager::default();
        let calls = Arc::new(Calls::default());
        manager
            .load_instance(
                manifest("bad"),
                Box::new(CountingPlugin::failing(Arc::clone(&calls), LifecyclePhase::Deactivate)),
            )
            .await
            .unwrap();
        manager
            .load_instance(
                PluginManifest::new("good", "Good", "1.0.0", "x"),
                Box::new(CountingPlugin::new(Arc::clone(&calls))),
            )
            .await
            .unwrap();
        manager.activate_plugin("bad").await.unwrap();
        manager.activate_plugin("good").await.unwrap();

        let outcome = manager.deactivate_all().await;
        assert_eq!(outcome.succeeded, vec!["good"]);
        assert_eq!(outcome.failed_ids(), vec!["bad"]);
        assert_eq!(manager.get_plugin("bad").unwrap().status, PluginStatus::Error);

        let outcome = manager.unload_all().await;
        assert!(outcome.is_success());
        assert_eq!(manager.plugin_count(), 0);
        assert_eq!(calls.dispose.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dispose_clears_subscriptions() {
        let mut manager = PluginManager::default();
        manager.load_instance(manifest("a"), Box::new(NoopPlugin)).await.unwrap();
        manager.activate_plugin("a").await.unwrap();
        let events = record_events(&manager);

        let outcome = manager.dispose().await;
        assert!(outcome.is_success());
        assert_eq!(outcome.succeeded, vec!["a"]);
        assert_eq!(manager.plugin_count(), 0);
        assert_eq!(manager.events().subscriber_count(), 0);
        assert_eq!(*events.lock(), vec!["deactivated", "unloaded"]);

        manager.load_instance(manifest("a"), Box::new(NoopPlugin)).await.unwrap();
        assert_eq!(manager.plugin_count(), 1);
    }

    #[tokio::test]
    async fn test_discover_and_load() {
        let mut manager = PluginManager::default();
        let manifests = vec![
            PluginManifest::new("one", "One", "1.0.0", "builtin:missing"),
            PluginManifest::new("Two", "Two", "1.0.0", "x"),
        ];

        let outcome = manager.discover_and_load(&manifests).await;
        assert!(outcome.succeeded.is_empty());
        assert_eq!(outcome.failures.len(), 2);
        assert!(matches!(outcome.failures[0].1, PluginError::LoaderNotFound(_)));
        assert!(matches!(outcome.failures[1].1, PluginError::InvalidManifest { .. }));
    }

    #[tokio::test]
    async fn test_kill_switch_blocks_loading() {
        let config = Config {
            registry: RegistryConfig { enable_plugins: false, ..RegistryConfig::default() },
            ..Config::default()
        };
        let mut manager = PluginManager::new(config, Arc::new(StaticLoader::new()));
        let err = manager.load_instance(manifest("a"), Box::new(NoopPlugin)).await.unwrap_err();
        assert!(matches!(err, PluginError::PluginsDisabled));
    }

    #[tokio::test]
    async fn test_event_payload() {
        let mut manager = PluginManager::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        manager.events().subscribe_to(PluginEventKind::Activated, move |e| sink.lock().push(e.clone()));

        manager.load_instance(manifest("a"), Box::new(NoopPlugin)).await.unwrap();
        manager.activate_plugin("a").await.unwrap();

        let events = seen.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].plugin_id, "a");
        assert_eq!(events[0].version, "1.0.0");
        assert_eq!(events[0].status, PluginStatus::Active);
    }
}

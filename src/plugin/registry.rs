//! Plugin and capability registries.
//!
//! [`CapabilityRegistry`] stores registered renderers and transformers,
//! detects name collisions and answers priority-ordered queries.
//! [`PluginRegistry`] owns the plugin instances, enforces one instance per
//! id and the `max_plugins` cap, and cascades enable/disable and removal to
//! the capability registry.
//!
//! Every method here is synchronous: a conflict check and the commit that
//! follows it happen under the same `&mut self` borrow.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::core::RegistryConfig;

use super::capability::{CapabilityEntry, CapabilityTable, Slot};
use super::priority::{priority_order, sort_by_priority};
use super::{
    CapabilityType, ConflictReport, ConflictResolution, PluginConflict, PluginError,
    PluginInstance, PluginManifest, PluginResult, PluginStatus, Priority, RegistrationOutcome,
    RendererPlugin, TransformerPlugin,
};

/// Conflict handling shared by both capability tables.
#[derive(Debug, Clone, Copy)]
struct ConflictPolicy {
    resolution: ConflictResolution,
    auto_detect: bool,
    allow_override: bool,
}

impl ConflictPolicy {
    fn from_config(config: &RegistryConfig) -> Self {
        Self {
            resolution: config.conflict_resolution,
            auto_detect: config.auto_detect_conflicts,
            allow_override: config.allow_override,
        }
    }

    /// Conflict `entry` would cause in `table`, if any.
    fn conflict_for<T: CapabilityEntry>(
        self,
        table: &CapabilityTable<T>,
        name: &str,
        plugin_id: &str,
    ) -> Option<PluginConflict> {
        let existing = table.get(name)?;
        let owner = existing.entry.plugin_id();
        if owner == plugin_id && self.allow_override {
            return None;
        }
        Some(PluginConflict::duplicate_capability(name, owner))
    }

    fn register<T: CapabilityEntry>(
        self,
        table: &mut CapabilityTable<T>,
        entry: T,
    ) -> RegistrationOutcome {
        if !self.auto_detect {
            table.insert(entry);
            return RegistrationOutcome::registered();
        }

        match self.conflict_for(table, entry.name(), entry.plugin_id()) {
            None => {
                table.insert(entry);
                RegistrationOutcome::registered()
            }
            Some(conflict) if self.resolution.resolves_conflicts() => {
                tracing::warn!(
                    capability = entry.name(),
                    plugin = entry.plugin_id(),
                    replaced = %conflict.existing_plugin_id,
                    "Overriding existing capability"
                );
                table.insert(entry);
                RegistrationOutcome::resolved(conflict)
            }
            Some(conflict) => {
                tracing::debug!(capability = entry.name(), %conflict, "Capability registration rejected");
                RegistrationOutcome::rejected(conflict)
            }
        }
    }
}

/// Registered renderers and transformers.
///
/// Renderer and transformer names are separate namespaces. Entries owned by
/// a suspended (disabled) plugin stay stored but are hidden from lookups.
#[derive(Debug)]
pub struct CapabilityRegistry {
    policy: ConflictPolicy,
    default_priority: Priority,
    renderers: CapabilityTable<RendererPlugin>,
    transformers: CapabilityTable<TransformerPlugin>,
    suspended: HashSet<String>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    pub fn new(config: &RegistryConfig) -> Self {
        Self {
            policy: ConflictPolicy::from_config(config),
            default_priority: config.default_priority,
            renderers: CapabilityTable::new(),
            transformers: CapabilityTable::new(),
            suspended: HashSet::new(),
        }
    }

    /// Detect conflicts for a set of capability names owned by `plugin_id`.
    pub fn detect_conflicts(
        &self,
        plugin_id: &str,
        renderer_names: &[&str],
        transformer_names: &[&str],
    ) -> ConflictReport {
        if !self.policy.auto_detect {
            return ConflictReport::clear();
        }

        let mut conflicts: Vec<PluginConflict> = renderer_names
            .iter()
            .filter_map(|name| self.policy.conflict_for(&self.renderers, name, plugin_id))
            .collect();
        conflicts.extend(
            transformer_names
                .iter()
                .filter_map(|name| self.policy.conflict_for(&self.transformers, name, plugin_id)),
        );

        ConflictReport::new(conflicts, self.policy.resolution)
    }

    /// Register a renderer. Its `plugin_id` must already be set.
    pub fn register_renderer(&mut self, renderer: RendererPlugin) -> RegistrationOutcome {
        self.policy.register(&mut self.renderers, renderer)
    }

    /// Register a transformer. Its `plugin_id` must already be set.
    pub fn register_transformer(&mut self, transformer: TransformerPlugin) -> RegistrationOutcome {
        self.policy.register(&mut self.transformers, transformer)
    }

    /// Remove a renderer by name.
    pub fn unregister_renderer(&mut self, name: &str) -> bool {
        self.renderers.remove(name).is_some()
    }

    /// Remove a transformer by name.
    pub fn unregister_transformer(&mut self, name: &str) -> bool {
        self.transformers.remove(name).is_some()
    }

    /// Remove everything a plugin registered. Returns the number removed.
    pub fn remove_plugin(&mut self, plugin_id: &str) -> usize {
        self.suspended.remove(plugin_id);
        self.renderers.remove_owned_by(plugin_id).len()
            + self.transformers.remove_owned_by(plugin_id).len()
    }

    /// Hide a plugin's entries from lookups without removing them.
    pub fn suspend(&mut self, plugin_id: &str) {
        self.suspended.insert(plugin_id.to_string());
    }

    /// Make a suspended plugin's entries visible again.
    pub fn resume(&mut self, plugin_id: &str) {
        self.suspended.remove(plugin_id);
    }

    fn visible<'a, T: CapabilityEntry>(&'a self, slot: &'a Slot<T>) -> Option<&'a Slot<T>> {
        (!self.suspended.contains(slot.entry.plugin_id())).then_some(slot)
    }

    fn ordered<'a, T: CapabilityEntry>(
        &'a self,
        slots: impl Iterator<Item = &'a Slot<T>>,
    ) -> Vec<&'a T> {
        let mut visible: Vec<&Slot<T>> = slots.filter_map(|s| self.visible(s)).collect();
        let default = self.default_priority;
        sort_by_priority(&mut visible, |s| (s.entry.priority().unwrap_or(default), s.seq));
        visible.into_iter().map(|s| &s.entry).collect()
    }

    /// Look up a renderer by name.
    pub fn get_renderer(&self, name: &str) -> Option<&RendererPlugin> {
        self.renderers.get(name).and_then(|s| self.visible(s)).map(|s| &s.entry)
    }

    /// Look up a transformer by name.
    pub fn get_transformer(&self, name: &str) -> Option<&TransformerPlugin> {
        self.transformers.get(name).and_then(|s| self.visible(s)).map(|s| &s.entry)
    }

    /// Renderers handling an extension, highest priority first.
    pub fn get_renderers_by_extension(&self, extension: &str) -> Vec<&RendererPlugin> {
        self.ordered(self.renderers.slots().filter(|s| s.entry.handles(extension)))
    }

    /// Transformers accepting an input type, highest priority first.
    pub fn get_transformers_by_input_type(&self, input_type: &str) -> Vec<&TransformerPlugin> {
        self.ordered(self.transformers.slots().filter(|s| s.entry.input_type == input_type))
    }

    /// Best transformer between two types.
    pub fn get_transformer_for(&self, input_type: &str, output_type: &str) -> Option<&TransformerPlugin> {
        self.get_transformers_by_input_type(input_type)
            .into_iter()
            .find(|t| t.output_type == output_type)
    }

    /// All visible renderers, highest priority first.
    pub fn renderers(&self) -> Vec<&RendererPlugin> {
        self.ordered(self.renderers.slots())
    }

    /// All visible transformers, highest priority first.
    pub fn transformers(&self) -> Vec<&TransformerPlugin> {
        self.ordered(self.transformers.slots())
    }

    /// Extensions with at least one visible renderer.
    pub fn supported_extensions(&self) -> BTreeSet<String> {
        self.renderers()
            .into_iter()
            .flat_map(|r| r.extensions.iter().cloned())
            .collect()
    }

    /// Stored renderers including suspended ones.
    pub fn renderer_count(&self) -> usize {
        self.renderers.len()
    }

    /// Stored transformers including suspended ones.
    pub fn transformer_count(&self) -> usize {
        self.transformers.len()
    }
}

/// A plugin instance plus its registration order.
struct RegisteredPlugin {
    instance: PluginInstance,
    seq: u64,
}

/// Registry of plugin instances.
pub struct PluginRegistry {
    config: RegistryConfig,
    plugins: HashMap<String, RegisteredPlugin>,
    capabilities: CapabilityRegistry,
    next_seq: u64,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.plugins.len())
            .field("renderers", &self.capabilities.renderer_count())
            .field("transformers", &self.capabilities.transformer_count())
            .finish()
    }
}

fn declared_names<'a>(manifest: &'a PluginManifest, kind: &CapabilityType) -> Vec<&'a str> {
    manifest
        .capabilities
        .iter()
        .filter(|c| &c.capability_type == kind)
        .map(|c| c.name.as_str())
        .collect()
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        let capabilities = CapabilityRegistry::new(&config);
        Self { config, plugins: HashMap::new(), capabilities, next_seq: 0 }
    }

    /// Registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Detect conflicts a plugin would cause: a duplicate id, and any
    /// declared renderer/transformer name owned by another plugin.
    pub fn detect_conflicts(&self, manifest: &PluginManifest) -> ConflictReport {
        if !self.config.auto_detect_conflicts {
            return ConflictReport::clear();
        }

        let mut conflicts = Vec::new();
        if self.plugins.contains_key(&manifest.id) {
            conflicts.push(PluginConflict::duplicate_id(&manifest.id));
        }

        let renderers = declared_names(manifest, &CapabilityType::Renderer);
        let transformers = declared_names(manifest, &CapabilityType::Transformer);
        let capability_report =
            self.capabilities.detect_conflicts(&manifest.id, &renderers, &transformers);
        conflicts.extend(
            capability_report
                .conflicts
                .into_iter()
                // Entries owned by a same-id plugin go away if it is replaced.
                .filter(|c| c.existing_plugin_id != manifest.id),
        );

        ConflictReport::new(conflicts, self.config.conflict_resolution)
    }

    /// Register a plugin instance.
    ///
    /// Hard failures (kill switch, capacity) are errors; conflicts are
    /// reported through the outcome. An instance replaced under
    /// `override`/`ignore` is dropped without running `dispose`; use
    /// [`register_replacing`](Self::register_replacing) to tear it down.
    pub fn register(&mut self, instance: PluginInstance) -> PluginResult<RegistrationOutcome> {
        let (outcome, replaced) = self.register_replacing(instance)?;
        if let Some(replaced) = replaced {
            tracing::debug!(plugin = %replaced.id, status = %replaced.status, "Dropped replaced plugin");
        }
        Ok(outcome)
    }

    /// Register a plugin instance, handing back the instance it replaced.
    ///
    /// The returned instance is already unregistered along with its
    /// capabilities; the caller owns its `dispose` hook.
    pub fn register_replacing(
        &mut self,
        instance: PluginInstance,
    ) -> PluginResult<(RegistrationOutcome, Option<PluginInstance>)> {
        if !self.config.enable_plugins {
            return Err(PluginError::PluginsDisabled);
        }

        let report = self.detect_conflicts(&instance.manifest);
        if !report.can_register {
            let conflict = report.conflicts.into_iter().next();
            return Ok((RegistrationOutcome { success: false, conflict }, None));
        }

        let replacing = self.plugins.contains_key(&instance.id);
        if !replacing && self.plugins.len() >= self.config.max_plugins {
            return Err(PluginError::CapacityExceeded { max: self.config.max_plugins });
        }

        let (seq, replaced) = match self.plugins.remove(&instance.id) {
            Some(previous) => {
                tracing::warn!(plugin = %instance.id, "Replacing registered plugin");
                self.capabilities.remove_plugin(&instance.id);
                (previous.seq, Some(previous.instance))
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                (seq, None)
            }
        };

        if !instance.enabled {
            self.capabilities.suspend(&instance.id);
        }
        tracing::debug!(plugin = %instance.id, seq, "Registered plugin");
        self.plugins.insert(instance.id.clone(), RegisteredPlugin { instance, seq });

        let outcome = report.conflicts.into_iter().next().map_or_else(
            RegistrationOutcome::registered,
            RegistrationOutcome::resolved,
        );
        Ok((outcome, replaced))
    }

    /// Remove a plugin and every capability it registered.
    pub fn unregister(&mut self, id: &str) -> Option<PluginInstance> {
        let registered = self.plugins.remove(id)?;
        let removed = self.capabilities.remove_plugin(id);
        tracing::debug!(plugin = %id, capabilities = removed, "Unregistered plugin");
        Some(registered.instance)
    }

    fn ensure_can_own_capabilities(&self, plugin_id: &str) -> PluginResult<()> {
        let plugin = self.get(plugin_id).ok_or_else(|| PluginError::NotFound(plugin_id.to_string()))?;
        if plugin.status == PluginStatus::Error {
            return Err(PluginError::PluginFailed(plugin_id.to_string()));
        }
        Ok(())
    }

    fn plugin_priority(&self, plugin_id: &str) -> Priority {
        self.get(plugin_id).map_or(self.config.default_priority, |p| p.priority)
    }

    /// Register a renderer owned by a known plugin.
    pub fn register_renderer(
        &mut self,
        plugin_id: &str,
        mut renderer: RendererPlugin,
    ) -> PluginResult<RegistrationOutcome> {
        self.ensure_can_own_capabilities(plugin_id)?;
        renderer.set_plugin_id(plugin_id);
        if renderer.priority.is_none() {
            renderer.priority = Some(self.plugin_priority(plugin_id));
        }
        Ok(self.capabilities.register_renderer(renderer))
    }

    /// Register a transformer owned by a known plugin.
    pub fn register_transformer(
        &mut self,
        plugin_id: &str,
        mut transformer: TransformerPlugin,
    ) -> PluginResult<RegistrationOutcome> {
        self.ensure_can_own_capabilities(plugin_id)?;
        transformer.set_plugin_id(plugin_id);
        if transformer.priority.is_none() {
            transformer.priority = Some(self.plugin_priority(plugin_id));
        }
        Ok(self.capabilities.register_transformer(transformer))
    }

    /// Hide a plugin's capabilities from lookups, keeping them stored.
    ///
    /// Returns `false` when the plugin is unknown.
    pub fn disable_plugin(&mut self, id: &str) -> bool {
        let Some(registered) = self.plugins.get_mut(id) else {
            return false;
        };
        registered.instance.enabled = false;
        self.capabilities.suspend(id);
        true
    }

    /// Restore a disabled plugin's capabilities exactly as they were.
    ///
    /// Returns `false` when the plugin is unknown.
    pub fn enable_plugin(&mut self, id: &str) -> bool {
        let Some(registered) = self.plugins.get_mut(id) else {
            return false;
        };
        registered.instance.enabled = true;
        self.capabilities.resume(id);
        true
    }

    /// Whether a known plugin is enabled.
    pub fn is_enabled(&self, id: &str) -> Option<bool> {
        self.get(id).map(|p| p.enabled)
    }

    pub fn get(&self, id: &str) -> Option<&PluginInstance> {
        self.plugins.get(id).map(|r| &r.instance)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut PluginInstance> {
        self.plugins.get_mut(id).map(|r| &mut r.instance)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.plugins.contains_key(id)
    }

    /// Plugin ids in registration order.
    pub fn ids(&self) -> Vec<String> {
        let mut registered: Vec<&RegisteredPlugin> = self.plugins.values().collect();
        registered.sort_by_key(|r| r.seq);
        registered.into_iter().map(|r| r.instance.id.clone()).collect()
    }

    /// All plugins in registration order.
    pub fn plugins(&self) -> Vec<&PluginInstance> {
        let mut registered: Vec<&RegisteredPlugin> = self.plugins.values().collect();
        registered.sort_by_key(|r| r.seq);
        registered.into_iter().map(|r| &r.instance).collect()
    }

    /// All plugins, highest priority first, ties in registration order.
    pub fn plugins_by_priority(&self) -> Vec<&PluginInstance> {
        let mut registered: Vec<&RegisteredPlugin> = self.plugins.values().collect();
        registered.sort_by(|a, b| {
            priority_order((a.instance.priority, a.seq), (b.instance.priority, b.seq))
        });
        registered.into_iter().map(|r| &r.instance).collect()
    }

    /// Number of registered plugins.
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// The capability registry.
    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    pub fn get_renderer(&self, name: &str) -> Option<&RendererPlugin> {
        self.capabilities.get_renderer(name)
    }

    pub fn get_transformer(&self, name: &str) -> Option<&TransformerPlugin> {
        self.capabilities.get_transformer(name)
    }

    pub fn get_renderers_by_extension(&self, extension: &str) -> Vec<&RendererPlugin> {
        self.capabilities.get_renderers_by_extension(extension)
    }

    pub fn get_transformers_by_input_type(&self, input_type: &str) -> Vec<&TransformerPlugin> {
        self.capabilities.get_transformers_by_input_type(input_type)
    }

    pub fn unregister_renderer(&mut self, name: &str) -> bool {
        self.capabilities.unregister_renderer(name)
    }

    pub fn unregister_transformer(&mut self, name: &str) -> bool {
        self.capabilities.unregister_transformer(name)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

//! Registered capability instances.
//!
//! A [`Capability`](super::Capability) in a manifest only declares what a
//! plugin can do. The values here carry the callable: a [`RendererPlugin`]
//! wraps a [`Renderer`], a [`TransformerPlugin`] wraps a [`Transformer`].
//! The registry never looks inside those callables.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{LifecyclePhase, PluginError, PluginResult, Priority};

/// Renders source bytes into output markup.
pub trait Renderer: Send + Sync {
    fn render(&self, input: &[u8], options: &serde_json::Value) -> anyhow::Result<String>;
}

impl<F> Renderer for F
where
    F: Fn(&[u8], &serde_json::Value) -> anyhow::Result<String> + Send + Sync,
{
    fn render(&self, input: &[u8], options: &serde_json::Value) -> anyhow::Result<String> {
        self(input, options)
    }
}

/// Converts one representation into another.
pub trait Transformer: Send + Sync {
    fn transform(&self, input: serde_json::Value) -> anyhow::Result<serde_json::Value>;
}

impl<F> Transformer for F
where
    F: Fn(serde_json::Value) -> anyhow::Result<serde_json::Value> + Send + Sync,
{
    fn transform(&self, input: serde_json::Value) -> anyhow::Result<serde_json::Value> {
        self(input)
    }
}

/// Common view over registered capability entries.
pub trait CapabilityEntry: Clone {
    /// Unique capability name.
    fn name(&self) -> &str;
    /// Owning plugin.
    fn plugin_id(&self) -> &str;
    /// Explicit priority, if any.
    fn priority(&self) -> Option<Priority>;
    /// Stamp the owning plugin.
    fn set_plugin_id(&mut self, plugin_id: &str);
}

/// A registered renderer.
#[derive(Clone)]
pub struct RendererPlugin {
    pub name: String,
    /// Lowercase extensions without the leading dot.
    pub extensions: Vec<String>,
    pub version: String,
    pub priority: Option<Priority>,
    pub plugin_id: String,
    renderer: Arc<dyn Renderer>,
}

impl RendererPlugin {
    /// Create a renderer entry. The owning plugin id is set on registration.
    pub fn new<I, S>(name: impl Into<String>, extensions: I, renderer: impl Renderer + 'static) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: name.into(),
            extensions: extensions.into_iter().map(|e| normalize_extension(e.as_ref())).collect(),
            version: "0.0.0".to_string(),
            priority: None,
            plugin_id: String::new(),
            renderer: Arc::new(renderer),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    /// Whether this renderer handles the extension (case-insensitive, dot optional).
    pub fn handles(&self, extension: &str) -> bool {
        let extension = normalize_extension(extension);
        self.extensions.iter().any(|e| *e == extension)
    }

    /// Invoke the renderer, tagging failures with the owning plugin.
    pub fn render(&self, input: &[u8], options: &serde_json::Value) -> PluginResult<String> {
        self.renderer
            .render(input, options)
            .map_err(|e| PluginError::runtime(LifecyclePhase::Runtime, &self.plugin_id, &self.version, e))
    }

    /// Whether two entries share the same callable.
    pub fn same_renderer(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.renderer, &other.renderer)
    }
}

impl fmt::Debug for RendererPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererPlugin")
            .field("name", &self.name)
            .field("extensions", &self.extensions)
            .field("version", &self.version)
            .field("priority", &self.priority)
            .field("plugin_id", &self.plugin_id)
            .finish()
    }
}

impl CapabilityEntry for RendererPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    fn priority(&self) -> Option<Priority> {
        self.priority
    }

    fn set_plugin_id(&mut self, plugin_id: &str) {
        self.plugin_id = plugin_id.to_string();
    }
}

/// A registered transformer.
#[derive(Clone)]
pub struct TransformerPlugin {
    pub name: String,
    pub input_type: String,
    pub output_type: String,
    pub version: String,
    pub priority: Option<Priority>,
    pub plugin_id: String,
    transformer: Arc<dyn Transformer>,
}

impl TransformerPlugin {
    /// Create a transformer entry. The owning plugin id is set on registration.
    pub fn new(
        name: impl Into<String>,
        input_type: impl Into<String>,
        output_type: impl Into<String>,
        transformer: impl Transformer + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            input_type: input_type.into(),
            output_type: output_type.into(),
            version: "0.0.0".to_string(),
            priority: None,
            plugin_id: String::new(),
            transformer: Arc::new(transformer),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    /// Invoke the transformer, tagging failures with the owning plugin.
    pub fn transform(&self, input: serde_json::Value) -> PluginResult<serde_json::Value> {
        self.transformer
            .transform(input)
            .map_err(|e| PluginError::runtime(LifecyclePhase::Runtime, &self.plugin_id, &self.version, e))
    }

    /// Whether two entries share the same callable.
    pub fn same_transformer(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.transformer, &other.transformer)
    }
}

impl fmt::Debug for TransformerPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformerPlugin")
            .field("name", &self.name)
            .field("input_type", &self.input_type)
            .field("output_type", &self.output_type)
            .field("version", &self.version)
            .field("priority", &self.priority)
            .field("plugin_id", &self.plugin_id)
            .finish()
    }
}

impl CapabilityEntry for TransformerPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn plugin_id(&self) -> &str {
        &self.plugin_id
    }

    fn priority(&self) -> Option<Priority> {
        self.priority
    }

    fn set_plugin_id(&mut self, plugin_id: &str) {
        self.plugin_id = plugin_id.to_string();
    }
}

/// A stored entry plus its registration sequence number.
#[derive(Debug, Clone)]
pub struct Slot<T> {
    pub seq: u64,
    pub entry: T,
}

/// Capability entries keyed by unique name.
///
/// Each name maps to one entry. Replacing an entry keeps its original
/// sequence number, so it keeps its place among equal priorities.
#[derive(Debug, Clone)]
pub struct CapabilityTable<T> {
    slots: HashMap<String, Slot<T>>,
    next_seq: u64,
}

impl<T: CapabilityEntry> CapabilityTable<T> {
    pub fn new() -> Self {
        Self { slots: HashMap::new(), next_seq: 0 }
    }

    pub fn get(&self, name: &str) -> Option<&Slot<T>> {
        self.slots.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.slots.contains_key(name)
    }

    /// Insert or replace by name, returning the replaced entry.
    pub fn insert(&mut self, entry: T) -> Option<T> {
        let name = entry.name().to_string();
        if let Some(slot) = self.slots.get_mut(&name) {
            return Some(std::mem::replace(&mut slot.entry, entry));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.insert(name, Slot { seq, entry });
        None
    }

    pub fn remove(&mut self, name: &str) -> Option<T> {
        self.slots.remove(name).map(|slot| slot.entry)
    }

    /// Remove every entry owned by a plugin.
    pub fn remove_owned_by(&mut self, plugin_id: &str) -> Vec<T> {
        let names: Vec<String> = self
            .slots
            .values()
            .filter(|slot| slot.entry.plugin_id() == plugin_id)
            .map(|slot| slot.entry.name().to_string())
            .collect();
        names.iter().filter_map(|name| self.remove(name)).collect()
    }

    pub fn slots(&self) -> impl Iterator<Item = &Slot<T>> {
        self.slots.values()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<T: CapabilityEntry> Default for CapabilityTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_ascii_lowercase()
}

//! Core plugin types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of functionality a capability declaration describes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityType {
    /// Turns a source file into rendered output (e.g. `.docx` -> HTML).
    Renderer,
    /// Converts one intermediate representation into another.
    Transformer,
    /// Writes rendered output to an external format.
    Exporter,
    /// Any capability kind this host does not know about yet.
    #[serde(untagged)]
    Other(String),
}

impl CapabilityType {
    /// Get the display name for this capability type.
    pub fn display_name(&self) -> &str {
        match self {
            Self::Renderer => "renderer",
            Self::Transformer => "transformer",
            Self::Exporter => "exporter",
            Self::Other(name) => name,
        }
    }
}

impl fmt::Display for CapabilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A capability declared in a manifest.
///
/// This is a declaration only; the callable object is registered separately
/// as a [`RendererPlugin`](super::RendererPlugin) or
/// [`TransformerPlugin`](super::TransformerPlugin).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Capability kind.
    #[serde(rename = "type")]
    pub capability_type: CapabilityType,
    /// Unique capability name.
    pub name: String,
    /// Optional capability version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl Capability {
    /// Declare a capability.
    pub fn new(capability_type: CapabilityType, name: impl Into<String>) -> Self {
        Self { capability_type, name: name.into(), version: None }
    }

    /// Set the capability version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Lifecycle status of a plugin instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    Discovered,
    Validated,
    Loading,
    Loaded,
    Activating,
    Active,
    Deactivating,
    Inactive,
    /// Terminal for the current instance; unload and reload to recover.
    Error,
}

impl PluginStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 9] = [
        Self::Discovered,
        Self::Validated,
        Self::Loading,
        Self::Loaded,
        Self::Activating,
        Self::Active,
        Self::Deactivating,
        Self::Inactive,
        Self::Error,
    ];

    /// Lowercase status name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Validated => "validated",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Activating => "activating",
            Self::Active => "active",
            Self::Deactivating => "deactivating",
            Self::Inactive => "inactive",
            Self::Error => "error",
        }
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// Whether `self -> to` is a legal lifecycle transition.
    pub fn can_transition_to(self, to: Self) -> bool {
        can_transition(self, to)
    }
}

impl fmt::Display for PluginStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Legal `(from, to)` pairs besides the `* -> error` edges.
const TRANSITIONS: &[(PluginStatus, PluginStatus)] = &[
    (PluginStatus::Discovered, PluginStatus::Validated),
    (PluginStatus::Validated, PluginStatus::Loading),
    (PluginStatus::Loading, PluginStatus::Loaded),
    (PluginStatus::Loaded, PluginStatus::Activating),
    (PluginStatus::Activating, PluginStatus::Active),
    (PluginStatus::Active, PluginStatus::Deactivating),
    (PluginStatus::Deactivating, PluginStatus::Inactive),
    (PluginStatus::Inactive, PluginStatus::Activating),
];

/// Check a lifecycle transition against the transition table.
///
/// Any non-terminal status may fail into [`PluginStatus::Error`];
/// `error` itself has no outgoing edges.
pub fn can_transition(from: PluginStatus, to: PluginStatus) -> bool {
    if from.is_terminal() {
        return false;
    }
    if to == PluginStatus::Error {
        return true;
    }
    TRANSITIONS.contains(&(from, to))
}

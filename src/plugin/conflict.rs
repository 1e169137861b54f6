//! Conflict reports and resolution policy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What collided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Another plugin already uses this id.
    DuplicateId,
    /// Another plugin already registered a capability with this name.
    DuplicateCapability,
}

/// Why a registration was rejected or would replace existing state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConflict {
    #[serde(rename = "type")]
    pub kind: ConflictKind,
    /// The colliding plugin id or capability name.
    pub key: String,
    /// Plugin that currently owns `key`.
    pub existing_plugin_id: String,
    /// Operator-facing remedy.
    pub suggestion: String,
}

impl PluginConflict {
    pub fn duplicate_id(id: &str) -> Self {
        Self {
            kind: ConflictKind::DuplicateId,
            key: id.to_string(),
            existing_plugin_id: id.to_string(),
            suggestion: format!(
                "rename plugin id '{id}' or set registry.conflict_resolution = \"override\""
            ),
        }
    }

    pub fn duplicate_capability(name: &str, existing_plugin_id: &str) -> Self {
        Self {
            kind: ConflictKind::DuplicateCapability,
            key: name.to_string(),
            existing_plugin_id: existing_plugin_id.to_string(),
            suggestion: format!(
                "rename capability '{name}', disable plugin '{existing_plugin_id}', or enable override mode"
            ),
        }
    }
}

impl fmt::Display for PluginConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ConflictKind::DuplicateId => write!(f, "plugin id '{}' is already registered", self.key),
            ConflictKind::DuplicateCapability => write!(
                f,
                "capability '{}' is already provided by plugin '{}'",
                self.key, self.existing_plugin_id
            ),
        }
    }
}

/// Result of conflict detection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConflictReport {
    pub has_conflicts: bool,
    pub conflicts: Vec<PluginConflict>,
    /// Whether every conflict is resolvable under the configured policy.
    pub can_register: bool,
}

impl ConflictReport {
    /// Build a report for the given policy.
    pub fn new(conflicts: Vec<PluginConflict>, resolution: ConflictResolution) -> Self {
        let has_conflicts = !conflicts.is_empty();
        let can_register = !has_conflicts || resolution.resolves_conflicts();
        Self { has_conflicts, conflicts, can_register }
    }

    /// A report with nothing in it.
    pub fn clear() -> Self {
        Self { has_conflicts: false, conflicts: Vec::new(), can_register: true }
    }
}

/// What to do when a registration collides with existing state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictResolution {
    /// Reject the new registration.
    #[default]
    Error,
    /// Replace the existing registration.
    Override,
    /// Currently the same as `Override`: the new registration wins.
    Ignore,
}

impl ConflictResolution {
    /// Whether conflicts can be resolved under this policy.
    pub fn resolves_conflicts(self) -> bool {
        !matches!(self, Self::Error)
    }
}

impl FromStr for ConflictResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "override" => Ok(Self::Override),
            "ignore" => Ok(Self::Ignore),
            _ => Err(format!("unknown conflict resolution '{s}': expected error, override or ignore")),
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
            Self::Override => "override",
            Self::Ignore => "ignore",
        })
    }
}

/// Two-outcome result of a registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<PluginConflict>,
}

impl RegistrationOutcome {
    pub fn registered() -> Self {
        Self { success: true, conflict: None }
    }

    /// Registered after resolving a conflict.
    pub fn resolved(conflict: PluginConflict) -> Self {
        Self { success: true, conflict: Some(conflict) }
    }

    pub fn rejected(conflict: PluginConflict) -> Self {
        Self { success: false, conflict: Some(conflict) }
    }
}

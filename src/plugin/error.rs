//! Plugin system error types.

use std::fmt;

use thiserror::Error;

use super::conflict::PluginConflict;
use super::types::PluginStatus;

/// Result type for plugin operations.
pub type PluginResult<T> = Result<T, PluginError>;

/// Boxed cause carried by [`PluginError::Runtime`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Lifecycle phase a plugin hook failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    /// `initialize` while loading.
    Load,
    /// `activate`.
    Activate,
    /// `deactivate`.
    Deactivate,
    /// `dispose` while unloading.
    Unload,
    /// Capability calls (`render`, `transform`) outside a lifecycle hook.
    Runtime,
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Load => "load",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Unload => "unload",
            Self::Runtime => "runtime",
        };
        f.write_str(name)
    }
}

/// Errors that can occur during plugin operations.
#[derive(Debug, Error)]
pub enum PluginError {
    /// Manifest failed validation and never reached the registry.
    #[error("Invalid plugin manifest '{id}': {}", .errors.join("; "))]
    InvalidManifest { id: String, errors: Vec<String> },

    /// A plugin with this id is already known to the manager.
    #[error("Plugin '{0}' is already loaded")]
    AlreadyLoaded(String),

    /// No plugin with this id is known.
    #[error("Plugin not found: {0}")]
    NotFound(String),

    /// The plugin is in the terminal `error` status.
    #[error("Plugin '{0}' is in error state")]
    PluginFailed(String),

    /// Registering would exceed `max_plugins`.
    #[error("Plugin limit reached ({max} plugins)")]
    CapacityExceeded { max: usize },

    /// The global `enable_plugins` switch is off.
    #[error("Plugin support is disabled")]
    PluginsDisabled,

    /// The lifecycle transition table rejected a status change.
    #[error("Plugin '{id}' cannot move from {from} to {to}")]
    InvalidTransition { id: String, from: PluginStatus, to: PluginStatus },

    /// The plugin's `engines.host` range does not accept the host version.
    #[error("Plugin '{id}' requires host {required}, but host provides {available}")]
    IncompatibleEngine { id: String, required: String, available: String },

    /// A registration collided with existing registry state.
    #[error("Registration conflict: {0}")]
    Conflict(PluginConflict),

    /// No loader knows how to instantiate this entry point.
    #[error("No loader for plugin entry '{0}'")]
    LoaderNotFound(String),

    /// A plugin's own hook or capability failed.
    #[error("Plugin '{plugin_id}@{version}' failed during {phase}: {message}")]
    Runtime {
        phase: LifecyclePhase,
        plugin_id: String,
        version: String,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Manifest or config could not be parsed.
    #[error("Parse error in {origin}: {message}")]
    Parse { origin: String, message: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PluginError {
    /// Wrap an error returned by a plugin hook.
    pub fn runtime(
        phase: LifecyclePhase,
        plugin_id: &str,
        version: &str,
        cause: impl Into<BoxError>,
    ) -> Self {
        let source = cause.into();
        Self::Runtime {
            phase,
            plugin_id: plugin_id.to_string(),
            version: version.to_string(),
            message: source.to_string(),
            source: Some(source),
        }
    }

    /// The lifecycle phase for runtime errors.
    pub fn phase(&self) -> Option<LifecyclePhase> {
        match self {
            Self::Runtime { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// Actionable guidance for an operator.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::InvalidManifest { .. } => Some(
                "fix the listed manifest fields (id must be kebab-case, version MAJOR.MINOR.PATCH)"
                    .to_string(),
            ),
            Self::AlreadyLoaded(id) => {
                Some(format!("unload '{id}' first or rename the plugin id"))
            }
            Self::NotFound(id) => Some(format!("load plugin '{id}' before referencing it")),
            Self::PluginFailed(id) => {
                Some(format!("unload and reload '{id}' before registering capabilities"))
            }
            Self::CapacityExceeded { .. } => {
                Some("unload unused plugins or raise registry.max_plugins".to_string())
            }
            Self::PluginsDisabled => Some("set registry.enable_plugins = true".to_string()),
            Self::InvalidTransition { id, .. } => {
                Some(format!("unload and reload '{id}' to reset its lifecycle"))
            }
            Self::IncompatibleEngine { .. } => {
                Some("install a plugin version built for this host".to_string())
            }
            Self::Conflict(conflict) => Some(conflict.suggestion.clone()),
            Self::LoaderNotFound(_) => {
                Some("register a loader for this entry point".to_string())
            }
            Self::Runtime { .. } | Self::Parse { .. } | Self::Io(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_runtime_error_keeps_cause() {
        let err = PluginError::runtime(
            LifecyclePhase::Activate,
            "pdf-renderer",
            "1.2.0",
            anyhow::anyhow!("socket closed"),
        );

        assert_eq!(err.phase(), Some(LifecyclePhase::Activate));
        assert!(err.source().is_some());
        let text = err.to_string();
        assert!(text.contains("pdf-renderer@1.2.0"));
        assert!(text.contains("activate"));
        assert!(text.contains("socket closed"));
    }

    #[test]
    fn test_invalid_manifest_lists_errors() {
        let err = PluginError::InvalidManifest {
            id: "x".to_string(),
            errors: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(err.to_string(), "Invalid plugin manifest 'x': a; b");
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_hard_failures_carry_suggestions() {
        assert!(PluginError::NotFound("a".into()).suggestion().unwrap().contains("load"));
        assert!(PluginError::CapacityExceeded { max: 1 }
            .suggestion()
            .unwrap()
            .contains("max_plugins"));
        assert!(PluginError::AlreadyLoaded("a".into()).suggestion().unwrap().contains("rename"));
    }
}

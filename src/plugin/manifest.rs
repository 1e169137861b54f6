//! Plugin manifest parsing and validation.
//!
//! A plugin manifest is the author-supplied description of a plugin: its
//! identity, version, entry point and declared capabilities. Manifests are
//! accepted as JSON (`plugin.json`) or TOML (`plugin.toml`); both use the
//! same camelCase field names.

use std::collections::BTreeMap;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{Capability, CapabilityType, PluginError, PluginResult, Priority};

static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9-]*$").expect("id pattern compiles"));

static VERSION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[0-9]+\.[0-9]+\.[0-9]+(-[0-9A-Za-z.]+)?$").expect("version pattern compiles")
});

/// Plugin manifest.
///
/// Required fields default to empty strings so that partial manifests still
/// deserialize and can be reported on by [`validate`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    /// Lowercase kebab-case identifier.
    #[serde(default)]
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// `MAJOR.MINOR.PATCH[-prerelease]`.
    #[serde(default)]
    pub version: String,
    /// Entry point, resolved by a [`PluginLoader`](super::PluginLoader).
    #[serde(default)]
    pub entry: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Package name -> version range.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dependencies: BTreeMap<String, String>,
    /// Package name -> version range the host must provide.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peer_dependencies: BTreeMap<String, String>,
    /// Runtime constraints, e.g. `host = ">=1.0.0"`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub engines: BTreeMap<String, String>,
    /// Lifecycle callback names. Informational only.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hooks: BTreeMap<String, String>,
    /// JSON-schema-like description of configurable settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
    /// Declared capabilities. Absent and empty are treated the same.
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    /// Ordering among plugins; the registry default applies when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

/// Outcome of manifest validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// True iff `errors` is empty.
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// Convert into a hard error when invalid.
    pub fn into_result(self, id: &str) -> PluginResult<Vec<String>> {
        if self.valid {
            Ok(self.warnings)
        } else {
            Err(PluginError::InvalidManifest { id: id.to_string(), errors: self.errors })
        }
    }
}

/// Validate a (possibly partial) manifest.
///
/// Every rule runs; errors accumulate instead of stopping at the first one.
pub fn validate(manifest: &PluginManifest) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let required = [
        ("id", &manifest.id),
        ("name", &manifest.name),
        ("version", &manifest.version),
        ("entry", &manifest.entry),
    ];
    for (field, value) in required {
        if value.trim().is_empty() {
            errors.push(format!("Missing required field: {field}"));
        }
    }

    if !manifest.id.trim().is_empty() && !ID_PATTERN.is_match(&manifest.id) {
        errors.push(format!(
            "Invalid plugin id '{}': must start with a lowercase letter and contain only \
             lowercase letters, digits and hyphens",
            manifest.id
        ));
    }

    if !manifest.version.trim().is_empty() && !VERSION_PATTERN.is_match(&manifest.version) {
        errors.push(format!(
            "Invalid version '{}': expected MAJOR.MINOR.PATCH[-prerelease]",
            manifest.version
        ));
    }

    if manifest.capabilities.is_empty() {
        warnings.push(
            "Plugin declares no capabilities; declare at least one so the host can use it"
                .to_string(),
        );
    }

    ValidationReport { valid: errors.is_empty(), errors, warnings }
}

impl PluginManifest {
    /// Create a manifest with the required fields set.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        entry: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            entry: entry.into(),
            ..Self::default()
        }
    }

    /// Add a capability declaration.
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Set the plugin priority.
    pub fn with_priority(mut self, priority: impl Into<Priority>) -> Self {
        self.priority = Some(priority.into());
        self
    }

    /// Set the host engine range.
    pub fn with_engine(mut self, engine: &str, range: &str) -> Self {
        self.engines.insert(engine.to_string(), range.to_string());
        self
    }

    /// Set the options schema.
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = Some(options);
        self
    }

    /// Parse a manifest from a JSON string.
    pub fn from_json(content: &str) -> PluginResult<Self> {
        serde_json::from_str(content)
            .map_err(|e| PluginError::Parse { origin: "manifest".to_string(), message: e.to_string() })
    }

    /// Parse a manifest from a TOML string.
    pub fn from_toml(content: &str) -> PluginResult<Self> {
        toml::from_str(content)
            .map_err(|e| PluginError::Parse { origin: "manifest".to_string(), message: e.to_string() })
    }

    /// Parse a manifest file; `.toml` files are read as TOML, anything else as JSON.
    pub fn from_file(path: &Path) -> PluginResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let parsed = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|e| e.to_string()),
            _ => serde_json::from_str(&content).map_err(|e| e.to_string()),
        };
        parsed.map_err(|message| PluginError::Parse { origin: path.display().to_string(), message })
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> PluginResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PluginError::Parse { origin: self.id.clone(), message: e.to_string() })
    }

    /// Validate this manifest.
    pub fn validate(&self) -> ValidationReport {
        validate(self)
    }

    /// Whether the manifest declares a capability of this type.
    pub fn declares(&self, capability_type: &CapabilityType) -> bool {
        self.capabilities.iter().any(|c| &c.capability_type == capability_type)
    }

    /// Default option values from `options.properties.<key>.default`.
    pub fn option_defaults(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut defaults = serde_json::Map::new();
        let properties = self
            .options
            .as_ref()
            .and_then(|o| o.get("properties"))
            .and_then(serde_json::Value::as_object);

        if let Some(properties) = properties {
            for (key, schema) in properties {
                if let Some(default) = schema.get("default") {
                    defaults.insert(key.clone(), default.clone());
                }
            }
        }
        defaults
    }

    /// Check `engines.host` against the host version.
    ///
    /// Returns `Ok(())` when no range is declared or it matches.
    pub fn check_host_engine(&self, host_version: &str) -> PluginResult<()> {
        let Some(range) = self.engines.get("host") else {
            return Ok(());
        };

        let incompatible = || PluginError::IncompatibleEngine {
            id: self.id.clone(),
            required: range.clone(),
            available: host_version.to_string(),
        };

        let requirement = semver::VersionReq::parse(range).map_err(|_| incompatible())?;
        let Ok(version) = semver::Version::parse(host_version) else {
            tracing::debug!(host_version, "Host version is not semver, skipping engine check");
            return Ok(());
        };

        if requirement.matches(&version) {
            Ok(())
        } else {
            Err(incompatible())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_MANIFEST: &str = r#"{
        "id": "docx-renderer",
        "name": "DOCX Renderer",
        "version": "1.4.0",
        "entry": "builtin:docx",
        "description": "Renders Word documents to HTML",
        "license": "MIT",
        "peerDependencies": { "docloom": "^0.1" },
        "engines": { "host": ">=0.1.0" },
        "hooks": { "onLoad": "init" },
        "options": {
            "type": "object",
            "properties": {
                "embedImages": { "type": "boolean", "default": true },
                "theme": { "type": "string" }
            }
        },
        "capabilities": [
            { "type": "renderer", "name": "docx", "version": "1.0.0" }
        ],
        "priority": "high"
    }"#;

    fn valid_manifest() -> PluginManifest {
        PluginManifest::new("valid-id", "Valid", "1.0.0", "builtin:valid")
            .with_capability(Capability::new(CapabilityType::Renderer, "valid"))
    }

    #[test]
    fn test_parse_manifest() {
        let manifest = PluginManifest::from_json(SAMPLE_MANIFEST).unwrap();

        assert_eq!(manifest.id, "docx-renderer");
        assert_eq!(manifest.peer_dependencies.get("docloom").unwrap(), "^0.1");
        assert_eq!(manifest.capabilities.len(), 1);
        assert_eq!(manifest.priority, Some(Priority::HIGH));
        assert!(manifest.declares(&CapabilityType::Renderer));
        assert!(!manifest.declares(&CapabilityType::Exporter));
    }

    #[test]
    fn test_parse_toml_manifest() {
        let toml = r#"
id = "graphviz"
name = "Graphviz"
version = "0.2.0-beta.1"
entry = "builtin:graphviz"
priority = 200

[[capabilities]]
type = "renderer"
name = "dot"
"#;
        let manifest = PluginManifest::from_toml(toml).unwrap();
        assert_eq!(manifest.priority, Some(Priority::Value(200)));
        assert!(manifest.validate().valid);
    }

    #[test]
    fn test_valid_manifest() {
        let report = validate(&valid_manifest());
        assert!(report.valid);
        assert!(report.errors.is_empty());
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_each_missing_field_is_an_error() {
        for field in ["id", "name", "version", "entry"] {
            let mut manifest = valid_manifest();
            match field {
                "id" => manifest.id.clear(),
                "name" => manifest.name.clear(),
                "version" => manifest.version.clear(),
                _ => manifest.entry.clear(),
            }
            let report = validate(&manifest);
            assert!(!report.valid, "missing {field} should be invalid");
            assert_eq!(report.errors.len(), 1);
            assert!(report.errors[0].contains(field));
        }
    }

    #[test]
    fn test_errors_accumulate() {
        let report = validate(&PluginManifest::default());
        assert!(!report.valid);
        assert_eq!(report.errors.len(), 4);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_id_pattern() {
        for id in ["valid-id", "my-plugin-123"] {
            let mut manifest = valid_manifest();
            manifest.id = id.to_string();
            assert!(validate(&manifest).valid, "{id} should be accepted");
        }
        for id in ["123-invalid", "Invalid", "has space"] {
            let mut manifest = valid_manifest();
            manifest.id = id.to_string();
            assert!(!validate(&manifest).valid, "{id} should be rejected");
        }
    }

    #[test]
    fn test_version_pattern() {
        for version in ["1.0.0", "1.0.0-alpha"] {
            let mut manifest = valid_manifest();
            manifest.version = version.to_string();
            assert!(validate(&manifest).valid, "{version} should be accepted");
        }
        for version in ["1.0", "v1.0.0", "invalid", "\u{0661}.\u{0660}.\u{0660}", "1.\u{0663}.0"] {
            let mut manifest = valid_manifest();
            manifest.version = version.to_string();
            assert!(!validate(&manifest).valid, "{version} should be rejected");
        }
    }

    #[test]
    fn test_blank_required_field_reports_one_error() {
        for field in ["id", "version"] {
            let mut manifest = valid_manifest();
            match field {
                "id" => manifest.id = "  ".to_string(),
                _ => manifest.version = " ".to_string(),
            }
            let report = validate(&manifest);
            assert_eq!(report.errors, vec![format!("Missing required field: {field}")]);
        }
    }

    #[test]
    fn test_empty_capabilities_warn_once() {
        let mut manifest = valid_manifest();
        manifest.capabilities.clear();
        let report = validate(&manifest);
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);

        let absent = PluginManifest::from_json(
            r#"{"id": "bare", "name": "Bare", "version": "1.0.0", "entry": "x"}"#,
        )
        .unwrap();
        let report = validate(&absent);
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_option_defaults() {
        let manifest = PluginManifest::from_json(SAMPLE_MANIFEST).unwrap();
        let defaults = manifest.option_defaults();
        assert_eq!(defaults.get("embedImages"), Some(&serde_json::json!(true)));
        assert!(!defaults.contains_key("theme"));
    }

    #[test]
    fn test_engine_compatibility() {
        let manifest = valid_manifest().with_engine("host", ">=1.2.0, <2.0.0");
        assert!(manifest.check_host_engine("1.4.0").is_ok());
        assert!(matches!(
            manifest.check_host_engine("2.0.0"),
            Err(PluginError::IncompatibleEngine { .. })
        ));
        assert!(valid_manifest().check_host_engine("0.0.1").is_ok());

        let broken = valid_manifest().with_engine("host", "not a range");
        assert!(broken.check_host_engine("1.0.0").is_err());
    }

    #[test]
    fn test_from_file_dispatches_on_extension() {
        let dir = tempfile::TempDir::new().unwrap();
        let json_path = dir.path().join("plugin.json");
        std::fs::write(&json_path, SAMPLE_MANIFEST).unwrap();
        assert_eq!(PluginManifest::from_file(&json_path).unwrap().id, "docx-renderer");

        let bad_path = dir.path().join("plugin.toml");
        std::fs::write(&bad_path, "id = [").unwrap();
        assert!(matches!(PluginManifest::from_file(&bad_path), Err(PluginError::Parse { .. })));
    }

    #[test]
    fn test_into_result() {
        let report = validate(&PluginManifest::default());
        assert!(matches!(report.into_result("x"), Err(PluginError::InvalidManifest { .. })));
    }
}

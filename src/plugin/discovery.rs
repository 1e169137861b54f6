//! Manifest discovery.
//!
//! Discovery only finds and parses manifests. Validation, loading and
//! registration are the manager's job.

use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use crate::core::DiscoveryConfig;

use super::PluginManifest;

/// A parsed manifest and where it came from.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredManifest {
    pub path: PathBuf,
    pub manifest: PluginManifest,
}

/// A manifest file that could not be read or parsed.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Everything one discovery pass found.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DiscoveryReport {
    pub manifests: Vec<DiscoveredManifest>,
    pub failures: Vec<DiscoveryFailure>,
}

impl DiscoveryReport {
    pub fn is_empty(&self) -> bool {
        self.manifests.is_empty() && self.failures.is_empty()
    }
}

/// Something that can produce plugin manifests.
pub trait ManifestSource {
    fn discover(&self) -> DiscoveryReport;
}

/// Finds manifest files below a set of directories.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    roots: Vec<PathBuf>,
    max_depth: usize,
    manifest_names: Vec<String>,
}

impl DirectorySource {
    /// Search `roots` with the default depth and file names.
    pub fn new(roots: impl IntoIterator<Item = PathBuf>) -> Self {
        let defaults = DiscoveryConfig::default();
        Self {
            roots: roots.into_iter().collect(),
            max_depth: defaults.max_depth,
            manifest_names: defaults.manifest_names,
        }
    }

    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            roots: config.paths.clone(),
            max_depth: config.max_depth,
            manifest_names: config.manifest_names.clone(),
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    fn is_manifest(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| self.manifest_names.iter().any(|m| m == name))
    }

    fn scan_root(&self, root: &Path, report: &mut DiscoveryReport) {
        if !root.is_dir() {
            tracing::warn!(path = ?root, "Plugin directory does not exist");
            return;
        }

        let walker = WalkDir::new(root)
            .max_depth(self.max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                    tracing::warn!(path = ?path, error = %e, "Skipping unreadable path");
                    report.failures.push(DiscoveryFailure { path, error: e.to_string() });
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.is_manifest(entry.path()) {
                continue;
            }

            let path = entry.into_path();
            match PluginManifest::from_file(&path) {
                Ok(manifest) => {
                    tracing::debug!(path = ?path, plugin = %manifest.id, "Discovered manifest");
                    report.manifests.push(DiscoveredManifest { path, manifest });
                }
                Err(e) => {
                    tracing::warn!(path = ?path, error = %e, "Failed to parse plugin manifest");
                    report.failures.push(DiscoveryFailure { path, error: e.to_string() });
                }
            }
        }
    }
}

impl ManifestSource for DirectorySource {
    fn discover(&self) -> DiscoveryReport {
        let mut report = DiscoveryReport::default();
        for root in &self.roots {
            self.scan_root(root, &mut report);
        }
        report
    }
}

/// Manifests held in memory.
impl ManifestSource for Vec<PluginManifest> {
    fn discover(&self) -> DiscoveryReport {
        let manifests = self
            .iter()
            .map(|manifest| DiscoveredManifest { path: PathBuf::new(), manifest: manifest.clone() })
            .collect();
        DiscoveryReport { manifests, failures: Vec::new() }
    }
}

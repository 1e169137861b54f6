//! Docloom - plugin tooling for the docloom renderer.
//!
//! Validates plugin manifests and lists what a plugin directory contains.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use docloom::plugin::{
    DirectorySource, DiscoveryReport, ManifestSource, PluginManifest, ValidationReport,
};
use docloom::Config;

/// Plugin tooling for the docloom renderer
#[derive(Parser)]
#[command(name = "docloom")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to docloom.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a plugin manifest
    Validate {
        /// Path to plugin.json or plugin.toml
        manifest: PathBuf,
    },

    /// List plugin manifests found in directories
    Discover {
        /// Directories to search (defaults to [discovery] paths from config)
        dirs: Vec<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose { EnvFilter::new("debug") } else { EnvFilter::new("warn") };
    tracing_subscriber::registry().with(fmt::layer().with_target(false)).with(filter).init();

    let config = match &cli.config {
        Some(path) => Config::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Validate { manifest } => cmd_validate(&manifest, &config),
        Commands::Discover { dirs, json } => cmd_discover(dirs, json, &config),
    }
}

/// Validate one manifest and print errors and warnings.
fn cmd_validate(path: &Path, config: &Config) -> Result<ExitCode> {
    let manifest = PluginManifest::from_file(path)
        .with_context(|| format!("Failed to read manifest {}", path.display()))?;
    let report = manifest.validate();

    print_report(&manifest, &report);

    let engine = manifest.check_host_engine(&config.host.version);
    if let Err(e) = &engine {
        println!("  error: {e}");
    }

    if report.valid && engine.is_ok() {
        println!("\n{} {} is valid", manifest.id, manifest.version);
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn print_report(manifest: &PluginManifest, report: &ValidationReport) {
    let label = if manifest.id.is_empty() { "<missing id>" } else { manifest.id.as_str() };
    println!("{label}");
    for error in &report.errors {
        println!("  error: {error}");
    }
    for warning in &report.warnings {
        println!("  warning: {warning}");
    }
}

#[derive(Serialize)]
struct DiscoveredEntry<'a> {
    path: String,
    id: &'a str,
    version: &'a str,
    valid: bool,
    errors: Vec<String>,
    warnings: Vec<String>,
}

/// List manifests below the given directories.
fn cmd_discover(dirs: Vec<PathBuf>, json: bool, config: &Config) -> Result<ExitCode> {
    let source = if dirs.is_empty() {
        DirectorySource::from_config(&config.discovery)
    } else {
        let mut discovery = config.discovery.clone();
        discovery.paths = dirs;
        DirectorySource::from_config(&discovery)
    };

    let report: DiscoveryReport = source.discover();
    let entries: Vec<DiscoveredEntry<'_>> = report
        .manifests
        .iter()
        .map(|d| {
            let validation = d.manifest.validate();
            DiscoveredEntry {
                path: d.path.display().to_string(),
                id: &d.manifest.id,
                version: &d.manifest.version,
                valid: validation.valid,
                errors: validation.errors,
                warnings: validation.warnings,
            }
        })
        .collect();

    let all_valid = entries.iter().all(|e| e.valid) && report.failures.is_empty();

    if json {
        let output = serde_json::json!({ "plugins": entries, "failures": report.failures });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        for entry in &entries {
            let mark = if entry.valid { "ok" } else { "invalid" };
            println!("{:<8} {} {} ({})", mark, entry.id, entry.version, entry.path);
            for error in &entry.errors {
                println!("         error: {error}");
            }
        }
        for failure in &report.failures {
            println!("{:<8} {} - {}", "failed", failure.path.display(), failure.error);
        }
        println!("\nTotal: {} manifests, {} failures", entries.len(), report.failures.len());
    }

    Ok(if all_valid { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

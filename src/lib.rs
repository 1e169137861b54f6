//! # Docloom
//!
//! Plugin host for a documentation renderer.
//!
//! Docloom lets independently packaged plugins contribute renderers and
//! transformers at runtime. This crate contains the part that decides which
//! plugins run and which capability wins a lookup:
//!
//! - **Manifest validation**: identity, version and capability declarations
//! - **Lifecycle**: a strict status machine driven by [`PluginManager`]
//! - **Capability registry**: conflict detection and priority-ordered lookups
//! - **Events**: synchronous lifecycle notifications
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use docloom::plugin::{PluginManager, PluginManifest, StaticLoader};
//! use docloom::Config;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let mut manager = PluginManager::new(Config::load()?, Arc::new(StaticLoader::new()));
//! let manifest = PluginManifest::from_file("plugins/docx/plugin.json".as_ref())?;
//! manager.load_plugin(manifest).await?;
//! manager.activate_plugin("docx-renderer").await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::manual_let_else)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::map_unwrap_or)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::future_not_send)]

pub mod core;
pub mod plugin;

// Re-export commonly used types
pub use core::Config;
pub use plugin::{
    Plugin, PluginContext, PluginError, PluginInstance, PluginManager, PluginManifest,
    PluginResult, PluginStatus, Priority,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "docloom";

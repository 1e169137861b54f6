//! Plugin lifecycle and capability registry for docloom.
//!
//! Plugins are packaged independently and described by a manifest. The
//! host discovers manifests, validates them, and hands them to a
//! [`PluginManager`], which drives each plugin through a strict lifecycle
//! and registers the renderers and transformers it contributes.
//!
//! # Lifecycle
//!
//! ```text
//! discovered -> validated -> loading -> loaded -> activating -> active
//!                                                     ^            |
//!                                                     |       deactivating
//!                                                     |            |
//!                                                     +-------- inactive
//! ```
//!
//! Any non-terminal status can fail into `error`. A plugin in `error` must
//! be unloaded and reloaded to recover.
//!
//! # Example Manifest
//!
//! ```json
//! {
//!   "id": "docx-renderer",
//!   "name": "DOCX Renderer",
//!   "version": "1.4.0",
//!   "entry": "builtin:docx",
//!   "engines": { "host": ">=0.1.0" },
//!   "capabilities": [{ "type": "renderer", "name": "docx" }],
//!   "priority": "high"
//! }
//! ```

mod capability;
mod conflict;
mod discovery;
mod error;
mod events;
mod host;
mod loader;
mod manager;
mod manifest;
mod priority;
mod registry;
mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use capability::{
    CapabilityEntry, CapabilityTable, Renderer, RendererPlugin, Slot, Transformer,
    TransformerPlugin,
};
pub use conflict::{
    ConflictKind, ConflictReport, ConflictResolution, PluginConflict, RegistrationOutcome,
};
pub use discovery::{
    DirectorySource, DiscoveredManifest, DiscoveryFailure, DiscoveryReport, ManifestSource,
};
pub use error::{BoxError, LifecyclePhase, PluginError, PluginResult};
pub use events::{EventBus, PluginEvent, PluginEventKind, Subscription};
pub use host::{LogLevel, Plugin, PluginContext, PluginLogger};
pub use loader::{PluginLoader, StaticLoader};
pub use manager::{BulkOutcome, PluginInstance, PluginManager};
pub use manifest::{validate, PluginManifest, ValidationReport};
pub use priority::{
    compare_priority, parse_priority, priority_order, sort_by_priority, Priority, PriorityTier,
    HIGH_SCORE, LOW_SCORE, MAX_SCORE, NORMAL_SCORE,
};
pub use registry::{CapabilityRegistry, PluginRegistry};
pub use types::{can_transition, Capability, CapabilityType, PluginStatus};

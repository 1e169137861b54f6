//! Core types shared across docloom.
//!
//! Currently this is the configuration layer: registry policy, host
//! identity and manifest discovery settings.

mod config;

pub use config::{Config, DiscoveryConfig, HostConfig, RegistryConfig};

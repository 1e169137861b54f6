//! Fixtures shared by the plugin unit tests.

use async_trait::async_trait;

use super::{
    Capability, CapabilityType, Plugin, PluginContext, PluginInstance, PluginManifest, Priority,
    RendererPlugin, TransformerPlugin,
};

/// Plugin whose hooks all succeed and do nothing.
pub struct NoopPlugin;

#[async_trait]
impl Plugin for NoopPlugin {
    async fn initialize(&mut self, _context: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn activate(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn deactivate(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn dispose(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A `loaded` instance with the given id and priority.
pub fn instance(id: &str, priority: Priority) -> PluginInstance {
    let manifest = PluginManifest::new(id, id, "1.0.0", format!("builtin:{id}"))
        .with_capability(Capability::new(CapabilityType::Renderer, id))
        .with_priority(priority);
    let mut instance = PluginInstance::new(manifest, Box::new(NoopPlugin), Priority::NORMAL);
    instance.status = super::PluginStatus::Loaded;
    instance
}

pub fn renderer(name: &str, extensions: &[&str]) -> RendererPlugin {
    RendererPlugin::new(
        name,
        extensions.iter().copied(),
        |input: &[u8], _: &serde_json::Value| -> anyhow::Result<String> {
            Ok(String::from_utf8_lossy(input).into_owned())
        },
    )
}

pub fn transformer(name: &str, input_type: &str, output_type: &str) -> TransformerPlugin {
    TransformerPlugin::new(
        name,
        input_type,
        output_type,
        |value: serde_json::Value| -> anyhow::Result<serde_json::Value> { Ok(value) },
    )
}

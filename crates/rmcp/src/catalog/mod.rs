//! The statistical catalog: tools, resources and prompts registered
//! explicitly at startup.
//!
//! Every script-backed tool carries its R source (embedded at compile time)
//! so the approval gate can scan exactly what the worker would run. Scripts
//! are materialized to disk once per version for the worker runtime.

mod prompts;
mod resources;
mod scripts;
mod tools;

pub use scripts::{materialize_scripts, script_source, EMBEDDED_SCRIPTS};

use anyhow::Result;
use rmcp_config::Config;
use rmcp_server::{PromptRegistry, ResourceRegistry, ToolRegistry};
use rmcp_vfs::VfsPolicy;
use rmcp_worker::WorkerBridge;
use std::sync::Arc;

/// The fully registered catalog.
pub struct Catalog {
    pub tools: ToolRegistry,
    pub resources: ResourceRegistry,
    pub prompts: PromptRegistry,
}

/// Build and register everything. Registration order is the listing order.
pub fn build_catalog(
    config: &Config,
    bridge: Arc<WorkerBridge>,
    vfs: Arc<VfsPolicy>,
) -> Result<Catalog> {
    let mut tool_registry = ToolRegistry::new();
    tools::register_tools(&mut tool_registry, &bridge, &vfs)?;

    let mut resource_registry = ResourceRegistry::new();
    resources::register_resources(&mut resource_registry, config, &vfs)?;

    let mut prompt_registry = PromptRegistry::new();
    prompts::register_prompts(&mut prompt_registry)?;

    Ok(Catalog {
        tools: tool_registry,
        resources: resource_registry,
        prompts: prompt_registry,
    })
}

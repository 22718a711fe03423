//! Resource registrations.

use super::scripts::EMBEDDED_SCRIPTS;
use super::tools::vfs_error;
use anyhow::Result;
use rmcp_config::Config;
use rmcp_protocol::{ContentItem, ServerError, MCP_PROTOCOL_VERSION};
use rmcp_server::{RequestContext, Resource, ResourceRegistry, ResourceTemplate};
use rmcp_vfs::VfsPolicy;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub(super) fn register_resources(
    registry: &mut ResourceRegistry,
    config: &Config,
    vfs: &Arc<VfsPolicy>,
) -> Result<()> {
    let server_name = config.server.name.clone();
    registry.register(Resource {
        uri: "rmcp://server/info".to_string(),
        name: "Server info".to_string(),
        description: Some("Server identity and negotiated protocol".to_string()),
        mime_type: Some("application/json".to_string()),
        reader: Arc::new(move |_ctx: RequestContext| {
            let server_name = server_name.clone();
            Box::pin(async move {
                Ok(vec![ContentItem::json(json!({
                    "name": server_name,
                    "version": env!("CARGO_PKG_VERSION"),
                    "protocol_version": MCP_PROTOCOL_VERSION,
                }))])
            })
        }),
    })?;

    registry.register(Resource {
        uri: "rmcp://catalog/scripts".to_string(),
        name: "Script catalog".to_string(),
        description: Some("Ids of the statistical scripts shipped with this server".to_string()),
        mime_type: Some("application/json".to_string()),
        reader: Arc::new(|_ctx: RequestContext| {
            Box::pin(async move {
                let ids: Vec<&str> = EMBEDDED_SCRIPTS.iter().map(|s| s.id).collect();
                Ok(vec![ContentItem::json(json!({ "scripts": ids }))])
            })
        }),
    })?;

    registry.register(Resource {
        uri: "rmcp://approvals/state".to_string(),
        name: "Approval state".to_string(),
        description: Some("This session's approval decisions by category".to_string()),
        mime_type: Some("application/json".to_string()),
        reader: Arc::new(|ctx: RequestContext| {
            Box::pin(async move {
                let snapshot = ctx.session.approvals.snapshot();
                let value = serde_json::to_value(snapshot).map_err(ServerError::internal)?;
                Ok(vec![ContentItem::json(value)])
            })
        }),
    })?;

    // Templated dataset access: dataset://{name} reads {name}.csv from the
    // first allowed root, through the full VFS pipeline.
    let vfs = Arc::clone(vfs);
    registry.register_template(ResourceTemplate {
        uri_template: "dataset://{name}".to_string(),
        name: "Dataset".to_string(),
        description: Some("CSV dataset by name from the configured data root".to_string()),
        mime_type: Some("text/csv".to_string()),
        reader: Arc::new(move |_ctx: RequestContext, values: HashMap<String, String>| {
            let vfs = Arc::clone(&vfs);
            Box::pin(async move {
                let name = values.get("name").cloned().unwrap_or_default();
                let root = vfs
                    .roots()
                    .first()
                    .cloned()
                    .ok_or_else(|| {
                        ServerError::internal("no VFS roots configured for dataset resources")
                    })?;
                let raw = format!("{}/{}.csv", root.display(), name);

                let (_entry, bytes) = tokio::task::spawn_blocking(move || vfs.open_read(&raw))
                    .await
                    .map_err(ServerError::internal)?
                    .map_err(vfs_error)?;

                Ok(vec![ContentItem::Text {
                    text: String::from_utf8_lossy(&bytes).into_owned(),
                    annotations: Some(rmcp_protocol::TextAnnotations {
                        mime_type: Some("text/csv".to_string()),
                    }),
                }])
            })
        }),
    })?;

    Ok(())
}

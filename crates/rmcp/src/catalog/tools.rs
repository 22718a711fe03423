//! Tool registrations.
//!
//! Script-backed tools share one handler shape: validate (already done by
//! the dispatcher), run the script through the worker bridge, then render
//! the result document — `_formatting` becomes a markdown content item,
//! `_image` becomes an inline image, a top-level `error` key marks a
//! domain-level failure (`isError`, not a protocol error).

use super::scripts::script_source;
use anyhow::{anyhow, Result};
use rmcp_protocol::{ContentItem, ErrorKind, LogLevel, ServerError, ServerResult, ToolCallResult};
use rmcp_schema::CompiledSchema;
use rmcp_server::{RequestContext, ScriptSpec, Tool, ToolRegistry};
use rmcp_vfs::{Intent, VfsError, VfsPolicy};
use rmcp_worker::{WorkerBridge, WorkerEnv, WorkerOutput};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

pub(super) fn register_tools(
    registry: &mut ToolRegistry,
    bridge: &Arc<WorkerBridge>,
    vfs: &Arc<VfsPolicy>,
) -> Result<()> {
    registry.register(script_tool(
        bridge,
        "descriptive_stats",
        "Descriptive statistics",
        "Summary statistics (n, mean, sd, quartiles, range) for columns of a CSV dataset",
        json!({
            "type": "object",
            "properties": {
                "dataset": { "type": "string", "description": "Path to a CSV file" },
                "column": { "type": "string", "description": "Restrict to one column" }
            },
            "required": ["dataset"],
            "additionalProperties": false
        }),
        Some(json!({
            "type": "object",
            "properties": { "columns": { "type": "object" } },
            "required": ["columns"]
        })),
        "descriptive_stats",
        &[],
    )?)?;

    registry.register(script_tool(
        bridge,
        "linear_model",
        "Linear model",
        "Fit an ordinary least squares model from an R formula and report coefficients and fit quality",
        json!({
            "type": "object",
            "properties": {
                "formula": { "type": "string", "description": "R model formula, e.g. 'y ~ x1 + x2'" },
                "dataset": { "type": "string", "description": "Path to a CSV file" },
                "weights": { "type": "array", "items": { "type": "number" } }
            },
            "required": ["formula", "dataset"],
            "additionalProperties": false
        }),
        Some(json!({
            "type": "object",
            "properties": {
                "coefficients": { "type": "array" },
                "r_squared": { "type": "number" }
            },
            "required": ["coefficients", "r_squared"]
        })),
        "linear_model",
        &[],
    )?)?;

    registry.register(script_tool(
        bridge,
        "correlation",
        "Correlation matrix",
        "Pairwise correlations (pearson, spearman or kendall) over numeric columns",
        json!({
            "type": "object",
            "properties": {
                "dataset": { "type": "string" },
                "columns": { "type": "array", "items": { "type": "string" } },
                "method": { "type": "string", "enum": ["pearson", "spearman", "kendall"] }
            },
            "required": ["dataset"],
            "additionalProperties": false
        }),
        None,
        "correlation",
        &[],
    )?)?;

    registry.register(script_tool(
        bridge,
        "t_test",
        "t test",
        "One-sample or two-group t test on a column",
        json!({
            "type": "object",
            "properties": {
                "dataset": { "type": "string" },
                "column": { "type": "string" },
                "mu": { "type": "number", "description": "Null-hypothesis mean (one-sample)" },
                "group": { "type": "string", "description": "Two-level grouping column" }
            },
            "required": ["dataset", "column"],
            "additionalProperties": false
        }),
        None,
        "t_test",
        &[],
    )?)?;

    registry.register(script_tool(
        bridge,
        "anova",
        "Analysis of variance",
        "ANOVA table for an R formula",
        json!({
            "type": "object",
            "properties": {
                "dataset": { "type": "string" },
                "formula": { "type": "string" }
            },
            "required": ["dataset", "formula"],
            "additionalProperties": false
        }),
        None,
        "anova",
        &[],
    )?)?;

    registry.register(script_tool(
        bridge,
        "histogram",
        "Histogram",
        "Histogram of a numeric column, returned as an inline PNG",
        json!({
            "type": "object",
            "properties": {
                "dataset": { "type": "string" },
                "column": { "type": "string" },
                "bins": { "type": "integer", "minimum": 1, "maximum": 500 }
            },
            "required": ["dataset", "column"],
            "additionalProperties": false
        }),
        None,
        "histogram",
        &[],
    )?)?;

    registry.register(script_tool(
        bridge,
        "run_r_code",
        "Run R code",
        "Evaluate an R fragment in a fresh environment and capture the printed value",
        json!({
            "type": "object",
            "properties": {
                "code": { "type": "string", "description": "R code to evaluate" }
            },
            "required": ["code"],
            "additionalProperties": false
        }),
        None,
        "run_r_code",
        &["code"],
    )?)?;

    registry.register(script_tool(
        bridge,
        "install_package",
        "Install R package",
        "Install an R package from CRAN into the worker's user library",
        json!({
            "type": "object",
            "properties": {
                "package": { "type": "string", "pattern": "^[A-Za-z][A-Za-z0-9.]*$" }
            },
            "required": ["package"],
            "additionalProperties": false
        }),
        None,
        "install_package",
        &[],
    )?)?;

    registry.register(read_dataset_tool(vfs)?)?;
    registry.register(export_results_tool(bridge, vfs)?)?;

    Ok(())
}

/// Build a worker-backed tool from its descriptor pieces.
fn script_tool(
    bridge: &Arc<WorkerBridge>,
    name: &str,
    title: &str,
    description: &str,
    input_schema: Value,
    output_schema: Option<Value>,
    script_id: &str,
    code_params: &[&str],
) -> Result<Tool> {
    let source = script_source(script_id)
        .ok_or_else(|| anyhow!("no embedded script for {}", script_id))?;

    let bridge = Arc::clone(bridge);
    let id = script_id.to_string();

    Ok(Tool {
        name: name.to_string(),
        title: Some(title.to_string()),
        description: description.to_string(),
        input_schema: CompiledSchema::compile(&input_schema)?,
        output_schema: output_schema.map(|s| CompiledSchema::compile(&s)).transpose()?,
        script: Some(ScriptSpec {
            script_id: script_id.to_string(),
            source: source.to_string(),
            code_params: code_params.iter().map(|s| s.to_string()).collect(),
        }),
        handler: Arc::new(move |ctx: RequestContext, args: Value| {
            let bridge = Arc::clone(&bridge);
            let id = id.clone();
            Box::pin(async move { run_script_tool(&bridge, &id, ctx, args, None).await })
        }),
    })
}

/// Shared execution path for worker-backed tools.
async fn run_script_tool(
    bridge: &WorkerBridge,
    script_id: &str,
    ctx: RequestContext,
    args: Value,
    output_path: Option<PathBuf>,
) -> ServerResult<ToolCallResult> {
    ctx.progress().report(0.0, Some(1.0), Some("running script"));

    let env = WorkerEnv {
        log_level: ctx.session.min_log_level().as_str().to_string(),
        output_path,
    };

    let output = bridge
        .run_script(script_id, &args, env, &ctx.cancel)
        .await
        .map_err(|e| e.to_server_error())?;

    ctx.progress().report(1.0, Some(1.0), Some("done"));
    ctx.log(
        LogLevel::Info,
        "rmcp.worker",
        json!({ "script": script_id, "status": "completed" }),
    );
    Ok(render_worker_output(output))
}

/// Turn a worker result document into a tool result.
fn render_worker_output(output: WorkerOutput) -> ToolCallResult {
    let mut result = output.result;
    let mut content = Vec::new();

    if let Some(markdown) = output.formatting {
        content.push(ContentItem::markdown(markdown));
    }

    if let Some(image) = result.as_object_mut().and_then(|o| o.remove("_image")) {
        let data = image.get("data").and_then(|v| v.as_str());
        let mime = image.get("mime_type").and_then(|v| v.as_str());
        if let (Some(data), Some(mime)) = (data, mime) {
            content.push(ContentItem::Image {
                data: data.to_string(),
                mime_type: mime.to_string(),
            });
        }
    }

    // A top-level `error` key is the script saying "this analysis failed",
    // which is a domain-level failure, not a protocol error.
    let is_error = result.get("error").and_then(|v| v.as_str()).is_some();
    if is_error {
        let message = result["error"].as_str().unwrap_or_default().to_string();
        content.push(ContentItem::text(message));
    }

    if content.is_empty() {
        content.push(ContentItem::text("analysis complete"));
    }

    ToolCallResult {
        content,
        structured_content: Some(ContentItem::json(result)),
        is_error,
    }
}

/// Read a dataset through the VFS policy; no worker involved.
fn read_dataset_tool(vfs: &Arc<VfsPolicy>) -> Result<Tool> {
    let vfs = Arc::clone(vfs);
    Ok(Tool {
        name: "read_dataset".to_string(),
        title: Some("Read dataset".to_string()),
        description: "Read a dataset file (policy-checked) and return its content".to_string(),
        input_schema: CompiledSchema::compile(&json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Dataset path under an allowed root" }
            },
            "required": ["path"],
            "additionalProperties": false
        }))?,
        output_schema: None,
        script: None,
        handler: Arc::new(move |_ctx: RequestContext, args: Value| {
            let vfs = Arc::clone(&vfs);
            Box::pin(async move {
                let path = args["path"].as_str().unwrap_or_default().to_string();
                let (entry, bytes) =
                    tokio::task::spawn_blocking(move || vfs.open_read(&path))
                        .await
                        .map_err(ServerError::internal)?
                        .map_err(vfs_error)?;

                let text = String::from_utf8_lossy(&bytes).into_owned();
                Ok(ToolCallResult {
                    content: vec![ContentItem::text(text)],
                    structured_content: Some(ContentItem::json(json!({
                        "path": args["path"],
                        "size": entry.size,
                        "mime": entry.mime,
                    }))),
                    is_error: false,
                })
            })
        }),
    })
}

/// Export results: the VFS approves the target, the worker writes it.
fn export_results_tool(bridge: &Arc<WorkerBridge>, vfs: &Arc<VfsPolicy>) -> Result<Tool> {
    let source = script_source("export_results")
        .ok_or_else(|| anyhow!("no embedded script for export_results"))?;
    let bridge = Arc::clone(bridge);
    let vfs = Arc::clone(vfs);

    Ok(Tool {
        name: "export_results".to_string(),
        title: Some("Export results".to_string()),
        description: "Write analysis results to a file under an allowed root (requires approval)"
            .to_string(),
        input_schema: CompiledSchema::compile(&json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Target path under an allowed root" },
                "data": { "description": "Rows or object to export" },
                "format": { "type": "string", "enum": ["csv", "json"] }
            },
            "required": ["path", "data"],
            "additionalProperties": false
        }))?,
        output_schema: None,
        script: Some(ScriptSpec {
            script_id: "export_results".to_string(),
            source: source.to_string(),
            code_params: vec![],
        }),
        handler: Arc::new(move |ctx: RequestContext, mut args: Value| {
            let bridge = Arc::clone(&bridge);
            let vfs = Arc::clone(&vfs);
            Box::pin(async move {
                let raw = args["path"].as_str().unwrap_or_default().to_string();
                let entry = {
                    let vfs = Arc::clone(&vfs);
                    let raw = raw.clone();
                    tokio::task::spawn_blocking(move || vfs.resolve(&raw, Intent::Write))
                        .await
                        .map_err(ServerError::internal)?
                        .map_err(vfs_error)?
                };

                // The worker only ever sees the approved canonical path.
                if let Some(obj) = args.as_object_mut() {
                    obj.remove("path");
                }
                let result = run_script_tool(
                    &bridge,
                    "export_results",
                    ctx.clone(),
                    args,
                    Some(entry.canonical_path.clone()),
                )
                .await?;

                if !result.is_error {
                    if let Some(stem) = entry
                        .canonical_path
                        .file_stem()
                        .and_then(|s| s.to_str())
                    {
                        ctx.resource_updated(&format!("dataset://{}", stem));
                    }
                }
                Ok(result)
            })
        }),
    })
}

/// Map a VFS failure onto the wire taxonomy: policy rejections become
/// -32030 with the machine-readable reason, I/O failures stay internal.
pub(super) fn vfs_error(err: VfsError) -> ServerError {
    if err.is_rejection() {
        ServerError::with_data(
            ErrorKind::VfsAccessDenied,
            err.to_string(),
            json!({ "reason": err.reason_code() }),
        )
    } else {
        ServerError::internal(err)
    }
}

//! Tool / Resource / Prompt registries.
//!
//! Registration is append-only during startup and fails fast on duplicates.
//! Lookup is O(1); listing returns insertion order and paginates with an
//! opaque index-based cursor. The registries are immutable once the server
//! starts serving (shared behind `Arc`, concurrent read-only).

use crate::context::RequestContext;
use futures::future::BoxFuture;
use rmcp_protocol::{
    ContentItem, ErrorKind, PromptArgument, PromptDescriptor, PromptGetResult,
    ResourceDescriptor, ResourceTemplateDescriptor, ServerError, ServerResult, ToolCallResult,
    ToolDescriptor,
};
use rmcp_schema::CompiledSchema;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Registration failures (startup-time only).
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("duplicate tool name: {0}")]
    DuplicateTool(String),

    #[error("duplicate resource uri: {0}")]
    DuplicateResource(String),

    #[error("duplicate prompt name: {0}")]
    DuplicatePrompt(String),
}

/// Async tool handler. Receives the request context and the already
/// schema-validated argument document.
pub type ToolHandler =
    Arc<dyn Fn(RequestContext, Value) -> BoxFuture<'static, ServerResult<ToolCallResult>> + Send + Sync>;

/// Async resource reader.
pub type ResourceReader =
    Arc<dyn Fn(RequestContext) -> BoxFuture<'static, ServerResult<Vec<ContentItem>>> + Send + Sync>;

/// Async templated-resource reader; receives the placeholder values.
pub type TemplateReader = Arc<
    dyn Fn(RequestContext, HashMap<String, String>) -> BoxFuture<'static, ServerResult<Vec<ContentItem>>>
        + Send
        + Sync,
>;

/// Async prompt renderer.
pub type PromptRenderer =
    Arc<dyn Fn(RequestContext, Value) -> BoxFuture<'static, ServerResult<PromptGetResult>> + Send + Sync>;

/// The script a tool executes, as seen by the approval gate.
#[derive(Debug, Clone)]
pub struct ScriptSpec {
    /// Script id resolved by the worker bridge
    pub script_id: String,

    /// Script source text, scanned for approval-trigger patterns
    pub source: String,

    /// Argument fields whose string values are user-supplied code and are
    /// scanned as well (e.g. `code` on a run-arbitrary-code tool)
    pub code_params: Vec<String>,
}

/// A registered tool: a value, not a trait, so registration order and
/// dependencies are explicit in the startup routine.
pub struct Tool {
    pub name: String,
    pub title: Option<String>,
    pub description: String,
    pub input_schema: CompiledSchema,
    /// Advisory only: mismatches are logged, never failed to the client.
    pub output_schema: Option<CompiledSchema>,
    pub script: Option<ScriptSpec>,
    pub handler: ToolHandler,
}

impl Tool {
    /// Wire descriptor for tools/list.
    pub fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.raw().clone(),
            output_schema: self.output_schema.as_ref().map(|s| s.raw().clone()),
        }
    }
}

/// A registered resource.
pub struct Resource {
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub reader: ResourceReader,
}

impl Resource {
    pub fn descriptor(&self) -> ResourceDescriptor {
        ResourceDescriptor {
            uri: self.uri.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
        }
    }
}

/// A registered resource template (`dataset://{name}`).
pub struct ResourceTemplate {
    pub uri_template: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
    pub reader: TemplateReader,
}

impl ResourceTemplate {
    pub fn descriptor(&self) -> ResourceTemplateDescriptor {
        ResourceTemplateDescriptor {
            uri_template: self.uri_template.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            mime_type: self.mime_type.clone(),
        }
    }

    /// Match a concrete URI against the template, extracting placeholders.
    ///
    /// Placeholders match any non-empty run of characters excluding `/`.
    pub fn match_uri(&self, uri: &str) -> Option<HashMap<String, String>> {
        let mut values = HashMap::new();
        let mut remaining = uri;
        let mut template = self.uri_template.as_str();

        while let Some(open) = template.find('{') {
            let (literal, rest) = template.split_at(open);
            remaining = remaining.strip_prefix(literal)?;
            let close = rest.find('}')?;
            let placeholder = &rest[1..close];
            template = &rest[close + 1..];

            // The placeholder value runs until the next literal (or the end).
            let value = match template.chars().next() {
                Some(next_literal) => {
                    let end = remaining.find(next_literal)?;
                    let (value, tail) = remaining.split_at(end);
                    remaining = tail;
                    value
                }
                None => {
                    let value = remaining;
                    remaining = "";
                    value
                }
            };

            if value.is_empty() || value.contains('/') {
                return None;
            }
            values.insert(placeholder.to_string(), value.to_string());
        }

        if remaining == template {
            Some(values)
        } else {
            None
        }
    }
}

/// One page of descriptors plus the cursor for the next page.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Shared pagination over an insertion-ordered slice.
fn paginate<T, D>(
    items: &[T],
    cursor: Option<&str>,
    page_size: usize,
    mut visible: impl FnMut(&T) -> bool,
    mut descriptor: impl FnMut(&T) -> D,
) -> ServerResult<Page<D>> {
    let start = match cursor {
        Some(raw) => raw.parse::<usize>().map_err(|_| {
            ServerError::new(ErrorKind::InvalidParams, format!("Invalid cursor: {}", raw))
        })?,
        None => 0,
    };
    if start > items.len() {
        return Err(ServerError::new(
            ErrorKind::InvalidParams,
            format!("Invalid cursor: {}", start),
        ));
    }

    let mut out = Vec::new();
    let mut index = start;
    while index < items.len() && out.len() < page_size {
        let item = &items[index];
        if visible(item) {
            out.push(descriptor(item));
        }
        index += 1;
    }

    let next_cursor = if index < items.len() {
        Some(index.to_string())
    } else {
        None
    };

    Ok(Page {
        items: out,
        next_cursor,
    })
}

/// Registry of tools, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; duplicate names fail fast.
    pub fn register(&mut self, tool: Tool) -> Result<(), RegistryError> {
        if self.by_name.contains_key(&tool.name) {
            return Err(RegistryError::DuplicateTool(tool.name));
        }
        tracing::debug!("Registering tool: {}", tool.name);
        self.by_name.insert(tool.name.clone(), self.tools.len());
        self.tools.push(Arc::new(tool));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Tool>> {
        self.by_name.get(name).map(|&i| Arc::clone(&self.tools[i]))
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Tool>> {
        self.tools.iter()
    }

    /// One listing page, applying an optional visibility filter.
    pub fn page(
        &self,
        cursor: Option<&str>,
        page_size: usize,
        filter: Option<&dyn Fn(&Tool) -> bool>,
    ) -> ServerResult<Page<ToolDescriptor>> {
        paginate(
            &self.tools,
            cursor,
            page_size,
            |t| filter.map_or(true, |f| f(t)),
            |t| t.descriptor(),
        )
    }
}

/// Registry of resources and resource templates, keyed by URI.
#[derive(Default)]
pub struct ResourceRegistry {
    resources: Vec<Arc<Resource>>,
    by_uri: HashMap<String, usize>,
    templates: Vec<Arc<ResourceTemplate>>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource: Resource) -> Result<(), RegistryError> {
        if self.by_uri.contains_key(&resource.uri) {
            return Err(RegistryError::DuplicateResource(resource.uri));
        }
        tracing::debug!("Registering resource: {}", resource.uri);
        self.by_uri.insert(resource.uri.clone(), self.resources.len());
        self.resources.push(Arc::new(resource));
        Ok(())
    }

    pub fn register_template(&mut self, template: ResourceTemplate) -> Result<(), RegistryError> {
        if self
            .templates
            .iter()
            .any(|t| t.uri_template == template.uri_template)
        {
            return Err(RegistryError::DuplicateResource(template.uri_template));
        }
        tracing::debug!("Registering resource template: {}", template.uri_template);
        self.templates.push(Arc::new(template));
        Ok(())
    }

    pub fn get(&self, uri: &str) -> Option<Arc<Resource>> {
        self.by_uri.get(uri).map(|&i| Arc::clone(&self.resources[i]))
    }

    /// Find the first template matching `uri` and extract its placeholders.
    pub fn match_template(
        &self,
        uri: &str,
    ) -> Option<(Arc<ResourceTemplate>, HashMap<String, String>)> {
        self.templates
            .iter()
            .find_map(|t| t.match_uri(uri).map(|values| (Arc::clone(t), values)))
    }

    pub fn page(
        &self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> ServerResult<Page<ResourceDescriptor>> {
        paginate(&self.resources, cursor, page_size, |_| true, |r| r.descriptor())
    }

    pub fn template_descriptors(&self) -> Vec<ResourceTemplateDescriptor> {
        self.templates.iter().map(|t| t.descriptor()).collect()
    }
}

/// Registry of prompts, keyed by name.
#[derive(Default)]
pub struct PromptRegistry {
    prompts: Vec<Arc<Prompt>>,
    by_name: HashMap<String, usize>,
}

/// A registered prompt.
pub struct Prompt {
    pub name: String,
    pub description: Option<String>,
    pub arguments: Vec<PromptArgument>,
    pub renderer: PromptRenderer,
}

impl Prompt {
    pub fn descriptor(&self) -> PromptDescriptor {
        PromptDescriptor {
            name: self.name.clone(),
            description: self.description.clone(),
            arguments: self.arguments.clone(),
        }
    }
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, prompt: Prompt) -> Result<(), RegistryError> {
        if self.by_name.contains_key(&prompt.name) {
            return Err(RegistryError::DuplicatePrompt(prompt.name));
        }
        tracing::debug!("Registering prompt: {}", prompt.name);
        self.by_name.insert(prompt.name.clone(), self.prompts.len());
        self.prompts.push(Arc::new(prompt));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<Prompt>> {
        self.by_name.get(name).map(|&i| Arc::clone(&self.prompts[i]))
    }

    pub fn page(
        &self,
        cursor: Option<&str>,
        page_size: usize,
    ) -> ServerResult<Page<PromptDescriptor>> {
        paginate(&self.prompts, cursor, page_size, |_| true, |p| p.descriptor())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn noop_tool(name: &str) -> Tool {
        Tool {
            name: name.to_string(),
            title: None,
            description: format!("test tool {}", name),
            input_schema: CompiledSchema::compile(&json!({ "type": "object" })).unwrap(),
            output_schema: None,
            script: None,
            handler: Arc::new(|_ctx, _args| {
                Box::pin(async { Ok(ToolCallResult::ok(vec![ContentItem::text("ok")])) })
            }),
        }
    }

    #[test]
    fn test_duplicate_registration_fails_fast() {
        let mut registry = ToolRegistry::new();
        registry.register(noop_tool("t_test")).unwrap();
        assert!(matches!(
            registry.register(noop_tool("t_test")),
            Err(RegistryError::DuplicateTool(_))
        ));
    }

    #[test]
    fn test_listing_is_insertion_ordered_and_paged() {
        let mut registry = ToolRegistry::new();
        for name in ["alpha", "bravo", "charlie", "delta", "echo"] {
            registry.register(noop_tool(name)).unwrap();
        }

        let first = registry.page(None, 2, None).unwrap();
        assert_eq!(
            first.items.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            ["alpha", "bravo"]
        );
        let cursor = first.next_cursor.unwrap();

        let second = registry.page(Some(&cursor), 2, None).unwrap();
        assert_eq!(
            second.items.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            ["charlie", "delta"]
        );

        let third = registry.page(second.next_cursor.as_deref(), 2, None).unwrap();
        assert_eq!(third.items.len(), 1);
        assert!(third.next_cursor.is_none());
    }

    #[test]
    fn test_invalid_cursor_rejected() {
        let registry = ToolRegistry::new();
        let err = registry.page(Some("not-a-cursor"), 10, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidParams);
    }

    #[test]
    fn test_visibility_filter_hides_without_mutation() {
        let mut registry = ToolRegistry::new();
        registry.register(noop_tool("public_tool")).unwrap();
        registry.register(noop_tool("hidden_tool")).unwrap();

        let filter = |t: &Tool| !t.name.starts_with("hidden");
        let page = registry.page(None, 10, Some(&filter)).unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].name, "public_tool");

        // Registry itself is untouched.
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_template_uri_matching() {
        let template = ResourceTemplate {
            uri_template: "dataset://{name}".to_string(),
            name: "dataset".to_string(),
            description: None,
            mime_type: Some("text/csv".to_string()),
            reader: Arc::new(|_ctx, _values| Box::pin(async { Ok(vec![]) })),
        };

        let values = template.match_uri("dataset://mtcars").unwrap();
        assert_eq!(values["name"], "mtcars");

        assert!(template.match_uri("dataset://").is_none());
        assert!(template.match_uri("dataset://a/b").is_none());
        assert!(template.match_uri("other://mtcars").is_none());
    }
}

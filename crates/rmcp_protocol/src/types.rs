//! MCP message types: initialize, tools, resources, prompts, notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::RequestId;

// ============================================================================
// Initialize
// ============================================================================

/// MCP Initialize request params
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    /// Protocol version the client supports
    pub protocol_version: String,

    /// Client capabilities
    #[serde(default)]
    pub capabilities: ClientCapabilities,

    /// Client info
    pub client_info: ClientInfo,
}

/// Client capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientCapabilities {
    /// Experimental capabilities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,

    /// Roots capability (directory access)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<Value>,

    /// Sampling capability
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,

    /// Elicitation capability (required for approval prompts)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elicitation: Option<Value>,
}

/// Client info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client name
    pub name: String,

    /// Client version
    pub version: String,
}

/// MCP Initialize result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Protocol version the server is using
    pub protocol_version: String,

    /// Server capabilities
    pub capabilities: ServerCapabilities,

    /// Server info
    pub server_info: ServerInfo,

    /// Optional usage instructions surfaced to the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Server capabilities advertised on initialize
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// Tools capability
    pub tools: ToolsCapability,

    /// Resources capability
    pub resources: ResourcesCapability,

    /// Prompts capability
    pub prompts: PromptsCapability,

    /// Logging capability (presence only)
    pub logging: Value,

    /// Completion capability (presence only)
    pub completion: Value,
}

impl Default for ServerCapabilities {
    fn default() -> Self {
        Self {
            tools: ToolsCapability {
                list_changed: false,
            },
            resources: ResourcesCapability {
                subscribe: true,
                list_changed: true,
            },
            prompts: PromptsCapability {
                list_changed: false,
            },
            logging: Value::Object(Default::default()),
            completion: Value::Object(Default::default()),
        }
    }
}

/// Tools capability
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    /// Whether the tool list may change after startup
    #[serde(default)]
    pub list_changed: bool,
}

/// Resources capability
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    /// Whether resources/subscribe is supported
    #[serde(default)]
    pub subscribe: bool,

    /// Whether the resource list may change after startup
    #[serde(default)]
    pub list_changed: bool,
}

/// Prompts capability
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptsCapability {
    /// Whether the prompt list may change after startup
    #[serde(default)]
    pub list_changed: bool,
}

/// Server info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Server name
    pub name: String,

    /// Server version
    pub version: String,
}

// ============================================================================
// Content
// ============================================================================

/// Content item in tool results and resource reads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    /// Text content (optionally annotated with a MIME type)
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        annotations: Option<TextAnnotations>,
    },
    /// Inline image, base64-encoded
    Image {
        /// Base64-encoded payload
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// Machine-readable JSON value
    Json { data: Value },
    /// Link to a server resource
    ResourceLink {
        uri: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
}

impl ContentItem {
    /// Plain text item.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text {
            text: s.into(),
            annotations: None,
        }
    }

    /// Markdown text item (annotated `text/markdown`).
    pub fn markdown(s: impl Into<String>) -> Self {
        Self::Text {
            text: s.into(),
            annotations: Some(TextAnnotations {
                mime_type: Some("text/markdown".to_string()),
            }),
        }
    }

    /// JSON item.
    pub fn json(data: Value) -> Self {
        Self::Json { data }
    }
}

/// Annotations on a text content item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextAnnotations {
    /// MIME type of the text (e.g. text/markdown)
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

// ============================================================================
// Tools
// ============================================================================

/// Tool definition for tools/list responses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Tool name (unique, slug-like)
    pub name: String,

    /// Display title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Human-readable description
    pub description: String,

    /// JSON Schema for input parameters
    pub input_schema: Value,

    /// Advisory JSON Schema for the structured result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

/// Paged list params shared by tools/resources/prompts listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListParams {
    /// Opaque cursor from a previous listing
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Tools list result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsListResult {
    /// Available tools (one page)
    pub tools: Vec<ToolDescriptor>,

    /// Cursor for the next page, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Tool call params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallParams {
    /// Tool name
    pub name: String,

    /// Tool arguments
    #[serde(default)]
    pub arguments: Value,
}

/// Tool call result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Human-readable content blocks
    pub content: Vec<ContentItem>,

    /// Machine-readable payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<ContentItem>,

    /// Domain-level failure flag (protocol errors use the error channel)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Successful result with the given content blocks.
    pub fn ok(content: Vec<ContentItem>) -> Self {
        Self {
            content,
            structured_content: None,
            is_error: false,
        }
    }

    /// Domain-level failure (e.g. "model failed to converge").
    pub fn domain_error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ContentItem::text(message)],
            structured_content: None,
            is_error: true,
        }
    }
}

// ============================================================================
// Resources
// ============================================================================

/// Resource definition for resources/list responses
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    /// Scheme-qualified URI
    pub uri: String,

    /// Resource name
    pub name: String,

    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// MIME type of the content, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Templated resource definition for resources/templates/list
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplateDescriptor {
    /// URI template with named placeholders (e.g. `dataset://{name}`)
    pub uri_template: String,

    /// Template name
    pub name: String,

    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// MIME type of expanded content, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Resources list result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesListResult {
    pub resources: Vec<ResourceDescriptor>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// Resource templates list result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTemplatesListResult {
    pub resource_templates: Vec<ResourceTemplateDescriptor>,
}

/// resources/read and resources/subscribe params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReadParams {
    /// URI of the resource (templates already expanded by the client)
    pub uri: String,
}

/// resources/read result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceReadResult {
    pub contents: Vec<ContentItem>,
}

// ============================================================================
// Prompts
// ============================================================================

/// Prompt definition for prompts/list responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptDescriptor {
    /// Prompt name
    pub name: String,

    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Declared arguments
    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

/// One declared prompt argument
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptArgument {
    /// Argument name
    pub name: String,

    /// Human-readable description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether the argument must be supplied
    #[serde(default)]
    pub required: bool,
}

/// Prompts list result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptsListResult {
    pub prompts: Vec<PromptDescriptor>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

/// prompts/get params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptGetParams {
    /// Prompt name
    pub name: String,

    /// Argument values keyed by name
    #[serde(default)]
    pub arguments: Value,
}

/// One rendered prompt message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    /// Message role ("user" or "assistant")
    pub role: String,

    /// Message content
    pub content: ContentItem,
}

/// prompts/get result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptGetResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub messages: Vec<PromptMessage>,
}

// ============================================================================
// Logging
// ============================================================================

/// MCP log levels (RFC 5424 subset), ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl LogLevel {
    /// Parse a level string (lowercase, per MCP).
    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(Value::String(s.to_string())).ok()
    }

    /// Wire representation of the level.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Critical => "critical",
            Self::Alert => "alert",
            Self::Emergency => "emergency",
        }
    }
}

/// logging/setLevel params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetLevelParams {
    pub level: LogLevel,
}

/// notifications/message params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingMessageParams {
    pub level: LogLevel,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,

    pub data: Value,
}

// ============================================================================
// Notifications
// ============================================================================

/// notifications/progress params
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressParams {
    /// Token correlating progress to the originating request
    pub progress_token: Value,

    /// Monotonically increasing progress value
    pub progress: f64,

    /// Total, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<f64>,

    /// Optional status line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// notifications/cancelled params
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelledParams {
    /// Id of the request being cancelled
    pub request_id: RequestId,

    /// Optional human-readable reason
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// notifications/resources/updated params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceUpdatedParams {
    pub uri: String,
}

// ============================================================================
// Elicitation (server -> client)
// ============================================================================

/// elicitation/create params sent by the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElicitParams {
    /// Question shown to the user
    pub message: String,

    /// Schema the answer must satisfy
    pub requested_schema: Value,
}

/// elicitation/create result returned by the client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElicitResult {
    /// "accept", "decline" or "cancel"
    pub action: String,

    /// Answer content when action == "accept"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_item_tags() {
        let text = serde_json::to_value(ContentItem::text("hello")).unwrap();
        assert_eq!(text["type"], "text");

        let md = serde_json::to_value(ContentItem::markdown("# h")).unwrap();
        assert_eq!(md["annotations"]["mimeType"], "text/markdown");

        let img = serde_json::to_value(ContentItem::Image {
            data: "aGk=".to_string(),
            mime_type: "image/png".to_string(),
        })
        .unwrap();
        assert_eq!(img["type"], "image");
        assert_eq!(img["mimeType"], "image/png");

        let link = serde_json::to_value(ContentItem::ResourceLink {
            uri: "dataset://mtcars".to_string(),
            description: None,
        })
        .unwrap();
        assert_eq!(link["type"], "resource_link");
    }

    #[test]
    fn test_tool_result_omits_false_is_error() {
        let ok = ToolCallResult::ok(vec![ContentItem::text("done")]);
        let json = serde_json::to_string(&ok).unwrap();
        assert!(!json.contains("isError"));

        let err = ToolCallResult::domain_error("model failed to converge");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"isError\":true"));
    }

    #[test]
    fn test_capabilities_default_shape() {
        let caps = serde_json::to_value(ServerCapabilities::default()).unwrap();
        assert_eq!(caps["tools"]["listChanged"], false);
        assert_eq!(caps["resources"]["subscribe"], true);
        assert_eq!(caps["resources"]["listChanged"], true);
        assert_eq!(caps["prompts"]["listChanged"], false);
        assert!(caps["logging"].is_object());
        assert!(caps["completion"].is_object());
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Warning < LogLevel::Error);
        assert_eq!(LogLevel::parse("warning"), Some(LogLevel::Warning));
        assert_eq!(LogLevel::parse("bogus"), None);
    }

    #[test]
    fn test_initialize_params_decode() {
        let params: InitializeParams = serde_json::from_value(serde_json::json!({
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": { "name": "t", "version": "0" }
        }))
        .unwrap();
        assert_eq!(params.protocol_version, "2025-06-18");
        assert_eq!(params.client_info.name, "t");
    }
}

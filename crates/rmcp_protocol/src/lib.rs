//! MCP wire format (JSON-RPC 2.0) shared by all RMCP crates.
//!
//! Implements the Model Context Protocol message shapes based on JSON-RPC 2.0.
//! Reference: https://spec.modelcontextprotocol.io/
//!
//! # Wire Format
//!
//! All messages are JSON-RPC 2.0, carried either as newline-delimited JSON
//! over stdio or as HTTP POST bodies.
//!
//! ## Request
//! ```json
//! {
//!   "jsonrpc": "2.0",
//!   "id": 1,
//!   "method": "tools/call",
//!   "params": { "name": "linear_model", "arguments": { "formula": "y ~ x" } }
//! }
//! ```
//!
//! ## Response (success)
//! ```json
//! {
//!   "jsonrpc": "2.0",
//!   "id": 1,
//!   "result": { "content": [...] }
//! }
//! ```
//!
//! ## Response (error)
//! ```json
//! {
//!   "jsonrpc": "2.0",
//!   "id": 1,
//!   "error": { "code": -32602, "message": "Invalid params", "data": {...} }
//! }
//! ```
//!
//! A request without an `id` is a notification and never receives a response.
//! Batched (array) requests are out of scope and rejected with `-32600`.

mod envelope;
mod error;
mod types;

pub use envelope::{
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId,
};
pub use error::{ErrorKind, ServerError, ServerResult};
pub use types::*;

/// JSON-RPC 2.0 version string
pub const JSONRPC_VERSION: &str = "2.0";

/// The single MCP protocol version this server speaks.
pub const MCP_PROTOCOL_VERSION: &str = "2025-06-18";

/// Worker ABI version injected into every `args.json` `_env` block.
pub const WORKER_ABI_VERSION: u32 = 1;

/// Known MCP methods
pub mod methods {
    /// Initialize the connection
    pub const INITIALIZE: &str = "initialize";
    /// Notification that initialization is complete
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Ping (keepalive)
    pub const PING: &str = "ping";
    /// List available tools
    pub const TOOLS_LIST: &str = "tools/list";
    /// Call a tool
    pub const TOOLS_CALL: &str = "tools/call";
    /// List available resources
    pub const RESOURCES_LIST: &str = "resources/list";
    /// List resource templates
    pub const RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
    /// Read a resource by URI
    pub const RESOURCES_READ: &str = "resources/read";
    /// Subscribe to resource updates
    pub const RESOURCES_SUBSCRIBE: &str = "resources/subscribe";
    /// List available prompts
    pub const PROMPTS_LIST: &str = "prompts/list";
    /// Render a prompt with arguments
    pub const PROMPTS_GET: &str = "prompts/get";
    /// Adjust the session log level
    pub const LOGGING_SET_LEVEL: &str = "logging/setLevel";
    /// Client-side cancellation of an in-flight request
    pub const CANCELLED: &str = "notifications/cancelled";
    /// Progress notification emitted by the server
    pub const PROGRESS: &str = "notifications/progress";
    /// Log-message notification emitted by the server
    pub const MESSAGE: &str = "notifications/message";
    /// Resource-updated notification emitted by the server
    pub const RESOURCES_UPDATED: &str = "notifications/resources/updated";
    /// Server-initiated elicitation (approval prompts)
    pub const ELICITATION_CREATE: &str = "elicitation/create";
}

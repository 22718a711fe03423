//! MCP core server for RMCP.
//!
//! The pieces, leaves first:
//!
//! - [`registry`]: typed tool/resource/prompt registries (append-only at
//!   startup, immutable while serving)
//! - [`session`]: session lifecycle, the per-session event channel, and the
//!   idle sweeper
//! - [`context`]: per-request context (cancel token, progress sink,
//!   elicitation back-channel)
//! - [`dispatcher`]: JSON-RPC routing, the tools/call pipeline (schema
//!   validation, approval gate, handler), cancellation wiring
//! - [`transport`]: line-delimited stdio and HTTP+SSE
//!
//! Handlers are suspendable tasks: they may await a worker result, an
//! approval answer, or a client elicitation, and run to completion
//! otherwise. The registries are borrowed by contexts, never owned.

pub mod context;
pub mod dispatcher;
pub mod registry;
pub mod session;
pub mod transport;

pub use context::RequestContext;
pub use dispatcher::{McpServer, Payload, ToolAnnotator};
pub use registry::{
    Prompt, PromptRegistry, PromptRenderer, RegistryError, Resource, ResourceReader,
    ResourceRegistry, ResourceTemplate, ScriptSpec, TemplateReader, Tool, ToolHandler,
    ToolRegistry,
};
pub use session::{Session, SessionEvent, SessionManager, SessionSettings, SessionState};
pub use transport::{serve_http, HttpTransport, StdioTransport};

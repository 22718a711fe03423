//! Core server: method routing, capability negotiation, the tools/call
//! pipeline (schema validation, approval gate, handler invocation) and
//! cancellation wiring.

use crate::context::RequestContext;
use crate::registry::{PromptRegistry, ResourceRegistry, Tool, ToolRegistry};
use crate::session::{Session, SessionManager, SessionSettings};
use anyhow::{Context as _, Result};
use rmcp_approval::{CategorySet, Decision, PromptTicket};
use rmcp_config::Config;
use rmcp_protocol::{
    methods, CancelledParams, ContentItem, ErrorKind, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListParams, PromptGetParams, RequestId,
    ResourceReadParams, ResourceReadResult, ResourceTemplatesListResult, ResourcesListResult,
    ServerCapabilities, ServerError, ServerInfo, ServerResult, SetLevelParams, ToolCallParams,
    ToolsListResult, JSONRPC_VERSION, MCP_PROTOCOL_VERSION,
};
use rmcp_worker::CancelToken;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Per-session visibility filter applied at list time (annotate hook).
pub type ToolAnnotator = Arc<dyn Fn(&Session, &Tool) -> bool + Send + Sync>;

/// A parsed inbound payload.
pub enum Payload {
    /// A request or notification from the client
    Request(JsonRpcRequest),

    /// A response from the client to a server-initiated request
    Response { id: RequestId, result: Value },
}

/// The MCP core server. Owns the registries; transports own their sessions
/// through the embedded [`SessionManager`].
pub struct McpServer {
    server_name: String,
    server_version: String,
    instructions: Option<String>,

    tools: ToolRegistry,
    resources: ResourceRegistry,
    prompts: PromptRegistry,

    sessions: Arc<SessionManager>,
    categories: Arc<CategorySet>,

    page_size: usize,
    progress_interval: Duration,
    elicit_timeout: Duration,

    /// In-flight cancel tokens keyed by (session id, request id).
    /// INVARIANT: held only for map operations, never across an await.
    inflight: Mutex<HashMap<(String, RequestId), CancelToken>>,

    tool_annotator: Option<ToolAnnotator>,
}

impl McpServer {
    /// Assemble the server from configuration and populated registries.
    pub fn new(
        config: &Config,
        tools: ToolRegistry,
        resources: ResourceRegistry,
        prompts: PromptRegistry,
    ) -> Result<Self> {
        let categories = CategorySet::compile(&config.approval.categories)
            .context("Failed to compile approval categories")?;
        let category_ids: Vec<String> = categories.ids().map(|s| s.to_string()).collect();

        let sessions = Arc::new(SessionManager::new(SessionSettings {
            idle_timeout: Duration::from_secs(config.session.idle_timeout_secs),
            event_queue_len: config.limits.sse_queue_len,
            auto_approve: config.approval.auto_approve.clone(),
            category_ids,
        }));

        Ok(Self {
            server_name: config.server.name.clone(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            instructions: config.server.instructions.clone(),
            tools,
            resources,
            prompts,
            sessions,
            categories: Arc::new(categories),
            page_size: config.limits.page_size,
            progress_interval: Duration::from_millis(config.limits.progress_interval_ms),
            elicit_timeout: Duration::from_secs(config.session.elicit_timeout_secs),
            inflight: Mutex::new(HashMap::new()),
            tool_annotator: None,
        })
    }

    /// Install a per-session tool visibility filter.
    pub fn set_tool_annotator(&mut self, annotator: ToolAnnotator) {
        self.tool_annotator = Some(annotator);
    }

    pub fn session_manager(&self) -> Arc<SessionManager> {
        Arc::clone(&self.sessions)
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    pub fn prompts(&self) -> &PromptRegistry {
        &self.prompts
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Parse one inbound JSON text into a payload, or produce the error
    /// response to send back.
    pub fn parse_payload(raw: &str) -> Result<Payload, JsonRpcResponse> {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                return Err(JsonRpcResponse::error(
                    None,
                    JsonRpcError::new(ErrorKind::ParseError, format!("Invalid JSON: {}", e)),
                ));
            }
        };
        Self::classify_payload(value)
    }

    /// Classify an already-parsed JSON value.
    pub fn classify_payload(value: Value) -> Result<Payload, JsonRpcResponse> {
        if value.is_array() {
            return Err(JsonRpcResponse::error(
                None,
                JsonRpcError::new(
                    ErrorKind::InvalidRequest,
                    "Batched requests are not supported",
                ),
            ));
        }

        let is_request = value.get("method").is_some();
        if is_request {
            match serde_json::from_value::<JsonRpcRequest>(value) {
                Ok(request) => Ok(Payload::Request(request)),
                Err(e) => Err(JsonRpcResponse::error(
                    None,
                    JsonRpcError::new(
                        ErrorKind::InvalidRequest,
                        format!("Invalid request envelope: {}", e),
                    ),
                )),
            }
        } else {
            // A response to a server-initiated request (e.g. elicitation).
            let id = value
                .get("id")
                .cloned()
                .and_then(|v| serde_json::from_value::<RequestId>(v).ok());
            match id {
                Some(id) => {
                    let result = value.get("result").cloned().unwrap_or(Value::Null);
                    Ok(Payload::Response { id, result })
                }
                None => Err(JsonRpcResponse::error(
                    None,
                    JsonRpcError::new(
                        ErrorKind::InvalidRequest,
                        "Message is neither a request nor a response",
                    ),
                )),
            }
        }
    }

    /// Handle one raw line/body for a session. `None` means nothing is sent
    /// back (notifications and client responses).
    pub async fn handle_raw(
        self: &Arc<Self>,
        session: &Arc<Session>,
        raw: &str,
    ) -> Option<JsonRpcResponse> {
        match Self::parse_payload(raw) {
            Ok(Payload::Request(request)) => self.dispatch(session, request).await,
            Ok(Payload::Response { id, result }) => {
                if !session.resolve_client_response(&id, result) {
                    debug!(session = %session.id, %id, "discarded unmatched client response");
                }
                None
            }
            Err(response) => Some(response),
        }
    }

    /// Route one request. Notifications never produce a response.
    pub async fn dispatch(
        self: &Arc<Self>,
        session: &Arc<Session>,
        request: JsonRpcRequest,
    ) -> Option<JsonRpcResponse> {
        if request.jsonrpc != JSONRPC_VERSION {
            if request.is_notification() {
                return None;
            }
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::new(
                    ErrorKind::InvalidRequest,
                    format!("Invalid JSON-RPC version: {}", request.jsonrpc),
                ),
            ));
        }

        session.touch();
        debug!(session = %session.id, method = %request.method, id = ?request.id, "request");

        if let Err(err) = session.ensure_can_handle(&request.method) {
            if request.is_notification() {
                return None;
            }
            return Some(JsonRpcResponse::error(request.id, err.to_rpc_error()));
        }

        if let Err(err) = self.capability_gate(&request.method) {
            if request.is_notification() {
                return None;
            }
            return Some(JsonRpcResponse::error(request.id, err.to_rpc_error()));
        }

        if request.is_notification() {
            self.handle_notification(session, &request).await;
            return None;
        }

        let id = request.id.clone();
        let params = request.params.unwrap_or(Value::Null);

        // Requests with an id get a cancel token wired to
        // notifications/cancelled for their whole lifetime.
        let cancel = CancelToken::new();
        let key = id.clone().map(|rid| (session.id.clone(), rid));
        if let Some(key) = &key {
            self.inflight
                .lock()
                .expect("inflight lock poisoned")
                .insert(key.clone(), cancel.clone());
        }

        let result = self
            .route_request(session, &request.method, id.clone(), params, cancel)
            .await;

        if let Some(key) = &key {
            self.inflight
                .lock()
                .expect("inflight lock poisoned")
                .remove(key);
        }

        let response = match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(err) => {
                debug!(session = %session.id, method = %request.method, code = err.kind.code(), "request failed: {}", err.message);
                JsonRpcResponse::error(id, err.to_rpc_error())
            }
        };
        Some(response)
    }

    /// Capability gating hook.
    ///
    /// This server always advertises tools, resources, prompts, logging and
    /// completion, so every method group is currently allowed; the check
    /// stays on the dispatch path for future capability flags.
    fn capability_gate(&self, _method: &str) -> ServerResult<()> {
        Ok(())
    }

    async fn route_request(
        self: &Arc<Self>,
        session: &Arc<Session>,
        method: &str,
        id: Option<RequestId>,
        params: Value,
        cancel: CancelToken,
    ) -> ServerResult<Value> {
        let ctx = RequestContext::new(
            Arc::clone(session),
            id,
            cancel,
            self.progress_interval,
            self.elicit_timeout,
        );

        match method {
            methods::INITIALIZE => self.handle_initialize(session, params),
            methods::PING => Ok(Value::Object(Default::default())),
            methods::TOOLS_LIST => self.handle_tools_list(session, params),
            methods::TOOLS_CALL => self.handle_tools_call(ctx, params).await,
            methods::RESOURCES_LIST => self.handle_resources_list(params),
            methods::RESOURCES_TEMPLATES_LIST => self.handle_resource_templates_list(),
            methods::RESOURCES_READ => self.handle_resources_read(ctx, params).await,
            methods::RESOURCES_SUBSCRIBE => self.handle_resources_subscribe(session, params),
            methods::PROMPTS_LIST => self.handle_prompts_list(params),
            methods::PROMPTS_GET => self.handle_prompts_get(ctx, params).await,
            methods::LOGGING_SET_LEVEL => self.handle_set_level(session, params),
            other => Err(ServerError::method_not_found(other)),
        }
    }

    async fn handle_notification(self: &Arc<Self>, session: &Arc<Session>, request: &JsonRpcRequest) {
        match request.method.as_str() {
            methods::INITIALIZED => {
                debug!(session = %session.id, "initialization handshake complete");
            }
            methods::CANCELLED => {
                let params = request.params.clone().unwrap_or(Value::Null);
                match serde_json::from_value::<CancelledParams>(params) {
                    Ok(cancelled) => self.fire_cancel(session, &cancelled.request_id),
                    Err(e) => debug!(session = %session.id, "bad cancelled params: {}", e),
                }
            }
            other => {
                debug!(session = %session.id, method = other, "ignoring unknown notification");
            }
        }
    }

    /// Fire the cancel token of a matching in-flight request.
    /// Cancellation after completion is a no-op.
    fn fire_cancel(&self, session: &Arc<Session>, request_id: &RequestId) {
        let token = self
            .inflight
            .lock()
            .expect("inflight lock poisoned")
            .get(&(session.id.clone(), request_id.clone()))
            .cloned();
        match token {
            Some(token) => {
                debug!(session = %session.id, id = %request_id, "cancelling in-flight request");
                token.cancel();
            }
            None => {
                debug!(session = %session.id, id = %request_id, "cancel for unknown request (no-op)");
            }
        }
    }

    fn handle_initialize(&self, session: &Arc<Session>, params: Value) -> ServerResult<Value> {
        let params: InitializeParams = decode_params(params)?;

        if params.protocol_version != MCP_PROTOCOL_VERSION {
            return Err(ServerError::with_data(
                ErrorKind::InvalidParams,
                "Unsupported protocol version",
                serde_json::json!({
                    "supported": [MCP_PROTOCOL_VERSION],
                    "requested": params.protocol_version,
                }),
            ));
        }

        session.mark_initialized(params.client_info, params.protocol_version.clone());

        let result = InitializeResult {
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities::default(),
            server_info: ServerInfo {
                name: self.server_name.clone(),
                version: self.server_version.clone(),
            },
            instructions: self.instructions.clone(),
        };
        to_result_value(result)
    }

    fn handle_tools_list(&self, session: &Arc<Session>, params: Value) -> ServerResult<Value> {
        let params: ListParams = decode_optional_params(params)?;

        let annotator = self.tool_annotator.clone();
        let session = Arc::clone(session);
        let filter = annotator.map(|f| move |tool: &Tool| f(&session, tool));

        let page = self.tools.page(
            params.cursor.as_deref(),
            self.page_size,
            filter
                .as_ref()
                .map(|f| f as &dyn Fn(&Tool) -> bool),
        )?;

        to_result_value(ToolsListResult {
            tools: page.items,
            next_cursor: page.next_cursor,
        })
    }

    async fn handle_tools_call(self: &Arc<Self>, ctx: RequestContext, params: Value) -> ServerResult<Value> {
        let params: ToolCallParams = decode_params(params)?;

        let tool = self.tools.get(&params.name).ok_or_else(|| {
            ServerError::new(
                ErrorKind::InvalidParams,
                format!("Unknown tool: {}", params.name),
            )
        })?;

        // Schema rejection happens before any worker can be spawned.
        if let Err(violations) = tool.input_schema.validate(&params.arguments) {
            return Err(ServerError::with_data(
                ErrorKind::InvalidParams,
                format!("Invalid arguments for tool {}", tool.name),
                serde_json::json!({ "violations": violations }),
            ));
        }

        // The approval gate runs before the handler; a denied category
        // means the worker is never launched.
        self.approval_gate(&ctx, &tool, &params.arguments).await?;

        if ctx.cancel.is_cancelled() {
            return Err(ServerError::new(
                ErrorKind::RequestCancelled,
                "Request cancelled",
            ));
        }

        let result = (tool.handler)(ctx, params.arguments).await?;

        // Output schemas are advisory: log mismatches, never fail the call.
        if let (Some(schema), Some(ContentItem::Json { data })) =
            (&tool.output_schema, &result.structured_content)
        {
            if let Err(violations) = schema.validate(data) {
                warn!(
                    tool = %tool.name,
                    violations = ?violations,
                    "tool output does not match its declared output schema"
                );
            }
        }

        to_result_value(result)
    }

    fn handle_resources_list(&self, params: Value) -> ServerResult<Value> {
        let params: ListParams = decode_optional_params(params)?;
        let page = self
            .resources
            .page(params.cursor.as_deref(), self.page_size)?;
        to_result_value(ResourcesListResult {
            resources: page.items,
            next_cursor: page.next_cursor,
        })
    }

    fn handle_resource_templates_list(&self) -> ServerResult<Value> {
        to_result_value(ResourceTemplatesListResult {
            resource_templates: self.resources.template_descriptors(),
        })
    }

    async fn handle_resources_read(&self, ctx: RequestContext, params: Value) -> ServerResult<Value> {
        let params: ResourceReadParams = decode_params(params)?;

        let contents = if let Some(resource) = self.resources.get(&params.uri) {
            (resource.reader)(ctx).await?
        } else if let Some((template, values)) = self.resources.match_template(&params.uri) {
            (template.reader)(ctx, values).await?
        } else {
            return Err(ServerError::new(
                ErrorKind::InvalidParams,
                format!("Unknown resource: {}", params.uri),
            ));
        };

        to_result_value(ResourceReadResult { contents })
    }

    fn handle_resources_subscribe(&self, session: &Arc<Session>, params: Value) -> ServerResult<Value> {
        let params: ResourceReadParams = decode_params(params)?;

        let known = self.resources.get(&params.uri).is_some()
            || self.resources.match_template(&params.uri).is_some();
        if !known {
            return Err(ServerError::new(
                ErrorKind::InvalidParams,
                format!("Unknown resource: {}", params.uri),
            ));
        }

        session.subscribe_resource(&params.uri);
        Ok(Value::Object(Default::default()))
    }

    fn handle_prompts_list(&self, params: Value) -> ServerResult<Value> {
        let params: ListParams = decode_optional_params(params)?;
        let page = self.prompts.page(params.cursor.as_deref(), self.page_size)?;
        to_result_value(rmcp_protocol::PromptsListResult {
            prompts: page.items,
            next_cursor: page.next_cursor,
        })
    }

    async fn handle_prompts_get(&self, ctx: RequestContext, params: Value) -> ServerResult<Value> {
        let params: PromptGetParams = decode_params(params)?;

        let prompt = self.prompts.get(&params.name).ok_or_else(|| {
            ServerError::new(
                ErrorKind::InvalidParams,
                format!("Unknown prompt: {}", params.name),
            )
        })?;

        // Missing required arguments fail before the renderer runs.
        for arg in &prompt.arguments {
            if arg.required && params.arguments.get(&arg.name).is_none() {
                return Err(ServerError::new(
                    ErrorKind::InvalidParams,
                    format!("Missing required prompt argument: {}", arg.name),
                ));
            }
        }

        let result = (prompt.renderer)(ctx, params.arguments).await?;
        to_result_value(result)
    }

    fn handle_set_level(&self, session: &Arc<Session>, params: Value) -> ServerResult<Value> {
        let params: SetLevelParams = decode_params(params)?;
        session.set_min_log_level(params.level);
        Ok(Value::Object(Default::default()))
    }

    /// Scan the script the handler would execute (plus declared code-bearing
    /// arguments) and resolve every matched category to a decision.
    async fn approval_gate(
        &self,
        ctx: &RequestContext,
        tool: &Tool,
        arguments: &Value,
    ) -> ServerResult<()> {
        let script = match &tool.script {
            Some(script) => script,
            None => return Ok(()),
        };

        let mut fragment = script.source.clone();
        for param in &script.code_params {
            if let Some(code) = arguments.get(param).and_then(|v| v.as_str()) {
                fragment.push('\n');
                fragment.push_str(code);
            }
        }

        let matched = self.categories.classify(&fragment);
        for category in matched {
            self.resolve_category(ctx, &category).await?;
        }
        Ok(())
    }

    async fn resolve_category(&self, ctx: &RequestContext, category: &str) -> ServerResult<()> {
        match ctx.session.approvals.begin_prompt(category) {
            PromptTicket::Decided(Decision::Approved) => Ok(()),
            PromptTicket::Decided(Decision::Denied) => Err(approval_denied(category)),
            PromptTicket::Decided(Decision::Unasked) => {
                // begin_prompt never returns Decided(Unasked)
                Err(ServerError::internal("approval state out of sync"))
            }
            PromptTicket::Leader => {
                let description = self
                    .categories
                    .get(category)
                    .map(|c| c.description.clone())
                    .unwrap_or_default();
                let message = format!(
                    "The requested analysis needs permission for: {} ({}). Approve for this session?",
                    category, description
                );
                let schema = serde_json::json!({
                    "type": "object",
                    "properties": {
                        "approve": {
                            "type": "boolean",
                            "description": "Allow this category for the rest of the session"
                        }
                    },
                    "required": ["approve"]
                });

                let answer = tokio::select! {
                    answer = ctx.elicit(&message, schema) => answer,
                    _ = ctx.cancel.cancelled() => {
                        ctx.session.approvals.resolve(category, None);
                        return Err(ServerError::new(
                            ErrorKind::RequestCancelled,
                            "Request cancelled",
                        ));
                    }
                };

                let outcome = answer.and_then(|a| match a.action.as_str() {
                    "accept" => a
                        .content
                        .as_ref()
                        .and_then(|c| c.get("approve"))
                        .and_then(|v| v.as_bool()),
                    "decline" => Some(false),
                    // "cancel" or anything else: no decision was made.
                    _ => None,
                });

                ctx.session.approvals.resolve(category, outcome);
                match outcome {
                    Some(true) => Ok(()),
                    Some(false) => Err(approval_denied(category)),
                    None => Err(approval_unanswered(category)),
                }
            }
            PromptTicket::Follower(mut rx) => {
                tokio::select! {
                    changed = rx.changed() => match changed {
                        Ok(()) => match *rx.borrow() {
                            Some(true) => Ok(()),
                            Some(false) => Err(approval_denied(category)),
                            None => Err(approval_unanswered(category)),
                        },
                        // Leader gave up without an answer.
                        Err(_) => Err(approval_unanswered(category)),
                    },
                    _ = ctx.cancel.cancelled() => Err(ServerError::new(
                        ErrorKind::RequestCancelled,
                        "Request cancelled",
                    )),
                }
            }
        }
    }
}

fn approval_denied(category: &str) -> ServerError {
    ServerError::with_data(
        ErrorKind::ApprovalDenied,
        format!("Approval denied for {}", category),
        serde_json::json!({ "category": category }),
    )
}

fn approval_unanswered(category: &str) -> ServerError {
    ServerError::with_data(
        ErrorKind::ApprovalDenied,
        format!("Approval for {} was not granted (no response)", category),
        serde_json::json!({ "category": category }),
    )
}

fn decode_params<T: serde::de::DeserializeOwned>(params: Value) -> ServerResult<T> {
    serde_json::from_value(params)
        .map_err(|e| ServerError::new(ErrorKind::InvalidParams, format!("Invalid params: {}", e)))
}

/// Decode list-style params where the whole object may be absent.
fn decode_optional_params<T: serde::de::DeserializeOwned + Default>(
    params: Value,
) -> ServerResult<T> {
    if params.is_null() {
        return Ok(T::default());
    }
    decode_params(params)
}

fn to_result_value<T: serde::Serialize>(value: T) -> ServerResult<Value> {
    serde_json::to_value(value).map_err(ServerError::internal)
}

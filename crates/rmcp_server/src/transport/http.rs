//! HTTP+SSE transport.
//!
//! A single JSON-RPC POST endpoint, a one-way SSE channel for notifications,
//! and a health probe:
//!
//! | Path       | Method | Purpose                     |
//! |------------|--------|-----------------------------|
//! | `/mcp`     | POST   | JSON-RPC request/response   |
//! | `/mcp/sse` | GET    | Server-Sent Events          |
//! | `/health`  | GET    | Liveness probe              |
//!
//! The first successful `initialize` POST mints a session and returns its id
//! in the `Mcp-Session-Id` response header; every later POST must carry that
//! header plus `MCP-Protocol-Version`. Oversized bodies are rejected with
//! 413 by the body-limit layer.

use crate::dispatcher::{McpServer, Payload};
use crate::session::SessionEvent;
use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{self, HeaderMap, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::StreamExt;
use rmcp_config::Config;
use rmcp_protocol::{methods, ErrorKind, JsonRpcError, JsonRpcResponse, MCP_PROTOCOL_VERSION};
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{debug, info, warn};

const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";
const MCP_PROTOCOL_VERSION_HEADER: &str = "mcp-protocol-version";

/// Shared state for the HTTP transport.
#[derive(Clone)]
pub struct HttpTransport {
    server: Arc<McpServer>,
    keepalive: Duration,
}

impl HttpTransport {
    pub fn new(server: Arc<McpServer>) -> Self {
        Self {
            server,
            keepalive: Duration::from_millis(900),
        }
    }

    /// Build the axum router with CORS and body-limit layers applied.
    pub fn router(&self, config: &Config) -> Router {
        let mut router = Router::new()
            .route("/mcp", post(handle_post))
            .route("/mcp/sse", get(handle_sse))
            .route("/health", get(handle_health))
            .layer(DefaultBodyLimit::max(config.http.max_body_bytes))
            .with_state(self.clone());

        if !config.http.allowed_origins.is_empty() {
            router = router.layer(cors_layer(&config.http.allowed_origins));
        }
        router
    }
}

/// CORS: configured origin allow-list, POST/OPTIONS, the three MCP headers.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origin = if allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(
            allowed_origins
                .iter()
                .filter_map(|o| HeaderValue::from_str(o).ok()),
        )
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::POST, Method::OPTIONS, Method::GET])
        .allow_headers([
            header::CONTENT_TYPE,
            header::HeaderName::from_static(MCP_PROTOCOL_VERSION_HEADER),
            header::HeaderName::from_static(MCP_SESSION_ID_HEADER),
        ])
        .expose_headers([header::HeaderName::from_static(MCP_SESSION_ID_HEADER)])
}

/// Bind and serve until a shutdown signal arrives.
pub async fn serve_http(server: Arc<McpServer>, config: &Config) -> Result<()> {
    let transport = HttpTransport::new(Arc::clone(&server));
    let router = transport.router(config);

    let sessions = server.session_manager();
    let sweeper = sessions.spawn_sweeper(Duration::from_secs(30));

    let addr = format!("{}:{}", config.http.host, config.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind HTTP endpoint {}", addr))?;
    info!(
        "HTTP transport listening on {}",
        listener.local_addr().context("no local addr")?
    );

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("HTTP server error")?;

    sweeper.abort();
    Ok(())
}

/// Error representation for plain-HTTP failures (not JSON-RPC errors).
#[derive(Debug)]
struct HttpError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl HttpError {
    fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code,
            message: message.into(),
        }
    }

    fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        #[derive(Serialize)]
        struct Body {
            error: &'static str,
            message: String,
        }
        (
            self.status,
            Json(Body {
                error: self.code,
                message: self.message,
            }),
        )
            .into_response()
    }
}

async fn handle_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "transport": "HTTP",
    }))
}

async fn handle_post(
    State(transport): State<HttpTransport>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, HttpError> {
    require_json_content_type(&headers)?;

    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            debug!("malformed JSON-RPC body: {}", e);
            let response = JsonRpcResponse::error(
                None,
                JsonRpcError::new(ErrorKind::ParseError, format!("Invalid JSON: {}", e)),
            );
            return Ok((StatusCode::BAD_REQUEST, Json(response)).into_response());
        }
    };

    let payload = match McpServer::classify_payload(value) {
        Ok(payload) => payload,
        Err(response) => return Ok((StatusCode::BAD_REQUEST, Json(response)).into_response()),
    };

    let server = &transport.server;
    match payload {
        Payload::Request(request) if request.method == methods::INITIALIZE => {
            // The only request allowed without a session header.
            let session = server.session_manager().create().await;
            let response = server.dispatch(&session, request).await;

            match response {
                Some(response) if response.error.is_none() => {
                    let mut http_response = Json(&response).into_response();
                    if let Ok(value) = HeaderValue::from_str(&session.id) {
                        http_response
                            .headers_mut()
                            .insert(MCP_SESSION_ID_HEADER, value);
                    }
                    Ok(http_response)
                }
                Some(response) => {
                    // Failed initialize: the session is not usable.
                    server.session_manager().remove(&session.id).await;
                    Ok(Json(response).into_response())
                }
                None => Ok(StatusCode::ACCEPTED.into_response()),
            }
        }
        Payload::Request(request) => {
            require_protocol_header(&headers)?;
            let session_id = require_session_header(&headers)?;

            let session = match server.session_manager().get(session_id).await {
                Some(session) => session,
                None => {
                    // Unknown or expired session: JSON-RPC -32001.
                    let response = JsonRpcResponse::error(
                        request.id,
                        JsonRpcError::new(ErrorKind::SessionExpired, "Session expired"),
                    );
                    return Ok(Json(response).into_response());
                }
            };

            match server.dispatch(&session, request).await {
                Some(response) => Ok(Json(response).into_response()),
                None => Ok(StatusCode::ACCEPTED.into_response()),
            }
        }
        Payload::Response { id, result } => {
            let session_id = require_session_header(&headers)?;
            let session = server
                .session_manager()
                .get(session_id)
                .await
                .ok_or_else(|| HttpError::not_found("unknown_session", "Session not found"))?;
            if !session.resolve_client_response(&id, result) {
                debug!(session = %session.id, %id, "discarded unmatched client response");
            }
            Ok(StatusCode::ACCEPTED.into_response())
        }
    }
}

async fn handle_sse(
    State(transport): State<HttpTransport>,
    headers: HeaderMap,
) -> Result<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>, HttpError> {
    let session_id = require_session_header(&headers)?;
    let session = transport
        .server
        .session_manager()
        .get(session_id)
        .await
        .ok_or_else(|| HttpError::not_found("unknown_session", "Session not found or expired"))?;

    let (tx, rx) = mpsc::channel::<Event>(32);
    let mut events = session.subscribe_events();
    let keepalive = transport.keepalive;

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(keepalive);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if tx.send(Event::default().event("keepalive").data("{}")).await.is_err() {
                        break;
                    }
                }
                event = events.recv() => match event {
                    Ok(SessionEvent::Notification(notification)) => {
                        if send_json_event(&tx, "notification", &notification).await.is_err() {
                            break;
                        }
                    }
                    Ok(SessionEvent::Request(request)) => {
                        // Server-initiated requests ride the notification
                        // channel; the client answers via POST /mcp.
                        if send_json_event(&tx, "notification", &request).await.is_err() {
                            break;
                        }
                    }
                    Ok(SessionEvent::Close) => {
                        let _ = tx.send(Event::default().event("close").data("{}")).await;
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "SSE queue overflow, oldest events dropped");
                        let payload = format!("{{\"dropped\":{}}}", skipped);
                        if tx
                            .send(Event::default().event("overflow").data(payload))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    });

    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(stream))
}

async fn send_json_event<T: Serialize>(
    tx: &mpsc::Sender<Event>,
    name: &str,
    payload: &T,
) -> Result<(), ()> {
    let data = serde_json::to_string(payload).map_err(|_| ())?;
    tx.send(Event::default().event(name).data(data))
        .await
        .map_err(|_| ())
}

fn require_json_content_type(headers: &HeaderMap) -> Result<(), HttpError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            HttpError::bad_request("missing_content_type", "Content-Type header is required")
        })?;
    if !content_type.starts_with("application/json") {
        return Err(HttpError::bad_request(
            "invalid_content_type",
            "Content-Type must be application/json",
        ));
    }
    Ok(())
}

fn require_session_header<'a>(headers: &'a HeaderMap) -> Result<&'a str, HttpError> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .ok_or_else(|| HttpError::bad_request("missing_session", "Mcp-Session-Id header is required"))?
        .to_str()
        .map_err(|_| {
            HttpError::bad_request("invalid_session", "Mcp-Session-Id header must be valid UTF-8")
        })
}

fn require_protocol_header(headers: &HeaderMap) -> Result<(), HttpError> {
    let value = headers
        .get(MCP_PROTOCOL_VERSION_HEADER)
        .ok_or_else(|| {
            HttpError::bad_request(
                "missing_protocol_version",
                "MCP-Protocol-Version header is required",
            )
        })?
        .to_str()
        .map_err(|_| {
            HttpError::bad_request(
                "invalid_protocol_version",
                "MCP-Protocol-Version header must be valid UTF-8",
            )
        })?;

    if value != MCP_PROTOCOL_VERSION {
        return Err(HttpError::bad_request(
            "unsupported_protocol_version",
            format!(
                "Unsupported MCP protocol version '{}'. This server supports {}",
                value, MCP_PROTOCOL_VERSION
            ),
        ));
    }
    Ok(())
}

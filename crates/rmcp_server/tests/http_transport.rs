//! HTTP+SSE transport tests, driving the axum router in-process.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use rmcp_config::Config;
use rmcp_protocol::{ContentItem, ToolCallResult};
use rmcp_schema::CompiledSchema;
use rmcp_server::{
    HttpTransport, McpServer, PromptRegistry, RequestContext, ResourceRegistry, Tool, ToolRegistry,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn router(mutate: impl FnOnce(&mut Config)) -> (axum::Router, Arc<McpServer>) {
    let mut config = Config::default();
    config.http.allowed_origins = vec!["http://localhost:3000".to_string()];
    mutate(&mut config);

    let mut tools = ToolRegistry::new();
    tools
        .register(Tool {
            name: "descriptive_stats".to_string(),
            title: None,
            description: "test".to_string(),
            input_schema: CompiledSchema::compile(&json!({ "type": "object" })).unwrap(),
            output_schema: None,
            script: None,
            handler: Arc::new(|_ctx: RequestContext, _args: Value| {
                Box::pin(async move { Ok(ToolCallResult::ok(vec![ContentItem::text("ok")])) })
            }),
        })
        .unwrap();

    let server = Arc::new(
        McpServer::new(&config, tools, ResourceRegistry::new(), PromptRegistry::new()).unwrap(),
    );
    let router = HttpTransport::new(Arc::clone(&server)).router(&config);
    (router, server)
}

fn initialize_body() -> String {
    json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
        "params": {
            "protocolVersion": "2025-06-18",
            "capabilities": {},
            "clientInfo": { "name": "t", "version": "0" }
        }
    })
    .to_string()
}

fn post(body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

/// Full S3 session lifecycle over the POST endpoint.
#[tokio::test]
async fn test_http_session_lifecycle() {
    let (router, _server) = router(|_| {});

    // initialize without a session header mints one.
    let response = router.clone().oneshot(post(initialize_body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let session_id = response
        .headers()
        .get("mcp-session-id")
        .expect("initialize response carries Mcp-Session-Id")
        .to_str()
        .unwrap()
        .to_string();
    assert!(session_id.len() >= 20 && session_id.len() <= 64);

    // tools/list with the session header succeeds.
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .header("mcp-protocol-version", "2025-06-18")
        .header("mcp-session-id", &session_id)
        .body(Body::from(
            json!({ "jsonrpc": "2.0", "id": 2, "method": "tools/list" }).to_string(),
        ))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["result"]["tools"][0]["name"], "descriptive_stats");

    // Unknown session id: JSON-RPC -32001.
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .header("mcp-protocol-version", "2025-06-18")
        .header("mcp-session-id", "UNKNOWN")
        .body(Body::from(
            json!({ "jsonrpc": "2.0", "id": 3, "method": "tools/list" }).to_string(),
        ))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32001);

    // Missing protocol header: HTTP 400.
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header(header::CONTENT_TYPE, "application/json")
        .header("mcp-session-id", &session_id)
        .body(Body::from(
            json!({ "jsonrpc": "2.0", "id": 4, "method": "tools/list" }).to_string(),
        ))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_probe() {
    let (router, _server) = router(|_| {});
    let request = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body, json!({ "status": "healthy", "transport": "HTTP" }));
}

#[tokio::test]
async fn test_batch_request_rejected() {
    let (router, _server) = router(|_| {});
    let body = json!([{ "jsonrpc": "2.0", "id": 1, "method": "ping" }]).to_string();
    let response = router.oneshot(post(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32600);
}

#[tokio::test]
async fn test_malformed_json_rejected() {
    let (router, _server) = router(|_| {});
    let response = router.oneshot(post("{broken".to_string())).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], -32700);
}

#[tokio::test]
async fn test_missing_content_type_rejected() {
    let (router, _server) = router(|_| {});
    let request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .body(Body::from(initialize_body()))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_oversize_body_rejected_with_413() {
    let (router, _server) = router(|c| c.http.max_body_bytes = 256);
    let huge = "x".repeat(1024);
    let body = json!({
        "jsonrpc": "2.0", "id": 1, "method": "initialize",
        "params": { "protocolVersion": "2025-06-18", "capabilities": {}, "clientInfo": { "name": huge, "version": "0" } }
    })
    .to_string();
    let response = router.oneshot(post(body)).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_cors_preflight_answers_allowed_origin() {
    let (router, _server) = router(|_| {});
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/mcp")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(
            header::ACCESS_CONTROL_REQUEST_HEADERS,
            "content-type,mcp-protocol-version,mcp-session-id",
        )
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "http://localhost:3000"
    );
}

#[tokio::test]
async fn test_sse_requires_known_session() {
    let (router, _server) = router(|_| {});

    let request = Request::builder()
        .method("GET")
        .uri("/mcp/sse")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method("GET")
        .uri("/mcp/sse")
        .header("mcp-session-id", "UNKNOWN")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_sse_streams_keepalive_and_notifications() {
    let (router, server) = router(|_| {});

    // Mint a session via initialize.
    let response = router.clone().oneshot(post(initialize_body())).await.unwrap();
    let session_id = response
        .headers()
        .get("mcp-session-id")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();

    let request = Request::builder()
        .method("GET")
        .uri("/mcp/sse")
        .header("mcp-session-id", &session_id)
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    // Push a notification and read frames until it shows up. The keepalive
    // tick arrives first (interval fires immediately).
    let session = server.session_manager().get(&session_id).await.unwrap();
    session.push_notification(rmcp_protocol::JsonRpcNotification::new(
        "notifications/message",
        json!({ "level": "info", "data": "hello" }),
    ));

    let mut body = response.into_body();
    let mut collected = String::new();
    for _ in 0..10 {
        let frame = tokio::time::timeout(std::time::Duration::from_secs(2), body.frame())
            .await
            .expect("SSE frame within keepalive window")
            .expect("stream open")
            .unwrap();
        if let Some(data) = frame.data_ref() {
            collected.push_str(&String::from_utf8_lossy(data));
        }
        if collected.contains("event: notification") {
            break;
        }
    }

    assert!(collected.contains("event: keepalive"));
    assert!(collected.contains("event: notification"));
    assert!(collected.contains("notifications/message"));
}

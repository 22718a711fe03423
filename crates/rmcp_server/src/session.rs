//! Session lifecycle and the per-session notification channel.
//!
//! A session lives from `initialize` until transport close or idle timeout.
//! A single stdio transport carries exactly one session; the HTTP transport
//! keeps a map from session id to session. Sessions are process-local and
//! never persisted.
//!
//! # State machine
//!
//! ```text
//!         initialize
//!   CREATED ─────────▶ READY ──────────▶ CLOSED
//!      │                │                    ▲
//!      │                │  transport close   │
//!      └──── error ─────┴───── idle timeout ─┘
//! ```
//!
//! Requests other than `initialize`/`ping` in CREATED fail with -32002.
//! After CLOSED every request for that session id is rejected with -32001.

use rmcp_approval::{AutoApprovePolicy, SessionApprovals};
use rmcp_protocol::{
    ClientInfo, ErrorKind, JsonRpcNotification, JsonRpcRequest, LogLevel, RequestId, ServerError,
    ServerResult,
};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, oneshot, RwLock};
use tracing::{debug, info};

/// Session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Ready,
    Closed,
}

/// Out-of-band traffic pushed to the transport.
///
/// The channel is bounded; slow consumers lose the oldest events and the
/// transport surfaces an overflow marker (SSE `overflow` event).
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Server-emitted notification (progress, message, resources/updated)
    Notification(JsonRpcNotification),

    /// Server-initiated request (elicitation); the client answers with a
    /// JSON-RPC response carrying the same id
    Request(JsonRpcRequest),

    /// The session is terminating
    Close,
}

/// One client conversation.
#[derive(Debug)]
pub struct Session {
    /// Opaque server-minted id (url-safe, 32 chars)
    pub id: String,

    /// Creation timestamp
    pub created_at: chrono::DateTime<chrono::Utc>,

    /// Approval decisions scoped to this session
    pub approvals: SessionApprovals,

    state: Mutex<SessionState>,
    last_seen: Mutex<Instant>,
    client_info: Mutex<Option<ClientInfo>>,
    negotiated_protocol: Mutex<Option<String>>,
    min_log_level: Mutex<LogLevel>,
    subscriptions: Mutex<HashSet<String>>,

    events_tx: broadcast::Sender<SessionEvent>,

    /// Pending server->client requests awaiting a response
    pending: Mutex<HashMap<RequestId, oneshot::Sender<Value>>>,
    next_server_request: AtomicI64,
}

impl Session {
    fn new(id: String, queue_len: usize, approvals: SessionApprovals) -> Self {
        let (events_tx, _rx) = broadcast::channel(queue_len.max(1));
        Self {
            id,
            created_at: chrono::Utc::now(),
            approvals,
            state: Mutex::new(SessionState::Created),
            last_seen: Mutex::new(Instant::now()),
            client_info: Mutex::new(None),
            negotiated_protocol: Mutex::new(None),
            min_log_level: Mutex::new(LogLevel::Info),
            subscriptions: Mutex::new(HashSet::new()),
            events_tx,
            pending: Mutex::new(HashMap::new()),
            next_server_request: AtomicI64::new(1),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("session state lock poisoned")
    }

    /// Gate a method against the lifecycle state.
    pub fn ensure_can_handle(&self, method: &str) -> ServerResult<()> {
        use rmcp_protocol::methods;

        match self.state() {
            SessionState::Ready => Ok(()),
            SessionState::Created => match method {
                methods::INITIALIZE | methods::PING | methods::INITIALIZED => Ok(()),
                _ => Err(ServerError::new(
                    ErrorKind::SessionNotInitialized,
                    "Session not initialized",
                )),
            },
            SessionState::Closed => Err(ServerError::new(
                ErrorKind::SessionExpired,
                "Session expired",
            )),
        }
    }

    /// Record a successful initialize.
    pub fn mark_initialized(&self, client: ClientInfo, protocol: String) {
        info!(
            session = %self.id,
            client = %client.name,
            version = %client.version,
            protocol = %protocol,
            "session initialized"
        );
        *self.client_info.lock().expect("client info lock poisoned") = Some(client);
        *self
            .negotiated_protocol
            .lock()
            .expect("protocol lock poisoned") = Some(protocol);
        *self.state.lock().expect("session state lock poisoned") = SessionState::Ready;
    }

    /// Transition to CLOSED and tell the transport.
    pub fn close(&self) {
        let mut state = self.state.lock().expect("session state lock poisoned");
        if *state == SessionState::Closed {
            return;
        }
        *state = SessionState::Closed;
        drop(state);
        let _ = self.events_tx.send(SessionEvent::Close);
    }

    pub fn touch(&self) {
        *self.last_seen.lock().expect("last seen lock poisoned") = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .expect("last seen lock poisoned")
            .elapsed()
    }

    pub fn client_info(&self) -> Option<ClientInfo> {
        self.client_info
            .lock()
            .expect("client info lock poisoned")
            .clone()
    }

    pub fn negotiated_protocol(&self) -> Option<String> {
        self.negotiated_protocol
            .lock()
            .expect("protocol lock poisoned")
            .clone()
    }

    /// Per-session minimum level for notifications/message emission.
    pub fn min_log_level(&self) -> LogLevel {
        *self.min_log_level.lock().expect("log level lock poisoned")
    }

    pub fn set_min_log_level(&self, level: LogLevel) {
        *self.min_log_level.lock().expect("log level lock poisoned") = level;
    }

    /// Record a resources/subscribe call.
    pub fn subscribe_resource(&self, uri: &str) {
        self.subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .insert(uri.to_string());
    }

    pub fn is_subscribed(&self, uri: &str) -> bool {
        self.subscriptions
            .lock()
            .expect("subscriptions lock poisoned")
            .contains(uri)
    }

    /// Subscribe to the out-of-band event channel (SSE / stdio forwarder).
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Push a notification to the transport. Dropped when nothing listens
    /// (stdio surfaces notifications through the log stream instead).
    pub fn push_notification(&self, notification: JsonRpcNotification) {
        let _ = self
            .events_tx
            .send(SessionEvent::Notification(notification));
    }

    /// Issue a server->client request and wait for the client's response.
    ///
    /// Returns `None` when the deadline passes, no transport listens, or
    /// the session closes first.
    pub async fn client_request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Option<Value> {
        let id = RequestId::String(format!(
            "srv-{}-{}",
            self.id,
            self.next_server_request.fetch_add(1, Ordering::Relaxed)
        ));

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending requests lock poisoned")
            .insert(id.clone(), tx);

        let request = JsonRpcRequest {
            jsonrpc: rmcp_protocol::JSONRPC_VERSION.to_string(),
            id: Some(id.clone()),
            method: method.to_string(),
            params: Some(params),
        };

        if self.events_tx.send(SessionEvent::Request(request)).is_err() {
            debug!(session = %self.id, "no transport subscriber for server request");
            self.pending
                .lock()
                .expect("pending requests lock poisoned")
                .remove(&id);
            return None;
        }

        let answer = tokio::time::timeout(timeout, rx).await;
        self.pending
            .lock()
            .expect("pending requests lock poisoned")
            .remove(&id);

        match answer {
            Ok(Ok(value)) => Some(value),
            _ => None,
        }
    }

    /// Route a client-sent response to the matching pending request.
    ///
    /// Returns false when no request with that id is waiting (e.g. it
    /// already timed out); the response is then discarded.
    pub fn resolve_client_response(&self, id: &RequestId, result: Value) -> bool {
        let tx = self
            .pending
            .lock()
            .expect("pending requests lock poisoned")
            .remove(id);
        match tx {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }
}

/// Settings consumed at session creation.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub idle_timeout: Duration,
    pub event_queue_len: usize,
    pub auto_approve: AutoApprovePolicy,
    pub category_ids: Vec<String>,
}

/// Owns every live session.
///
/// Readers take the shared lock; creation/removal takes the exclusive one.
pub struct SessionManager {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    settings: SessionSettings,
}

impl SessionManager {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            settings,
        }
    }

    /// Mint a session in CREATED state.
    pub async fn create(&self) -> Arc<Session> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let approvals = SessionApprovals::new(
            &self.settings.auto_approve,
            self.settings.category_ids.iter().map(|s| s.as_str()),
        );
        let session = Arc::new(Session::new(
            id.clone(),
            self.settings.event_queue_len,
            approvals,
        ));
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::clone(&session));
        debug!(session = %id, "session created");
        session
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Look up a session or fail with -32001.
    pub async fn require(&self, id: &str) -> ServerResult<Arc<Session>> {
        self.get(id)
            .await
            .ok_or_else(|| ServerError::new(ErrorKind::SessionExpired, "Session expired"))
    }

    /// Close and remove a session.
    pub async fn remove(&self, id: &str) {
        if let Some(session) = self.sessions.write().await.remove(id) {
            session.close();
            debug!(session = %id, "session removed");
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Close and drop sessions idle past the configured timeout.
    pub async fn sweep_idle(&self) -> usize {
        let idle_timeout = self.settings.idle_timeout;
        let expired: Vec<String> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, s)| s.idle_for() > idle_timeout)
                .map(|(id, _)| id.clone())
                .collect()
        };

        for id in &expired {
            info!(session = %id, "session expired after idle timeout");
            self.remove(id).await;
        }
        expired.len()
    }

    /// Background task sweeping idle sessions.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                manager.sweep_idle().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SessionSettings {
        SessionSettings {
            idle_timeout: Duration::from_secs(3600),
            event_queue_len: 16,
            auto_approve: AutoApprovePolicy::default(),
            category_ids: vec!["file_operations".to_string()],
        }
    }

    #[tokio::test]
    async fn test_created_state_gates_methods() {
        let manager = SessionManager::new(settings());
        let session = manager.create().await;

        assert!(session.ensure_can_handle("initialize").is_ok());
        assert!(session.ensure_can_handle("ping").is_ok());
        let err = session.ensure_can_handle("tools/list").unwrap_err();
        assert_eq!(err.kind.code(), -32002);

        session.mark_initialized(
            ClientInfo {
                name: "t".to_string(),
                version: "0".to_string(),
            },
            "2025-06-18".to_string(),
        );
        assert!(session.ensure_can_handle("tools/list").is_ok());
    }

    #[tokio::test]
    async fn test_closed_session_rejects_everything() {
        let manager = SessionManager::new(settings());
        let session = manager.create().await;
        session.close();

        let err = session.ensure_can_handle("ping").unwrap_err();
        assert_eq!(err.kind.code(), -32001);
    }

    #[tokio::test]
    async fn test_unknown_session_is_expired() {
        let manager = SessionManager::new(settings());
        let err = manager.require("nope").await.unwrap_err();
        assert_eq!(err.kind.code(), -32001);
    }

    #[tokio::test]
    async fn test_idle_sweep_closes_sessions() {
        let mut s = settings();
        s.idle_timeout = Duration::from_millis(10);
        let manager = SessionManager::new(s);
        let session = manager.create().await;

        tokio::time::sleep(Duration::from_millis(30)).await;
        let swept = manager.sweep_idle().await;

        assert_eq!(swept, 1);
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(manager.len().await, 0);
    }

    #[tokio::test]
    async fn test_client_request_roundtrip() {
        let manager = SessionManager::new(settings());
        let session = manager.create().await;
        let mut events = session.subscribe_events();

        let responder = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                if let Ok(SessionEvent::Request(req)) = events.recv().await {
                    session.resolve_client_response(
                        req.id.as_ref().unwrap(),
                        serde_json::json!({ "action": "accept", "content": { "approve": true } }),
                    );
                }
            })
        };

        let answer = session
            .client_request(
                "elicitation/create",
                serde_json::json!({ "message": "ok?" }),
                Duration::from_secs(1),
            )
            .await
            .unwrap();

        assert_eq!(answer["action"], "accept");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_client_request_without_transport_returns_none() {
        let manager = SessionManager::new(settings());
        let session = manager.create().await;

        let answer = session
            .client_request("elicitation/create", serde_json::json!({}), Duration::from_millis(50))
            .await;
        assert!(answer.is_none());
    }

    #[test]
    fn test_session_id_is_url_safe_and_bounded() {
        let id = uuid::Uuid::new_v4().simple().to_string();
        assert!(id.len() >= 20 && id.len() <= 64);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }
}

//! Per-request context handed to handlers.
//!
//! A context borrows the registry (via the dispatcher), holds its session,
//! and owns the request-scoped plumbing: cancel token, progress sink, and
//! the back-channel for server->client requests. Contexts live for exactly
//! one request.

use crate::session::Session;
use rmcp_protocol::{
    methods, ElicitResult, JsonRpcNotification, LogLevel, LoggingMessageParams, ProgressParams,
    RequestId, ResourceUpdatedParams,
};
use rmcp_worker::CancelToken;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Progress sink bound to one request token.
///
/// Emissions are coalesced: at most one notification per `min_interval`
/// (the first report always goes out).
pub struct ProgressSink {
    session: Arc<Session>,
    token: Option<Value>,
    min_interval: Duration,
    last_emit: Mutex<Option<Instant>>,
}

impl ProgressSink {
    fn new(session: Arc<Session>, token: Option<Value>, min_interval: Duration) -> Self {
        Self {
            session,
            token,
            min_interval,
            last_emit: Mutex::new(None),
        }
    }

    /// Report progress; coalesced and emitted as `notifications/progress`.
    pub fn report(&self, progress: f64, total: Option<f64>, message: Option<&str>) {
        let token = match &self.token {
            Some(token) => token.clone(),
            // Progress without a request id has nothing to correlate to.
            None => return,
        };

        {
            let mut last = self.last_emit.lock().expect("progress lock poisoned");
            if let Some(at) = *last {
                if at.elapsed() < self.min_interval {
                    return;
                }
            }
            *last = Some(Instant::now());
        }

        let params = ProgressParams {
            progress_token: token,
            progress,
            total,
            message: message.map(|s| s.to_string()),
        };
        if let Ok(params) = serde_json::to_value(&params) {
            self.session
                .push_notification(JsonRpcNotification::new(methods::PROGRESS, params));
        }
    }
}

/// Context carried through one request.
#[derive(Clone)]
pub struct RequestContext {
    /// The owning session
    pub session: Arc<Session>,

    /// Request id; `None` for notifications
    pub request_id: Option<RequestId>,

    /// Fired by notifications/cancelled or transport teardown
    pub cancel: CancelToken,

    progress: Arc<ProgressSink>,
    elicit_timeout: Duration,
}

impl RequestContext {
    pub fn new(
        session: Arc<Session>,
        request_id: Option<RequestId>,
        cancel: CancelToken,
        progress_interval: Duration,
        elicit_timeout: Duration,
    ) -> Self {
        let token = request_id.as_ref().map(|id| match id {
            RequestId::Number(n) => Value::from(*n),
            RequestId::String(s) => Value::from(s.clone()),
        });
        let progress = Arc::new(ProgressSink::new(
            Arc::clone(&session),
            token,
            progress_interval,
        ));
        Self {
            session,
            request_id,
            cancel,
            progress,
            elicit_timeout,
        }
    }

    /// The progress sink for this request.
    pub fn progress(&self) -> &ProgressSink {
        &self.progress
    }

    /// Emit a `notifications/message` record if it clears the session's
    /// minimum level.
    pub fn log(&self, level: LogLevel, logger: &str, data: Value) {
        if level < self.session.min_log_level() {
            return;
        }
        let params = LoggingMessageParams {
            level,
            logger: Some(logger.to_string()),
            data,
        };
        if let Ok(params) = serde_json::to_value(&params) {
            self.session
                .push_notification(JsonRpcNotification::new(methods::MESSAGE, params));
        }
    }

    /// Tell subscribers that a resource changed.
    pub fn resource_updated(&self, uri: &str) {
        if !self.session.is_subscribed(uri) {
            return;
        }
        let params = ResourceUpdatedParams {
            uri: uri.to_string(),
        };
        if let Ok(params) = serde_json::to_value(&params) {
            self.session.push_notification(JsonRpcNotification::new(
                methods::RESOURCES_UPDATED,
                params,
            ));
        }
    }

    /// Ask the client a question via `elicitation/create`.
    ///
    /// Returns `None` on timeout, missing transport, or an undecodable
    /// answer. Callers treat `None` as "not answered".
    pub async fn elicit(&self, message: &str, requested_schema: Value) -> Option<ElicitResult> {
        let params = serde_json::json!({
            "message": message,
            "requestedSchema": requested_schema,
        });
        let raw = self
            .session
            .client_request(methods::ELICITATION_CREATE, params, self.elicit_timeout)
            .await?;
        match serde_json::from_value::<ElicitResult>(raw) {
            Ok(result) => Some(result),
            Err(e) => {
                debug!(session = %self.session.id, "undecodable elicitation answer: {}", e);
                None
            }
        }
    }
}

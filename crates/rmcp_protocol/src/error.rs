//! Error taxonomy and the central JSON-RPC code translator.
//!
//! Every failure that crosses a module boundary is a `ServerError` carrying
//! an `ErrorKind`. The translator maps kinds to the client-facing JSON-RPC
//! codes; unexpected internals are scrubbed to a generic message with a
//! `trace_id` for log correlation.

use crate::JsonRpcError;
use serde_json::Value;
use thiserror::Error;

/// Classified error kinds, each with a fixed JSON-RPC code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid JSON (-32700)
    ParseError,
    /// Invalid request envelope (-32600)
    InvalidRequest,
    /// Unknown method (-32601)
    MethodNotFound,
    /// Invalid method parameters (-32602)
    InvalidParams,
    /// Internal error (-32603)
    Internal,
    /// Session exists but `initialize` has not completed (-32002)
    SessionNotInitialized,
    /// Session id unknown or past its idle timeout (-32001)
    SessionExpired,
    /// Request cancelled by the client (-32800)
    RequestCancelled,
    /// Worker exited non-zero (-32010)
    WorkerExecution,
    /// Worker wrote an unparseable result document (-32011)
    WorkerProtocol,
    /// Worker exceeded its execution or queue deadline (-32012)
    WorkerTimeout,
    /// A matched approval category is denied for this session (-32020)
    ApprovalDenied,
    /// Path rejected by the virtual filesystem policy (-32030)
    VfsAccessDenied,
}

impl ErrorKind {
    /// JSON-RPC error code for this kind.
    pub fn code(self) -> i32 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::Internal => -32603,
            Self::SessionNotInitialized => -32002,
            Self::SessionExpired => -32001,
            Self::RequestCancelled => -32800,
            Self::WorkerExecution => -32010,
            Self::WorkerProtocol => -32011,
            Self::WorkerTimeout => -32012,
            Self::ApprovalDenied => -32020,
            Self::VfsAccessDenied => -32030,
        }
    }
}

/// Error type returned by handlers and mapped to JSON-RPC by transports.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ServerError {
    /// Classified kind (drives the wire code)
    pub kind: ErrorKind,
    /// Client-facing message
    pub message: String,
    /// Structured detail attached as `error.data`
    pub data: Option<Value>,
}

/// Result alias used at handler boundaries.
pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    /// Create an error with the given kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
        }
    }

    /// Create an error carrying structured `data`.
    pub fn with_data(kind: ErrorKind, message: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            message: message.into(),
            data: Some(data),
        }
    }

    /// Scrub an unexpected internal error.
    ///
    /// The original message goes to the server log keyed by a fresh
    /// `trace_id`; the client sees only the generic message plus the id.
    pub fn internal(err: impl std::fmt::Display) -> Self {
        let trace_id = uuid::Uuid::new_v4().to_string();
        tracing::error!(trace_id = %trace_id, "internal error: {}", err);
        Self {
            kind: ErrorKind::Internal,
            message: "Internal server error".to_string(),
            data: Some(serde_json::json!({ "trace_id": trace_id })),
        }
    }

    /// Unknown method helper.
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            ErrorKind::MethodNotFound,
            format!("Unknown method: {}", method),
        )
    }

    /// Convert into the wire error object.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        JsonRpcError {
            code: self.kind.code(),
            message: self.message.clone(),
            data: self.data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorKind::ParseError.code(), -32700);
        assert_eq!(ErrorKind::InvalidRequest.code(), -32600);
        assert_eq!(ErrorKind::MethodNotFound.code(), -32601);
        assert_eq!(ErrorKind::InvalidParams.code(), -32602);
        assert_eq!(ErrorKind::Internal.code(), -32603);
        assert_eq!(ErrorKind::SessionNotInitialized.code(), -32002);
        assert_eq!(ErrorKind::SessionExpired.code(), -32001);
        assert_eq!(ErrorKind::RequestCancelled.code(), -32800);
        assert_eq!(ErrorKind::WorkerExecution.code(), -32010);
        assert_eq!(ErrorKind::WorkerProtocol.code(), -32011);
        assert_eq!(ErrorKind::WorkerTimeout.code(), -32012);
        assert_eq!(ErrorKind::ApprovalDenied.code(), -32020);
        assert_eq!(ErrorKind::VfsAccessDenied.code(), -32030);
    }

    #[test]
    fn test_internal_is_scrubbed() {
        let err = ServerError::internal("sqlite handle poisoned at line 42");
        assert_eq!(err.kind, ErrorKind::Internal);
        assert_eq!(err.message, "Internal server error");
        let data = err.data.unwrap();
        assert!(data.get("trace_id").and_then(|v| v.as_str()).is_some());
    }

    #[test]
    fn test_to_rpc_error_keeps_data() {
        let err = ServerError::with_data(
            ErrorKind::ApprovalDenied,
            "Approval denied",
            serde_json::json!({ "category": "file_operations" }),
        );
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, -32020);
        assert_eq!(rpc.data.unwrap()["category"], "file_operations");
    }
}

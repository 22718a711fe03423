//! Worker Bridge
//!
//! Runs one statistical script per invocation in an isolated subprocess,
//! speaking JSON over temporary files. The contract: send a named script a
//! JSON argument document; receive a JSON result document or a structured
//! failure; never leak temporary files; never block forever.
//!
//! # Protocol (worker-side ABI, versioned via `_env.abi`)
//!
//! ```text
//! <tempdir 0700>/
//! ├── args.json     handler arguments + injected `_env` block
//! └── result.json   written by the worker; returned verbatim
//! ```
//!
//! The worker runtime is spawned as
//! `{program} {args...} {script_path} {args_path} {result_path}`.
//!
//! # Timeouts
//!
//! - Queue wait: requests over the concurrency cap wait for a slot up to
//!   `queue_timeout`
//! - Execution: a hard per-call deadline; on expiry the process gets a soft
//!   terminate, then a kill after `grace_period`
//! - Cancellation is handled identically to a deadline, with its own error

mod bridge;
mod cancel;
mod ring;

pub use bridge::{WorkerBridge, WorkerConfig, WorkerEnv, WorkerOutput};
pub use cancel::CancelToken;

use rmcp_protocol::{ErrorKind, ServerError};
use thiserror::Error;

/// Errors returned by bridge operations.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("no worker slot became free within {waited_ms} ms")]
    QueueTimeout { waited_ms: u64 },

    #[error("worker exceeded the execution deadline ({elapsed_ms} ms)")]
    Timeout { elapsed_ms: u64, stderr_tail: String },

    #[error("worker cancelled")]
    Cancelled,

    #[error("worker exited with status {code:?}")]
    ExecutionFailed {
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("worker wrote an invalid result document: {message}")]
    ProtocolError { message: String, stderr_tail: String },

    #[error("unknown script: {script_id}")]
    UnknownScript { script_id: String },

    #[error("failed to spawn worker runtime {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    /// Map onto the client-facing error taxonomy.
    pub fn to_server_error(&self) -> ServerError {
        match self {
            Self::QueueTimeout { .. } | Self::Timeout { .. } => ServerError::with_data(
                ErrorKind::WorkerTimeout,
                self.to_string(),
                serde_json::json!({ "stderr_tail": self.stderr_tail() }),
            ),
            Self::Cancelled => ServerError::new(ErrorKind::RequestCancelled, "Request cancelled"),
            Self::ExecutionFailed { code, .. } => ServerError::with_data(
                ErrorKind::WorkerExecution,
                self.to_string(),
                serde_json::json!({
                    "exit_code": code,
                    "stderr_tail": self.stderr_tail(),
                }),
            ),
            Self::ProtocolError { .. } => ServerError::with_data(
                ErrorKind::WorkerProtocol,
                self.to_string(),
                serde_json::json!({ "stderr_tail": self.stderr_tail() }),
            ),
            Self::UnknownScript { script_id } => ServerError::new(
                ErrorKind::Internal,
                format!("script not found in catalog: {}", script_id),
            ),
            Self::Spawn { .. } | Self::Io(_) => ServerError::internal(self),
        }
    }

    fn stderr_tail(&self) -> &str {
        match self {
            Self::Timeout { stderr_tail, .. }
            | Self::ExecutionFailed { stderr_tail, .. }
            | Self::ProtocolError { stderr_tail, .. } => stderr_tail,
            _ => "",
        }
    }
}

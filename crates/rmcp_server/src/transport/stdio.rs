//! Line-delimited stdio transport.
//!
//! One session per process. Reads UTF-8 lines from stdin (one JSON-RPC
//! message per non-empty line), writes responses as single lines on stdout.
//! Structured logs go to stderr only; stdout carries nothing but protocol
//! frames. Requests are processed by a small bounded pool, so replies may
//! interleave across request ids.
//!
//! Server-initiated requests (elicitation) are written to stdout like any
//! other frame; notifications surface as structured stderr log records.

use crate::dispatcher::McpServer;
use crate::session::SessionEvent;
use anyhow::{Context, Result};
use rmcp_config::Config;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// The stdio transport.
pub struct StdioTransport {
    server: Arc<McpServer>,
    concurrency: usize,
    drain_timeout: Duration,
}

impl StdioTransport {
    pub fn new(server: Arc<McpServer>, config: &Config) -> Self {
        Self {
            server,
            concurrency: config.limits.stdio_concurrency,
            drain_timeout: Duration::from_secs(config.limits.drain_timeout_secs),
        }
    }

    /// Run until stdin EOF or a shutdown signal, then drain in-flight
    /// requests up to the configured timeout.
    pub async fn run(self) -> Result<()> {
        let session = self.server.session_manager().create().await;
        info!(session = %session.id, "stdio transport started");

        // Single writer task owns stdout; everything else sends lines to it.
        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        let writer = tokio::spawn(async move {
            let mut stdout = tokio::io::stdout();
            while let Some(line) = out_rx.recv().await {
                if stdout.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if stdout.write_all(b"\n").await.is_err() {
                    break;
                }
                if stdout.flush().await.is_err() {
                    break;
                }
            }
        });

        // Forward session events: server->client requests go to stdout,
        // notifications become structured stderr records.
        let forwarder = {
            let mut events = session.subscribe_events();
            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                loop {
                    match events.recv().await {
                        Ok(SessionEvent::Request(request)) => {
                            match serde_json::to_string(&request) {
                                Ok(line) => {
                                    if out_tx.send(line).await.is_err() {
                                        break;
                                    }
                                }
                                Err(e) => warn!("failed to encode server request: {}", e),
                            }
                        }
                        Ok(SessionEvent::Notification(notification)) => {
                            match serde_json::to_string(&notification) {
                                Ok(payload) => {
                                    info!(target: "rmcp::notification", %payload, "notification")
                                }
                                Err(e) => warn!("failed to encode notification: {}", e),
                            }
                        }
                        Ok(SessionEvent::Close) => break,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "stdio event forwarder lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            })
        };

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<()> = JoinSet::new();
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let line = line.context("Failed to read from stdin")?;
                    let line = match line {
                        Some(line) => line,
                        None => {
                            info!("stdin closed, shutting down");
                            break;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }

                    match McpServer::parse_payload(&line) {
                        Err(response) => {
                            match serde_json::to_string(&response) {
                                Ok(encoded) => {
                                    let _ = out_tx.send(encoded).await;
                                }
                                Err(e) => warn!("failed to encode response: {}", e),
                            }
                        }
                        Ok(crate::dispatcher::Payload::Response { id, result }) => {
                            if !session.resolve_client_response(&id, result) {
                                debug!(%id, "discarded unmatched client response");
                            }
                        }
                        // Notifications (cancellation in particular) must not
                        // queue behind a saturated request pool.
                        Ok(crate::dispatcher::Payload::Request(request))
                            if request.is_notification() =>
                        {
                            let _ = self.server.dispatch(&session, request).await;
                        }
                        Ok(crate::dispatcher::Payload::Request(request)) => {
                            let permit = Arc::clone(&semaphore)
                                .acquire_owned()
                                .await
                                .expect("request semaphore closed");
                            let server = Arc::clone(&self.server);
                            let session = Arc::clone(&session);
                            let out_tx = out_tx.clone();

                            tasks.spawn(async move {
                                let _permit = permit;
                                if let Some(response) = server.dispatch(&session, request).await {
                                    match serde_json::to_string(&response) {
                                        Ok(encoded) => {
                                            let _ = out_tx.send(encoded).await;
                                        }
                                        Err(e) => warn!("failed to encode response: {}", e),
                                    }
                                }
                            });
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        // Stop accepting, wait for in-flight work, then close the session.
        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.drain_timeout, drain).await.is_err() {
            warn!(
                "in-flight requests did not finish within {:?}, aborting",
                self.drain_timeout
            );
            tasks.shutdown().await;
        }

        self.server.session_manager().remove(&session.id).await;
        drop(out_tx);
        let _ = forwarder.await;
        let _ = writer.await;

        debug!("stdio transport stopped");
        Ok(())
    }
}

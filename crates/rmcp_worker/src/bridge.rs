//! Subprocess lifecycle and the temp-file protocol.

use crate::ring::RingBuffer;
use crate::{CancelToken, WorkerError};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Bridge configuration (plain data, no behavior).
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Worker runtime executable (e.g. "Rscript")
    pub program: String,

    /// Arguments placed before the script path (e.g. "--vanilla")
    pub leading_args: Vec<String>,

    /// Directory holding the scripts, looked up as `{script_id}.R`
    pub scripts_dir: PathBuf,

    /// Concurrency cap for invocations
    pub max_concurrent: usize,

    /// Hard per-call execution deadline
    pub exec_timeout: Duration,

    /// Deadline for acquiring a worker slot
    pub queue_timeout: Duration,

    /// Window between soft terminate and kill
    pub grace_period: Duration,

    /// Retained stderr tail in bytes
    pub stderr_tail_bytes: usize,

    /// Parent directory for invocation temp dirs (system temp when None)
    pub work_root: Option<PathBuf>,
}

/// Values injected into `args.json` under the `_env` key.
#[derive(Debug, Clone, Default)]
pub struct WorkerEnv {
    /// Minimum log level the script should honor
    pub log_level: String,

    /// Where the script may write requested artifacts (VFS-approved)
    pub output_path: Option<PathBuf>,
}

/// Parsed worker result.
#[derive(Debug, Clone)]
pub struct WorkerOutput {
    /// The result document minus `_formatting`
    pub result: Value,

    /// Stripped `_formatting` member, rendered as markdown upstream
    pub formatting: Option<String>,
}

/// The worker bridge. Cheap to clone; the semaphore is shared.
#[derive(Debug, Clone)]
pub struct WorkerBridge {
    config: Arc<WorkerConfig>,
    semaphore: Arc<Semaphore>,
}

impl WorkerBridge {
    /// Create a bridge with its concurrency semaphore.
    pub fn new(config: WorkerConfig) -> Self {
        let permits = config.max_concurrent.max(1);
        Self {
            config: Arc::new(config),
            semaphore: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Number of invocations currently runnable without queueing.
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Resolve a script id to its on-disk path.
    ///
    /// Ids are slugs; anything with a path separator is rejected outright.
    pub fn script_path(&self, script_id: &str) -> Result<PathBuf, WorkerError> {
        if script_id.is_empty()
            || !script_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(WorkerError::UnknownScript {
                script_id: script_id.to_string(),
            });
        }
        let path = self.config.scripts_dir.join(format!("{}.R", script_id));
        if !path.is_file() {
            return Err(WorkerError::UnknownScript {
                script_id: script_id.to_string(),
            });
        }
        Ok(path)
    }

    /// Run one script invocation end to end.
    ///
    /// The temp directory is removed on every exit path (RAII). The cancel
    /// token is observed while queued and while the subprocess runs.
    pub async fn run_script(
        &self,
        script_id: &str,
        args: &Value,
        env: WorkerEnv,
        cancel: &CancelToken,
    ) -> Result<WorkerOutput, WorkerError> {
        let script_path = self.script_path(script_id)?;

        let queue_start = Instant::now();
        let permit = tokio::select! {
            acquired = tokio::time::timeout(self.config.queue_timeout, self.semaphore.acquire()) => {
                match acquired {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => {
                        // Semaphore closed only at shutdown.
                        return Err(WorkerError::Cancelled);
                    }
                    Err(_) => {
                        return Err(WorkerError::QueueTimeout {
                            waited_ms: queue_start.elapsed().as_millis() as u64,
                        });
                    }
                }
            }
            _ = cancel.cancelled() => return Err(WorkerError::Cancelled),
        };
        let _permit = permit;

        let temp = self.make_temp_dir()?;
        let args_path = temp.path().join("args.json");
        let result_path = temp.path().join("result.json");

        let args_doc = compose_args(args, &env);
        std::fs::write(&args_path, serde_json::to_vec(&args_doc).map_err(io_from_json)?)?;
        std::fs::write(&result_path, b"")?;

        debug!(
            script = script_id,
            dir = %temp.path().display(),
            "spawning worker"
        );

        let mut command = Command::new(&self.config.program);
        command
            .args(&self.config.leading_args)
            .arg(&script_path)
            .arg(&args_path)
            .arg(&result_path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|source| WorkerError::Spawn {
            program: self.config.program.clone(),
            source,
        })?;

        // Stream stderr into the ring buffer; never let the pipe fill up.
        let ring = Arc::new(Mutex::new(RingBuffer::new(self.config.stderr_tail_bytes)));
        let stderr_task = child.stderr.take().map(|mut stderr| {
            let ring = Arc::clone(&ring);
            tokio::spawn(async move {
                let mut chunk = [0u8; 4096];
                loop {
                    match stderr.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => ring
                            .lock()
                            .expect("stderr ring lock poisoned")
                            .push(&chunk[..n]),
                    }
                }
            })
        });

        let started = Instant::now();
        let deadline = tokio::time::sleep(self.config.exec_timeout);
        tokio::pin!(deadline);

        let outcome = tokio::select! {
            status = child.wait() => Outcome::Exited(status?),
            _ = &mut deadline => Outcome::DeadlineExpired,
            _ = cancel.cancelled() => Outcome::Cancelled,
        };

        let status = match outcome {
            Outcome::Exited(status) => Some(status),
            Outcome::DeadlineExpired | Outcome::Cancelled => {
                self.terminate(&mut child).await;
                None
            }
        };

        if let Some(task) = stderr_task {
            let _ = task.await;
        }
        let stderr_tail = ring.lock().expect("stderr ring lock poisoned").tail();

        match outcome {
            Outcome::Cancelled => Err(WorkerError::Cancelled),
            Outcome::DeadlineExpired => {
                warn!(script = script_id, "worker exceeded execution deadline");
                Err(WorkerError::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                    stderr_tail,
                })
            }
            Outcome::Exited(_) => {
                let status = status.expect("exited outcome always carries a status");
                if !status.success() {
                    return Err(WorkerError::ExecutionFailed {
                        code: status.code(),
                        stderr_tail,
                    });
                }

                let raw = std::fs::read(&result_path)?;
                let mut result: Value =
                    serde_json::from_slice(&raw).map_err(|e| WorkerError::ProtocolError {
                        message: e.to_string(),
                        stderr_tail: stderr_tail.clone(),
                    })?;

                let formatting = result
                    .as_object_mut()
                    .and_then(|obj| obj.remove("_formatting"))
                    .and_then(|v| v.as_str().map(|s| s.to_string()));

                Ok(WorkerOutput { result, formatting })
            }
        }
    }

    fn make_temp_dir(&self) -> Result<tempfile::TempDir, WorkerError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("rmcp-worker-");
        let temp = match &self.config.work_root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(temp.path(), std::fs::Permissions::from_mode(0o700))?;
        }

        Ok(temp)
    }

    /// Soft terminate, wait out the grace period, then kill and reap.
    async fn terminate(&self, child: &mut Child) {
        soft_terminate(child);
        if tokio::time::timeout(self.config.grace_period, child.wait())
            .await
            .is_err()
        {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Outcome {
    Exited(std::process::ExitStatus),
    DeadlineExpired,
    Cancelled,
}

/// Build the args document: handler arguments plus the `_env` block.
fn compose_args(args: &Value, env: &WorkerEnv) -> Value {
    let mut doc = match args {
        Value::Object(map) => map.clone(),
        other => {
            let mut map = serde_json::Map::new();
            map.insert("arguments".to_string(), other.clone());
            map
        }
    };

    doc.insert(
        "_env".to_string(),
        serde_json::json!({
            "abi": rmcp_protocol::WORKER_ABI_VERSION,
            "log_level": env.log_level,
            "output_path": env.output_path.as_ref().map(|p| p.display().to_string()),
        }),
    );

    Value::Object(doc)
}

#[cfg(unix)]
fn soft_terminate(child: &Child) {
    if let Some(pid) = child.id() {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
fn soft_terminate(_child: &Child) {
    // No soft-terminate equivalent; the caller falls through to kill.
}

fn io_from_json(e: serde_json::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, e)
}

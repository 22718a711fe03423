//! Configuration for the RMCP server.
//!
//! Configuration is read at startup from a system path, then a user path,
//! then an optional CLI-specified path, merged last-wins at key granularity.
//! `RMCP_*` environment variables override individual keys after the file
//! merge. Nothing is persisted by the server itself.
//!
//! ```text
//! /etc/rmcp/config.toml        (system)
//! ~/.rmcp/config.toml          (user; RMCP_HOME overrides the home dir)
//! --config PATH                (CLI)
//! RMCP_* environment variables (last)
//! ```

use rmcp_approval::{AutoApprovePolicy, CategorySpec};
use rmcp_vfs::VfsConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid value for {var}: {value}")]
    BadEnvValue { var: String, value: String },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSection,
    pub http: HttpSection,
    pub worker: WorkerSection,
    pub vfs: VfsConfig,
    pub approval: ApprovalSection,
    pub session: SessionSection,
    pub limits: LimitsSection,
}

/// Identity advertised on initialize.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Server name (reported in initialize)
    pub name: String,

    /// Usage instructions surfaced to clients
    pub instructions: Option<String>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: "rmcp".to_string(),
            instructions: None,
        }
    }
}

/// HTTP+SSE transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    /// Bind host
    pub host: String,

    /// Bind port
    pub port: u16,

    /// CORS origin allow-list; empty denies cross-origin callers
    pub allowed_origins: Vec<String>,

    /// Maximum accepted request body, in bytes
    pub max_body_bytes: usize,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8474,
            allowed_origins: vec![],
            max_body_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Worker bridge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    /// Worker runtime executable (e.g. "Rscript")
    pub program: String,

    /// Arguments placed before the script path (e.g. "--vanilla")
    pub args: Vec<String>,

    /// Directory holding the statistical scripts
    pub scripts_dir: Option<PathBuf>,

    /// Concurrency cap for worker invocations
    pub max_concurrent: usize,

    /// Hard per-call execution deadline, in seconds
    pub exec_timeout_secs: u64,

    /// Deadline for waiting on a free worker slot, in seconds
    pub queue_timeout_secs: u64,

    /// Grace period between soft terminate and kill, in seconds
    pub grace_secs: u64,

    /// Retained stderr tail, in bytes
    pub stderr_tail_bytes: usize,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            program: "Rscript".to_string(),
            args: vec!["--vanilla".to_string()],
            scripts_dir: None,
            max_concurrent: 4,
            exec_timeout_secs: 120,
            queue_timeout_secs: 30,
            grace_secs: 2,
            stderr_tail_bytes: 16 * 1024,
        }
    }
}

/// Approval gate settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApprovalSection {
    /// Categories pre-approved at session creation
    pub auto_approve: AutoApprovePolicy,

    /// Pattern categories; versioned configuration, not code
    pub categories: Vec<CategorySpec>,
}

impl Default for ApprovalSection {
    fn default() -> Self {
        Self {
            auto_approve: AutoApprovePolicy::default(),
            categories: rmcp_approval::default_categories(),
        }
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Idle period after which a session expires, in seconds
    pub idle_timeout_secs: u64,

    /// Deadline for an approval/elicitation answer, in seconds
    pub elicit_timeout_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 3600,
            elicit_timeout_secs: 300,
        }
    }
}

/// Miscellaneous bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsSection {
    /// Page size for tools/resources/prompts listings
    pub page_size: usize,

    /// Minimum interval between progress notifications, in milliseconds
    pub progress_interval_ms: u64,

    /// Concurrent requests processed per stdio session
    pub stdio_concurrency: usize,

    /// Drain window for in-flight requests at shutdown, in seconds
    pub drain_timeout_secs: u64,

    /// Per-session SSE queue capacity
    pub sse_queue_len: usize,
}

impl Default for LimitsSection {
    fn default() -> Self {
        Self {
            page_size: 50,
            progress_interval_ms: 50,
            stdio_concurrency: 4,
            drain_timeout_secs: 10,
            sse_queue_len: 64,
        }
    }
}

impl Config {
    /// Load and merge configuration from the standard locations plus an
    /// optional CLI-specified file, then apply `RMCP_*` overrides and
    /// validate.
    pub fn load(cli_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut layers: Vec<PathBuf> = vec![
            PathBuf::from("/etc/rmcp/config.toml"),
            rmcp_home().join("config.toml"),
        ];
        if let Some(path) = cli_path {
            layers.push(path.to_path_buf());
        }

        let mut merged = toml::Value::Table(Default::default());
        for path in &layers {
            if !path.exists() {
                // A CLI-specified file must exist; the standard layers are optional.
                if Some(path.as_path()) == cli_path {
                    return Err(ConfigError::Read {
                        path: path.clone(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "config file not found",
                        ),
                    });
                }
                continue;
            }
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let value: toml::Value =
                toml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.clone(),
                    source,
                })?;
            debug!("Merged configuration layer: {}", path.display());
            merge_toml(&mut merged, value);
        }

        let mut config: Config = merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Invalid(e.to_string()))?;

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RMCP_*` environment overrides.
    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(v) = std::env::var("RMCP_SERVER_NAME") {
            self.server.name = v;
        }
        if let Ok(v) = std::env::var("RMCP_HTTP_HOST") {
            self.http.host = v;
        }
        set_parsed(&mut self.http.port, "RMCP_HTTP_PORT")?;
        set_parsed(&mut self.http.max_body_bytes, "RMCP_HTTP_MAX_BODY_BYTES")?;
        if let Ok(v) = std::env::var("RMCP_HTTP_ALLOWED_ORIGINS") {
            self.http.allowed_origins = split_list(&v);
        }
        if let Ok(v) = std::env::var("RMCP_WORKER_PROGRAM") {
            self.worker.program = v;
        }
        if let Ok(v) = std::env::var("RMCP_WORKER_SCRIPTS_DIR") {
            self.worker.scripts_dir = Some(PathBuf::from(v));
        }
        set_parsed(&mut self.worker.max_concurrent, "RMCP_WORKER_MAX_CONCURRENT")?;
        set_parsed(&mut self.worker.exec_timeout_secs, "RMCP_WORKER_TIMEOUT_SECS")?;
        set_parsed(
            &mut self.worker.queue_timeout_secs,
            "RMCP_WORKER_QUEUE_TIMEOUT_SECS",
        )?;
        if let Ok(v) = std::env::var("RMCP_VFS_ALLOWED_PATHS") {
            self.vfs.allowed_roots = std::env::split_paths(&v).collect();
        }
        if let Ok(v) = std::env::var("RMCP_VFS_READ_ONLY") {
            self.vfs.read_only = parse_bool("RMCP_VFS_READ_ONLY", &v)?;
        }
        set_parsed(&mut self.vfs.max_read_bytes, "RMCP_VFS_MAX_READ_BYTES")?;
        if let Ok(v) = std::env::var("RMCP_AUTO_APPROVE") {
            if v == "all" {
                self.approval.auto_approve.approve_all = true;
            } else {
                self.approval.auto_approve.categories = split_list(&v);
            }
        }
        set_parsed(
            &mut self.session.idle_timeout_secs,
            "RMCP_SESSION_IDLE_TIMEOUT_SECS",
        )?;
        set_parsed(
            &mut self.session.elicit_timeout_secs,
            "RMCP_ELICIT_TIMEOUT_SECS",
        )?;
        Ok(())
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.name.is_empty() {
            return Err(ConfigError::Invalid("server.name must not be empty".into()));
        }
        if self.worker.program.is_empty() {
            return Err(ConfigError::Invalid(
                "worker.program must not be empty".into(),
            ));
        }
        if self.worker.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "worker.max_concurrent must be at least 1".into(),
            ));
        }
        if self.worker.exec_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "worker.exec_timeout_secs must be at least 1".into(),
            ));
        }
        if self.limits.page_size == 0 {
            return Err(ConfigError::Invalid(
                "limits.page_size must be at least 1".into(),
            ));
        }
        if self.limits.stdio_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "limits.stdio_concurrency must be at least 1".into(),
            ));
        }
        for spec in &self.approval.categories {
            if spec.id.is_empty() {
                return Err(ConfigError::Invalid(
                    "approval.categories entries must have a non-empty id".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Get the RMCP home directory: ~/.rmcp (RMCP_HOME overrides).
pub fn rmcp_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("RMCP_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".rmcp")
}

/// Deep-merge `overlay` into `base`, last-wins at leaf granularity.
fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => {
                        base_table.insert(key, value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => *base_slot = overlay_value,
    }
}

fn set_parsed<T: std::str::FromStr>(slot: &mut T, var: &str) -> Result<(), ConfigError> {
    if let Ok(value) = std::env::var(var) {
        *slot = value.parse().map_err(|_| ConfigError::BadEnvValue {
            var: var.to_string(),
            value,
        })?;
    }
    Ok(())
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::BadEnvValue {
            var: var.to_string(),
            value: value.to_string(),
        }),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker.exec_timeout_secs, 120);
        assert_eq!(config.worker.queue_timeout_secs, 30);
        assert_eq!(config.session.elicit_timeout_secs, 300);
        assert_eq!(config.session.idle_timeout_secs, 3600);
        assert_eq!(config.approval.categories.len(), 3);
    }

    #[test]
    fn test_merge_is_last_wins_per_key() {
        let mut base: toml::Value = toml::from_str(
            r#"
            [http]
            host = "0.0.0.0"
            port = 1111
            "#,
        )
        .unwrap();
        let overlay: toml::Value = toml::from_str(
            r#"
            [http]
            port = 2222
            "#,
        )
        .unwrap();

        merge_toml(&mut base, overlay);
        let config: Config = base.try_into().unwrap();
        assert_eq!(config.http.host, "0.0.0.0");
        assert_eq!(config.http.port, 2222);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let value: toml::Value = toml::from_str(
            r#"
            [server]
            name = "stats"
            "#,
        )
        .unwrap();
        let config: Config = value.try_into().unwrap();
        assert_eq!(config.server.name, "stats");
        assert_eq!(config.http.port, HttpSection::default().port);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.worker.max_concurrent = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_parse_bool_values() {
        assert!(parse_bool("V", "true").unwrap());
        assert!(!parse_bool("V", "0").unwrap());
        assert!(parse_bool("V", "maybe").is_err());
    }

    #[test]
    fn test_cli_path_must_exist() {
        let missing = std::path::Path::new("/definitely/not/here.toml");
        assert!(matches!(
            Config::load(Some(missing)),
            Err(ConfigError::Read { .. })
        ));
    }
}

//! Virtual File System - Path Policy Gate
//!
//! Every file access performed on behalf of a client goes through this
//! policy. The VFS is a pure policy function over paths, not a store:
//! nothing is cached between calls.
//!
//! # Security Model
//!
//! - User-home and environment references are expanded first; anything left
//!   unresolved is rejected
//! - All paths are canonicalized (symlinks resolved) before validation
//! - ".." components are explicitly denied
//! - The canonical path must sit under one of the configured allowed roots
//! - Writes are denied entirely in read-only mode and always go through a
//!   temp-file + rename so partial content is never observable
//! - Error messages echo only the path as the client supplied it

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tracing::warn;

/// VFS policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VfsConfig {
    /// Roots under which access is allowed
    pub allowed_roots: Vec<PathBuf>,

    /// Deny all writes when set
    pub read_only: bool,

    /// Maximum file size accepted for reads, in bytes
    pub max_read_bytes: u64,

    /// MIME allow-list for reads; `None` accepts any type
    pub allowed_mime: Option<Vec<String>>,
}

impl Default for VfsConfig {
    fn default() -> Self {
        Self {
            allowed_roots: vec![std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))],
            read_only: false,
            max_read_bytes: 50 * 1024 * 1024,
            allowed_mime: None,
        }
    }
}

/// Access intent for a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    Read,
    Write,
}

/// Derived at open time; never persisted.
#[derive(Debug, Clone)]
pub struct VfsEntry {
    /// Canonical, symlink-free absolute path
    pub canonical_path: PathBuf,

    /// File size in bytes (0 for not-yet-existing write targets)
    pub size: u64,

    /// Guessed MIME type, if any
    pub mime: Option<String>,

    /// Granted access mode
    pub mode: Intent,
}

/// Policy rejections and I/O failures.
///
/// Policy rejections carry one of the machine-readable reason codes
/// `outside_root`, `read_only`, `too_large`, `bad_mime`, `symlink_escape`.
/// `Io` is an operational failure, not a rejection, and maps to an internal
/// error upstream. All variants echo only the client-supplied path.
#[derive(Debug, Error)]
pub enum VfsError {
    #[error("path is outside the allowed roots: {path}")]
    OutsideRoot { path: String },

    #[error("filesystem policy is read-only: {path}")]
    ReadOnly { path: String },

    #[error("file exceeds the size limit ({size} > {limit} bytes): {path}")]
    TooLarge { path: String, size: u64, limit: u64 },

    #[error("file type {mime} is not in the MIME allow-list: {path}")]
    BadMime { path: String, mime: String },

    #[error("symlink escapes the allowed roots: {path}")]
    SymlinkEscape { path: String },

    #[error("i/o failure on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl VfsError {
    /// Machine-readable reason code for the client.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::OutsideRoot { .. } => "outside_root",
            Self::ReadOnly { .. } => "read_only",
            Self::TooLarge { .. } => "too_large",
            Self::BadMime { .. } => "bad_mime",
            Self::SymlinkEscape { .. } => "symlink_escape",
            Self::Io { .. } => "io_error",
        }
    }

    /// Whether this is a policy rejection (vs an operational failure).
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Io { .. })
    }
}

/// The policy gate. Cheap to clone; roots are canonicalized at construction.
#[derive(Debug, Clone)]
pub struct VfsPolicy {
    roots: Vec<PathBuf>,
    read_only: bool,
    max_read_bytes: u64,
    allowed_mime: Option<Vec<String>>,
}

impl VfsPolicy {
    /// Build a policy from configuration.
    ///
    /// Roots that cannot be canonicalized (e.g. do not exist) are dropped
    /// with a warning rather than silently allowed.
    pub fn new(config: VfsConfig) -> Self {
        let roots = config
            .allowed_roots
            .into_iter()
            .filter_map(|p| match p.canonicalize() {
                Ok(canonical) => Some(canonical),
                Err(e) => {
                    warn!("Failed to canonicalize allowed root {:?}: {}", p, e);
                    None
                }
            })
            .collect();

        Self {
            roots,
            read_only: config.read_only,
            max_read_bytes: config.max_read_bytes,
            allowed_mime: config.allowed_mime,
        }
    }

    /// The canonicalized allowed roots (for display/debugging).
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Whether the policy denies all writes.
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Run the full policy pipeline for `raw` with the given intent.
    pub fn resolve(&self, raw: &str, intent: Intent) -> Result<VfsEntry, VfsError> {
        let expanded = expand_references(raw).ok_or_else(|| VfsError::OutsideRoot {
            path: raw.to_string(),
        })?;

        if contains_traversal(&expanded) {
            return Err(VfsError::OutsideRoot {
                path: raw.to_string(),
            });
        }

        match intent {
            Intent::Read => self.resolve_read(raw, &expanded),
            Intent::Write => self.resolve_write(raw, &expanded),
        }
    }

    fn resolve_read(&self, raw: &str, expanded: &Path) -> Result<VfsEntry, VfsError> {
        let canonical = expanded
            .canonicalize()
            .map_err(|_| VfsError::OutsideRoot {
                path: raw.to_string(),
            })?;

        self.check_containment(raw, expanded, &canonical)?;

        let meta = std::fs::metadata(&canonical).map_err(|source| VfsError::Io {
            path: raw.to_string(),
            source,
        })?;

        if meta.len() > self.max_read_bytes {
            return Err(VfsError::TooLarge {
                path: raw.to_string(),
                size: meta.len(),
                limit: self.max_read_bytes,
            });
        }

        let mime = guess_mime(&canonical);
        if let Some(allowed) = &self.allowed_mime {
            let found = mime.as_deref().unwrap_or("unknown");
            if !allowed.iter().any(|m| m == found) {
                return Err(VfsError::BadMime {
                    path: raw.to_string(),
                    mime: found.to_string(),
                });
            }
        }

        Ok(VfsEntry {
            canonical_path: canonical,
            size: meta.len(),
            mime,
            mode: Intent::Read,
        })
    }

    fn resolve_write(&self, raw: &str, expanded: &Path) -> Result<VfsEntry, VfsError> {
        // Canonicalize via the parent: the target itself may not exist yet.
        let parent = expanded.parent().ok_or_else(|| VfsError::OutsideRoot {
            path: raw.to_string(),
        })?;
        let file_name = expanded.file_name().ok_or_else(|| VfsError::OutsideRoot {
            path: raw.to_string(),
        })?;

        let canonical_parent = parent.canonicalize().map_err(|_| VfsError::OutsideRoot {
            path: raw.to_string(),
        })?;
        let canonical = canonical_parent.join(file_name);

        self.check_containment(raw, expanded, &canonical)?;

        if self.read_only {
            return Err(VfsError::ReadOnly {
                path: raw.to_string(),
            });
        }

        Ok(VfsEntry {
            canonical_path: canonical,
            size: 0,
            mime: guess_mime(expanded),
            mode: Intent::Write,
        })
    }

    /// Require the canonical path to sit under an allowed root.
    ///
    /// A path that is lexically inside a root but whose canonical form
    /// escapes it went through a symlink; that case is reported distinctly.
    fn check_containment(
        &self,
        raw: &str,
        expanded: &Path,
        canonical: &Path,
    ) -> Result<(), VfsError> {
        if self.roots.iter().any(|root| canonical.starts_with(root)) {
            return Ok(());
        }

        let lexically_inside = expanded.is_absolute()
            && self.roots.iter().any(|root| expanded.starts_with(root));
        if lexically_inside {
            return Err(VfsError::SymlinkEscape {
                path: raw.to_string(),
            });
        }

        Err(VfsError::OutsideRoot {
            path: raw.to_string(),
        })
    }

    /// Resolve for read and return the file content.
    pub fn open_read(&self, raw: &str) -> Result<(VfsEntry, Vec<u8>), VfsError> {
        let entry = self.resolve(raw, Intent::Read)?;
        let bytes = std::fs::read(&entry.canonical_path).map_err(|source| VfsError::Io {
            path: raw.to_string(),
            source,
        })?;
        Ok((entry, bytes))
    }

    /// Resolve for write and atomically replace the target.
    ///
    /// Content lands in a temp file in the same directory and is renamed
    /// over the target, so readers never observe partial writes.
    pub fn write_atomic(&self, raw: &str, bytes: &[u8]) -> Result<VfsEntry, VfsError> {
        use std::io::Write;

        let mut entry = self.resolve(raw, Intent::Write)?;
        let parent = entry
            .canonical_path
            .parent()
            .expect("write target always has a parent");

        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|source| VfsError::Io {
            path: raw.to_string(),
            source,
        })?;
        tmp.write_all(bytes).map_err(|source| VfsError::Io {
            path: raw.to_string(),
            source,
        })?;
        tmp.persist(&entry.canonical_path)
            .map_err(|e| VfsError::Io {
                path: raw.to_string(),
                source: e.error,
            })?;

        entry.size = bytes.len() as u64;
        Ok(entry)
    }
}

/// Expand `~` and `$VAR`/`${VAR}` references.
///
/// Returns `None` when a reference cannot be resolved.
fn expand_references(raw: &str) -> Option<PathBuf> {
    let mut s = raw.to_string();

    if s == "~" {
        s = dirs::home_dir()?.to_string_lossy().into_owned();
    } else if let Some(rest) = s.strip_prefix("~/") {
        s = dirs::home_dir()?.join(rest).to_string_lossy().into_owned();
    } else if s.starts_with('~') {
        // ~user expansion is not supported
        return None;
    }

    while let Some(start) = s.find('$') {
        let after = &s[start + 1..];
        let (name, end) = if let Some(rest) = after.strip_prefix('{') {
            let close = rest.find('}')?;
            (&rest[..close], start + 1 + 1 + close + 1)
        } else {
            let len = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            if len == 0 {
                return None;
            }
            (&after[..len], start + 1 + len)
        };

        let value = std::env::var(name).ok()?;
        s = format!("{}{}{}", &s[..start], value, &s[end..]);
    }

    Some(PathBuf::from(s))
}

fn contains_traversal(path: &Path) -> bool {
    path.components().any(|c| matches!(c, Component::ParentDir))
}

fn guess_mime(path: &Path) -> Option<String> {
    mime_guess::from_path(path)
        .first()
        .map(|m| m.essence_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn policy_for(root: &Path) -> VfsPolicy {
        VfsPolicy::new(VfsConfig {
            allowed_roots: vec![root.to_path_buf()],
            ..VfsConfig::default()
        })
    }

    #[test]
    fn test_read_within_root() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("data.csv");
        std::fs::write(&file, "a,b\n1,2\n").unwrap();

        let policy = policy_for(temp.path());
        let (entry, bytes) = policy.open_read(file.to_str().unwrap()).unwrap();

        assert_eq!(entry.mode, Intent::Read);
        assert_eq!(entry.mime.as_deref(), Some("text/csv"));
        assert_eq!(bytes, b"a,b\n1,2\n");
    }

    #[test]
    fn test_read_outside_root() {
        let temp = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let file = other.path().join("secret.txt");
        std::fs::write(&file, "x").unwrap();

        let policy = policy_for(temp.path());
        let err = policy.resolve(file.to_str().unwrap(), Intent::Read).unwrap_err();

        assert_eq!(err.reason_code(), "outside_root");
    }

    #[test]
    fn test_error_echoes_client_path_only() {
        let temp = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let file = other.path().join("secret.txt");
        std::fs::write(&file, "x").unwrap();

        let policy = policy_for(temp.path());
        let raw = file.to_str().unwrap();
        let err = policy.resolve(raw, Intent::Read).unwrap_err();

        // Message contains the client path and no canonical root path.
        let msg = err.to_string();
        assert!(msg.contains(raw));
        assert!(!msg.contains(temp.path().to_str().unwrap()));
    }

    #[test]
    fn test_traversal_rejected() {
        let temp = TempDir::new().unwrap();
        let policy = policy_for(temp.path());

        let raw = format!("{}/sub/../../etc/passwd", temp.path().display());
        let err = policy.resolve(&raw, Intent::Read).unwrap_err();
        assert_eq!(err.reason_code(), "outside_root");
    }

    #[test]
    fn test_read_only_blocks_writes() {
        let temp = TempDir::new().unwrap();
        let policy = VfsPolicy::new(VfsConfig {
            allowed_roots: vec![temp.path().to_path_buf()],
            read_only: true,
            ..VfsConfig::default()
        });

        let raw = format!("{}/out.csv", temp.path().display());
        let err = policy.resolve(&raw, Intent::Write).unwrap_err();
        assert_eq!(err.reason_code(), "read_only");

        // Reads still pass.
        let file = temp.path().join("in.csv");
        std::fs::write(&file, "a\n").unwrap();
        assert!(policy.resolve(file.to_str().unwrap(), Intent::Read).is_ok());
    }

    #[test]
    fn test_size_limit() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("big.bin");
        std::fs::write(&file, vec![0u8; 128]).unwrap();

        let policy = VfsPolicy::new(VfsConfig {
            allowed_roots: vec![temp.path().to_path_buf()],
            max_read_bytes: 64,
            ..VfsConfig::default()
        });

        let err = policy.resolve(file.to_str().unwrap(), Intent::Read).unwrap_err();
        assert!(matches!(err, VfsError::TooLarge { size: 128, .. }));
        assert_eq!(err.reason_code(), "too_large");
    }

    #[test]
    fn test_mime_allowlist() {
        let temp = TempDir::new().unwrap();
        let csv = temp.path().join("ok.csv");
        let bin = temp.path().join("no.exe");
        std::fs::write(&csv, "a\n").unwrap();
        std::fs::write(&bin, [0u8; 4]).unwrap();

        let policy = VfsPolicy::new(VfsConfig {
            allowed_roots: vec![temp.path().to_path_buf()],
            allowed_mime: Some(vec!["text/csv".to_string()]),
            ..VfsConfig::default()
        });

        assert!(policy.resolve(csv.to_str().unwrap(), Intent::Read).is_ok());
        let err = policy.resolve(bin.to_str().unwrap(), Intent::Read).unwrap_err();
        assert_eq!(err.reason_code(), "bad_mime");
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape() {
        let temp = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("real.txt");
        std::fs::write(&target, "x").unwrap();

        let link = temp.path().join("alias.txt");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let policy = policy_for(temp.path());
        let err = policy.resolve(link.to_str().unwrap(), Intent::Read).unwrap_err();
        assert_eq!(err.reason_code(), "symlink_escape");
    }

    #[test]
    fn test_write_atomic_creates_file() {
        let temp = TempDir::new().unwrap();
        let policy = policy_for(temp.path());

        let raw = format!("{}/results.csv", temp.path().display());
        let entry = policy.write_atomic(&raw, b"r2,0.93\n").unwrap();

        assert_eq!(entry.size, 8);
        assert_eq!(std::fs::read(entry.canonical_path).unwrap(), b"r2,0.93\n");
    }

    #[test]
    fn test_unresolved_env_reference_rejected() {
        let temp = TempDir::new().unwrap();
        let policy = policy_for(temp.path());

        let err = policy
            .resolve("$RMCP_NO_SUCH_VAR_SET/data.csv", Intent::Read)
            .unwrap_err();
        assert_eq!(err.reason_code(), "outside_root");
    }

    #[test]
    fn test_env_reference_expansion() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("data.csv");
        std::fs::write(&file, "a\n").unwrap();

        std::env::set_var("RMCP_TEST_DATA_DIR", temp.path());
        let policy = policy_for(temp.path());
        let entry = policy
            .resolve("$RMCP_TEST_DATA_DIR/data.csv", Intent::Read)
            .unwrap();
        assert!(entry.canonical_path.ends_with("data.csv"));
    }
}

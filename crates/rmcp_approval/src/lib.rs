//! Approval Subsystem
//!
//! Before any script fragment reaches a worker, it is scanned for patterns
//! that invoke privileged side effects. Matched categories gate execution on
//! a user decision obtained through a server-initiated elicitation.
//!
//! # Design
//!
//! - Pattern sets are configuration values, not hard-coded regexes, so they
//!   can be versioned and audited. The matcher is pure:
//!   `(fragment, categories) -> set of category ids`.
//! - Decisions are scoped to the session struct, never to module state.
//!   An `AutoApprovePolicy` consumed at session creation pre-approves
//!   categories for automation scenarios.
//! - Only one prompt per category is in flight at a time; concurrent
//!   matches await the same resolution.
//!
//! The check is advisory to the worker: the worker is not trusted to
//! refuse, so the server must not launch it when a category is denied.

mod classify;
mod session;

pub use classify::{CategorySet, CompiledCategory};
pub use session::{PromptTicket, SessionApprovals};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity attached to a category for display purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    Medium,
    High,
}

/// One detector inside a category.
///
/// `unless_preceded_by` emulates a negative lookbehind (which the `regex`
/// crate does not support): a match is discarded when this pattern matches
/// the text immediately before the match start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorSpec {
    /// Regex matched against the script fragment
    pub pattern: String,

    /// Drop matches directly preceded by this pattern
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unless_preceded_by: Option<String>,
}

impl DetectorSpec {
    fn new(pattern: &str) -> Self {
        Self {
            pattern: pattern.to_string(),
            // All defaults ignore matches on commented lines.
            unless_preceded_by: Some(r"#[^\n]*".to_string()),
        }
    }
}

/// One approval category as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorySpec {
    /// Stable id (e.g. "file_operations")
    pub id: String,

    /// Human-readable description shown in the approval prompt
    pub description: String,

    /// Severity level
    pub level: SecurityLevel,

    /// Detector patterns
    pub patterns: Vec<DetectorSpec>,
}

/// Per-category decision within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Unasked,
    Approved,
    Denied,
}

/// Startup policy that pre-approves categories (automation/tests).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoApprovePolicy {
    /// Approve every category at session creation
    pub approve_all: bool,

    /// Approve only the listed category ids
    pub categories: Vec<String>,
}

/// Errors raised while compiling category specs.
#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("invalid pattern {pattern:?} in category {category}: {source}")]
    BadPattern {
        category: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// The default category set shipped with the server.
///
/// Patterns target the R surface the statistical scripts use. The live set
/// is configuration: deployments can extend or replace it wholesale.
pub fn default_categories() -> Vec<CategorySpec> {
    vec![
        CategorySpec {
            id: "file_operations".to_string(),
            description: "Write files to disk (exports, saved models, plots)".to_string(),
            level: SecurityLevel::Medium,
            patterns: vec![
                DetectorSpec::new(r"\bwrite\.(csv2?|table|delim)\s*\("),
                DetectorSpec::new(r"\bsaveRDS\s*\("),
                DetectorSpec::new(r"\bsave\s*\("),
                DetectorSpec::new(r"\bsink\s*\("),
                DetectorSpec::new(r"\bwriteLines\s*\("),
                DetectorSpec::new(r"\b(pdf|png|jpeg|svg|tiff)\s*\("),
                DetectorSpec::new(r"\bggsave\s*\("),
                DetectorSpec::new(r"\bfile\.(create|remove|copy|rename)\s*\("),
                DetectorSpec::new(r"\bunlink\s*\("),
            ],
        },
        CategorySpec {
            id: "package_installation".to_string(),
            description: "Install R packages from a repository".to_string(),
            level: SecurityLevel::High,
            patterns: vec![
                DetectorSpec::new(r"\binstall\.packages\s*\("),
                DetectorSpec::new(r"\b(remotes|devtools)::install_\w+\s*\("),
                DetectorSpec::new(r"\bBiocManager::install\s*\("),
            ],
        },
        CategorySpec {
            id: "system_operations".to_string(),
            description: "Run shell commands or mutate the process environment".to_string(),
            level: SecurityLevel::High,
            patterns: vec![
                DetectorSpec::new(r"\bsystem2?\s*\("),
                DetectorSpec::new(r"\bshell\s*\("),
                DetectorSpec::new(r"\bSys\.setenv\s*\("),
                DetectorSpec::new(r"\bsetwd\s*\("),
                DetectorSpec::new(r"\bdownload\.file\s*\("),
            ],
        },
    ]
}

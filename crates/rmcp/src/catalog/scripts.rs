//! Embedded R scripts.
//!
//! The scripts are baked into the binary for single-file distribution and
//! materialized to `{scripts_dir}` at startup so the worker runtime can read
//! them. The embedded copy is also what the approval gate scans.

use anyhow::{Context, Result};
use std::path::Path;

/// One embedded script.
pub struct EmbeddedScript {
    /// Script id, resolved by the worker bridge as `{id}.R`
    pub id: &'static str,
    /// Full R source
    pub source: &'static str,
}

/// Every script shipped with the server.
pub const EMBEDDED_SCRIPTS: &[EmbeddedScript] = &[
    EmbeddedScript {
        id: "descriptive_stats",
        source: include_str!("../../scripts/descriptive_stats.R"),
    },
    EmbeddedScript {
        id: "linear_model",
        source: include_str!("../../scripts/linear_model.R"),
    },
    EmbeddedScript {
        id: "correlation",
        source: include_str!("../../scripts/correlation.R"),
    },
    EmbeddedScript {
        id: "t_test",
        source: include_str!("../../scripts/t_test.R"),
    },
    EmbeddedScript {
        id: "anova",
        source: include_str!("../../scripts/anova.R"),
    },
    EmbeddedScript {
        id: "histogram",
        source: include_str!("../../scripts/histogram.R"),
    },
    EmbeddedScript {
        id: "export_results",
        source: include_str!("../../scripts/export_results.R"),
    },
    EmbeddedScript {
        id: "run_r_code",
        source: include_str!("../../scripts/run_r_code.R"),
    },
    EmbeddedScript {
        id: "install_package",
        source: include_str!("../../scripts/install_package.R"),
    },
];

/// Look up an embedded script's source by id.
pub fn script_source(id: &str) -> Option<&'static str> {
    EMBEDDED_SCRIPTS
        .iter()
        .find(|s| s.id == id)
        .map(|s| s.source)
}

/// Write the embedded scripts into `dir`, replacing stale copies.
pub fn materialize_scripts(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create scripts directory: {}", dir.display()))?;

    for script in EMBEDDED_SCRIPTS {
        let path = dir.join(format!("{}.R", script.id));
        let current = std::fs::read_to_string(&path).ok();
        if current.as_deref() != Some(script.source) {
            std::fs::write(&path, script.source)
                .with_context(|| format!("Failed to write script: {}", path.display()))?;
        }
    }
    Ok(())
}

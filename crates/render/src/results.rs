//! Persisting the ledger for post-hoc inspection.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use kpipe_core::{Error, Resource, ResultList};
use kpipe_fnruntime::Reporter;
use tracing::{error, info};

use crate::hydrate::PackageOutput;

pub const RESULTS_FILE: &str = "results.yaml";

/// Write `results` to `<dir>/results.yaml`, creating `dir` if needed.
pub fn write_results(dir: &Path, results: &ResultList) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating results dir {}", dir.display()))?;
    let path = dir.join(RESULTS_FILE);
    std::fs::write(&path, results.to_yaml()?).with_context(|| format!("writing {}", path.display()))?;
    info!(path = %path.display(), entries = results.len(), exit_code = results.exit_code(), "wrote function results");
    Ok(path)
}

impl PackageOutput {
    /// Write the ledger to `results_dir` when one is set, then hand back the
    /// resources or the error that halted the pipeline. A failed pipeline
    /// still leaves its ledger behind. Failing to write the ledger is logged
    /// and does not replace the pipeline outcome.
    pub fn persist_then_surface(
        self,
        results_dir: Option<&Path>,
        reporter: &mut dyn Reporter,
    ) -> Result<Vec<Resource>, Error> {
        if let Some(dir) = results_dir {
            match write_results(dir, &self.results) {
                Ok(path) => reporter.write_out(&format!("For complete results, see {}\n", path.display())),
                Err(e) => error!(error = %format!("{:#}", e), "failed to write function results"),
            }
        }
        self.resources
    }
}

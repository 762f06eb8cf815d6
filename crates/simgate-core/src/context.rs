//! Execution context resolution.
//!
//! The builder is the single point where absent inputs and a broken folder
//! layout turn into typed errors, before any engine process is considered.

use crate::config::FolderNames;
use crate::error::{Result, SimgateError};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Resolved, validated paths for one subsystem run. Immutable once built.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExecutionContext {
    subsystem: String,
    base_root: PathBuf,
    test_suite_dir: PathBuf,
    results_dir: PathBuf,
}

impl ExecutionContext {
    pub fn subsystem(&self) -> &str {
        &self.subsystem
    }

    pub fn base_root(&self) -> &Path {
        &self.base_root
    }

    /// `<baseRoot>/<subsystem>`; the engine's working directory.
    pub fn subsystem_root(&self) -> PathBuf {
        self.base_root.join(&self.subsystem)
    }

    pub fn test_suite_dir(&self) -> &Path {
        &self.test_suite_dir
    }

    pub fn results_dir(&self) -> &Path {
        &self.results_dir
    }
}

/// Resolve and validate the folders for `subsystem` under `base_root`.
///
/// Fails with `MissingInput` when either input is absent or blank and with
/// `InvalidLayout` when an expected directory does not exist or the results
/// directory is read-only.
pub fn build_context(
    subsystem: Option<&str>,
    base_root: Option<&Path>,
    folders: &FolderNames,
) -> Result<ExecutionContext> {
    let subsystem = subsystem
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| SimgateError::MissingInput("subsystem name".to_string()))?;
    let base_root = base_root
        .filter(|p| !p.as_os_str().is_empty())
        .ok_or_else(|| SimgateError::MissingInput("base path".to_string()))?;

    if subsystem.contains(|c: char| c == '/' || c == '\\') || subsystem == "." || subsystem == ".." {
        return Err(SimgateError::InvalidLayout {
            path: base_root.join(subsystem),
            reason: "subsystem name must be a single folder name".to_string(),
        });
    }

    require_dir(base_root, "base path")?;
    let subsystem_root = base_root.join(subsystem);
    require_dir(&subsystem_root, "subsystem folder")?;

    let test_suite_dir = subsystem_root.join(&folders.test_suites);
    require_dir(&test_suite_dir, "test-suite folder")?;

    let results_dir = subsystem_root.join(&folders.test_results);
    require_dir(&results_dir, "results folder")?;
    if std::fs::metadata(&results_dir)?.permissions().readonly() {
        return Err(SimgateError::InvalidLayout {
            path: results_dir,
            reason: "results folder is read-only".to_string(),
        });
    }

    Ok(ExecutionContext {
        subsystem: subsystem.to_string(),
        base_root: base_root.to_path_buf(),
        test_suite_dir,
        results_dir,
    })
}

fn require_dir(path: &Path, what: &str) -> Result<()> {
    if path.is_dir() {
        Ok(())
    } else {
        Err(SimgateError::InvalidLayout {
            path: path.to_path_buf(),
            reason: format!("{} does not exist", what),
        })
    }
}

//! Test-suite artifact selection.

use crate::config::normalize_extension;
use crate::error::{Result, SimgateError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// A candidate test-suite file and its modification time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestSuiteArtifact {
    pub path: PathBuf,
    pub modified: SystemTime,
}

impl TestSuiteArtifact {
    /// File name without its extension; the stem of the export file name.
    pub fn base_name(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn file_name(&self) -> &std::ffi::OsStr {
        self.path.file_name().unwrap_or_default()
    }
}

/// Pick the newest suite file directly inside `dir`.
///
/// Candidates are regular files whose extension matches `extension`
/// (ASCII case-insensitive, leading dot optional). Ordering is modification
/// time descending, then file name ascending, so ties resolve the same way on
/// every platform.
pub fn select_latest(dir: &Path, extension: &str) -> Result<TestSuiteArtifact> {
    let extension = normalize_extension(extension);
    let no_artifact = || SimgateError::NoArtifactFound {
        dir: dir.to_path_buf(),
        extension: extension.to_string(),
    };

    if !dir.is_dir() {
        return Err(no_artifact());
    }

    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();

        let matches = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(extension));
        if !matches {
            continue;
        }

        // Follows symlinks, unlike `DirEntry::metadata`. Dangling links and
        // files removed mid-scan are not candidates.
        let metadata = match std::fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "skipping vanished suite candidate");
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        if !metadata.is_file() {
            continue;
        }

        candidates.push(TestSuiteArtifact {
            path,
            modified: metadata.modified()?,
        });
    }

    candidates.sort_by(|a, b| {
        b.modified
            .cmp(&a.modified)
            .then_with(|| a.file_name().cmp(b.file_name()))
    });

    candidates.into_iter().next().ok_or_else(no_artifact)
}

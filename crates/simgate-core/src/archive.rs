//! Result export naming and validation.
//!
//! The destination is computed once, immediately before invocation, and the
//! same path is validated afterwards. It is never recomputed.

use crate::error::{Result, SimgateError};
use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Timestamp layout embedded in export file names.
pub const TIMESTAMP_FORMAT: &str = "%Y_%m_%d_%H%M%S";

/// Upper bound on collision suffixes tried for a single second.
const MAX_COLLISION_SUFFIX: u32 = 999;

/// Source of the export timestamp.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// Local wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A clock frozen at one reading.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// `<resultsDir>/<baseName>_<YYYY_MM_DD_HHMMSS>_results.<ext>`
///
/// Pure: the same inputs always give the same path.
pub fn compute_destination(
    results_dir: &Path,
    base_name: &str,
    extension: &str,
    produced_at: NaiveDateTime,
) -> PathBuf {
    destination_with_suffix(results_dir, base_name, extension, produced_at, None)
}

fn destination_with_suffix(
    results_dir: &Path,
    base_name: &str,
    extension: &str,
    produced_at: NaiveDateTime,
    suffix: Option<u32>,
) -> PathBuf {
    let stamp = produced_at.format(TIMESTAMP_FORMAT);
    let extension = crate::config::normalize_extension(extension);
    let file_name = match suffix {
        Some(n) => format!("{}_{}_{}_results.{}", base_name, stamp, n, extension),
        None => format!("{}_{}_results.{}", base_name, stamp, extension),
    };
    results_dir.join(file_name)
}

/// Whether an export exists at `path` and is non-empty.
pub fn validate(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

/// A destination reserved for one invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultArchive {
    pub destination: PathBuf,
    pub produced_at: NaiveDateTime,
}

impl ResultArchive {
    /// Read `clock` once and pick a destination that does not exist yet.
    ///
    /// When the plain name is taken (another run in the same second), `_1`,
    /// `_2`, ... is inserted after the timestamp so no earlier export is
    /// overwritten.
    pub fn prepare(
        results_dir: &Path,
        base_name: &str,
        extension: &str,
        clock: &dyn Clock,
    ) -> Result<Self> {
        let produced_at = clock.now();

        let mut destination = compute_destination(results_dir, base_name, extension, produced_at);
        let mut suffix = 0;
        while destination.exists() {
            suffix += 1;
            if suffix > MAX_COLLISION_SUFFIX {
                return Err(SimgateError::Io(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!("no free export name for {} at {}", base_name, produced_at),
                )));
            }
            destination = destination_with_suffix(
                results_dir,
                base_name,
                extension,
                produced_at,
                Some(suffix),
            );
        }

        Ok(Self {
            destination,
            produced_at,
        })
    }

    /// Check the reserved destination after the engine exited.
    pub fn validate(&self) -> bool {
        validate(&self.destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_destination_layout() {
        let path = compute_destination(Path::new("/r"), "BrakeSuite", ".mldatx", at(9, 5, 3));
        assert_eq!(
            path,
            PathBuf::from("/r/BrakeSuite_2024_03_07_090503_results.mldatx")
        );
    }

    #[test]
    fn test_destination_is_stable_for_same_reading() {
        let clock = FixedClock(at(23, 59, 59));
        let a = compute_destination(Path::new("/r"), "s", "mldatx", clock.now());
        let b = compute_destination(Path::new("/r"), "s", "mldatx", clock.now());
        assert_eq!(a, b);
    }

    #[test]
    fn test_prepare_reuses_single_reading() {
        let dir = tempfile::tempdir().unwrap();
        let archive =
            ResultArchive::prepare(dir.path(), "suite", "mldatx", &FixedClock(at(1, 2, 3))).unwrap();

        assert_eq!(archive.produced_at, at(1, 2, 3));
        assert_eq!(
            archive.destination,
            compute_destination(dir.path(), "suite", "mldatx", archive.produced_at)
        );
    }

    #[test]
    fn test_prepare_avoids_existing_export() {
        let dir = tempfile::tempdir().unwrap();
        let clock = FixedClock(at(1, 2, 3));

        let first = ResultArchive::prepare(dir.path(), "suite", "mldatx", &clock).unwrap();
        std::fs::write(&first.destination, b"previous run").unwrap();

        let second = ResultArchive::prepare(dir.path(), "suite", "mldatx", &clock).unwrap();
        assert_ne!(first.destination, second.destination);
        assert!(second
            .destination
            .ends_with("suite_2024_03_07_010203_1_results.mldatx"));
        assert_eq!(std::fs::read(&first.destination).unwrap(), b"previous run");
    }

    #[test]
    fn test_validate_requires_non_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mldatx");
        assert!(!validate(&path));

        std::fs::write(&path, b"").unwrap();
        assert!(!validate(&path));

        std::fs::write(&path, b"snapshot").unwrap();
        assert!(validate(&path));

        assert!(!validate(dir.path()));
    }
}

//! Error taxonomy for simgate.
//!
//! Every variant resolves to an `Outcome::Error` at the subsystem level; none of
//! them may be reported as a pass.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Copyable discriminant of [`SimgateError`], used in reports and verdicts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    MissingInput,
    InvalidLayout,
    InvalidConfig,
    NoArtifactFound,
    LaunchFailed,
    TimeoutKilled,
    UnexpectedExitCode,
    ExportMissing,
    Cancelled,
    Io,
}

impl ErrorKind {
    /// Bare taxonomy name (e.g. `MissingInput`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingInput => "MissingInput",
            ErrorKind::InvalidLayout => "InvalidLayout",
            ErrorKind::InvalidConfig => "InvalidConfig",
            ErrorKind::NoArtifactFound => "NoArtifactFound",
            ErrorKind::LaunchFailed => "LaunchFailed",
            ErrorKind::TimeoutKilled => "TimeoutKilled",
            ErrorKind::UnexpectedExitCode => "UnexpectedExitCode",
            ErrorKind::ExportMissing => "ExportMissing",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Io => "Io",
        }
    }

    /// Whether a failure of this kind may be retried by the coordinator.
    ///
    /// Only launch failures qualify; anything that reached the engine is final.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::LaunchFailed)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced by simgate components.
#[derive(Debug, thiserror::Error)]
pub enum SimgateError {
    #[error("missing input: {0}")]
    MissingInput(String),

    #[error("invalid layout: {path} ({reason})")]
    InvalidLayout { path: PathBuf, reason: String },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("no artifact with extension .{extension} found in {}", dir.display())]
    NoArtifactFound { dir: PathBuf, extension: String },

    #[error("failed to launch engine {program}: {reason}")]
    LaunchFailed { program: String, reason: String },

    #[error("engine killed after exceeding its timeout ({elapsed_ms}ms)")]
    TimeoutKilled { elapsed_ms: u64 },

    #[error("unexpected exit code {0}")]
    UnexpectedExitCode(i32),

    #[error("results export missing: {}", path.display())]
    ExportMissing { path: PathBuf },

    #[error("run cancelled")]
    Cancelled,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SimgateError {
    /// Taxonomy discriminant of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SimgateError::MissingInput(_) => ErrorKind::MissingInput,
            SimgateError::InvalidLayout { .. } => ErrorKind::InvalidLayout,
            SimgateError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            SimgateError::NoArtifactFound { .. } => ErrorKind::NoArtifactFound,
            SimgateError::LaunchFailed { .. } => ErrorKind::LaunchFailed,
            SimgateError::TimeoutKilled { .. } => ErrorKind::TimeoutKilled,
            SimgateError::UnexpectedExitCode(_) => ErrorKind::UnexpectedExitCode,
            SimgateError::ExportMissing { .. } => ErrorKind::ExportMissing,
            SimgateError::Cancelled => ErrorKind::Cancelled,
            SimgateError::Io(_) | SimgateError::Serialization(_) => ErrorKind::Io,
        }
    }
}

/// Result type for simgate operations.
pub type Result<T> = std::result::Result<T, SimgateError>;

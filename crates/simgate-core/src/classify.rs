//! Tri-state result classification.
//!
//! | raw exit code | outcome |
//! |---|---|
//! | 0 | Passed |
//! | 1 | Failed |
//! | anything else, kill sentinel included | Error |

use crate::error::{ErrorKind, SimgateError};
use crate::invoker::{InvocationResult, KillReason, KILLED_EXIT_CODE};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Max stderr lines quoted in an error reason.
const TAIL_LINES: usize = 5;
/// Max characters quoted in an error reason.
const TAIL_CHARS: usize = 500;

/// Outcome of one subsystem run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
    Error { kind: ErrorKind, reason: String },
}

impl Outcome {
    pub fn error(kind: ErrorKind, reason: impl Into<String>) -> Self {
        Outcome::Error {
            kind,
            reason: reason.into(),
        }
    }

    /// The Error outcome a failed stage resolves to.
    pub fn from_error(err: &SimgateError) -> Self {
        Outcome::error(err.kind(), err.to_string())
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, Outcome::Passed)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error { .. })
    }

    /// The error kind, for Error outcomes.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Severity rank: Passed < Failed < Error.
    pub fn severity(&self) -> u8 {
        match self {
            Outcome::Passed => 0,
            Outcome::Failed => 1,
            Outcome::Error { .. } => 2,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Passed => f.write_str("Passed"),
            Outcome::Failed => f.write_str("Failed"),
            Outcome::Error { kind, reason } => write!(f, "Error({}): {}", kind, reason),
        }
    }
}

/// Map an engine's termination into an [`Outcome`]. Total and deterministic.
pub fn classify(result: &InvocationResult) -> Outcome {
    if let Some(reason) = result.kill_reason {
        return killed(reason, result.duration_ms);
    }

    match result.raw_exit_code {
        0 => Outcome::Passed,
        1 => Outcome::Failed,
        KILLED_EXIT_CODE => killed(KillReason::Timeout, result.duration_ms),
        code => {
            match stderr_tail(&result.stderr) {
                Some(tail) => Outcome::error(
                    ErrorKind::UnexpectedExitCode,
                    format!("exit code {}: {}", code, tail),
                ),
                None => Outcome::from_error(&SimgateError::UnexpectedExitCode(code)),
            }
        }
    }
}

fn killed(reason: KillReason, elapsed_ms: u64) -> Outcome {
    match reason {
        KillReason::Timeout => Outcome::from_error(&SimgateError::TimeoutKilled { elapsed_ms }),
        KillReason::Cancelled => Outcome::from_error(&SimgateError::Cancelled),
    }
}

/// Last few non-empty stderr lines, trimmed to a short reason string.
pub fn stderr_tail(stderr: &str) -> Option<String> {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim_end)
        .filter(|l| !l.trim().is_empty())
        .collect();
    if lines.is_empty() {
        return None;
    }

    let tail = lines[lines.len().saturating_sub(TAIL_LINES)..].join("\n");
    let char_count = tail.chars().count();
    if char_count <= TAIL_CHARS {
        return Some(tail);
    }
    Some(tail.chars().skip(char_count - TAIL_CHARS).collect())
}

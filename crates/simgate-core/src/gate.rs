//! Pipeline verdict and exit code.

use crate::classify::Outcome;
use crate::report::RunReport;
use serde::{Deserialize, Serialize};

/// Every subsystem passed.
pub const EXIT_PASSED: i32 = 0;
/// At least one subsystem failed and none errored.
pub const EXIT_FAILED: i32 = 1;
/// At least one subsystem errored, or nothing was recorded.
pub const EXIT_ERROR: i32 = 2;

/// Aggregate verdict over a finished run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineVerdict {
    /// Exit code surfaced to the pipeline.
    pub exit_code: i32,

    pub passed: usize,

    pub failed: usize,

    pub errored: usize,

    /// One line per subsystem that did not pass.
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

impl PipelineVerdict {
    /// Rank the recorded outcomes. Error dominates Failed, Failed dominates
    /// Passed. A report with no entries is treated as an error.
    pub fn from_report(report: &RunReport) -> Self {
        let mut verdict = Self::from_outcomes(
            report
                .subsystems
                .iter()
                .map(|s| (s.subsystem.as_str(), &s.outcome)),
        );
        if report.cancelled {
            verdict.violations.push("run cancelled".to_string());
            verdict.exit_code = EXIT_ERROR;
            verdict.message = format!("{} (cancelled)", verdict.message);
        }
        verdict
    }

    /// Same ranking over bare `(subsystem, outcome)` pairs.
    pub fn from_outcomes<'a, I>(outcomes: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a Outcome)>,
    {
        let mut passed = 0;
        let mut failed = 0;
        let mut errored = 0;
        let mut violations = Vec::new();

        for (subsystem, outcome) in outcomes {
            match outcome {
                Outcome::Passed => passed += 1,
                Outcome::Failed => {
                    failed += 1;
                    violations.push(format!("Subsystem '{}' failed", subsystem));
                }
                Outcome::Error { kind, reason } => {
                    errored += 1;
                    violations.push(format!(
                        "Subsystem '{}' errored ({}): {}",
                        subsystem, kind, reason
                    ));
                }
            }
        }

        let total = passed + failed + errored;
        let exit_code = if errored > 0 || total == 0 {
            EXIT_ERROR
        } else if failed > 0 {
            EXIT_FAILED
        } else {
            EXIT_PASSED
        };

        let message = match exit_code {
            EXIT_PASSED => format!("All {} subsystem(s) passed", passed),
            _ if total == 0 => "No subsystem outcome recorded".to_string(),
            _ => format!(
                "{} passed, {} failed, {} errored",
                passed, failed, errored
            ),
        };

        Self {
            exit_code,
            passed,
            failed,
            errored,
            violations,
            message,
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code == EXIT_PASSED
    }
}

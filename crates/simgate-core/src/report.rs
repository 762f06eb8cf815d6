//! Run-level report.

use crate::classify::Outcome;
use crate::coordinator::SubsystemStage;
use crate::error::Result;
use crate::gate::PipelineVerdict;
use crate::plan::RunPlan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// What happened to one subsystem.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubsystemReport {
    /// Subsystem name (or `<unset>`).
    pub subsystem: String,

    pub outcome: Outcome,

    /// Last stage completed before the run for this subsystem was finalized.
    pub stage_reached: SubsystemStage,

    /// Selected test-suite artifact.
    pub artifact: Option<PathBuf>,

    /// Reserved export destination.
    pub results_file: Option<PathBuf>,

    /// Engine launch attempts (0 when the engine was never launched).
    pub attempts: u32,

    /// Raw engine exit code, when the engine ran.
    pub raw_exit_code: Option<i32>,

    pub started_at: DateTime<Utc>,

    pub duration_ms: u64,

    /// Captured engine stdout, kept for diagnostics only.
    pub stdout: String,

    /// Captured engine stderr, kept for diagnostics only.
    pub stderr: String,
}

/// Aggregate of one run, in caller order. Finalized once; never mutated by
/// the coordinator afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub run_id: Uuid,

    pub plan: RunPlan,

    pub started_at: DateTime<Utc>,

    pub finished_at: DateTime<Utc>,

    pub duration_ms: u64,

    /// Set when cancellation stopped the run before every subsystem ran.
    pub cancelled: bool,

    pub subsystems: Vec<SubsystemReport>,
}

impl RunReport {
    /// Outcome recorded for `subsystem`.
    pub fn outcome_of(&self, subsystem: &str) -> Option<&Outcome> {
        self.subsystems
            .iter()
            .find(|s| s.subsystem == subsystem)
            .map(|s| &s.outcome)
    }

    /// `(subsystem, outcome)` pairs in processing order.
    pub fn outcomes(&self) -> impl Iterator<Item = (&str, &Outcome)> {
        self.subsystems
            .iter()
            .map(|s| (s.subsystem.as_str(), &s.outcome))
    }

    pub fn verdict(&self) -> PipelineVerdict {
        PipelineVerdict::from_report(self)
    }

    /// Exit code for the pipeline: 0 passed, 1 failed, 2 errored.
    pub fn exit_code(&self) -> i32 {
        self.verdict().exit_code
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report as pretty JSON, creating parent directories.
    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json_pretty()?)?;
        Ok(())
    }

    /// Human-readable summary, one line per subsystem.
    pub fn render_summary(&self) -> String {
        let verdict = self.verdict();
        let mut out = String::new();

        let _ = writeln!(
            out,
            "Run {} (plan {})",
            self.run_id,
            self.plan.short_digest()
        );
        for entry in &self.subsystems {
            let mark = match entry.outcome {
                Outcome::Passed => "✓",
                Outcome::Failed => "✗",
                Outcome::Error { .. } => "!",
            };
            let _ = writeln!(
                out,
                "  {} {} {} ({}ms)",
                mark, entry.subsystem, entry.outcome, entry.duration_ms
            );
            if let Some(results) = &entry.results_file {
                if !entry.outcome.is_error() {
                    let _ = writeln!(out, "      results: {}", results.display());
                }
            }
        }
        if self.cancelled {
            let _ = writeln!(out, "  (cancelled before all subsystems ran)");
        }
        let _ = writeln!(out, "{} (exit code {})", verdict.message, verdict.exit_code);
        out
    }
}

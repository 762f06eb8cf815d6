//! Structured lifecycle events for simgate runs.
//!
//! This module provides:
//! - Run- and subsystem-scoped tracing spans
//! - Emission functions for key lifecycle events: run start/finish, subsystem
//!   stages, engine launches and retries
//!
//! Events are emitted at `info!` level (configurable via `RUST_LOG`).

use crate::classify::Outcome;
use tracing::{debug, info, warn, Span};

/// Span tagged with the run id; attach with `tracing::Instrument`.
///
/// # Example
///
/// ```ignore
/// async { /* ... */ }.instrument(run_span("6f1c...")).await;
/// ```
pub fn run_span(run_id: &str) -> Span {
    tracing::info_span!("simgate.run", run_id = %run_id)
}

/// Span tagged with the subsystem being processed.
pub fn subsystem_span(subsystem: &str) -> Span {
    tracing::info_span!("simgate.subsystem", subsystem = %subsystem)
}

/// Emit event: run started.
pub fn emit_run_started(run_id: &str, plan_digest: &str, subsystems: usize) {
    info!(
        event = "run.started",
        run_id = %run_id,
        plan_digest = %plan_digest,
        subsystems = subsystems,
    );
}

/// Emit event: run finished with its aggregate exit code.
pub fn emit_run_finished(run_id: &str, duration_ms: u64, exit_code: i32, cancelled: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        exit_code = exit_code,
        cancelled = cancelled,
    );
}

/// Emit event: cancellation observed; no further subsystems will start.
pub fn emit_run_cancelled(run_id: &str, remaining: usize) {
    warn!(event = "run.cancelled", run_id = %run_id, remaining = remaining);
}

/// Emit event: a subsystem left `Pending`.
pub fn emit_subsystem_started(subsystem: &str) {
    info!(event = "subsystem.started", subsystem = %subsystem);
}

/// Emit event: a subsystem advanced to a new stage.
pub fn emit_subsystem_stage(subsystem: &str, stage: &str) {
    debug!(event = "subsystem.stage", subsystem = %subsystem, stage = %stage);
}

/// Emit event: the engine is being launched.
pub fn emit_engine_launched(subsystem: &str, program: &str, attempt: u32) {
    info!(
        event = "engine.launched",
        subsystem = %subsystem,
        program = %program,
        attempt = attempt,
    );
}

/// Emit event: a launch failure will be retried.
pub fn emit_engine_retry(subsystem: &str, attempt: u32, error: &dyn std::fmt::Display) {
    warn!(
        event = "engine.retry",
        subsystem = %subsystem,
        attempt = attempt,
        error = %error,
    );
}

/// Emit event: the subsystem's outcome was recorded.
pub fn emit_subsystem_finished(subsystem: &str, outcome: &Outcome, duration_ms: u64) {
    match outcome {
        Outcome::Error { kind, reason } => warn!(
            event = "subsystem.finished",
            subsystem = %subsystem,
            outcome = "error",
            kind = %kind,
            reason = %reason,
            duration_ms = duration_ms,
        ),
        other => info!(
            event = "subsystem.finished",
            subsystem = %subsystem,
            outcome = %other,
            duration_ms = duration_ms,
        ),
    }
}

//! Run coordination.
//!
//! Subsystems are processed strictly one at a time, in caller order. Each one
//! walks `Pending → ContextBuilt → ArtifactSelected → Invoked → Classified →
//! Archived → Finalized`; any failure jumps straight to `Finalized` with an
//! Error outcome. The engine keeps process-wide state, so the next subsystem
//! only starts after the previous engine process has fully terminated.

use crate::archive::{compute_destination, Clock, ResultArchive, SystemClock};
use crate::artifact::{select_latest, TestSuiteArtifact};
use crate::cancel::{CancelHandle, CancelSignal};
use crate::classify::{classify, Outcome};
use crate::config::{
    EngineConfig, HarnessConfig, RunInputs, ENV_BASE_PATH, ENV_CONFIG_FILE, ENV_SUBSYSTEM,
};
use crate::context::{build_context, ExecutionContext};
use crate::error::{ErrorKind, Result, SimgateError};
use crate::invoker::{Engine, InvocationRequest, InvocationResult};
use crate::obs;
use crate::plan::{RunPlan, UNSET_SUBSYSTEM};
use crate::report::{RunReport, SubsystemReport};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

/// Delay between a launch failure and its retry.
const DEFAULT_LAUNCH_BACKOFF: Duration = Duration::from_millis(500);

/// Per-subsystem lifecycle. Ordering follows the lifecycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SubsystemStage {
    Pending,
    ContextBuilt,
    ArtifactSelected,
    Invoked,
    Classified,
    Archived,
    Finalized,
}

impl SubsystemStage {
    pub fn name(&self) -> &'static str {
        match self {
            SubsystemStage::Pending => "Pending",
            SubsystemStage::ContextBuilt => "ContextBuilt",
            SubsystemStage::ArtifactSelected => "ArtifactSelected",
            SubsystemStage::Invoked => "Invoked",
            SubsystemStage::Classified => "Classified",
            SubsystemStage::Archived => "Archived",
            SubsystemStage::Finalized => "Finalized",
        }
    }
}

/// Forward-only stage tracking plus everything worth reporting for one
/// subsystem.
#[derive(Debug)]
struct SubsystemRun {
    key: String,
    stage: SubsystemStage,
    artifact: Option<PathBuf>,
    results_file: Option<PathBuf>,
    attempts: u32,
    result: Option<InvocationResult>,
}

impl SubsystemRun {
    fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
            stage: SubsystemStage::Pending,
            artifact: None,
            results_file: None,
            attempts: 0,
            result: None,
        }
    }

    fn advance(&mut self, next: SubsystemStage) {
        debug_assert!(next > self.stage, "stage went backwards: {:?} -> {:?}", self.stage, next);
        self.stage = next;
        obs::emit_subsystem_stage(&self.key, next.name());
    }
}

/// A subsystem that passed every precondition and is ready to launch.
struct Prepared<'a> {
    config: &'a HarnessConfig,
    context: ExecutionContext,
    artifact: TestSuiteArtifact,
}

/// Readiness of one subsystem without launching the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreflightEntry {
    pub subsystem: String,

    pub artifact: Option<PathBuf>,

    /// Where the export would go if the run started now.
    pub destination: Option<PathBuf>,

    /// Why the subsystem is not ready, if it is not.
    pub problem: Option<Outcome>,
}

impl PreflightEntry {
    pub fn is_ready(&self) -> bool {
        self.problem.is_none()
    }
}

/// Sequences subsystem runs and aggregates their outcomes.
pub struct RunCoordinator<E: Engine> {
    engine: E,
    clock: Arc<dyn Clock>,
    cancel: CancelHandle,
    launch_backoff: Duration,
    timeout_override: Option<Duration>,
}

impl<E: Engine> RunCoordinator<E> {
    pub fn new(engine: E) -> Self {
        Self {
            engine,
            clock: Arc::new(SystemClock),
            cancel: CancelHandle::new(),
            launch_backoff: DEFAULT_LAUNCH_BACKOFF,
            timeout_override: None,
        }
    }

    /// Use `clock` for export timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Observe an externally owned cancel handle.
    pub fn with_cancel_handle(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_launch_backoff(mut self, backoff: Duration) -> Self {
        self.launch_backoff = backoff;
        self
    }

    /// Override `engine.timeout_secs` from the config.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_override = Some(timeout);
        self
    }

    /// Handle that cancels runs started by this coordinator.
    ///
    /// A cancellation stops the run in progress, or the next run when it is
    /// requested between runs. Once it has stopped a run it is cleared, so
    /// the coordinator can be reused.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Load the config named by `inputs` and run every subsystem.
    ///
    /// Never fails: every problem becomes an Error outcome in the report.
    pub async fn run(&self, inputs: &RunInputs) -> RunReport {
        let config = load_config(inputs);
        self.run_loaded(inputs, config).await
    }

    /// Run every subsystem against an already loaded config.
    pub async fn run_with_config(&self, inputs: &RunInputs, config: HarnessConfig) -> RunReport {
        self.run_loaded(inputs, Ok(config)).await
    }

    async fn run_loaded(&self, inputs: &RunInputs, config: Result<HarnessConfig>) -> RunReport {
        let run_id = Uuid::new_v4();
        let plan = RunPlan::new(inputs);
        let span = obs::run_span(&run_id.to_string());

        async {
            let started_at = Utc::now();
            let start = Instant::now();
            let signal = self.cancel.signal();
            let keys = subsystem_keys(inputs);

            obs::emit_run_started(&run_id.to_string(), &plan.plan_digest, keys.len());

            let mut subsystems = Vec::with_capacity(keys.len());
            for (index, (key, name)) in keys.iter().enumerate() {
                if signal.is_cancelled() {
                    obs::emit_run_cancelled(&run_id.to_string(), keys.len() - index);
                    break;
                }

                let entry = self
                    .run_subsystem(key, name.as_deref(), inputs, &config, &signal)
                    .instrument(obs::subsystem_span(key))
                    .await;
                subsystems.push(entry);
            }

            let cancelled = subsystems.len() < keys.len()
                || subsystems
                    .iter()
                    .any(|s| s.outcome.error_kind() == Some(ErrorKind::Cancelled));

            let report = RunReport {
                run_id,
                plan: plan.clone(),
                started_at,
                finished_at: Utc::now(),
                duration_ms: start.elapsed().as_millis() as u64,
                cancelled,
                subsystems,
            };
            obs::emit_run_finished(
                &run_id.to_string(),
                report.duration_ms,
                report.exit_code(),
                report.cancelled,
            );
            if report.cancelled {
                self.cancel.reset();
            }
            report
        }
        .instrument(span)
        .await
    }

    async fn run_subsystem(
        &self,
        key: &str,
        name: Option<&str>,
        inputs: &RunInputs,
        config: &Result<HarnessConfig>,
        signal: &CancelSignal,
    ) -> SubsystemReport {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut run = SubsystemRun::new(key);
        obs::emit_subsystem_started(key);

        let outcome = match self.drive(&mut run, name, inputs, config, signal).await {
            Ok(outcome) => outcome,
            Err(e) => Outcome::from_error(&e),
        };

        let stage_reached = run.stage;
        run.advance(SubsystemStage::Finalized);

        let duration_ms = start.elapsed().as_millis() as u64;
        obs::emit_subsystem_finished(key, &outcome, duration_ms);

        let (raw_exit_code, stdout, stderr) = match run.result {
            Some(r) => (Some(r.raw_exit_code), r.stdout, r.stderr),
            None => (None, String::new(), String::new()),
        };

        SubsystemReport {
            subsystem: run.key,
            outcome,
            stage_reached,
            artifact: run.artifact,
            results_file: run.results_file,
            attempts: run.attempts,
            raw_exit_code,
            started_at,
            duration_ms,
            stdout,
            stderr,
        }
    }

    async fn drive(
        &self,
        run: &mut SubsystemRun,
        name: Option<&str>,
        inputs: &RunInputs,
        config: &Result<HarnessConfig>,
        signal: &CancelSignal,
    ) -> Result<Outcome> {
        let Prepared {
            config,
            context,
            artifact,
        } = prepare(run, name, inputs, config)?;

        let archive = ResultArchive::prepare(
            context.results_dir(),
            &artifact.base_name(),
            config.extension(),
            self.clock.as_ref(),
        )?;
        run.results_file = Some(archive.destination.clone());

        if signal.is_cancelled() {
            return Err(SimgateError::Cancelled);
        }

        let request = InvocationRequest {
            context,
            artifact,
            destination: archive.destination.clone(),
            config_file: inputs.config_file.clone(),
            timeout: self
                .timeout_override
                .unwrap_or(Duration::from_secs(config.engine.timeout_secs)),
        };

        let result = self
            .invoke_with_retry(run, &config.engine, &request, signal)
            .await?;
        run.advance(SubsystemStage::Invoked);

        let outcome = classify(&result);
        run.result = Some(result);
        run.advance(SubsystemStage::Classified);

        // Crashed before export: nothing to validate.
        if outcome.is_error() {
            return Ok(outcome);
        }

        if !archive.validate() {
            return Err(SimgateError::ExportMissing {
                path: archive.destination,
            });
        }
        run.advance(SubsystemStage::Archived);

        Ok(outcome)
    }

    /// Launch the engine, retrying only launch failures and only up to the
    /// configured bound.
    async fn invoke_with_retry(
        &self,
        run: &mut SubsystemRun,
        engine: &EngineConfig,
        request: &InvocationRequest,
        signal: &CancelSignal,
    ) -> Result<InvocationResult> {
        let max_attempts = engine.effective_launch_retries() + 1;

        loop {
            run.attempts += 1;
            obs::emit_engine_launched(&run.key, &engine.program, run.attempts);

            match self.engine.invoke(engine, request, signal).await {
                Ok(result) => return Ok(result),
                Err(e)
                    if e.kind().is_transient()
                        && run.attempts < max_attempts
                        && !signal.is_cancelled() =>
                {
                    obs::emit_engine_retry(&run.key, run.attempts, &e);
                    tokio::select! {
                        _ = tokio::time::sleep(self.launch_backoff) => {}
                        _ = signal.cancelled() => return Err(SimgateError::Cancelled),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Resolve every subsystem up to artifact selection without launching the
    /// engine.
    pub fn preflight(&self, inputs: &RunInputs) -> Vec<PreflightEntry> {
        let config = load_config(inputs);

        subsystem_keys(inputs)
            .into_iter()
            .map(|(key, name)| {
                let mut run = SubsystemRun::new(&key);
                match prepare(&mut run, name.as_deref(), inputs, &config) {
                    Ok(Prepared {
                        config,
                        context,
                        artifact,
                    }) => {
                        let destination = compute_destination(
                            context.results_dir(),
                            &artifact.base_name(),
                            config.extension(),
                            self.clock.now(),
                        );
                        PreflightEntry {
                            subsystem: key,
                            artifact: Some(artifact.path),
                            destination: Some(destination),
                            problem: None,
                        }
                    }
                    Err(e) => PreflightEntry {
                        subsystem: key,
                        artifact: None,
                        destination: None,
                        problem: Some(Outcome::from_error(&e)),
                    },
                }
            })
            .collect()
    }
}

fn load_config(inputs: &RunInputs) -> Result<HarnessConfig> {
    match &inputs.config_file {
        Some(path) => HarnessConfig::load(path),
        None => Err(SimgateError::MissingInput(format!("{} is not set", ENV_CONFIG_FILE))),
    }
}

/// `(report key, subsystem name)` pairs; a single `<unset>` entry when no
/// subsystem was named.
fn subsystem_keys(inputs: &RunInputs) -> Vec<(String, Option<String>)> {
    if inputs.subsystems.is_empty() {
        vec![(UNSET_SUBSYSTEM.to_string(), None)]
    } else {
        inputs
            .subsystems
            .iter()
            .map(|s| (s.clone(), Some(s.clone())))
            .collect()
    }
}

/// Every check that must pass before an engine launch is worth attempting.
fn prepare<'a>(
    run: &mut SubsystemRun,
    name: Option<&str>,
    inputs: &RunInputs,
    config: &'a Result<HarnessConfig>,
) -> Result<Prepared<'a>> {
    let name = name
        .ok_or_else(|| SimgateError::MissingInput(format!("{} is not set", ENV_SUBSYSTEM)))?;
    let base_root = inputs
        .base_root
        .as_deref()
        .ok_or_else(|| SimgateError::MissingInput(format!("{} is not set", ENV_BASE_PATH)))?;
    let config = match config {
        Ok(config) => config,
        Err(e) => return Err(replay_error(e)),
    };

    let context = build_context(Some(name), Some(base_root), &config.folders)?;
    run.advance(SubsystemStage::ContextBuilt);

    let artifact = select_latest(context.test_suite_dir(), config.extension())?;
    run.artifact = Some(artifact.path.clone());
    run.advance(SubsystemStage::ArtifactSelected);

    Ok(Prepared {
        config,
        context,
        artifact,
    })
}

/// Config errors are shared by every subsystem of a run; give each one its
/// own copy.
fn replay_error(err: &SimgateError) -> SimgateError {
    match err {
        SimgateError::MissingInput(msg) => SimgateError::MissingInput(msg.clone()),
        SimgateError::InvalidConfig(msg) => SimgateError::InvalidConfig(msg.clone()),
        other => SimgateError::InvalidConfig(other.to_string()),
    }
}

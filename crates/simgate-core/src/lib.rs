//! Simgate Core Library
//!
//! Runs a simulation test engine once per subsystem, in order, and turns each
//! run into a Passed / Failed / Error outcome plus a timestamped results export.

pub mod archive;
pub mod artifact;
pub mod cancel;
pub mod classify;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod invoker;
pub mod obs;
pub mod plan;
pub mod report;
pub mod telemetry;

pub use archive::{compute_destination, Clock, FixedClock, ResultArchive, SystemClock};
pub use artifact::{select_latest, TestSuiteArtifact};
pub use cancel::{CancelHandle, CancelSignal};
pub use classify::{classify, Outcome};
pub use config::{EngineConfig, FolderNames, HarnessConfig, RunInputs};
pub use context::{build_context, ExecutionContext};
pub use coordinator::{PreflightEntry, RunCoordinator, SubsystemStage};
pub use error::{ErrorKind, Result, SimgateError};
pub use gate::PipelineVerdict;
pub use invoker::{Engine, InvocationRequest, InvocationResult, KillReason, ProcessEngine};
pub use plan::RunPlan;
pub use report::{RunReport, SubsystemReport};
pub use telemetry::init_tracing;

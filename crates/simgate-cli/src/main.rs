//! Simgate - simulation test gate CLI
//!
//! The `simgate` command runs a simulation test engine once per subsystem and
//! turns each run into a Passed / Failed / Error outcome for the pipeline.
//!
//! ## Commands
//!
//! - `run`: run every subsystem and exit with the verdict code
//! - `select`: show which test suite a folder would yield
//! - `check`: validate inputs and folder layout without launching the engine

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use simgate_core::config::{ENV_BASE_PATH, ENV_CONFIG_FILE, ENV_SUBSYSTEM};
use simgate_core::gate::{EXIT_ERROR, EXIT_PASSED};
use simgate_core::{select_latest, PreflightEntry, ProcessEngine, RunCoordinator, RunInputs};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, warn, Level};

#[derive(Parser)]
#[command(name = "simgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Simulation test gate for CI pipelines", long_about = None)]
struct Cli {
    /// Enable verbose output (engine output lines included)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine for every subsystem and exit with the verdict code
    Run {
        #[command(flatten)]
        inputs: InputArgs,

        /// Override engine.timeout_secs from the config
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Write the run report as JSON to this path
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Print the test suite that would be selected from a folder
    Select {
        /// Folder to scan (not recursive)
        #[arg(long)]
        dir: PathBuf,

        /// Suite file extension, leading dot optional
        #[arg(long, default_value = "mldatx")]
        extension: String,
    },

    /// Resolve every subsystem without launching the engine
    Check {
        #[command(flatten)]
        inputs: InputArgs,
    },
}

/// Run inputs; each flag falls back to its environment variable.
#[derive(Args, Debug, Clone, Default)]
struct InputArgs {
    /// Subsystem name, or a comma-separated ordered list
    #[arg(long, env = ENV_SUBSYSTEM)]
    subsystem: Option<String>,

    /// Base root holding one folder per subsystem
    #[arg(long, env = ENV_BASE_PATH)]
    base_path: Option<PathBuf>,

    /// Configuration file (TOML, or JSON when it ends in .json)
    #[arg(long = "config", env = ENV_CONFIG_FILE)]
    config: Option<PathBuf>,
}

impl InputArgs {
    fn to_inputs(&self) -> RunInputs {
        RunInputs::from_lookup(|key| match key {
            ENV_SUBSYSTEM => self.subsystem.clone(),
            ENV_BASE_PATH => self
                .base_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            ENV_CONFIG_FILE => self
                .config
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            _ => None,
        })
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    simgate_core::init_tracing(cli.json, level);

    let code = match dispatch(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            EXIT_ERROR
        }
    };
    std::process::exit(code);
}

async fn dispatch(command: Commands) -> Result<i32> {
    match command {
        Commands::Run {
            inputs,
            timeout_secs,
            report,
        } => cmd_run(&inputs.to_inputs(), timeout_secs, report.as_deref()).await,
        Commands::Select { dir, extension } => cmd_select(&dir, &extension),
        Commands::Check { inputs } => cmd_check(&inputs.to_inputs()),
    }
}

async fn cmd_run(
    inputs: &RunInputs,
    timeout_secs: Option<u64>,
    report_path: Option<&Path>,
) -> Result<i32> {
    let mut coordinator = RunCoordinator::new(ProcessEngine);
    if let Some(secs) = timeout_secs {
        anyhow::ensure!(secs > 0, "--timeout-secs must be greater than zero");
        coordinator = coordinator.with_timeout(Duration::from_secs(secs));
    }

    let cancel = coordinator.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling run");
            cancel.cancel();
        }
    });

    let report = coordinator.run(inputs).await;
    print!("{}", report.render_summary());

    if let Some(path) = report_path {
        if let Err(e) = report.write_json(path) {
            error!(path = %path.display(), error = %e, "Failed to write run report");
            return Ok(EXIT_ERROR);
        }
        println!("Report: {}", path.display());
    }

    Ok(report.exit_code())
}

fn cmd_select(dir: &Path, extension: &str) -> Result<i32> {
    let artifact = select_latest(dir, extension)
        .with_context(|| format!("No test suite selected from {:?}", dir))?;
    println!("{}", artifact.path.display());
    Ok(EXIT_PASSED)
}

fn cmd_check(inputs: &RunInputs) -> Result<i32> {
    let entries = RunCoordinator::new(ProcessEngine).preflight(inputs);
    print!("{}", render_preflight(&entries));

    if entries.iter().all(PreflightEntry::is_ready) {
        Ok(EXIT_PASSED)
    } else {
        Ok(EXIT_ERROR)
    }
}

fn render_preflight(entries: &[PreflightEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        match &entry.problem {
            None => {
                let _ = writeln!(out, "  ✓ {}", entry.subsystem);
                if let Some(artifact) = &entry.artifact {
                    let _ = writeln!(out, "      suite:   {}", artifact.display());
                }
                if let Some(destination) = &entry.destination {
                    let _ = writeln!(out, "      results: {}", destination.display());
                }
            }
            Some(problem) => {
                let _ = writeln!(out, "  ! {} {}", entry.subsystem, problem);
            }
        }
    }

    let ready = entries.iter().filter(|e| e.is_ready()).count();
    let _ = writeln!(out, "{}/{} subsystem(s) ready", ready, entries.len());
    out
}

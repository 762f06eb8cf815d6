//! Engine invocation.
//!
//! The engine receives its context through process-visible variables, never
//! through positional arguments. Its output is drained line by line while it
//! runs, so a chatty engine cannot fill a pipe and stall.

use crate::artifact::TestSuiteArtifact;
use crate::cancel::CancelSignal;
use crate::config::{EngineConfig, ENV_BASE_PATH, ENV_CONFIG_FILE, ENV_SUBSYSTEM};
use crate::context::ExecutionContext;
use crate::error::{Result, SimgateError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Resolved test-suite directory.
pub const ENV_SUITE_DIR: &str = "TEST_SUITE_DIR";
/// Resolved results directory.
pub const ENV_RESULTS_DIR: &str = "TEST_RESULTS_DIR";
/// Selected test-suite artifact.
pub const ENV_SUITE_FILE: &str = "TEST_SUITE_FILE";
/// Where the engine must export its results.
pub const ENV_RESULTS_FILE: &str = "TEST_RESULTS_FILE";

/// Raw exit code recorded when simgate killed the engine.
pub const KILLED_EXIT_CODE: i32 = -9;
/// Raw exit code recorded when the engine died from a signal simgate did not send.
pub const SIGNALED_EXIT_CODE: i32 = -1;

/// How often a killed process group is polled until it is gone.
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Why simgate terminated the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KillReason {
    Timeout,
    Cancelled,
}

/// Everything one invocation needs besides the engine config.
#[derive(Debug, Clone)]
pub struct InvocationRequest {
    pub context: ExecutionContext,
    pub artifact: TestSuiteArtifact,
    pub destination: PathBuf,
    pub config_file: Option<PathBuf>,
    pub timeout: Duration,
}

impl InvocationRequest {
    /// Variables exported to the engine process.
    pub fn env_vars(&self) -> Vec<(&'static str, OsString)> {
        let mut vars = vec![
            (ENV_SUBSYSTEM, OsString::from(self.context.subsystem())),
            (ENV_BASE_PATH, self.context.base_root().as_os_str().to_owned()),
            (ENV_SUITE_DIR, self.context.test_suite_dir().as_os_str().to_owned()),
            (ENV_RESULTS_DIR, self.context.results_dir().as_os_str().to_owned()),
            (ENV_SUITE_FILE, self.artifact.path.as_os_str().to_owned()),
            (ENV_RESULTS_FILE, self.destination.as_os_str().to_owned()),
        ];
        if let Some(config_file) = &self.config_file {
            vars.push((ENV_CONFIG_FILE, config_file.as_os_str().to_owned()));
        }
        vars
    }
}

/// What came back from one engine process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvocationResult {
    /// Process exit code, or one of the sentinels above.
    pub raw_exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Wall-clock duration in milliseconds.
    pub duration_ms: u64,

    /// Set when simgate terminated the process.
    pub kill_reason: Option<KillReason>,
}

impl InvocationResult {
    /// A result for an engine that ran to completion.
    pub fn exited(raw_exit_code: i32, stdout: String, stderr: String, duration_ms: u64) -> Self {
        Self {
            raw_exit_code,
            stdout,
            stderr,
            duration_ms,
            kill_reason: None,
        }
    }

    /// A result for an engine simgate had to kill.
    pub fn killed(reason: KillReason, stdout: String, stderr: String, duration_ms: u64) -> Self {
        Self {
            raw_exit_code: KILLED_EXIT_CODE,
            stdout,
            stderr,
            duration_ms,
            kill_reason: Some(reason),
        }
    }
}

/// Something that can run the engine once.
///
/// Engine-side failures (crash, bad exit code, hang) are data in the returned
/// [`InvocationResult`]. Only a process that could not be started is an
/// error (`LaunchFailed`).
#[async_trait]
pub trait Engine: Send + Sync {
    async fn invoke(
        &self,
        engine: &EngineConfig,
        request: &InvocationRequest,
        cancel: &CancelSignal,
    ) -> Result<InvocationResult>;
}

/// Runs the engine as a child process.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEngine;

#[async_trait]
impl Engine for ProcessEngine {
    async fn invoke(
        &self,
        engine: &EngineConfig,
        request: &InvocationRequest,
        cancel: &CancelSignal,
    ) -> Result<InvocationResult> {
        let start = Instant::now();

        let mut command = Command::new(&engine.program);
        command
            .args(&engine.args)
            .current_dir(request.context.subsystem_root())
            .envs(&engine.env)
            .envs(request.env_vars())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Leader of its own group, so workers it starts die with it.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| SimgateError::LaunchFailed {
            program: engine.program.clone(),
            reason: e.to_string(),
        })?;
        let group = ProcessGroup::of(&child);

        let stdout_buf = OutputBuffer::default();
        let stderr_buf = OutputBuffer::default();
        let mut stdout_task = tokio::spawn(drain(child.stdout.take(), "stdout", stdout_buf.clone()));
        let mut stderr_task = tokio::spawn(drain(child.stderr.take(), "stderr", stderr_buf.clone()));

        let (status, kill_reason) = tokio::select! {
            status = child.wait() => (Some(status?), None),
            _ = tokio::time::sleep(request.timeout) => (None, Some(KillReason::Timeout)),
            _ = cancel.cancelled() => (None, Some(KillReason::Cancelled)),
        };

        if let Some(reason) = kill_reason {
            warn!(
                event = "engine.killed",
                subsystem = %request.context.subsystem(),
                reason = ?reason,
                timeout_ms = request.timeout.as_millis() as u64,
            );
            group.kill();
            if let Err(e) = child.kill().await {
                warn!(error = %e, "failed to kill engine process");
            }
        } else if group.is_alive() {
            warn!(
                subsystem = %request.context.subsystem(),
                "engine exited but left processes running, terminating them"
            );
            group.kill();
        }

        let grace = Duration::from_millis(engine.drain_grace_ms);
        group.wait_gone(grace).await;

        // A process outside the group may still hold the pipes open; keep
        // whatever arrived.
        let drained = tokio::time::timeout(grace, async {
            let _ = (&mut stdout_task).await;
            let _ = (&mut stderr_task).await;
        })
        .await;
        if drained.is_err() {
            debug!("engine output still open after exit, abandoning drain");
            stdout_task.abort();
            stderr_task.abort();
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        let stdout = stdout_buf.take();
        let stderr = stderr_buf.take();

        Ok(match (status, kill_reason) {
            (_, Some(reason)) => InvocationResult::killed(reason, stdout, stderr, duration_ms),
            (Some(status), None) => InvocationResult::exited(
                status.code().unwrap_or(SIGNALED_EXIT_CODE),
                stdout,
                stderr,
                duration_ms,
            ),
            (None, None) => InvocationResult::exited(SIGNALED_EXIT_CODE, stdout, stderr, duration_ms),
        })
    }
}

/// Process group led by the engine. Empty when the platform has no groups or
/// the child was already reaped at spawn time.
#[derive(Debug, Clone, Copy)]
struct ProcessGroup(Option<u32>);

impl ProcessGroup {
    fn of(child: &Child) -> Self {
        Self(child.id())
    }

    /// SIGKILL every process still in the group.
    #[cfg(unix)]
    fn kill(&self) {
        use nix::errno::Errno;
        use nix::sys::signal::{killpg, Signal};

        let Some(pgid) = self.pgid() else {
            return;
        };
        match killpg(pgid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => warn!(pgid = %pgid, error = %e, "failed to signal engine process group"),
        }
    }

    #[cfg(not(unix))]
    fn kill(&self) {}

    #[cfg(unix)]
    fn is_alive(&self) -> bool {
        self.pgid()
            .is_some_and(|pgid| nix::sys::signal::killpg(pgid, None).is_ok())
    }

    #[cfg(not(unix))]
    fn is_alive(&self) -> bool {
        false
    }

    #[cfg(unix)]
    fn pgid(&self) -> Option<nix::unistd::Pid> {
        self.0
            .and_then(|pid| i32::try_from(pid).ok())
            .map(nix::unistd::Pid::from_raw)
    }

    /// Wait, at most `grace`, until no process of the group remains.
    async fn wait_gone(&self, grace: Duration) {
        let deadline = Instant::now() + grace;
        while self.is_alive() {
            if Instant::now() >= deadline {
                warn!("engine process group still present after kill");
                return;
            }
            tokio::time::sleep(GROUP_POLL_INTERVAL).await;
        }
    }
}

/// Output shared between a drain task and the invoker.
#[derive(Debug, Clone, Default)]
struct OutputBuffer(Arc<Mutex<Vec<u8>>>);

impl OutputBuffer {
    fn append(&self, bytes: &[u8]) {
        let mut buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        buf.extend_from_slice(bytes);
    }

    fn take(&self) -> String {
        let mut buf = self.0.lock().unwrap_or_else(|e| e.into_inner());
        String::from_utf8_lossy(&std::mem::take(&mut *buf)).into_owned()
    }
}

async fn drain<R>(stream: Option<R>, channel: &'static str, sink: OutputBuffer)
where
    R: AsyncRead + Unpin,
{
    let Some(stream) = stream else {
        return;
    };
    let mut reader = BufReader::new(stream);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                debug!(
                    channel,
                    line = %String::from_utf8_lossy(&line).trim_end(),
                    "engine output"
                );
                sink.append(&line);
            }
            Err(e) => {
                warn!(channel, error = %e, "engine output read failed");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FolderNames;
    use crate::context::build_context;
    use std::time::SystemTime;

    fn request(root: &std::path::Path, timeout: Duration) -> InvocationRequest {
        std::fs::create_dir_all(root.join("Brakes/TestSuites")).unwrap();
        std::fs::create_dir_all(root.join("Brakes/TestResults")).unwrap();
        let context = build_context(Some("Brakes"), Some(root), &FolderNames::default()).unwrap();
        InvocationRequest {
            destination: context.results_dir().join("out_results.mldatx"),
            artifact: TestSuiteArtifact {
                path: context.test_suite_dir().join("suite.mldatx"),
                modified: SystemTime::UNIX_EPOCH,
            },
            context,
            config_file: None,
            timeout,
        }
    }

    fn shell(script: &str) -> EngineConfig {
        EngineConfig::new("sh").with_args(["-c", script])
    }

    #[test]
    fn test_env_vars_carry_context() {
        let root = tempfile::tempdir().unwrap();
        let mut req = request(root.path(), Duration::from_secs(1));
        req.config_file = Some(PathBuf::from("/etc/simgate.toml"));

        let vars = req.env_vars();
        let get = |key: &str| vars.iter().find(|(k, _)| *k == key).map(|(_, v)| v.clone());
        assert_eq!(get(ENV_SUBSYSTEM), Some(OsString::from("Brakes")));
        assert_eq!(get(ENV_RESULTS_FILE), Some(req.destination.clone().into_os_string()));
        assert_eq!(get(ENV_CONFIG_FILE), Some(OsString::from("/etc/simgate.toml")));
    }

    #[tokio::test]
    async fn test_execute_simple_command() {
        let root = tempfile::tempdir().unwrap();
        let req = request(root.path(), Duration::from_secs(30));

        let result = ProcessEngine
            .invoke(&shell("echo hello; echo oops >&2"), &req, &CancelSignal::never())
            .await
            .expect("invoke failed");
        assert_eq!(result.raw_exit_code, 0);
        assert!(result.stdout.contains("hello"));
        assert!(result.stderr.contains("oops"));
        assert!(result.kill_reason.is_none());
    }

    #[tokio::test]
    async fn test_execute_failing_command() {
        let root = tempfile::tempdir().unwrap();
        let req = request(root.path(), Duration::from_secs(30));

        let result = ProcessEngine
            .invoke(&shell("exit 3"), &req, &CancelSignal::never())
            .await
            .expect("invoke failed");
        assert_eq!(result.raw_exit_code, 3);
    }

    #[tokio::test]
    async fn test_missing_program_is_launch_failure() {
        let root = tempfile::tempdir().unwrap();
        let req = request(root.path(), Duration::from_secs(30));

        let err = ProcessEngine
            .invoke(
                &EngineConfig::new("/nonexistent/simgate-engine"),
                &req,
                &CancelSignal::never(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SimgateError::LaunchFailed { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_engine() {
        let root = tempfile::tempdir().unwrap();
        let req = request(root.path(), Duration::from_millis(200));

        let started = Instant::now();
        let result = ProcessEngine
            .invoke(&shell("exec sleep 30"), &req, &CancelSignal::never())
            .await
            .expect("invoke failed");
        assert_eq!(result.raw_exit_code, KILLED_EXIT_CODE);
        assert_eq!(result.kill_reason, Some(KillReason::Timeout));
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_background_workers() {
        let root = tempfile::tempdir().unwrap();
        let marker = root.path().join("worker-alive");
        let req = request(root.path(), Duration::from_millis(300));
        let mut engine = shell(&format!(
            "(sleep 1; echo still-alive > '{}') & wait",
            marker.display()
        ));
        engine.drain_grace_ms = 500;

        let result = ProcessEngine
            .invoke(&engine, &req, &CancelSignal::never())
            .await
            .expect("invoke failed");
        assert_eq!(result.kill_reason, Some(KillReason::Timeout));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "worker outlived the engine kill");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_leftover_workers_are_terminated_after_exit() {
        let root = tempfile::tempdir().unwrap();
        let marker = root.path().join("worker-alive");
        let req = request(root.path(), Duration::from_secs(30));
        let mut engine = shell(&format!(
            "(sleep 1; echo still-alive > '{}') >/dev/null 2>&1 & exit 0",
            marker.display()
        ));
        engine.drain_grace_ms = 500;

        let result = ProcessEngine
            .invoke(&engine, &req, &CancelSignal::never())
            .await
            .expect("invoke failed");
        assert_eq!(result.raw_exit_code, 0);
        assert!(result.kill_reason.is_none());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!marker.exists(), "worker outlived the engine");
    }

    #[tokio::test]
    async fn test_large_output_does_not_stall() {
        let root = tempfile::tempdir().unwrap();
        let req = request(root.path(), Duration::from_secs(30));

        let result = ProcessEngine
            .invoke(
                &shell("i=0; while [ $i -lt 20000 ]; do echo line-$i; i=$((i+1)); done"),
                &req,
                &CancelSignal::never(),
            )
            .await
            .expect("invoke failed");
        assert_eq!(result.raw_exit_code, 0);
        assert_eq!(result.stdout.lines().count(), 20000);
    }
}

//! Execution driver: one agent subprocess per selected item.
//!
//! The [`Driver`] trait decouples the scheduler from the agent backend.
//! The scheduler sees a single blocking `run` call returning a terminal
//! [`DriverOutcome`]; the marker polling and early termination live below it.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::DriverOutcome;
use crate::io::process::{run_command_watching, write_process_log};

/// The agent declares it cannot proceed on this item.
pub const MARKER_BLOCKED: &str = "BLOCKED";
/// The agent finished the selected item.
pub const MARKER_ISSUE_COMPLETE: &str = "ISSUE_COMPLETE";
/// The agent finished the item and believes the whole queue is done.
/// Checked after [`MARKER_ISSUE_COMPLETE`] since it is a substring of it.
pub const MARKER_LOOP_COMPLETE: &str = "COMPLETE";

/// Parameters for one driver invocation.
#[derive(Debug, Clone)]
pub struct DriverRequest {
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Prompt text fed to the agent on stdin.
    pub prompt: String,
    /// Path to write the captured stdout/stderr log.
    pub log_path: PathBuf,
    /// Maximum time to wait for the agent.
    pub timeout: Duration,
    /// Truncate captured output beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Passed through to the agent command verbatim, never interpreted here.
    pub max_turns: Option<u32>,
}

/// Abstraction over agent execution backends.
pub trait Driver {
    /// Run the agent and await its terminal signal.
    fn run(&self, request: &DriverRequest) -> Result<DriverOutcome>;
}

/// Driver that spawns the configured agent command and watches its stdout
/// for completion markers, terminating the subprocess early on a match to
/// avoid burning unnecessary turns.
pub struct AgentDriver {
    command: Vec<String>,
}

impl AgentDriver {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.is_empty() || command[0].trim().is_empty() {
            return Err(anyhow!("driver command must not be empty"));
        }
        Ok(Self { command })
    }
}

impl Driver for AgentDriver {
    #[instrument(skip_all, fields(timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &DriverRequest) -> Result<DriverOutcome> {
        info!(workdir = %request.workdir.display(), command = %self.command[0], "starting agent");

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..]);
        if let Some(turns) = request.max_turns {
            cmd.arg("--max-turns").arg(turns.to_string());
        }
        cmd.current_dir(&request.workdir);

        let output = run_command_watching(
            cmd,
            Some(request.prompt.as_bytes()),
            request.timeout,
            request.output_limit_bytes,
            &[MARKER_BLOCKED, MARKER_ISSUE_COMPLETE, MARKER_LOOP_COMPLETE],
        )
        .context("run agent command")?;

        write_process_log(&request.log_path, &output, request.output_limit_bytes)?;

        let outcome = match output.marker.as_deref() {
            Some(MARKER_BLOCKED) => DriverOutcome::Blocked,
            Some(MARKER_ISSUE_COMPLETE) => DriverOutcome::Completed,
            Some(MARKER_LOOP_COMPLETE) => DriverOutcome::CompletedAll,
            Some(other) => {
                // Unreachable with the marker set above; treat defensibly.
                warn!(marker = other, "unexpected marker");
                DriverOutcome::Completed
            }
            None if output.timed_out => DriverOutcome::Failed {
                detail: format!("agent timed out after {:?}", request.timeout),
            },
            None if output.status.success() => DriverOutcome::Completed,
            None => DriverOutcome::Failed {
                detail: format!("agent exited with status {:?}", output.status.code()),
            },
        };

        debug!(?outcome, "agent finished");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(temp: &tempfile::TempDir, timeout: Duration) -> DriverRequest {
        DriverRequest {
            workdir: temp.path().to_path_buf(),
            prompt: "do the thing\n".to_string(),
            log_path: temp.path().join("driver.log"),
            timeout,
            output_limit_bytes: 100_000,
            max_turns: None,
        }
    }

    fn shell_driver(script: &str) -> AgentDriver {
        AgentDriver::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            script.to_string(),
        ])
        .expect("driver")
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(AgentDriver::new(Vec::new()).is_err());
        assert!(AgentDriver::new(vec![" ".to_string()]).is_err());
    }

    #[test]
    fn issue_complete_marker_completes_the_item() {
        let temp = tempfile::tempdir().expect("tempdir");
        let driver = shell_driver("echo ISSUE_COMPLETE");
        let outcome = driver
            .run(&request(&temp, Duration::from_secs(10)))
            .expect("run");
        assert_eq!(outcome, DriverOutcome::Completed);
    }

    #[test]
    fn bare_complete_marker_requests_loop_termination() {
        let temp = tempfile::tempdir().expect("tempdir");
        let driver = shell_driver("echo all done; echo COMPLETE");
        let outcome = driver
            .run(&request(&temp, Duration::from_secs(10)))
            .expect("run");
        assert_eq!(outcome, DriverOutcome::CompletedAll);
    }

    #[test]
    fn blocked_marker_reports_blocked() {
        let temp = tempfile::tempdir().expect("tempdir");
        let driver = shell_driver("echo BLOCKED");
        let outcome = driver
            .run(&request(&temp, Duration::from_secs(10)))
            .expect("run");
        assert_eq!(outcome, DriverOutcome::Blocked);
    }

    #[test]
    fn clean_exit_without_marker_counts_as_completed() {
        let temp = tempfile::tempdir().expect("tempdir");
        let driver = shell_driver("cat >/dev/null; echo finished quietly");
        let outcome = driver
            .run(&request(&temp, Duration::from_secs(10)))
            .expect("run");
        assert_eq!(outcome, DriverOutcome::Completed);
    }

    #[test]
    fn nonzero_exit_is_a_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let driver = shell_driver("exit 3");
        let outcome = driver
            .run(&request(&temp, Duration::from_secs(10)))
            .expect("run");
        assert!(matches!(outcome, DriverOutcome::Failed { .. }));
    }

    #[test]
    fn marker_shortcircuits_a_long_running_agent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let driver = shell_driver("echo ISSUE_COMPLETE; sleep 30 >/dev/null 2>&1");
        let start = std::time::Instant::now();
        let outcome = driver
            .run(&request(&temp, Duration::from_secs(60)))
            .expect("run");
        assert_eq!(outcome, DriverOutcome::Completed);
        assert!(start.elapsed() < Duration::from_secs(10));

        let log = std::fs::read_to_string(temp.path().join("driver.log")).expect("log");
        assert!(log.contains("terminated early on marker ISSUE_COMPLETE"));
    }

    #[test]
    fn timeout_is_a_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let driver = shell_driver("sleep 30");
        let outcome = driver
            .run(&request(&temp, Duration::from_millis(300)))
            .expect("run");
        assert!(matches!(outcome, DriverOutcome::Failed { .. }));
    }
}

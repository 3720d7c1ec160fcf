//! Optional verification gate run after the agent reports success.
//!
//! The check itself is an external collaborator: a configured command is
//! invoked with the URL and element selectors extracted from the item body,
//! and its exit status decides pass/fail.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::io::process::{run_command, write_process_log};

/// Result of the verification gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Pass,
    Fail,
}

/// Parameters for one verification run.
#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub workdir: PathBuf,
    pub url: String,
    pub selectors: Vec<String>,
    pub log_path: PathBuf,
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Abstraction over verification backends.
pub trait Verifier {
    fn verify(&self, request: &VerifyRequest) -> Result<VerifyOutcome>;
}

/// Verifier that appends the URL and selectors to a configured command;
/// exit 0 means pass, anything else (including timeout) means fail.
pub struct CommandVerifier {
    command: Vec<String>,
}

impl CommandVerifier {
    pub fn new(command: Vec<String>) -> Result<Self> {
        if command.is_empty() || command[0].trim().is_empty() {
            return Err(anyhow!("verify command must not be empty"));
        }
        Ok(Self { command })
    }
}

impl Verifier for CommandVerifier {
    #[instrument(skip_all, fields(url = %request.url))]
    fn verify(&self, request: &VerifyRequest) -> Result<VerifyOutcome> {
        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .arg(&request.url)
            .args(&request.selectors)
            .current_dir(&request.workdir);

        let output = run_command(cmd, None, request.timeout, request.output_limit_bytes)
            .context("run verify command")?;
        write_process_log(&request.log_path, &output, request.output_limit_bytes)?;

        let outcome = if output.status.success() && !output.timed_out {
            VerifyOutcome::Pass
        } else {
            VerifyOutcome::Fail
        };
        debug!(?outcome, "verification finished");
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(temp: &tempfile::TempDir) -> VerifyRequest {
        VerifyRequest {
            workdir: temp.path().to_path_buf(),
            url: "https://app.example.com/login".to_string(),
            selectors: vec!["#email".to_string(), ".submit".to_string()],
            log_path: temp.path().join("verify.log"),
            timeout: Duration::from_secs(10),
            output_limit_bytes: 10_000,
        }
    }

    #[test]
    fn exit_zero_passes() {
        let temp = tempfile::tempdir().expect("tempdir");
        let verifier = CommandVerifier::new(vec!["true".to_string()]).expect("verifier");
        assert_eq!(
            verifier.verify(&request(&temp)).expect("verify"),
            VerifyOutcome::Pass
        );
    }

    #[test]
    fn nonzero_exit_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let verifier = CommandVerifier::new(vec!["false".to_string()]).expect("verifier");
        assert_eq!(
            verifier.verify(&request(&temp)).expect("verify"),
            VerifyOutcome::Fail
        );
    }

    #[test]
    fn url_and_selectors_are_appended_as_arguments() {
        let temp = tempfile::tempdir().expect("tempdir");
        let verifier = CommandVerifier::new(vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo \"$@\"".to_string(),
            "verify".to_string(),
        ])
        .expect("verifier");

        assert_eq!(
            verifier.verify(&request(&temp)).expect("verify"),
            VerifyOutcome::Pass
        );
        let log = std::fs::read_to_string(temp.path().join("verify.log")).expect("log");
        assert!(log.contains("https://app.example.com/login #email .submit"));
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(CommandVerifier::new(Vec::new()).is_err());
    }
}

//! GitHub Issues adapter over the `gh` CLI.
//!
//! Every operation shells out to `gh` (inheriting its ambient auth) and
//! parses `--json` output. Lifecycle is tracked with labels: `todo` marks
//! seeded work, `in-progress` marks a claim, `blocked` is a requeue
//! breadcrumb. Canonical state mapping:
//!
//! - OPEN + `in-progress` label  -> InProgress (claimed, never a candidate)
//! - OPEN otherwise              -> Queued (a `blocked` label alone is a
//!   breadcrumb, requeued items must stay selectable)
//! - CLOSED + NOT_PLANNED        -> Cancelled
//! - CLOSED                      -> Done

use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::backend::{
    BLOCKED_MARKER, Backend, BackendError, IN_PROGRESS_MARKER, TODO_MARKER, Transition,
    priority_from_labels,
};
use crate::core::types::{NewWorkItem, RefStyle, WorkItem, WorkState};
use crate::io::process::run_command;

/// Page bound for list queries.
const PAGE_LIMIT: u32 = 100;
const GH_TIMEOUT: Duration = Duration::from_secs(60);
const GH_OUTPUT_LIMIT: usize = 1_000_000;

static ISSUE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/issues/(\d+)\s*$").expect("issue url pattern should be valid"));

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhIssue {
    number: u64,
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    labels: Vec<GhLabel>,
    #[serde(default)]
    state: String,
    #[serde(default)]
    state_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhLabel {
    name: String,
}

/// Adapter over `gh issue …` subcommands.
pub struct GithubBackend;

impl GithubBackend {
    /// Fails with a configuration error when the `gh` binary is missing.
    pub fn new() -> Result<Self, BackendError> {
        let mut cmd = Command::new("gh");
        cmd.arg("--version");
        let output = run_command(cmd, None, GH_TIMEOUT, GH_OUTPUT_LIMIT).map_err(|err| {
            BackendError::Configuration(format!("`gh` CLI not runnable: {err:#}"))
        })?;
        if !output.status.success() {
            return Err(BackendError::Configuration(format!(
                "`gh --version` failed: {}",
                output.stderr_text()
            )));
        }
        Ok(Self)
    }

    fn gh(&self, args: &[&str]) -> Result<String, BackendError> {
        let mut cmd = Command::new("gh");
        cmd.args(args);
        debug!(?args, "running gh");
        let output = run_command(cmd, None, GH_TIMEOUT, GH_OUTPUT_LIMIT)
            .map_err(|err| BackendError::Unavailable(format!("{err:#}")))?;
        if !output.status.success() {
            return Err(BackendError::Unavailable(format!(
                "gh {} failed: {}",
                args.first().copied().unwrap_or_default(),
                output.stderr_text()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Fetch one issue with its raw labels; `Ok(None)` when the number does
    /// not resolve to an issue.
    fn fetch(&self, number: &str) -> Result<Option<(WorkItem, Vec<String>)>, BackendError> {
        let mut cmd = Command::new("gh");
        cmd.args([
            "issue",
            "view",
            number,
            "--json",
            "number,title,body,labels,state,stateReason",
        ]);
        let output = run_command(cmd, None, GH_TIMEOUT, GH_OUTPUT_LIMIT)
            .map_err(|err| BackendError::Unavailable(format!("{err:#}")))?;
        if !output.status.success() {
            let stderr = output.stderr_text();
            let lowered = stderr.to_lowercase();
            if lowered.contains("could not resolve") || lowered.contains("not found") {
                return Ok(None);
            }
            return Err(BackendError::Unavailable(format!(
                "gh issue view {number} failed: {stderr}"
            )));
        }
        let issue: GhIssue = serde_json::from_slice(&output.stdout)?;
        Ok(Some(to_work_item(&issue)))
    }
}

impl Backend for GithubBackend {
    fn name(&self) -> &'static str {
        "github"
    }

    fn ref_style(&self) -> RefStyle {
        RefStyle::Hash
    }

    fn list_open(&self, label: &str) -> Result<Vec<WorkItem>, BackendError> {
        let limit = PAGE_LIMIT.to_string();
        let stdout = self.gh(&[
            "issue",
            "list",
            "--label",
            label,
            "--state",
            "open",
            "--limit",
            &limit,
            "--json",
            "number,title,body,labels",
        ])?;
        let issues: Vec<GhIssue> = serde_json::from_str(&stdout)?;
        Ok(issues
            .iter()
            .map(|issue| to_work_item(issue).0)
            .filter(|item| item.state == WorkState::Queued)
            .collect())
    }

    fn count_remaining(&self, label: &str) -> Result<usize, BackendError> {
        let limit = PAGE_LIMIT.to_string();
        let stdout = self.gh(&[
            "issue",
            "list",
            "--label",
            label,
            "--state",
            "open",
            "--limit",
            &limit,
            "--json",
            "number",
        ])?;
        let issues: Vec<serde_json::Value> = serde_json::from_str(&stdout)?;
        Ok(issues.len())
    }

    fn lookup(&self, reference: &str) -> Result<Option<WorkItem>, BackendError> {
        let number = reference.trim_start_matches('#');
        if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(None);
        }
        Ok(self.fetch(number)?.map(|(item, _)| item))
    }

    fn transition(
        &self,
        item: &WorkItem,
        target: Transition,
        note: Option<&str>,
    ) -> Result<(), BackendError> {
        let Some((current, labels)) = self.fetch(&item.id)? else {
            return Err(BackendError::Api {
                status: 404,
                message: format!("issue {} disappeared", item.display_id),
            });
        };

        match target {
            Transition::InProgress => {
                if current.state == WorkState::InProgress {
                    debug!(item = %item.display_id, "already in progress, skipping");
                    return Ok(());
                }
                let mut args = vec!["issue", "edit", item.id.as_str(), "--add-label", IN_PROGRESS_MARKER];
                for marker in [TODO_MARKER, BLOCKED_MARKER] {
                    if labels.iter().any(|l| l == marker) {
                        args.extend(["--remove-label", marker]);
                    }
                }
                self.gh(&args)?;
            }
            Transition::Done => {
                if current.state == WorkState::Done {
                    debug!(item = %item.display_id, "already closed, skipping");
                    return Ok(());
                }
                let mut args = vec!["issue", "close", item.id.as_str()];
                if let Some(note) = note {
                    args.extend(["--comment", note]);
                }
                self.gh(&args)?;
            }
            Transition::Requeue => {
                let claimed = labels.iter().any(|l| l == IN_PROGRESS_MARKER);
                let marked = labels.iter().any(|l| l == BLOCKED_MARKER);
                if !claimed && marked {
                    debug!(item = %item.display_id, "already requeued, skipping");
                    return Ok(());
                }
                let mut args = vec!["issue", "edit", item.id.as_str(), "--add-label", BLOCKED_MARKER];
                if claimed {
                    args.extend(["--remove-label", IN_PROGRESS_MARKER]);
                }
                self.gh(&args)?;
                if let Some(note) = note {
                    if let Err(err) = self.gh(&["issue", "comment", item.id.as_str(), "--body", note]) {
                        warn!(item = %item.display_id, err = %err, "requeue note not posted");
                    }
                }
            }
        }
        Ok(())
    }

    fn create(&self, draft: &NewWorkItem, label: &str) -> Result<WorkItem, BackendError> {
        let mut labels = vec![label.to_string(), TODO_MARKER.to_string()];
        labels.extend(draft.labels.iter().cloned());
        let joined = labels.join(",");

        let stdout = self.gh(&[
            "issue",
            "create",
            "--title",
            &draft.title,
            "--body",
            &draft.body,
            "--label",
            &joined,
        ])?;
        let number = ISSUE_URL_RE
            .captures(stdout.trim())
            .map(|caps| caps[1].to_string())
            .ok_or_else(|| {
                BackendError::Parse(format!("no issue number in gh output: {}", stdout.trim()))
            })?;

        Ok(WorkItem {
            display_id: format!("#{number}"),
            id: number,
            title: draft.title.clone(),
            body: draft.body.clone(),
            priority_score: draft.priority_score,
            state: WorkState::Queued,
            blocked_by: Vec::new(),
        })
    }
}

fn to_work_item(issue: &GhIssue) -> (WorkItem, Vec<String>) {
    let labels: Vec<String> = issue.labels.iter().map(|l| l.name.clone()).collect();
    let state = map_state(&issue.state, issue.state_reason.as_deref(), &labels);
    let item = WorkItem {
        id: issue.number.to_string(),
        display_id: format!("#{}", issue.number),
        title: issue.title.clone(),
        body: issue.body.clone(),
        priority_score: priority_from_labels(&labels),
        state,
        // GitHub models no native blocks relation; dependencies live in the
        // body text and are parsed by the resolver.
        blocked_by: Vec::new(),
    };
    (item, labels)
}

fn map_state(state: &str, state_reason: Option<&str>, labels: &[String]) -> WorkState {
    if state.eq_ignore_ascii_case("closed") {
        if state_reason.is_some_and(|r| r.eq_ignore_ascii_case("not_planned")) {
            return WorkState::Cancelled;
        }
        return WorkState::Done;
    }
    if labels.iter().any(|l| l == IN_PROGRESS_MARKER) {
        return WorkState::InProgress;
    }
    WorkState::Queued
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(state: &str, reason: Option<&str>, labels: &[&str]) -> GhIssue {
        GhIssue {
            number: 7,
            title: "t".to_string(),
            body: "b".to_string(),
            labels: labels
                .iter()
                .map(|n| GhLabel {
                    name: (*n).to_string(),
                })
                .collect(),
            state: state.to_string(),
            state_reason: reason.map(str::to_string),
        }
    }

    #[test]
    fn open_issue_maps_to_queued() {
        let (item, _) = to_work_item(&issue("OPEN", None, &["agent-task"]));
        assert_eq!(item.state, WorkState::Queued);
        assert_eq!(item.display_id, "#7");
    }

    #[test]
    fn claimed_issue_maps_to_in_progress() {
        let (item, _) = to_work_item(&issue("OPEN", None, &["in-progress"]));
        assert_eq!(item.state, WorkState::InProgress);
    }

    #[test]
    fn blocked_breadcrumb_stays_queued() {
        let (item, _) = to_work_item(&issue("OPEN", None, &["blocked"]));
        assert_eq!(item.state, WorkState::Queued);
    }

    #[test]
    fn closed_maps_to_done_or_cancelled() {
        let (done, _) = to_work_item(&issue("CLOSED", Some("COMPLETED"), &[]));
        assert_eq!(done.state, WorkState::Done);
        let (cancelled, _) = to_work_item(&issue("CLOSED", Some("NOT_PLANNED"), &[]));
        assert_eq!(cancelled.state, WorkState::Cancelled);
    }

    #[test]
    fn priority_comes_from_labels() {
        let (item, _) = to_work_item(&issue("OPEN", None, &["p1", "agent-task"]));
        assert_eq!(item.priority_score, 1);
    }

    #[test]
    fn issue_number_parses_from_create_url() {
        let caps = ISSUE_URL_RE
            .captures("https://github.com/acme/app/issues/123\n")
            .expect("captures");
        assert_eq!(&caps[1], "123");
    }
}

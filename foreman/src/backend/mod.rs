//! Backend adapter contract over an issue tracker.
//!
//! Two transports (a REST-style CLI for GitHub, GraphQL for Linear), one
//! behavioral contract. The scheduler never touches transport details; it is
//! handed a `&dyn Backend` at construction time and reasons purely in
//! canonical [`WorkItem`] terms.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::core::types::{LOWEST_URGENCY, NewWorkItem, RefStyle, WorkItem};

pub mod github;
pub mod linear;

/// Label markers shared by adapters that track lifecycle via labels.
pub const TODO_MARKER: &str = "todo";
pub const IN_PROGRESS_MARKER: &str = "in-progress";
pub const BLOCKED_MARKER: &str = "blocked";

/// Errors emitted by backend adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    /// Transport failure (network, subprocess spawn, auth plumbing). The
    /// scheduler treats this as "zero items available this cycle" and
    /// retries on the next cycle.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The tracker answered with a structured error.
    #[error("backend API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The tracker's payload could not be decoded.
    #[error("backend payload parse error: {0}")]
    Parse(String),

    /// The adapter is missing required configuration (credentials, team).
    #[error("backend configuration error: {0}")]
    Configuration(String),
}

impl From<serde_json::Error> for BackendError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value.to_string())
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(value: reqwest::Error) -> Self {
        Self::Unavailable(value.to_string())
    }
}

/// Target of a lifecycle transition.
///
/// `Requeue` covers the blocked/failed/verification-failed paths: the item
/// loses its in-progress marker, gains a blocked breadcrumb, and returns to
/// the queued pool for a later cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    InProgress,
    Done,
    Requeue,
}

/// Uniform operations over a work-item store.
pub trait Backend {
    fn name(&self) -> &'static str;

    /// Which free-text reference pattern this backend's items use.
    fn ref_style(&self) -> RefStyle;

    /// All labeled items whose canonical state is Queued, up to a bounded
    /// page. Claimed (InProgress) and terminal items never appear.
    fn list_open(&self, label: &str) -> Result<Vec<WorkItem>, BackendError>;

    /// Count of non-terminal labeled items, same label predicate as
    /// [`Backend::list_open`]. Drives loop termination independent of the
    /// page contents.
    fn count_remaining(&self, label: &str) -> Result<usize, BackendError>;

    /// Point lookup by reference (`42`, `ENG-12`). Unknown references
    /// resolve to `Ok(None)`; only transport failures error.
    fn lookup(&self, reference: &str) -> Result<Option<WorkItem>, BackendError>;

    /// Move an item to the target state, attaching `note` as a visible
    /// comment where the target supports one. Idempotent: re-invoking with a
    /// target the item already satisfies is a no-op, not an error.
    fn transition(
        &self,
        item: &WorkItem,
        target: Transition,
        note: Option<&str>,
    ) -> Result<(), BackendError>;

    /// Create a new labeled item (seeding). Returns the created item with
    /// its real backend identifiers.
    fn create(&self, draft: &NewWorkItem, label: &str) -> Result<WorkItem, BackendError>;
}

static PRIORITY_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:p|priority[:-])([0-9])$").expect("priority pattern should be valid")
});

/// Derive a priority score from labels (`p1`, `P2`, `priority:3`).
/// Absence means lowest urgency; the most urgent matching label wins.
pub fn priority_from_labels<S: AsRef<str>>(labels: &[S]) -> u8 {
    labels
        .iter()
        .filter_map(|label| {
            PRIORITY_LABEL_RE
                .captures(label.as_ref().trim())
                .and_then(|caps| caps[1].parse::<u8>().ok())
        })
        .min()
        .unwrap_or(LOWEST_URGENCY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_parses_both_label_forms() {
        assert_eq!(priority_from_labels(&["p2"]), 2);
        assert_eq!(priority_from_labels(&["P0"]), 0);
        assert_eq!(priority_from_labels(&["priority:3"]), 3);
        assert_eq!(priority_from_labels(&["priority-1"]), 1);
    }

    #[test]
    fn priority_defaults_to_lowest_urgency() {
        assert_eq!(priority_from_labels(&["bug", "backend"]), LOWEST_URGENCY);
        assert_eq!(priority_from_labels::<&str>(&[]), LOWEST_URGENCY);
    }

    #[test]
    fn most_urgent_label_wins() {
        assert_eq!(priority_from_labels(&["p4", "p1", "p3"]), 1);
    }

    #[test]
    fn unrelated_p_labels_do_not_match() {
        assert_eq!(priority_from_labels(&["p10", "proto", "priority"]), LOWEST_URGENCY);
    }
}

//! Shared types for the scheduling core.
//!
//! These types define stable contracts between the scheduler, the backend
//! adapters, and the execution driver. Backend-native vocabularies are mapped
//! onto [`WorkState`] at the adapter boundary; everything above it reasons
//! only in canonical terms.

use serde::{Deserialize, Serialize};

/// Priority score assigned when an item carries no priority label/field.
/// Lower scores are more urgent, so absence means lowest urgency.
pub const LOWEST_URGENCY: u8 = 9;

/// Canonical lifecycle state of a work item.
///
/// Adapters map their native vocabulary onto this set. `Done` and `Cancelled`
/// are terminal; `Blocked` is a backend-native parked state (e.g. a Linear
/// workflow state named "Blocked"), distinct from the dynamic blocked-ness
/// the resolver computes per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkState {
    Queued,
    InProgress,
    Blocked,
    Done,
    Cancelled,
}

impl WorkState {
    /// Terminal states never re-enter the pool.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

/// A unit of trackable work, as surfaced by a backend adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Opaque backend-native identifier (issue number digits, Linear UUID).
    pub id: String,
    /// Human-facing identifier (`#42`, `ENG-123`); also the reference form
    /// other items use to point at this one.
    pub display_id: String,
    pub title: String,
    pub body: String,
    /// Lower = more urgent. [`LOWEST_URGENCY`] when the backend carries none.
    pub priority_score: u8,
    pub state: WorkState,
    /// Blocker references the backend models natively as a "blocks" relation
    /// (display-id form). Empty for backends without structured relations.
    pub blocked_by: Vec<String>,
}

/// Draft consumed by `Backend::create` during seeding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWorkItem {
    pub title: String,
    pub body: String,
    pub priority_score: u8,
    pub labels: Vec<String>,
}

/// Which free-text reference pattern a backend's items use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefStyle {
    /// `#123` (GitHub issue numbers).
    Hash,
    /// `ENG-123` (Linear team-prefixed identifiers).
    TeamPrefixed,
}

/// Terminal outcome of one execution-driver invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverOutcome {
    /// The agent finished the item (`ISSUE_COMPLETE` marker or clean exit).
    Completed,
    /// The agent finished the item and asked the whole loop to stop
    /// (`COMPLETE` marker).
    CompletedAll,
    /// The agent declared it cannot proceed (`BLOCKED` marker).
    Blocked,
    /// The agent exited non-zero or timed out.
    Failed { detail: String },
}

/// Lifecycle event class recorded in the progress ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LedgerEvent {
    Started,
    Completed,
    Failed,
    Blocked,
    VerificationFailed,
    Seeded,
}

impl LedgerEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
            Self::VerificationFailed => "verification-failed",
            Self::Seeded => "seeded",
        }
    }
}

/// How one scheduling cycle ended for its selected item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Completed,
    Blocked,
    Failed,
    VerificationFailed,
    /// No item was processed this cycle (backend unavailable).
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_done_and_cancelled() {
        assert!(WorkState::Done.is_terminal());
        assert!(WorkState::Cancelled.is_terminal());
        assert!(!WorkState::Queued.is_terminal());
        assert!(!WorkState::InProgress.is_terminal());
        assert!(!WorkState::Blocked.is_terminal());
    }

    #[test]
    fn ledger_event_strings_are_stable() {
        assert_eq!(LedgerEvent::VerificationFailed.as_str(), "verification-failed");
        assert_eq!(LedgerEvent::Started.as_str(), "started");
    }
}

//! Next-item selection for a scheduling cycle.

use tracing::debug;

use crate::backend::{Backend, BackendError};
use crate::core::selector::order_candidates;
use crate::core::types::WorkItem;
use crate::resolver::is_blocked;

/// Structured selection outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    /// First unblocked candidate in `(priority_score, id)` order.
    Selected(WorkItem),
    /// Every listed candidate is blocked (or the page held none).
    AllBlocked { open: usize },
}

/// List the labeled pool and return the first unblocked candidate.
///
/// First-fit over the deterministic candidate order; no attempt is made to
/// find a globally "best" item, and no cycle detection is performed (a
/// blocking cycle surfaces as `AllBlocked`, never a hang).
pub fn select_next(backend: &dyn Backend, label: &str) -> Result<SelectOutcome, BackendError> {
    let items = backend.list_open(label)?;
    let candidates = order_candidates(&items);
    let open = candidates.len();
    debug!(open, "evaluating candidates");

    for candidate in candidates {
        if !is_blocked(backend, candidate)? {
            return Ok(SelectOutcome::Selected(candidate.clone()));
        }
    }
    Ok(SelectOutcome::AllBlocked { open })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RefStyle;
    use crate::test_support::{MemoryBackend, item_with_body, queued_item};

    #[test]
    fn selects_most_urgent_unblocked_item() {
        let backend = MemoryBackend::new(RefStyle::Hash);
        backend.push(queued_item("1", 3));
        backend.push(queued_item("2", 1));
        backend.push(queued_item("3", 2));

        let outcome = select_next(&backend, "agent-task").expect("select");
        match outcome {
            SelectOutcome::Selected(item) => assert_eq!(item.id, "2"),
            other => panic!("expected selection, got {other:?}"),
        }
    }

    #[test]
    fn blocked_item_is_passed_over_for_next_candidate() {
        let backend = MemoryBackend::new(RefStyle::Hash);
        backend.push(item_with_body("1", 1, "Blocked by #2"));
        backend.push(queued_item("2", 2));

        let outcome = select_next(&backend, "agent-task").expect("select");
        match outcome {
            SelectOutcome::Selected(item) => assert_eq!(item.id, "2"),
            other => panic!("expected selection, got {other:?}"),
        }
    }

    #[test]
    fn mutual_blocking_yields_all_blocked() {
        let backend = MemoryBackend::new(RefStyle::Hash);
        backend.push(item_with_body("1", 1, "Blocked by #2"));
        backend.push(item_with_body("2", 1, "Blocked by #1"));

        let outcome = select_next(&backend, "agent-task").expect("select");
        assert_eq!(outcome, SelectOutcome::AllBlocked { open: 2 });
    }

    #[test]
    fn empty_pool_is_all_blocked_with_zero_open() {
        let backend = MemoryBackend::new(RefStyle::Hash);
        let outcome = select_next(&backend, "agent-task").expect("select");
        assert_eq!(outcome, SelectOutcome::AllBlocked { open: 0 });
    }

    #[test]
    fn selection_is_deterministic_for_a_fixed_pool() {
        let backend = MemoryBackend::new(RefStyle::Hash);
        backend.push(queued_item("10", 1));
        backend.push(queued_item("9", 1));

        for _ in 0..3 {
            match select_next(&backend, "agent-task").expect("select") {
                SelectOutcome::Selected(item) => assert_eq!(item.id, "9"),
                other => panic!("expected selection, got {other:?}"),
            }
        }
    }
}

//! Deterministic candidate ordering for selection.

use std::cmp::Ordering;

use crate::core::types::{WorkItem, WorkState};

/// Order a snapshot of the pool into candidate sequence.
///
/// Only queued items are candidates. Ordering is a stable ascending sort by
/// `(priority_score, id)`, so repeated selection against an unchanged pool
/// always yields the same item. Selection itself is first-fit: the scheduler
/// walks this order and takes the first unblocked candidate.
pub fn order_candidates(items: &[WorkItem]) -> Vec<&WorkItem> {
    let mut candidates: Vec<&WorkItem> = items
        .iter()
        .filter(|item| item.state == WorkState::Queued)
        .collect();
    candidates.sort_by(|a, b| {
        a.priority_score
            .cmp(&b.priority_score)
            .then_with(|| id_order(&a.id, &b.id))
    });
    candidates
}

/// Numeric comparison when both ids are integers (issue numbers), so `#9`
/// sorts before `#10`; lexicographic otherwise.
fn id_order(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, priority_score: u8, state: WorkState) -> WorkItem {
        WorkItem {
            id: id.to_string(),
            display_id: format!("#{id}"),
            title: format!("{id} title"),
            body: String::new(),
            priority_score,
            state,
            blocked_by: Vec::new(),
        }
    }

    #[test]
    fn orders_by_priority_then_numeric_id() {
        let items = vec![
            item("10", 2, WorkState::Queued),
            item("9", 2, WorkState::Queued),
            item("3", 1, WorkState::Queued),
        ];
        let ids: Vec<&str> = order_candidates(&items)
            .iter()
            .map(|i| i.id.as_str())
            .collect();
        assert_eq!(ids, vec!["3", "9", "10"]);
    }

    #[test]
    fn non_queued_items_are_never_candidates() {
        let items = vec![
            item("1", 1, WorkState::InProgress),
            item("2", 1, WorkState::Done),
            item("3", 1, WorkState::Blocked),
            item("4", 1, WorkState::Cancelled),
            item("5", 1, WorkState::Queued),
        ];
        let ids: Vec<&str> = order_candidates(&items)
            .iter()
            .map(|i| i.id.as_str())
            .collect();
        assert_eq!(ids, vec!["5"]);
    }

    #[test]
    fn ordering_is_stable_across_repeated_calls() {
        let items = vec![
            item("2", 1, WorkState::Queued),
            item("1", 1, WorkState::Queued),
        ];
        let first: Vec<&str> = order_candidates(&items)
            .iter()
            .map(|i| i.id.as_str())
            .collect();
        let second: Vec<&str> = order_candidates(&items)
            .iter()
            .map(|i| i.id.as_str())
            .collect();
        assert_eq!(first, second);
        assert_eq!(first, vec!["1", "2"]);
    }

    #[test]
    fn string_ids_fall_back_to_lexicographic_order() {
        let items = vec![
            item("b", 1, WorkState::Queued),
            item("a", 1, WorkState::Queued),
        ];
        let ids: Vec<&str> = order_candidates(&items)
            .iter()
            .map(|i| i.id.as_str())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}

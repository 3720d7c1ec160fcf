//! Dependency resolution: is a candidate currently blocked?
//!
//! Two independent, additive checks: structured blocker relations (when the
//! backend models them) and free-text references parsed from the body. Both
//! resolve each reference against the backend fresh on every call, so an
//! item whose blocker was closed since the last cycle becomes selectable
//! immediately (no stale-blocked caching).

use tracing::debug;

use crate::backend::{Backend, BackendError};
use crate::core::refs::blocking_refs;
use crate::core::types::WorkItem;

/// Decide whether `item` is blocked by any still-open prerequisite.
///
/// Unknown references are tolerated (not blocking); transport failures
/// propagate so the cycle can be retried.
pub fn is_blocked(backend: &dyn Backend, item: &WorkItem) -> Result<bool, BackendError> {
    let mut seen: Vec<String> = Vec::new();

    for reference in &item.blocked_by {
        seen.push(reference.clone());
        if blocks(backend, item, reference)? {
            debug!(item = %item.display_id, blocker = %reference, "blocked by structured relation");
            return Ok(true);
        }
    }

    for reference in blocking_refs(&item.body, backend.ref_style()) {
        if seen.contains(&reference) {
            continue;
        }
        if blocks(backend, item, &reference)? {
            debug!(item = %item.display_id, blocker = %reference, "blocked by free-text reference");
            return Ok(true);
        }
        seen.push(reference);
    }

    Ok(false)
}

fn blocks(backend: &dyn Backend, item: &WorkItem, reference: &str) -> Result<bool, BackendError> {
    if is_self(item, reference) {
        return Ok(false);
    }
    match backend.lookup(reference)? {
        Some(blocker) => Ok(!blocker.state.is_terminal()),
        None => Ok(false),
    }
}

fn is_self(item: &WorkItem, reference: &str) -> bool {
    reference == item.id
        || reference == item.display_id
        || reference == item.display_id.trim_start_matches('#')
}

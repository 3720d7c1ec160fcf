//! Test-only scripted fakes: an in-memory backend plus scripted driver and
//! verifier. None of these spawn processes or touch the network.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

use anyhow::Result;

use crate::backend::{Backend, BackendError, Transition};
use crate::core::types::{DriverOutcome, NewWorkItem, RefStyle, WorkItem, WorkState};
use crate::driver::{Driver, DriverRequest};
use crate::verify::{Verifier, VerifyOutcome, VerifyRequest};

/// Deterministic queued item. Numeric ids get a `#`-style display id,
/// anything else (e.g. `ENG-1`) is its own display id.
pub fn queued_item(id: &str, priority_score: u8) -> WorkItem {
    let display_id = if id.bytes().all(|b| b.is_ascii_digit()) {
        format!("#{id}")
    } else {
        id.to_string()
    };
    WorkItem {
        id: id.to_string(),
        display_id,
        title: format!("{id} title"),
        body: String::new(),
        priority_score,
        state: WorkState::Queued,
        blocked_by: Vec::new(),
    }
}

/// Queued item with an explicit body (for free-text blocker tests).
pub fn item_with_body(id: &str, priority_score: u8, body: &str) -> WorkItem {
    let mut item = queued_item(id, priority_score);
    item.body = body.to_string();
    item
}

/// In-memory pool implementing the full [`Backend`] contract.
///
/// Transitions that actually change state are recorded in `transitions`;
/// idempotent re-invocations record nothing, so tests can assert the
/// once-per-occurrence property directly.
pub struct MemoryBackend {
    style: RefStyle,
    items: RefCell<Vec<WorkItem>>,
    pub transitions: RefCell<Vec<(String, Transition)>>,
    pub notes: RefCell<Vec<String>>,
    fail_queries: Cell<bool>,
    fail_next: Cell<u32>,
    next_id: Cell<u64>,
}

impl MemoryBackend {
    pub fn new(style: RefStyle) -> Self {
        Self {
            style,
            items: RefCell::new(Vec::new()),
            transitions: RefCell::new(Vec::new()),
            notes: RefCell::new(Vec::new()),
            fail_queries: Cell::new(false),
            fail_next: Cell::new(0),
            next_id: Cell::new(1),
        }
    }

    pub fn push(&self, item: WorkItem) {
        self.items.borrow_mut().push(item);
    }

    /// Make queries fail with `Unavailable` until switched back.
    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.set(fail);
    }

    /// Fail only the next `n` backend calls, then recover.
    pub fn fail_next_queries(&self, n: u32) {
        self.fail_next.set(n);
    }

    pub fn state_of(&self, id: &str) -> Option<WorkState> {
        self.items
            .borrow()
            .iter()
            .find(|item| item.id == id)
            .map(|item| item.state)
    }

    fn check_available(&self) -> Result<(), BackendError> {
        let pending = self.fail_next.get();
        if pending > 0 {
            self.fail_next.set(pending - 1);
            return Err(BackendError::Unavailable(
                "scripted transport failure".to_string(),
            ));
        }
        if self.fail_queries.get() {
            return Err(BackendError::Unavailable(
                "scripted transport failure".to_string(),
            ));
        }
        Ok(())
    }

    fn find(&self, reference: &str) -> Option<WorkItem> {
        self.items
            .borrow()
            .iter()
            .find(|item| {
                item.id == reference
                    || item.display_id == reference
                    || item.display_id.trim_start_matches('#') == reference
            })
            .cloned()
    }
}

impl Backend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn ref_style(&self) -> RefStyle {
        self.style
    }

    fn list_open(&self, _label: &str) -> Result<Vec<WorkItem>, BackendError> {
        self.check_available()?;
        Ok(self
            .items
            .borrow()
            .iter()
            .filter(|item| item.state == WorkState::Queued)
            .cloned()
            .collect())
    }

    fn count_remaining(&self, _label: &str) -> Result<usize, BackendError> {
        self.check_available()?;
        Ok(self
            .items
            .borrow()
            .iter()
            .filter(|item| !item.state.is_terminal())
            .count())
    }

    fn lookup(&self, reference: &str) -> Result<Option<WorkItem>, BackendError> {
        self.check_available()?;
        Ok(self.find(reference))
    }

    fn transition(
        &self,
        item: &WorkItem,
        target: Transition,
        note: Option<&str>,
    ) -> Result<(), BackendError> {
        self.check_available()?;
        let mut items = self.items.borrow_mut();
        let stored = items
            .iter_mut()
            .find(|stored| stored.id == item.id)
            .ok_or_else(|| BackendError::Api {
                status: 404,
                message: format!("unknown item {}", item.display_id),
            })?;

        let next = match target {
            Transition::InProgress => WorkState::InProgress,
            Transition::Done => WorkState::Done,
            Transition::Requeue => WorkState::Queued,
        };
        if stored.state == next {
            return Ok(());
        }
        stored.state = next;
        self.transitions
            .borrow_mut()
            .push((item.display_id.clone(), target));
        if let Some(note) = note {
            self.notes.borrow_mut().push(note.to_string());
        }
        Ok(())
    }

    fn create(&self, draft: &NewWorkItem, _label: &str) -> Result<WorkItem, BackendError> {
        self.check_available()?;
        let n = self.next_id.get();
        self.next_id.set(n + 1);
        let (id, display_id) = match self.style {
            RefStyle::Hash => (n.to_string(), format!("#{n}")),
            RefStyle::TeamPrefixed => (format!("uuid-{n}"), format!("ENG-{n}")),
        };
        let item = WorkItem {
            id,
            display_id,
            title: draft.title.clone(),
            body: draft.body.clone(),
            priority_score: draft.priority_score,
            state: WorkState::Queued,
            blocked_by: Vec::new(),
        };
        self.items.borrow_mut().push(item.clone());
        Ok(item)
    }
}

/// Driver returning a scripted sequence of outcomes (then `Completed`).
pub struct ScriptedDriver {
    outcomes: RefCell<VecDeque<DriverOutcome>>,
    pub prompts: RefCell<Vec<String>>,
}

impl ScriptedDriver {
    pub fn new(outcomes: Vec<DriverOutcome>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }
}

impl Driver for ScriptedDriver {
    fn run(&self, request: &DriverRequest) -> Result<DriverOutcome> {
        self.prompts.borrow_mut().push(request.prompt.clone());
        Ok(self
            .outcomes
            .borrow_mut()
            .pop_front()
            .unwrap_or(DriverOutcome::Completed))
    }
}

/// Verifier returning a fixed outcome and counting invocations.
pub struct ScriptedVerifier {
    outcome: VerifyOutcome,
    pub calls: Cell<u32>,
}

impl ScriptedVerifier {
    pub fn new(outcome: VerifyOutcome) -> Self {
        Self {
            outcome,
            calls: Cell::new(0),
        }
    }
}

impl Verifier for ScriptedVerifier {
    fn verify(&self, _request: &VerifyRequest) -> Result<VerifyOutcome> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.outcome)
    }
}

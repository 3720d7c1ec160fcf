//! End-to-end loop tests over the in-memory backend.
//!
//! These exercise the full scheduling path (count, select, resolve, claim,
//! drive, transition, record) without spawning processes or touching the
//! network.

use foreman::backend::{Backend, Transition};
use foreman::core::types::{DriverOutcome, RefStyle, WorkState};
use foreman::cycle::CycleContext;
use foreman::io::config::ForemanConfig;
use foreman::io::ledger::Ledger;
use foreman::looping::{LoopConfig, LoopStop, run_loop};
use foreman::test_support::{MemoryBackend, ScriptedDriver, ScriptedVerifier, item_with_body, queued_item};
use foreman::verify::{Verifier, VerifyOutcome};

struct Harness {
    backend: MemoryBackend,
    ledger: Ledger,
    config: ForemanConfig,
    temp: tempfile::TempDir,
}

impl Harness {
    fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let ledger = Ledger::new(temp.path().join("progress.md"));
        Self {
            backend: MemoryBackend::new(RefStyle::Hash),
            ledger,
            config: ForemanConfig::default(),
            temp,
        }
    }

    fn ctx<'a>(
        &'a self,
        driver: &'a ScriptedDriver,
        verifier: Option<&'a dyn Verifier>,
    ) -> CycleContext<'a> {
        CycleContext {
            backend: &self.backend,
            driver,
            verifier,
            ledger: &self.ledger,
            config: &self.config,
            workdir: self.temp.path(),
            push_enabled: false,
            max_turns: None,
        }
    }
}

fn loop_config(max_iterations: u32) -> LoopConfig {
    LoopConfig {
        label: "agent-task".to_string(),
        max_iterations,
    }
}

#[test]
fn dependency_pool_completes_in_priority_order() {
    let harness = Harness::new();
    harness.backend.push(queued_item("1", 1));
    harness
        .backend
        .push(item_with_body("2", 2, "Blocked by #1"));
    let driver = ScriptedDriver::new(Vec::new());

    let mut order = Vec::new();
    let outcome = run_loop(&harness.ctx(&driver, None), &loop_config(10), |cycle| {
        order.push(cycle.display_id.clone());
    })
    .expect("loop");

    // Cycle 1 takes #1 (lower priority score, unblocked); once it is done,
    // #2's blocker resolves and cycle 2 takes #2.
    assert_eq!(order, vec!["#1", "#2"]);
    assert_eq!(outcome.cycles_run, 2);
    assert_eq!(outcome.completed, 2);
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.remaining, 0);
    assert_eq!(outcome.stop, LoopStop::NoneRemaining);
}

#[test]
fn done_items_never_reappear_as_candidates() {
    let harness = Harness::new();
    harness.backend.push(queued_item("1", 1));
    let driver = ScriptedDriver::new(Vec::new());

    run_loop(&harness.ctx(&driver, None), &loop_config(10), |_| {}).expect("loop");
    assert_eq!(harness.backend.state_of("1"), Some(WorkState::Done));
    assert!(
        harness
            .backend
            .list_open("agent-task")
            .expect("list")
            .is_empty()
    );
}

#[test]
fn repeated_done_transition_has_one_observable_effect() {
    let harness = Harness::new();
    let item = queued_item("1", 1);
    harness.backend.push(item.clone());

    harness
        .backend
        .transition(&item, Transition::Done, Some("closing"))
        .expect("first transition");
    harness
        .backend
        .transition(&item, Transition::Done, Some("closing again"))
        .expect("second transition");

    let transitions = harness.backend.transitions.borrow();
    assert_eq!(*transitions, vec![("#1".to_string(), Transition::Done)]);
    assert_eq!(harness.backend.notes.borrow().len(), 1);
}

#[test]
fn ledger_records_every_lifecycle_transition() {
    let harness = Harness::new();
    harness.backend.push(queued_item("1", 1));
    harness.backend.push(queued_item("2", 2));
    let driver = ScriptedDriver::new(vec![
        DriverOutcome::Blocked,
        DriverOutcome::Completed,
        DriverOutcome::Completed,
    ]);

    let outcome =
        run_loop(&harness.ctx(&driver, None), &loop_config(10), |_| {}).expect("loop");
    assert_eq!(outcome.completed, 2);
    assert_eq!(outcome.failed, 1);

    let entries = harness.ledger.entries().expect("entries");
    let events: Vec<&str> = entries
        .iter()
        .map(|line| {
            line.split_whitespace()
                .nth(2)
                .expect("event field in ledger line")
        })
        .collect();
    assert_eq!(
        events,
        vec!["started", "blocked", "started", "completed", "started", "completed"]
    );
}

#[test]
fn verification_failures_requeue_until_the_cap() {
    let harness = Harness::new();
    harness.backend.push(item_with_body(
        "1",
        1,
        "Fix the nav.\n\nVerify: https://app.example.com\nSelector: .nav\n",
    ));
    let driver = ScriptedDriver::new(Vec::new());
    let verifier = ScriptedVerifier::new(VerifyOutcome::Fail);

    let outcome = run_loop(
        &harness.ctx(&driver, Some(&verifier)),
        &loop_config(2),
        |_| {},
    )
    .expect("loop");

    assert_eq!(outcome.stop, LoopStop::MaxCycles);
    assert_eq!(outcome.completed, 0);
    assert_eq!(outcome.failed, 2);
    assert_eq!(verifier.calls.get(), 2);
    assert_eq!(harness.backend.state_of("1"), Some(WorkState::Queued));
}

#[test]
fn structured_blockers_and_free_text_are_additive() {
    let harness = Harness::new();
    harness.backend.push(queued_item("1", 5));
    let mut item = queued_item("2", 1);
    item.blocked_by = vec!["#1".to_string()];
    harness.backend.push(item);
    let driver = ScriptedDriver::new(Vec::new());

    let mut order = Vec::new();
    run_loop(&harness.ctx(&driver, None), &loop_config(10), |cycle| {
        order.push(cycle.display_id.clone());
    })
    .expect("loop");

    // #2 is more urgent but structurally blocked on #1.
    assert_eq!(order, vec!["#1", "#2"]);
}

#[test]
fn claimed_items_are_invisible_until_reset() {
    let harness = Harness::new();
    let mut stale = queued_item("1", 1);
    stale.state = WorkState::InProgress;
    harness.backend.push(stale);
    let driver = ScriptedDriver::new(Vec::new());

    let outcome =
        run_loop(&harness.ctx(&driver, None), &loop_config(10), |_| {}).expect("loop");

    // A stale claim still counts toward remaining but is never selected.
    assert_eq!(outcome.stop, LoopStop::AllBlocked { open: 0 });
    assert_eq!(outcome.remaining, 1);
    assert!(driver.prompts.borrow().is_empty());
}

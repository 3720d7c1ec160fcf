//! Multi-cycle scheduling loop for `foreman run`.

use anyhow::Result;
use tracing::{info, warn};

use crate::core::types::Disposition;
use crate::cycle::{CycleContext, CycleOutcome, run_cycle};
use crate::select::{SelectOutcome, select_next};

/// Reason why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// No non-terminal labeled items remain.
    NoneRemaining,
    /// Items remain but every candidate is blocked (includes blocking
    /// cycles and pools where only stale claims are left). A deliberate
    /// conservative stop, not an error.
    AllBlocked { open: usize },
    /// The agent signalled whole-loop completion.
    LoopComplete,
    /// The configured cycle cap was reached.
    MaxCycles,
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub cycles_run: u32,
    pub completed: u32,
    pub failed: u32,
    pub remaining: usize,
    pub stop: LoopStop,
}

/// Loop parameters.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Tracking label identifying this run's work pool.
    pub label: String,
    /// Hard cap on scheduling cycles.
    pub max_iterations: u32,
}

/// Run scheduling cycles until the pool drains, everything left is blocked,
/// the agent signals whole-loop completion, or the cycle cap is reached.
///
/// Backend failures during counting or selection consume a cycle and are
/// retried; a single item's failure never halts the loop.
pub fn run_loop<F: FnMut(&CycleOutcome)>(
    ctx: &CycleContext<'_>,
    config: &LoopConfig,
    mut on_cycle: F,
) -> Result<LoopOutcome> {
    let mut cycles_run = 0u32;
    let mut completed = 0u32;
    let mut failed = 0u32;
    let mut last_known_remaining = 0usize;

    for iter in 1..=config.max_iterations {
        let remaining = match ctx.backend.count_remaining(&config.label) {
            Ok(0) => {
                info!(iter, "no items remaining, halting");
                return Ok(LoopOutcome {
                    cycles_run,
                    completed,
                    failed,
                    remaining: 0,
                    stop: LoopStop::NoneRemaining,
                });
            }
            Ok(n) => n,
            Err(err) => {
                warn!(iter, err = %err, "backend unavailable, retrying next cycle");
                cycles_run = iter;
                continue;
            }
        };
        last_known_remaining = remaining;

        let selected = match select_next(ctx.backend, &config.label) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(iter, err = %err, "selection failed, retrying next cycle");
                cycles_run = iter;
                continue;
            }
        };

        let item = match selected {
            SelectOutcome::Selected(item) => item,
            SelectOutcome::AllBlocked { open } => {
                info!(iter, open, remaining, "all remaining work is blocked, halting");
                return Ok(LoopOutcome {
                    cycles_run,
                    completed,
                    failed,
                    remaining,
                    stop: LoopStop::AllBlocked { open },
                });
            }
        };

        let outcome = run_cycle(ctx, iter, &item, remaining == 1)?;
        cycles_run = iter;
        match outcome.disposition {
            Disposition::Completed => completed += 1,
            Disposition::Blocked | Disposition::Failed | Disposition::VerificationFailed => {
                failed += 1;
            }
            Disposition::Skipped => {}
        }
        on_cycle(&outcome);

        if outcome.loop_complete {
            let remaining = ctx
                .backend
                .count_remaining(&config.label)
                .unwrap_or_else(|_| remaining.saturating_sub(1));
            info!(iter, "loop completion signalled, halting");
            return Ok(LoopOutcome {
                cycles_run,
                completed,
                failed,
                remaining,
                stop: LoopStop::LoopComplete,
            });
        }
    }

    let remaining = ctx
        .backend
        .count_remaining(&config.label)
        .unwrap_or(last_known_remaining);
    info!(max_iterations = config.max_iterations, "cycle cap reached, halting");
    Ok(LoopOutcome {
        cycles_run,
        completed,
        failed,
        remaining,
        stop: LoopStop::MaxCycles,
    })
}

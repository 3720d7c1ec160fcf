//! Orchestration of one full lifecycle cycle for a selected item.
//!
//! Claim, prompt, drive, interpret, transition, record. Transport errors on
//! transitions are logged and the cycle proceeds; the item's backend-visible
//! state may briefly lag its locally-assumed state and is reconciled by the
//! next cycle's fresh listing.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use tracing::{debug, info, warn};

use crate::backend::{Backend, Transition};
use crate::core::criteria::verify_target;
use crate::core::types::{Disposition, DriverOutcome, LedgerEvent, WorkItem};
use crate::driver::{Driver, DriverRequest};
use crate::io::config::ForemanConfig;
use crate::io::ledger::{Ledger, LedgerEntry};
use crate::io::process::run_command;
use crate::io::prompt::{PromptBuilder, PromptInputs};
use crate::verify::{Verifier, VerifyOutcome, VerifyRequest};

/// Everything a cycle needs, injected at construction time.
pub struct CycleContext<'a> {
    pub backend: &'a dyn Backend,
    pub driver: &'a dyn Driver,
    /// `None` disables the verification gate entirely.
    pub verifier: Option<&'a dyn Verifier>,
    pub ledger: &'a Ledger,
    pub config: &'a ForemanConfig,
    pub workdir: &'a Path,
    pub push_enabled: bool,
    pub max_turns: Option<u32>,
}

/// How one cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleOutcome {
    pub iter: u32,
    pub display_id: String,
    pub disposition: Disposition,
    /// The agent asked the whole loop to stop (and the item completed).
    pub loop_complete: bool,
}

/// Drive one selected item through its lifecycle.
pub fn run_cycle(
    ctx: &CycleContext<'_>,
    iter: u32,
    item: &WorkItem,
    last_item: bool,
) -> Result<CycleOutcome> {
    info!(item = %item.display_id, iter, "starting cycle");

    // Claim before any work begins, so concurrent or resumed runs see the
    // item as taken.
    if let Err(err) = ctx.backend.transition(item, Transition::InProgress, None) {
        warn!(item = %item.display_id, err = %err, "claim transition not applied, continuing");
    }
    ctx.ledger.append(&LedgerEntry::now(
        LedgerEvent::Started,
        &item.display_id,
        format!("cycle {iter}: claimed"),
    ))?;

    let patterns = ctx.ledger.patterns().unwrap_or_default();
    let prompt = PromptBuilder::new().build(&PromptInputs {
        item,
        patterns: &patterns,
        last_item,
    })?;

    let request = DriverRequest {
        workdir: ctx.workdir.to_path_buf(),
        prompt,
        log_path: cycle_log(ctx.workdir, iter, "driver"),
        timeout: Duration::from_secs(ctx.config.driver.timeout_secs),
        output_limit_bytes: ctx.config.driver.output_limit_bytes,
        max_turns: ctx.max_turns,
    };

    let outcome = match ctx.driver.run(&request) {
        Ok(outcome) => outcome,
        Err(err) => DriverOutcome::Failed {
            detail: format!("driver error: {err:#}"),
        },
    };

    let completed_all = outcome == DriverOutcome::CompletedAll;
    match outcome {
        DriverOutcome::Blocked => {
            requeue(ctx, item, LedgerEvent::Blocked, "agent reported blocked")?;
            Ok(CycleOutcome {
                iter,
                display_id: item.display_id.clone(),
                disposition: Disposition::Blocked,
                loop_complete: false,
            })
        }
        DriverOutcome::Failed { detail } => {
            requeue(ctx, item, LedgerEvent::Failed, &detail)?;
            Ok(CycleOutcome {
                iter,
                display_id: item.display_id.clone(),
                disposition: Disposition::Failed,
                loop_complete: false,
            })
        }
        DriverOutcome::Completed | DriverOutcome::CompletedAll => {
            if !verification_passes(ctx, iter, item)? {
                requeue(
                    ctx,
                    item,
                    LedgerEvent::VerificationFailed,
                    "verification gate failed",
                )?;
                return Ok(CycleOutcome {
                    iter,
                    display_id: item.display_id.clone(),
                    disposition: Disposition::VerificationFailed,
                    loop_complete: false,
                });
            }

            let note = format!(
                "Completed by foreman cycle {iter} at {}.",
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
            );
            if let Err(err) = ctx.backend.transition(item, Transition::Done, Some(&note)) {
                warn!(item = %item.display_id, err = %err, "done transition not applied, continuing");
            }
            ctx.ledger.append(&LedgerEntry::now(
                LedgerEvent::Completed,
                &item.display_id,
                format!("cycle {iter}: closed"),
            ))?;

            if ctx.push_enabled {
                push_upstream(ctx);
            }

            Ok(CycleOutcome {
                iter,
                display_id: item.display_id.clone(),
                disposition: Disposition::Completed,
                loop_complete: completed_all,
            })
        }
    }
}

fn requeue(
    ctx: &CycleContext<'_>,
    item: &WorkItem,
    event: LedgerEvent,
    detail: &str,
) -> Result<()> {
    if let Err(err) = ctx.backend.transition(item, Transition::Requeue, Some(detail)) {
        warn!(item = %item.display_id, err = %err, "requeue transition not applied, continuing");
    }
    ctx.ledger
        .append(&LedgerEntry::now(event, &item.display_id, detail))
}

/// Run the verification gate. Passing means "safe to close": no verifier,
/// no target in the body, or an actual pass. A verifier error counts as a
/// failure; the item must not close unverified.
fn verification_passes(ctx: &CycleContext<'_>, iter: u32, item: &WorkItem) -> Result<bool> {
    let Some(verifier) = ctx.verifier else {
        return Ok(true);
    };
    let Some(target) = verify_target(&item.body) else {
        debug!(item = %item.display_id, "no verification target in body, gate skipped");
        return Ok(true);
    };

    let request = VerifyRequest {
        workdir: ctx.workdir.to_path_buf(),
        url: target.url,
        selectors: target.selectors,
        log_path: cycle_log(ctx.workdir, iter, "verify"),
        timeout: Duration::from_secs(ctx.config.verify.timeout_secs),
        output_limit_bytes: ctx.config.driver.output_limit_bytes,
    };
    match verifier.verify(&request) {
        Ok(VerifyOutcome::Pass) => Ok(true),
        Ok(VerifyOutcome::Fail) => Ok(false),
        Err(err) => {
            warn!(item = %item.display_id, err = %err, "verification errored, treating as failure");
            Ok(false)
        }
    }
}

/// Publish completed work. Failure is a warning, never fatal.
fn push_upstream(ctx: &CycleContext<'_>) {
    let command = &ctx.config.push.command;
    if command.is_empty() || command[0].trim().is_empty() {
        warn!("push requested but push.command is empty");
        return;
    }
    let mut cmd = Command::new(&command[0]);
    cmd.args(&command[1..]).current_dir(ctx.workdir);
    match run_command(
        cmd,
        None,
        Duration::from_secs(ctx.config.push.timeout_secs),
        ctx.config.driver.output_limit_bytes,
    ) {
        Ok(output) if output.status.success() && !output.timed_out => {
            info!("pushed completed work upstream");
        }
        Ok(output) => {
            warn!(stderr = %output.stderr_text(), "push failed, continuing");
        }
        Err(err) => {
            warn!(err = %err, "push failed, continuing");
        }
    }
}

fn cycle_log(workdir: &Path, iter: u32, kind: &str) -> std::path::PathBuf {
    workdir.join(".foreman").join(format!("cycle-{iter}-{kind}.log"))
}

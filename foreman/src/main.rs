//! CLI entry point for foreman.
//!
//! Exit behavior: 0 on every normal halt (pool drained, all blocked,
//! loop-complete signal, cycle cap); non-zero only for unrecoverable
//! configuration errors detected before the loop starts (missing
//! credentials or tools) and unrecoverable local I/O failures.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand, ValueEnum};

use foreman::backend::Backend;
use foreman::backend::github::GithubBackend;
use foreman::backend::linear::LinearBackend;
use foreman::core::types::Disposition;
use foreman::cycle::CycleContext;
use foreman::driver::AgentDriver;
use foreman::exit_codes;
use foreman::io::config::{ForemanConfig, load_config};
use foreman::io::ledger::Ledger;
use foreman::looping::{LoopConfig, LoopStop, run_loop};
use foreman::seed::{load_plan, run_seed};
use foreman::verify::{CommandVerifier, Verifier};

#[derive(Parser)]
#[command(
    name = "foreman",
    version,
    about = "Issue-queue loop runner for coding agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Drive queued issues through the agent loop until drained, blocked, or capped.
    Run {
        /// Issue tracker to run against.
        #[arg(long, value_enum)]
        backend: BackendKind,
        /// Tracking label identifying this run's work pool.
        #[arg(long, default_value = "agent-task")]
        label: String,
        /// Linear team key (or set LINEAR_TEAM_KEY).
        #[arg(long)]
        team: Option<String>,
        /// Gate completions on the external verification check.
        #[arg(long)]
        verify: bool,
        /// Publish completed work upstream after each done transition.
        #[arg(long)]
        push: bool,
        /// Passed through to the agent command, never interpreted here.
        #[arg(long)]
        max_turns: Option<u32>,
        /// Hard cap on scheduling cycles.
        #[arg(default_value_t = 10)]
        max_iterations: u32,
    },
    /// Create backend items from a generated plan file, in dependency order.
    Seed {
        /// Issue tracker to seed into.
        #[arg(long, value_enum)]
        backend: BackendKind,
        /// Tracking label applied to every created item.
        #[arg(long, default_value = "agent-task")]
        label: String,
        /// Linear team key (or set LINEAR_TEAM_KEY).
        #[arg(long)]
        team: Option<String>,
        /// Plan file: JSON array of planned items.
        #[arg(long)]
        plan: PathBuf,
    },
    /// Print the ledger's patterns section, or replace it from a file.
    Patterns {
        /// Replace the section with this file's contents.
        #[arg(long)]
        edit: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BackendKind {
    Github,
    Linear,
}

fn main() {
    foreman::logging::init();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(exit_codes::CONFIG);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            backend,
            label,
            team,
            verify,
            push,
            max_turns,
            max_iterations,
        } => cmd_run(backend, label, team, verify, push, max_turns, max_iterations),
        Command::Seed {
            backend,
            label,
            team,
            plan,
        } => cmd_seed(backend, label, team, &plan),
        Command::Patterns { edit } => cmd_patterns(edit.as_deref()),
    }
}

fn cmd_run(
    kind: BackendKind,
    label: String,
    team: Option<String>,
    verify: bool,
    push: bool,
    max_turns: Option<u32>,
    max_iterations: u32,
) -> Result<()> {
    let workdir = std::env::current_dir().context("resolve working directory")?;
    let config = load_config(&workdir.join("foreman.toml"))?;
    let backend = build_backend(kind, team)?;
    let driver = AgentDriver::new(config.driver.command.clone())?;
    let verifier = build_verifier(verify, &config)?;
    let ledger = Ledger::new(workdir.join(&config.ledger_path));
    ledger.ensure_exists()?;

    let ctx = CycleContext {
        backend: backend.as_ref(),
        driver: &driver,
        verifier: verifier.as_ref().map(|v| v as &dyn Verifier),
        ledger: &ledger,
        config: &config,
        workdir: &workdir,
        push_enabled: push,
        max_turns,
    };
    let loop_config = LoopConfig {
        label,
        max_iterations,
    };

    let outcome = run_loop(&ctx, &loop_config, |cycle| {
        println!(
            "cycle {}: {} {}",
            cycle.iter,
            cycle.display_id,
            disposition_label(cycle.disposition)
        );
    })?;

    let stop = match outcome.stop {
        LoopStop::NoneRemaining => "no items remaining".to_string(),
        LoopStop::AllBlocked { open } => {
            format!("all remaining work is blocked ({open} open candidates)")
        }
        LoopStop::LoopComplete => "agent signalled completion".to_string(),
        LoopStop::MaxCycles => "cycle cap reached".to_string(),
    };
    println!("run halted: {stop}");
    println!("cycles run: {}", outcome.cycles_run);
    println!("completed:  {}", outcome.completed);
    println!("failed:     {}", outcome.failed);
    println!("remaining:  {}", outcome.remaining);
    Ok(())
}

fn cmd_seed(kind: BackendKind, label: String, team: Option<String>, plan: &Path) -> Result<()> {
    let workdir = std::env::current_dir().context("resolve working directory")?;
    let config = load_config(&workdir.join("foreman.toml"))?;
    let backend = build_backend(kind, team)?;
    let ledger = Ledger::new(workdir.join(&config.ledger_path));
    ledger.ensure_exists()?;

    let records = load_plan(plan)?;
    let created = run_seed(backend.as_ref(), &ledger, &label, &records)?;
    for item in &created {
        println!("seeded {}: {}", item.display_id, item.title);
    }
    println!("seeded {} items", created.len());
    Ok(())
}

fn cmd_patterns(edit: Option<&Path>) -> Result<()> {
    let workdir = std::env::current_dir().context("resolve working directory")?;
    let config = load_config(&workdir.join("foreman.toml"))?;
    let ledger = Ledger::new(workdir.join(&config.ledger_path));

    match edit {
        Some(file) => {
            let text = fs::read_to_string(file)
                .with_context(|| format!("read patterns file {}", file.display()))?;
            ledger.set_patterns(&text)?;
            println!("patterns updated");
        }
        None => {
            println!("{}", ledger.patterns()?);
        }
    }
    Ok(())
}

fn build_backend(kind: BackendKind, team: Option<String>) -> Result<Box<dyn Backend>> {
    match kind {
        BackendKind::Github => {
            let backend = GithubBackend::new().context("github preflight")?;
            Ok(Box::new(backend))
        }
        BackendKind::Linear => {
            let api_key = std::env::var("LINEAR_API_KEY")
                .map_err(|_| anyhow!("LINEAR_API_KEY is not set"))?;
            let team_key = team
                .or_else(|| std::env::var("LINEAR_TEAM_KEY").ok())
                .ok_or_else(|| anyhow!("linear team key missing (use --team or LINEAR_TEAM_KEY)"))?;
            let backend = LinearBackend::new(api_key, team_key).context("linear preflight")?;
            Ok(Box::new(backend))
        }
    }
}

fn build_verifier(enabled: bool, config: &ForemanConfig) -> Result<Option<CommandVerifier>> {
    if !enabled {
        return Ok(None);
    }
    if config.verify.command.is_empty() {
        bail!("--verify requires verify.command in foreman.toml");
    }
    Ok(Some(CommandVerifier::new(config.verify.command.clone())?))
}

fn disposition_label(disposition: Disposition) -> &'static str {
    match disposition {
        Disposition::Completed => "completed",
        Disposition::Blocked => "blocked",
        Disposition::Failed => "failed",
        Disposition::VerificationFailed => "verification failed",
        Disposition::Skipped => "skipped",
    }
}

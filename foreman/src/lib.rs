//! Issue-queue loop runner for coding agents.
//!
//! Foreman loops over labeled issues in an external tracker (GitHub Issues
//! or Linear), feeding each one to an agent subprocess and marking progress
//! from the subprocess's textual output. The architecture enforces a strict
//! separation:
//!
//! - **[`core`]**: Pure, deterministic logic (ordering, reference parsing,
//!   body-text extraction). No I/O, fully testable in isolation.
//! - **[`backend`]**: The adapter contract plus the two tracker adapters;
//!   the only code that knows about transports.
//! - **[`io`]**: Side-effecting plumbing (child processes, ledger file,
//!   configuration, prompt build).
//!
//! Orchestration modules ([`select`], [`resolver`], [`cycle`], [`looping`],
//! [`seed`]) coordinate core logic with backends and I/O to implement the
//! CLI commands.

pub mod backend;
pub mod core;
pub mod cycle;
pub mod driver;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod looping;
pub mod resolver;
pub mod seed;
pub mod select;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
pub mod verify;

//! Side-effecting operations: filesystem, child processes, configuration.

pub mod config;
pub mod ledger;
pub mod process;
pub mod prompt;

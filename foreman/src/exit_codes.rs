//! Stable exit codes for the foreman CLI.

/// Normal halt: pool drained, all remaining work blocked, loop-complete
/// signal, or cycle cap reached.
pub const OK: i32 = 0;
/// Unrecoverable configuration error (missing credentials/tools), reported
/// before the loop starts, or an unrecoverable local I/O error.
pub const CONFIG: i32 = 1;

//! Stable exit codes for `swarm` commands.

/// Command succeeded: debate reached approval, issue implemented or split.
pub const OK: i32 = 0;
/// Invalid input, config or state, or an unexpected error.
pub const INVALID: i32 = 1;
/// The debate or session ended blocked (stalemate, timeout, retries exhausted).
pub const BLOCKED: i32 = 2;
/// An agent step failed outright, or the issue was already claimed.
pub const FAILED: i32 = 3;
/// `swarm gate` judged the issue too large.
pub const NEEDS_SPLIT: i32 = 4;

//! Multi-agent TDD orchestration core.
//!
//! Drives a spec debate (author, critic, moderator) until the spec is ready
//! for approval, then implements issues test-first (test writer, coder,
//! verifier) with classified recovery from failures.
//!
//! - **[`core`]**: Pure, deterministic logic (stopping condition, semantic keys,
//!   error classification, complexity heuristics, split planning, event types).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (config, event log, state store,
//!   locks, git, issue tracker, LLM backend). Traits at the seams for tests.
//! - **[`agents`]**: The [`agents::Agent`] contract and its LLM-backed roles.
//!
//! Orchestration modules ([`debate`], [`gate`], [`session`]) are methods on
//! [`orchestrator::Orchestrator`], which owns the injected collaborators.

pub mod agents;
pub mod core;
pub mod debate;
pub mod exit_codes;
pub mod gate;
pub mod io;
pub mod logging;
pub mod orchestrator;
pub mod session;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod classifier;
pub mod complexity;
pub mod events;
pub mod json;
pub mod memory;
pub mod recovery;
pub mod semantic;
pub mod split;
pub mod stopping;
pub mod types;

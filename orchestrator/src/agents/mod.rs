//! Agent contract shared by every pipeline step.
//!
//! The orchestrator depends only on [`Agent`]; concrete roles are supplied at
//! construction time, which lets tests substitute scripted agents.

use crate::core::types::{AgentContext, AgentResult};
use crate::io::schema::OutputSchema;

pub mod llm;

/// One pipeline step. Receives read-only context, returns an [`AgentResult`].
///
/// Operational failures are reported through `AgentResult::failure`, never by
/// panicking. Agents must not touch orchestrator-owned state.
pub trait Agent {
    fn role(&self) -> AgentRole;
    fn run(&self, context: &AgentContext) -> AgentResult;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Author,
    Critic,
    Moderator,
    TestWriter,
    Coder,
    Verifier,
    Recovery,
    ComplexityEstimator,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Author => "author",
            Self::Critic => "critic",
            Self::Moderator => "moderator",
            Self::TestWriter => "test_writer",
            Self::Coder => "coder",
            Self::Verifier => "verifier",
            Self::Recovery => "recovery",
            Self::ComplexityEstimator => "complexity",
        }
    }

    /// Tools the backend may use for this role.
    pub fn allowed_tools(self) -> &'static [&'static str] {
        match self {
            Self::Author | Self::Critic | Self::Moderator | Self::ComplexityEstimator => &[],
            Self::Recovery => &["Read", "Grep", "Glob"],
            Self::TestWriter | Self::Coder => &["Read", "Write", "Edit", "Grep", "Glob", "Bash"],
            Self::Verifier => &["Read", "Grep", "Glob", "Bash"],
        }
    }

    /// Schema the role's JSON output must satisfy, if any.
    pub fn output_schema(self) -> Option<OutputSchema> {
        match self {
            Self::Critic => Some(OutputSchema::Critic),
            Self::Moderator => Some(OutputSchema::Moderator),
            Self::Verifier => Some(OutputSchema::Verifier),
            Self::Recovery => Some(OutputSchema::Recovery),
            Self::Author | Self::TestWriter | Self::Coder | Self::ComplexityEstimator => None,
        }
    }
}

/// Every agent the orchestrator drives.
pub struct AgentSet {
    pub author: Box<dyn Agent>,
    pub critic: Box<dyn Agent>,
    pub moderator: Box<dyn Agent>,
    pub test_writer: Box<dyn Agent>,
    pub coder: Box<dyn Agent>,
    pub verifier: Box<dyn Agent>,
    /// General-purpose repair planner; without it non-import failures retry plainly.
    pub recovery: Option<Box<dyn Agent>>,
    /// Cheap-model complexity estimator; without it borderline issues use the formula.
    pub estimator: Option<Box<dyn Agent>>,
}

//! Shared deterministic types for the orchestration core.
//!
//! These types define stable contracts between the state machines, the agents
//! and the persisted state. They carry no I/O and serialize deterministically
//! (maps are `BTreeMap`).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Rubric dimension name to score in `[0, 1]`.
pub type Scores = BTreeMap<String, f64>;

/// Read-only context handed to an agent invocation.
pub type AgentContext = Map<String, Value>;

/// Outcome of one agent invocation.
///
/// Immutable once built. A failed result always carries at least one error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResult {
    success: bool,
    output: Map<String, Value>,
    errors: Vec<String>,
    cost_usd: f64,
}

impl AgentResult {
    pub fn success(output: Map<String, Value>, cost_usd: f64) -> Self {
        Self {
            success: true,
            output,
            errors: Vec::new(),
            cost_usd,
        }
    }

    /// Build a failed result. An empty `errors` list is replaced with a generic message.
    pub fn failure(errors: Vec<String>, cost_usd: f64) -> Self {
        let errors = if errors.iter().all(|e| e.trim().is_empty()) {
            vec!["agent failed without reporting an error".to_string()]
        } else {
            errors
        };
        Self {
            success: false,
            output: Map::new(),
            errors,
            cost_usd,
        }
    }

    /// Failed result that still carries structured output (e.g. a verifier report).
    pub fn failure_with_output(
        errors: Vec<String>,
        output: Map<String, Value>,
        cost_usd: f64,
    ) -> Self {
        Self {
            output,
            ..Self::failure(errors, cost_usd)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self::failure(vec![error.into()], 0.0)
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn output(&self) -> &Map<String, Value> {
        &self.output
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn cost_usd(&self) -> f64 {
        self.cost_usd
    }

    /// All errors joined into one line, for classification and reporting.
    pub fn error_text(&self) -> String {
        self.errors.join("; ")
    }

    pub fn output_str(&self, key: &str) -> Option<&str> {
        self.output.get(key).and_then(Value::as_str)
    }

    pub fn output_u32(&self, key: &str) -> Option<u32> {
        self.output
            .get(key)
            .and_then(Value::as_u64)
            .map(|n| n.min(u32::MAX as u64) as u32)
    }

    pub fn output_bool(&self, key: &str) -> Option<bool> {
        self.output.get(key).and_then(Value::as_bool)
    }
}

/// Terminal status of a spec debate pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Success,
    Stalemate,
    Timeout,
    Failure,
}

impl PipelineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Stalemate => "stalemate",
            Self::Timeout => "timeout",
            Self::Failure => "failure",
        }
    }
}

/// Result of one spec debate pipeline run. Built once at termination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub status: PipelineStatus,
    pub feature_id: String,
    pub rounds_completed: u32,
    pub final_scores: Scores,
    pub total_cost_usd: f64,
    pub error: Option<String>,
}

/// Terminal status of an issue implementation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSessionStatus {
    Success,
    Failed,
    Blocked,
}

/// What a successful session actually did with the issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionAction {
    Implemented,
    Split,
}

/// Result of one issue implementation attempt sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueSessionResult {
    pub status: IssueSessionStatus,
    pub issue_number: u64,
    pub action: Option<SessionAction>,
    pub tests_written: u32,
    pub tests_passed: u32,
    pub tests_failed: u32,
    pub commits: Vec<String>,
    pub cost_usd: f64,
    pub retries: u32,
    pub error: Option<String>,
    /// Tracker numbers of sub-issues created when the issue was split.
    pub sub_issues: Vec<u64>,
    /// Suggested next actions for a human (unresolved imports, split hints).
    pub suggestions: Vec<String>,
}

impl IssueSessionResult {
    pub fn new(status: IssueSessionStatus, issue_number: u64) -> Self {
        Self {
            status,
            issue_number,
            action: None,
            tests_written: 0,
            tests_passed: 0,
            tests_failed: 0,
            commits: Vec::new(),
            cost_usd: 0.0,
            retries: 0,
            error: None,
            sub_issues: Vec::new(),
            suggestions: Vec::new(),
        }
    }
}

/// Pre-implementation estimate of how many agent turns an issue needs.
///
/// `split_suggestions` is empty exactly when `needs_split` is false.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexityEstimate {
    pub estimated_turns: u32,
    pub complexity_score: f64,
    pub needs_split: bool,
    pub split_suggestions: Vec<String>,
    pub confidence: f64,
    pub reasoning: String,
}

/// An implementation issue as tracked externally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: String,
}

/// Severity of a critic issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    #[serde(alias = "major")]
    Moderate,
    #[serde(other)]
    Minor,
}

/// One issue raised by the critic in a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticIssue {
    pub id: String,
    pub severity: Severity,
    pub description: String,
    #[serde(default)]
    pub dimension: Option<String>,
    #[serde(default)]
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisputeCategory {
    Security,
    Compliance,
    Correctness,
}

/// A previously rejected issue the critic still considers critical.
///
/// Kept apart from regular issues and never counted by the stopping condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputedIssue {
    pub original_issue_id: String,
    pub category: DisputeCategory,
    pub description: String,
    pub evidence: String,
    pub risk_if_ignored: String,
    pub recommendation: String,
}

/// Parsed critic output for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticReview {
    pub scores: Scores,
    #[serde(default)]
    pub issues: Vec<CriticIssue>,
    #[serde(default)]
    pub disputed_issues: Vec<DisputedIssue>,
}

/// Moderator verdict on a critic issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Disposition {
    Accept,
    Reject,
    Defer,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueDisposition {
    pub issue_id: String,
    pub classification: Disposition,
    #[serde(default)]
    pub reasoning: String,
    /// Issue id from an earlier round that this one restates.
    #[serde(default)]
    pub repeat_of: Option<String>,
}

/// Parsed moderator output for one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModeratorRevision {
    pub spec: String,
    #[serde(default)]
    pub current_scores: Option<Scores>,
    #[serde(default)]
    pub dispositions: Vec<IssueDisposition>,
}

/// Debate memory entry for an issue the moderator rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedIssue {
    pub round: u32,
    pub issue_id: String,
    pub original_issue: String,
    pub classification: Disposition,
    pub semantic_key: String,
    pub repeat_of: Option<String>,
    pub consecutive_rejections: u32,
}

/// Persisted lifecycle phase of a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FeaturePhase {
    #[default]
    PrdReady,
    SpecInProgress,
    SpecNeedsApproval,
    SpecApproved,
    Implementing,
    Complete,
    Blocked,
}

/// Persisted stage of a single implementation task (one issue).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStage {
    #[default]
    Ready,
    InProgress,
    Done,
    Blocked,
    Split,
}

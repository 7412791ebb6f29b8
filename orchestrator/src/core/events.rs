//! Lifecycle events and their payload allow-lists.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Closed set of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    SpecDebateStarted,
    SpecRoundCompleted,
    SpecDisagreementDetected,
    SpecDebateCompleted,
    IssueComplexityPassed,
    IssueComplexityFailed,
    IssueClaimed,
    IssueTestsWritten,
    ImplAttemptFailed,
    IssueSplit,
    IssueDone,
    IssueBlocked,
    IssueFailed,
}

impl EventType {
    pub const ALL: [EventType; 13] = [
        Self::SpecDebateStarted,
        Self::SpecRoundCompleted,
        Self::SpecDisagreementDetected,
        Self::SpecDebateCompleted,
        Self::IssueComplexityPassed,
        Self::IssueComplexityFailed,
        Self::IssueClaimed,
        Self::IssueTestsWritten,
        Self::ImplAttemptFailed,
        Self::IssueSplit,
        Self::IssueDone,
        Self::IssueBlocked,
        Self::IssueFailed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SpecDebateStarted => "SPEC_DEBATE_STARTED",
            Self::SpecRoundCompleted => "SPEC_ROUND_COMPLETED",
            Self::SpecDisagreementDetected => "SPEC_DISAGREEMENT_DETECTED",
            Self::SpecDebateCompleted => "SPEC_DEBATE_COMPLETED",
            Self::IssueComplexityPassed => "ISSUE_COMPLEXITY_PASSED",
            Self::IssueComplexityFailed => "ISSUE_COMPLEXITY_FAILED",
            Self::IssueClaimed => "ISSUE_CLAIMED",
            Self::IssueTestsWritten => "ISSUE_TESTS_WRITTEN",
            Self::ImplAttemptFailed => "IMPL_ATTEMPT_FAILED",
            Self::IssueSplit => "ISSUE_SPLIT",
            Self::IssueDone => "ISSUE_DONE",
            Self::IssueBlocked => "ISSUE_BLOCKED",
            Self::IssueFailed => "ISSUE_FAILED",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(name.trim()))
    }

    /// Payload keys this event may carry.
    pub fn allowed_fields(self) -> &'static [&'static str] {
        match self {
            Self::SpecDebateStarted => &["max_rounds", "thresholds"],
            Self::SpecRoundCompleted => &[
                "round",
                "scores",
                "decision",
                "critical_issues",
                "moderate_issues",
                "disputed_issues",
                "cost_usd",
            ],
            Self::SpecDisagreementDetected => &["round", "repeated_issues", "threshold"],
            Self::SpecDebateCompleted => &[
                "status",
                "rounds_completed",
                "final_scores",
                "total_cost_usd",
                "error",
            ],
            Self::IssueComplexityPassed => &["issue_number", "complexity_score", "max_turns"],
            Self::IssueComplexityFailed => {
                &["issue_number", "complexity_score", "split_suggestions"]
            }
            Self::IssueClaimed => &["session_id"],
            Self::IssueTestsWritten => &["tests_written", "cost_usd"],
            Self::ImplAttemptFailed => &["attempt", "stage", "error_kind", "error", "action"],
            Self::IssueSplit => &["reason", "sub_issues"],
            Self::IssueDone => &["commit", "tests_passed", "retries", "cost_usd"],
            Self::IssueBlocked => &["error", "retries", "suggestions"],
            Self::IssueFailed => &["error"],
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An event payload carried a key outside its type's allow-list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("payload for {event_type} has fields outside its allow-list: {}", .unexpected.join(", "))]
pub struct PayloadValidationError {
    pub event_type: EventType,
    pub unexpected: Vec<String>,
}

/// Check `payload` keys against the allow-list for `event_type`.
pub fn validate_payload(
    event_type: EventType,
    payload: &Map<String, Value>,
) -> Result<(), PayloadValidationError> {
    let allowed = event_type.allowed_fields();
    let unexpected: Vec<String> = payload
        .keys()
        .filter(|k| !allowed.contains(&k.as_str()))
        .cloned()
        .collect();
    if unexpected.is_empty() {
        Ok(())
    } else {
        Err(PayloadValidationError {
            event_type,
            unexpected,
        })
    }
}

/// One lifecycle event. Never mutated after emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub feature_id: String,
    #[serde(default)]
    pub issue_number: Option<u64>,
    #[serde(default)]
    pub bug_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub source_agent: String,
    #[serde(default)]
    pub payload: Map<String, Value>,
    pub confidence: f64,
}

impl SwarmEvent {
    pub fn new(event_type: EventType, feature_id: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            feature_id: feature_id.into(),
            issue_number: None,
            bug_id: None,
            timestamp: Utc::now(),
            source_agent: "orchestrator".to_string(),
            payload: Map::new(),
            confidence: 1.0,
        }
    }

    pub fn with_issue(mut self, issue_number: u64) -> Self {
        self.issue_number = Some(issue_number);
        self
    }

    pub fn with_source(mut self, source_agent: impl Into<String>) -> Self {
        self.source_agent = source_agent.into();
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn validate(&self) -> Result<(), PayloadValidationError> {
        validate_payload(self.event_type, &self.payload)
    }
}

/// Filter for reading persisted events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventQuery {
    pub feature_id: Option<String>,
    /// Empty means every type.
    pub event_types: Vec<EventType>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl EventQuery {
    pub fn matches(&self, event: &SwarmEvent) -> bool {
        if let Some(feature) = &self.feature_id
            && &event.feature_id != feature
        {
            return false;
        }
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if let Some(since) = self.since
            && event.timestamp < since
        {
            return false;
        }
        true
    }
}

//! Splitting one issue into smaller sub-issues.
//!
//! Both the complexity gate and a live coder timeout end up here, so the
//! sub-issue layout does not depend on what triggered the split.

use serde::{Deserialize, Serialize};

use crate::core::complexity::{
    IssueMetrics, SPLIT_TURN_THRESHOLD, complexity_score, formula_turns, suggest_splits,
};
use crate::core::types::{ComplexityEstimate, Issue};

const CRITERIA_PER_PART: usize = 4;
const METHODS_PER_PART: usize = 3;
const MIN_PARTS: usize = 2;
const TIMEOUT_CONFIDENCE: f64 = 0.5;

/// What triggered a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitReason {
    Complexity,
    Timeout,
}

impl SplitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Complexity => "complexity",
            Self::Timeout => "timeout",
        }
    }
}

/// A sub-issue ready to be filed with the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubIssue {
    pub title: String,
    pub body: String,
}

/// Plan the sub-issues for `issue`.
///
/// Acceptance criteria are partitioned into at least two parts of roughly
/// four each. Issues with fewer than two criteria are partitioned by method
/// instead. An empty plan means the issue cannot be split mechanically.
pub fn plan_split(
    issue: &Issue,
    reason: SplitReason,
    estimate: &ComplexityEstimate,
) -> Vec<SubIssue> {
    let metrics = IssueMetrics::from_body(&issue.body);
    let (heading, units, per_part) = if metrics.criteria_count() >= MIN_PARTS {
        ("Acceptance Criteria", &metrics.criteria, CRITERIA_PER_PART)
    } else if metrics.method_count() >= MIN_PARTS {
        ("Methods", &metrics.methods, METHODS_PER_PART)
    } else {
        return Vec::new();
    };

    let parts = units.len().div_ceil(per_part).max(MIN_PARTS);
    let chunk = units.len().div_ceil(parts);
    let groups: Vec<&[String]> = units.chunks(chunk).collect();
    let total = groups.len();

    groups
        .into_iter()
        .enumerate()
        .map(|(idx, group)| SubIssue {
            title: format!("{} (part {}/{})", issue.title, idx + 1, total),
            body: sub_issue_body(issue, reason, estimate, heading, group, idx + 1, total),
        })
        .collect()
}

fn sub_issue_body(
    parent: &Issue,
    reason: SplitReason,
    estimate: &ComplexityEstimate,
    heading: &str,
    group: &[String],
    part: usize,
    total: usize,
) -> String {
    let mut body = format!(
        "Part {part} of {total}, split from #{} ({}; estimated {} turns).\n\n## {heading}\n",
        parent.number,
        reason.as_str(),
        estimate.estimated_turns
    );
    for unit in group {
        if heading == "Methods" {
            body.push_str(&format!("- [ ] Implement `{unit}`\n"));
        } else {
            body.push_str(&format!("- [ ] {unit}\n"));
        }
    }
    if !estimate.split_suggestions.is_empty() {
        body.push_str("\n## Split notes\n");
        for suggestion in &estimate.split_suggestions {
            body.push_str(&format!("- {suggestion}\n"));
        }
    }
    body
}

/// Estimate recorded when the coder timed out mid-implementation.
///
/// A timeout is evidence the issue exceeded the turn budget, so the estimate
/// is never below the split threshold and always needs a split.
pub fn synthesize_timeout_estimate(issue: &Issue, error: &str) -> ComplexityEstimate {
    let metrics = IssueMetrics::from_body(&issue.body);
    let turns = formula_turns(metrics.criteria_count(), metrics.method_count())
        .max(SPLIT_TURN_THRESHOLD + 1);
    ComplexityEstimate {
        estimated_turns: turns,
        complexity_score: complexity_score(turns),
        needs_split: true,
        split_suggestions: suggest_splits(issue, &metrics),
        confidence: TIMEOUT_CONFIDENCE,
        reasoning: format!("coder timed out: {}", error.trim()),
    }
}

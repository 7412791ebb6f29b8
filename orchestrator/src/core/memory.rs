//! Cross-round debate memory of rejected issues.
//!
//! Append-only per feature within a pipeline run. Cleared only when the
//! pipeline for that feature restarts.

use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::core::semantic::find_repeats;
use crate::core::semantic::semantic_key;
use crate::core::types::{CriticIssue, Disposition, IssueDisposition, RejectedIssue};

#[derive(Debug, Clone, Default)]
pub struct DebateMemory {
    rounds: BTreeMap<String, Vec<Vec<RejectedIssue>>>,
}

impl DebateMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything recorded for `feature_id`.
    pub fn reset(&mut self, feature_id: &str) {
        self.rounds.remove(feature_id);
    }

    pub fn record_round(&mut self, feature_id: &str, rejected: Vec<RejectedIssue>) {
        self.rounds
            .entry(feature_id.to_string())
            .or_default()
            .push(rejected);
    }

    /// Rejections recorded for the most recent round, if any.
    pub fn latest(&self, feature_id: &str) -> &[RejectedIssue] {
        self.rounds
            .get(feature_id)
            .and_then(|rounds| rounds.last())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn all(&self, feature_id: &str) -> Vec<&RejectedIssue> {
        self.rounds
            .get(feature_id)
            .map(|rounds| rounds.iter().flatten().collect())
            .unwrap_or_default()
    }

    pub fn rounds_recorded(&self, feature_id: &str) -> usize {
        self.rounds.get(feature_id).map_or(0, Vec::len)
    }

    /// Prior-round context handed to the critic.
    pub fn prior_context(&self, feature_id: &str) -> Value {
        let rejected: Vec<Value> = self
            .all(feature_id)
            .into_iter()
            .map(|r| {
                json!({
                    "round": r.round,
                    "issue_id": r.issue_id,
                    "issue": r.original_issue,
                    "semantic_key": r.semantic_key,
                    "consecutive_rejections": r.consecutive_rejections,
                })
            })
            .collect();
        json!({
            "rejected_issues": rejected,
            "instruction": "Do not re-raise rejected issues. If one is still critical, \
                            list it under disputed_issues with category, evidence, \
                            risk_if_ignored and recommendation.",
        })
    }
}

/// Build this round's rejection records from the moderator's dispositions.
///
/// Issue text comes from the critic issue with the same id (falling back to
/// the moderator's reasoning). `consecutive_rejections` extends the streak of
/// the previous-round rejection it repeats.
pub fn build_rejections(
    round: u32,
    issues: &[CriticIssue],
    dispositions: &[IssueDisposition],
    previous: &[RejectedIssue],
) -> Vec<RejectedIssue> {
    let mut current: Vec<RejectedIssue> = dispositions
        .iter()
        .filter(|d| d.classification == Disposition::Reject)
        .map(|d| {
            let text = issues
                .iter()
                .find(|i| i.id == d.issue_id)
                .map(|i| i.description.clone())
                .unwrap_or_else(|| d.reasoning.clone());
            RejectedIssue {
                round,
                issue_id: d.issue_id.clone(),
                semantic_key: semantic_key(&text),
                original_issue: text,
                classification: d.classification,
                repeat_of: d.repeat_of.clone(),
                consecutive_rejections: 1,
            }
        })
        .collect();

    for repeat in find_repeats(&current, previous) {
        let streak = previous
            .iter()
            .find(|p| p.issue_id == repeat.previous_id)
            .map_or(0, |p| p.consecutive_rejections);
        if let Some(entry) = current.iter_mut().find(|c| c.issue_id == repeat.current_id) {
            entry.consecutive_rejections = streak + 1;
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Severity;

    fn critic_issue(id: &str, text: &str) -> CriticIssue {
        CriticIssue {
            id: id.to_string(),
            severity: Severity::Moderate,
            description: text.to_string(),
            dimension: None,
            suggestion: None,
        }
    }

    fn reject(id: &str) -> IssueDisposition {
        IssueDisposition {
            issue_id: id.to_string(),
            classification: Disposition::Reject,
            reasoning: "out of scope".to_string(),
            repeat_of: None,
        }
    }

    #[test]
    fn only_rejections_are_recorded() {
        let issues = vec![
            critic_issue("a", "Pagination support for listing endpoints"),
            critic_issue("b", "Explain retry semantics for webhooks"),
        ];
        let mut accepted = reject("b");
        accepted.classification = Disposition::Accept;
        let rejected = build_rejections(1, &issues, &[reject("a"), accepted], &[]);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].original_issue, "Pagination support for listing endpoints");
        assert_eq!(rejected[0].consecutive_rejections, 1);
    }

    #[test]
    fn repeats_extend_the_streak() {
        let round1 = build_rejections(
            1,
            &[critic_issue("r1", "Pagination support for listing endpoints")],
            &[reject("r1")],
            &[],
        );
        let round2 = build_rejections(
            2,
            &[critic_issue("r2", "Listing endpoints need pagination support")],
            &[reject("r2")],
            &round1,
        );
        assert_eq!(round2[0].consecutive_rejections, 2);

        let mut memory = DebateMemory::new();
        memory.record_round("auth", round1);
        memory.record_round("auth", round2);
        assert_eq!(memory.rounds_recorded("auth"), 2);
        assert_eq!(memory.latest("auth")[0].issue_id, "r2");
        assert_eq!(memory.all("auth").len(), 2);
        let context = memory.prior_context("auth");
        assert_eq!(context["rejected_issues"].as_array().map(Vec::len), Some(2));

        memory.reset("auth");
        assert!(memory.latest("auth").is_empty());
    }

    #[test]
    fn missing_issue_text_falls_back_to_reasoning() {
        let rejected = build_rejections(1, &[], &[reject("ghost")], &[]);
        assert_eq!(rejected[0].original_issue, "out of scope");
    }
}

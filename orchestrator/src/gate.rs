//! Complexity gate.
//!
//! Instant pass and instant fail are decided from counts alone. Borderline
//! issues ask the cheap-model estimator and fall back to the turn formula
//! when it is absent, fails or replies with something unparseable.

use anyhow::Result;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::agents::Agent;
use crate::core::complexity::{
    IssueMetrics, SPLIT_TURN_THRESHOLD, Tier, formula_estimate, instant_fail, instant_pass,
    parse_model_estimate,
};
use crate::core::events::EventType;
use crate::core::types::{ComplexityEstimate, Issue};
use crate::orchestrator::{Orchestrator, object};

/// Estimate `issue`, consulting `estimator` only for borderline issues.
///
/// Returns the estimate and the cost of the estimator call.
pub fn estimate_complexity(
    feature_id: &str,
    issue: &Issue,
    estimator: Option<&dyn Agent>,
) -> (ComplexityEstimate, f64) {
    let metrics = IssueMetrics::from_body(&issue.body);
    match metrics.tier() {
        Tier::InstantPass => (instant_pass(&metrics), 0.0),
        Tier::InstantFail => (instant_fail(issue, &metrics), 0.0),
        Tier::Borderline => {
            let Some(estimator) = estimator else {
                return (formula_estimate(issue, &metrics, "no estimator configured"), 0.0);
            };
            let result = estimator.run(&object(json!({
                "feature_id": feature_id,
                "issue_number": issue.number,
                "issue_title": issue.title,
                "issue_body": issue.body,
                "split_threshold": SPLIT_TURN_THRESHOLD,
                "criteria_count": metrics.criteria_count(),
                "method_count": metrics.method_count(),
            })));
            let cost = result.cost_usd();
            if !result.is_success() {
                warn!(error = %result.error_text(), "complexity estimator failed");
                return (formula_estimate(issue, &metrics, "estimator failed"), cost);
            }
            let text = result.output_str("text").unwrap_or_default();
            match parse_model_estimate(text, issue, &metrics) {
                Some(estimate) => (estimate, cost),
                None => {
                    debug!("estimator reply had no usable estimate");
                    (formula_estimate(issue, &metrics, "estimator reply unparseable"), cost)
                }
            }
        }
    }
}

impl Orchestrator {
    /// Run the gate for `issue` and announce the verdict.
    #[instrument(skip_all, fields(feature_id = %feature_id, issue = issue.number))]
    pub fn evaluate_complexity(
        &self,
        feature_id: &str,
        issue: &Issue,
    ) -> Result<(ComplexityEstimate, f64)> {
        let (estimate, cost) =
            estimate_complexity(feature_id, issue, self.agents.estimator.as_deref());
        if estimate.needs_split {
            self.emit(
                EventType::IssueComplexityFailed,
                feature_id,
                Some(issue.number),
                json!({
                    "issue_number": issue.number,
                    "complexity_score": estimate.complexity_score,
                    "split_suggestions": estimate.split_suggestions,
                }),
            )?;
        } else {
            self.emit(
                EventType::IssueComplexityPassed,
                feature_id,
                Some(issue.number),
                json!({
                    "issue_number": issue.number,
                    "complexity_score": estimate.complexity_score,
                    "max_turns": self.config.sessions.coder_max_turns,
                }),
            )?;
        }
        info!(
            turns = estimate.estimated_turns,
            needs_split = estimate.needs_split,
            "complexity gate decided"
        );
        Ok((estimate, cost))
    }
}

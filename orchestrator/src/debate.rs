//! Spec debate state machine.
//!
//! `SPEC_IN_PROGRESS` → author drafts once → rounds of critic review,
//! stopping-condition check and moderator revision → `SPEC_NEEDS_APPROVAL`
//! on success, `BLOCKED` on stalemate, timeout or failure.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::core::events::EventType;
use crate::core::memory::build_rejections;
use crate::core::semantic::detect_deadlock;
use crate::core::stopping::{StopDecision, count_severity, evaluate_stopping_condition};
use crate::core::types::{
    CriticIssue, CriticReview, DisputedIssue, FeaturePhase, ModeratorRevision, PipelineResult,
    PipelineStatus, RejectedIssue, Scores, Severity,
};
use crate::io::config::SpecDebateConfig;
use crate::io::write_atomic;
use crate::orchestrator::{Orchestrator, object};

/// Persisted record of one debate round (`rounds/<n>.json`).
#[derive(Debug, Serialize)]
struct RoundRecord<'a> {
    round: u32,
    decision: &'a str,
    scores: &'a Scores,
    issues: &'a [CriticIssue],
    disputed_issues: &'a [DisputedIssue],
    rejections: &'a [RejectedIssue],
    cost_usd: f64,
}

/// Running totals while a pipeline is in flight.
#[derive(Debug, Default)]
struct DebateRun {
    cost_usd: f64,
    rounds_completed: u32,
    final_scores: Scores,
}

/// How the round loop ended.
struct Ending {
    status: PipelineStatus,
    error: Option<String>,
}

impl Ending {
    fn success() -> Self {
        Self {
            status: PipelineStatus::Success,
            error: None,
        }
    }

    fn with_error(status: PipelineStatus, error: impl Into<String>) -> Self {
        Self {
            status,
            error: Some(error.into()),
        }
    }
}

impl Orchestrator {
    /// Run the spec debate for `feature_id` starting from `prd`.
    ///
    /// Operational failures (author, critic after retries, moderator) end the
    /// pipeline with `failure`; `Err` is reserved for state persistence and
    /// event contract violations.
    #[instrument(skip_all, fields(feature_id = %feature_id))]
    pub fn run_spec_pipeline(&mut self, feature_id: &str, prd: &str) -> Result<PipelineResult> {
        let cfg = self.config.spec_debate.clone();
        self.memory.reset(feature_id);
        self.state
            .set_phase(feature_id, FeaturePhase::SpecInProgress)
            .context("enter SPEC_IN_PROGRESS")?;
        self.emit(
            EventType::SpecDebateStarted,
            feature_id,
            None,
            json!({"max_rounds": cfg.max_rounds, "thresholds": cfg.rubric_thresholds}),
        )?;

        let mut run = DebateRun::default();
        let ending = self.debate_rounds(feature_id, prd, &cfg, &mut run)?;

        let phase = if ending.status == PipelineStatus::Success {
            FeaturePhase::SpecNeedsApproval
        } else {
            FeaturePhase::Blocked
        };
        self.state.set_phase(feature_id, phase)?;
        self.state.add_cost(feature_id, "spec_debate", run.cost_usd)?;

        let result = PipelineResult {
            status: ending.status,
            feature_id: feature_id.to_string(),
            rounds_completed: run.rounds_completed,
            final_scores: run.final_scores,
            total_cost_usd: run.cost_usd,
            error: ending.error,
        };
        self.emit(
            EventType::SpecDebateCompleted,
            feature_id,
            None,
            json!({
                "status": result.status.as_str(),
                "rounds_completed": result.rounds_completed,
                "final_scores": result.final_scores,
                "total_cost_usd": result.total_cost_usd,
                "error": result.error,
            }),
        )?;
        info!(
            status = result.status.as_str(),
            rounds = result.rounds_completed,
            cost_usd = result.total_cost_usd,
            "spec debate finished"
        );
        Ok(result)
    }

    fn debate_rounds(
        &mut self,
        feature_id: &str,
        prd: &str,
        cfg: &SpecDebateConfig,
        run: &mut DebateRun,
    ) -> Result<Ending> {
        let author = self
            .agents
            .author
            .run(&object(json!({"feature_id": feature_id, "prd": prd})));
        run.cost_usd += author.cost_usd();
        if !author.is_success() {
            warn!(error = %author.error_text(), "author failed");
            return Ok(Ending::with_error(
                PipelineStatus::Failure,
                format!("author failed: {}", author.error_text()),
            ));
        }
        let mut spec = author
            .output_str("spec")
            .or_else(|| author.output_str("text"))
            .unwrap_or_default()
            .to_string();
        write_atomic(&self.paths.spec_draft_path(feature_id), &spec)?;

        let mut prev_scores: Option<Scores> = None;
        for round in 1..=cfg.max_rounds {
            let cost_before_round = run.cost_usd;
            let review = match self.run_critic(feature_id, round, &spec, cfg, run) {
                Ok(review) => review,
                Err(message) => return Ok(Ending::with_error(PipelineStatus::Failure, message)),
            };
            run.final_scores = review.scores.clone();
            run.rounds_completed = round;
            let round_cost = run.cost_usd - cost_before_round;

            let decision = evaluate_stopping_condition(
                &review.scores,
                &review.issues,
                prev_scores.as_ref(),
                &cfg.rubric_thresholds,
            );
            self.emit(
                EventType::SpecRoundCompleted,
                feature_id,
                None,
                json!({
                    "round": round,
                    "scores": review.scores,
                    "decision": decision.as_str(),
                    "critical_issues": count_severity(&review.issues, Severity::Critical),
                    "moderate_issues": count_severity(&review.issues, Severity::Moderate),
                    "disputed_issues": review.disputed_issues.len(),
                    "cost_usd": round_cost,
                }),
            )?;
            info!(round, decision = decision.as_str(), "debate round evaluated");

            match decision {
                StopDecision::Success => {
                    self.write_round(feature_id, round, decision, &review, &[], round_cost)?;
                    return Ok(Ending::success());
                }
                StopDecision::Stalemate => {
                    self.write_round(feature_id, round, decision, &review, &[], round_cost)?;
                    return Ok(Ending::with_error(
                        PipelineStatus::Stalemate,
                        format!("scores stopped improving in round {round}"),
                    ));
                }
                StopDecision::Continue => {}
            }
            if round == cfg.max_rounds {
                self.write_round(feature_id, round, decision, &review, &[], round_cost)?;
                break;
            }

            let moderator = self.agents.moderator.run(&object(json!({
                "feature_id": feature_id,
                "round": round,
                "spec": spec,
                "issues": review.issues,
                "disputed_issues": review.disputed_issues,
            })));
            run.cost_usd += moderator.cost_usd();
            if !moderator.is_success() {
                return Ok(Ending::with_error(
                    PipelineStatus::Failure,
                    format!("moderator failed in round {round}: {}", moderator.error_text()),
                ));
            }
            let revision: ModeratorRevision =
                match serde_json::from_value(Value::Object(moderator.output().clone())) {
                    Ok(revision) => revision,
                    Err(err) => {
                        return Ok(Ending::with_error(
                            PipelineStatus::Failure,
                            format!("moderator output unreadable in round {round}: {err}"),
                        ));
                    }
                };

            let previous = self.memory.latest(feature_id).to_vec();
            let rejections =
                build_rejections(round, &review.issues, &revision.dispositions, &previous);
            let deadlock = detect_deadlock(&rejections, &previous, cfg.disagreement_threshold);
            self.write_round(
                feature_id,
                round,
                decision,
                &review,
                &rejections,
                run.cost_usd - cost_before_round,
            )?;
            self.memory.record_round(feature_id, rejections);

            if let Some(repeats) = deadlock {
                let repeated: Vec<&str> = repeats.iter().map(|r| r.current_id.as_str()).collect();
                self.emit(
                    EventType::SpecDisagreementDetected,
                    feature_id,
                    None,
                    json!({
                        "round": round,
                        "repeated_issues": repeated,
                        "threshold": cfg.disagreement_threshold,
                    }),
                )?;
                warn!(round, repeats = repeats.len(), "critic and moderator deadlocked");
                return Ok(Ending::with_error(
                    PipelineStatus::Stalemate,
                    format!(
                        "disagreement detected in round {round}: {} rejected issue(s) raised again ({})",
                        repeats.len(),
                        repeated.join(", ")
                    ),
                ));
            }

            prev_scores = Some(revision.current_scores.unwrap_or(review.scores));
            spec = revision.spec;
            write_atomic(&self.paths.spec_draft_path(feature_id), &spec)?;
        }

        Ok(Ending::with_error(
            PipelineStatus::Timeout,
            format!("no consensus after {} rounds", cfg.max_rounds),
        ))
    }

    /// Run the critic, retrying failed or unreadable replies.
    fn run_critic(
        &self,
        feature_id: &str,
        round: u32,
        spec: &str,
        cfg: &SpecDebateConfig,
        run: &mut DebateRun,
    ) -> std::result::Result<CriticReview, String> {
        let context = object(json!({
            "feature_id": feature_id,
            "round": round,
            "spec": spec,
            "thresholds": cfg.rubric_thresholds,
            "prior_context": self.memory.prior_context(feature_id),
        }));
        let attempts = cfg.critic_max_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            let result = self.agents.critic.run(&context);
            run.cost_usd += result.cost_usd();
            if result.is_success() {
                match serde_json::from_value::<CriticReview>(Value::Object(result.output().clone())) {
                    Ok(review) => return Ok(review),
                    Err(err) => last_error = format!("unreadable critic output: {err}"),
                }
            } else {
                last_error = result.error_text();
            }
            warn!(round, attempt, error = %last_error, "critic attempt failed");
        }
        Err(format!(
            "critic failed after {attempts} attempts in round {round}: {last_error}"
        ))
    }

    fn write_round(
        &self,
        feature_id: &str,
        round: u32,
        decision: StopDecision,
        review: &CriticReview,
        rejections: &[RejectedIssue],
        cost_usd: f64,
    ) -> Result<()> {
        let record = RoundRecord {
            round,
            decision: decision.as_str(),
            scores: &review.scores,
            issues: &review.issues,
            disputed_issues: &review.disputed_issues,
            rejections,
            cost_usd,
        };
        let mut body = serde_json::to_string_pretty(&record).context("serialize round record")?;
        body.push('\n');
        write_atomic(&self.paths.round_path(feature_id, round), &body)
    }
}

//! Stopping condition for spec debate rounds.

use crate::core::types::{CriticIssue, Scores, Severity};

/// Minimum mean per-dimension improvement for a round to count as progress.
pub const MIN_MEAN_IMPROVEMENT: f64 = 0.05;

/// A round succeeds only with strictly fewer moderate issues than this.
pub const MAX_MODERATE_ISSUES: usize = 3;

/// Outcome of evaluating one debate round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    Success,
    Stalemate,
    Continue,
}

impl StopDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Stalemate => "stalemate",
            Self::Continue => "continue",
        }
    }
}

/// Decide whether the debate should stop after a round.
///
/// - `Success`: every rubric dimension meets its threshold, no critical issues
///   and fewer than [`MAX_MODERATE_ISSUES`] moderate issues.
/// - `Stalemate`: not the first round and the mean improvement over the rubric
///   dimensions is below [`MIN_MEAN_IMPROVEMENT`].
/// - `Continue` otherwise.
///
/// Rubric dimensions are the threshold keys. A dimension missing from a score
/// map counts as `0.0`.
pub fn evaluate_stopping_condition(
    scores: &Scores,
    issues: &[CriticIssue],
    prev_scores: Option<&Scores>,
    thresholds: &Scores,
) -> StopDecision {
    if meets_thresholds(scores, thresholds) && severity_counts_acceptable(issues) {
        return StopDecision::Success;
    }
    if let Some(prev) = prev_scores
        && mean_improvement(scores, prev, thresholds) < MIN_MEAN_IMPROVEMENT
    {
        return StopDecision::Stalemate;
    }
    StopDecision::Continue
}

pub fn meets_thresholds(scores: &Scores, thresholds: &Scores) -> bool {
    thresholds
        .iter()
        .all(|(dim, threshold)| score_of(scores, dim) >= *threshold)
}

pub fn count_severity(issues: &[CriticIssue], severity: Severity) -> usize {
    issues.iter().filter(|i| i.severity == severity).count()
}

fn severity_counts_acceptable(issues: &[CriticIssue]) -> bool {
    count_severity(issues, Severity::Critical) == 0
        && count_severity(issues, Severity::Moderate) < MAX_MODERATE_ISSUES
}

/// Mean of `current - previous` over the rubric dimensions.
///
/// With no rubric configured, the dimensions present in `current` are used.
pub fn mean_improvement(current: &Scores, previous: &Scores, thresholds: &Scores) -> f64 {
    let dims: Vec<&String> = if thresholds.is_empty() {
        current.keys().collect()
    } else {
        thresholds.keys().collect()
    };
    if dims.is_empty() {
        return 0.0;
    }
    let total: f64 = dims
        .iter()
        .map(|dim| score_of(current, dim) - score_of(previous, dim))
        .sum();
    total / dims.len() as f64
}

fn score_of(scores: &Scores, dim: &str) -> f64 {
    scores.get(dim).copied().unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(pairs: &[(&str, f64)]) -> Scores {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    fn issue(id: &str, severity: Severity) -> CriticIssue {
        CriticIssue {
            id: id.to_string(),
            severity,
            description: format!("{id} description"),
            dimension: None,
            suggestion: None,
        }
    }

    fn rubric() -> Scores {
        scores(&[("clarity", 0.8), ("coverage", 0.7), ("risk", 0.6)])
    }

    /// Small deterministic generator so the grid below is reproducible.
    struct Lcg(u64);

    impl Lcg {
        fn next_f64(&mut self) -> f64 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((self.0 >> 33) as f64) / ((1u64 << 31) as f64)
        }

        fn next_usize(&mut self, bound: usize) -> usize {
            (self.next_f64() * bound as f64) as usize % bound.max(1)
        }
    }

    #[test]
    fn success_requires_thresholds_and_issue_limits() {
        let good = scores(&[("clarity", 0.9), ("coverage", 0.7), ("risk", 0.6)]);
        assert_eq!(
            evaluate_stopping_condition(&good, &[], None, &rubric()),
            StopDecision::Success
        );

        let critical = vec![issue("c1", Severity::Critical)];
        assert_eq!(
            evaluate_stopping_condition(&good, &critical, None, &rubric()),
            StopDecision::Continue
        );

        let three_moderate = vec![
            issue("m1", Severity::Moderate),
            issue("m2", Severity::Moderate),
            issue("m3", Severity::Moderate),
        ];
        assert_eq!(
            evaluate_stopping_condition(&good, &three_moderate, None, &rubric()),
            StopDecision::Continue
        );
        assert_eq!(
            evaluate_stopping_condition(&good, &three_moderate[..2], None, &rubric()),
            StopDecision::Success
        );
    }

    #[test]
    fn missing_dimension_fails_threshold() {
        let partial = scores(&[("clarity", 1.0), ("coverage", 1.0)]);
        assert!(!meets_thresholds(&partial, &rubric()));
    }

    #[test]
    fn first_round_never_stalemates() {
        let low = scores(&[("clarity", 0.1), ("coverage", 0.1), ("risk", 0.1)]);
        assert_eq!(
            evaluate_stopping_condition(&low, &[], None, &rubric()),
            StopDecision::Continue
        );
    }

    #[test]
    fn success_iff_thresholds_and_counts_hold_over_random_inputs() {
        let mut rng = Lcg(7);
        let severities = [Severity::Critical, Severity::Moderate, Severity::Minor];
        for _ in 0..2_000 {
            let thresholds = scores(&[
                ("clarity", rng.next_f64()),
                ("coverage", rng.next_f64()),
                ("risk", rng.next_f64()),
            ]);
            let current = scores(&[
                ("clarity", rng.next_f64()),
                ("coverage", rng.next_f64()),
                ("risk", rng.next_f64()),
            ]);
            let issues: Vec<CriticIssue> = (0..rng.next_usize(6))
                .map(|i| issue(&format!("i{i}"), severities[rng.next_usize(3)]))
                .collect();

            let expected = thresholds.iter().all(|(k, t)| current[k] >= *t)
                && count_severity(&issues, Severity::Critical) == 0
                && count_severity(&issues, Severity::Moderate) < 3;
            let decision = evaluate_stopping_condition(&current, &issues, None, &thresholds);
            assert_eq!(decision == StopDecision::Success, expected);
        }
    }

    #[test]
    fn stalemate_iff_mean_improvement_below_cutoff_at_any_level() {
        let mut rng = Lcg(42);
        // A critical issue keeps success off the table so only stalemate is exercised.
        let blocking = vec![issue("c", Severity::Critical)];
        for _ in 0..2_000 {
            let base = rng.next_f64() * 0.8;
            let prev = scores(&[
                ("clarity", base),
                ("coverage", rng.next_f64()),
                ("risk", rng.next_f64()),
            ]);
            let current: Scores = prev
                .iter()
                .map(|(k, v)| (k.clone(), v + (rng.next_f64() - 0.4) * 0.2))
                .collect();

            let mean = prev.keys().map(|k| current[k] - prev[k]).sum::<f64>() / 3.0;
            let decision =
                evaluate_stopping_condition(&current, &blocking, Some(&prev), &rubric());
            assert_eq!(decision == StopDecision::Stalemate, mean < MIN_MEAN_IMPROVEMENT);
        }
    }
}

//! Semantic keys and repeat detection for rejected debate issues.
//!
//! Critics reword the same concern from round to round, so exact string
//! matching misses repeats. Matching runs in priority order: explicit
//! moderator back-reference, equal semantic key, then fuzzy similarity.

use std::collections::BTreeSet;

use crate::core::types::{Disposition, RejectedIssue};

/// Fewer significant words than this yields [`GENERIC_KEY`].
pub const MIN_SIGNIFICANT_WORDS: usize = 2;

/// Key for issue text too generic to fingerprint.
pub const GENERIC_KEY: &str = "_generic_";

/// Fuzzy similarity at or above this counts as a repeat.
pub const SIMILARITY_CUTOFF: f64 = 0.7;

/// Words of this length or shorter are never significant.
const MAX_INSIGNIFICANT_LEN: usize = 4;

const STOP_WORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "because", "before", "being", "below",
    "between", "could", "doesn", "during", "every", "further", "having", "other", "should",
    "their", "there", "these", "those", "through", "under", "until", "where", "which", "while",
    "would", "within", "without", "issue", "issues", "needs", "missing", "spec", "specification",
    "section", "clear", "clearly", "unclear", "please", "consider", "ensure", "really",
];

/// How a current-round rejection was matched to an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    BackReference,
    SemanticKey,
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepeatMatch {
    pub current_id: String,
    pub previous_id: String,
    pub kind: MatchKind,
}

/// Order-independent fingerprint of issue text.
///
/// Lower-cases, splits into words, drops stop words and words of four or fewer
/// characters, then sorts the distinct remaining words and joins them with `_`.
pub fn semantic_key(text: &str) -> String {
    let lowered = text.to_lowercase();
    let words: BTreeSet<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > MAX_INSIGNIFICANT_LEN)
        .filter(|w| !STOP_WORDS.contains(w))
        .collect();
    if words.len() < MIN_SIGNIFICANT_WORDS {
        return GENERIC_KEY.to_string();
    }
    words.into_iter().collect::<Vec<_>>().join("_")
}

/// `2 * LCS / (len(a) + len(b))` over lower-cased characters.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.to_lowercase().chars().collect();
    let b: Vec<char> = b.to_lowercase().chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let lcs = lcs_len(&a, &b);
    (2 * lcs) as f64 / (a.len() + b.len()) as f64
}

fn lcs_len(a: &[char], b: &[char]) -> usize {
    let mut prev = vec![0usize; b.len() + 1];
    let mut curr = vec![0usize; b.len() + 1];
    for ca in a {
        for (j, cb) in b.iter().enumerate() {
            curr[j + 1] = if ca == cb {
                prev[j] + 1
            } else {
                curr[j].max(prev[j + 1])
            };
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Find current-round rejections that restate a previous-round rejection.
///
/// Each current rejection matches at most once, using the highest-priority
/// rule that applies.
pub fn find_repeats(current: &[RejectedIssue], previous: &[RejectedIssue]) -> Vec<RepeatMatch> {
    let previous: Vec<&RejectedIssue> = previous.iter().filter(|p| is_rejection(p)).collect();
    current
        .iter()
        .filter(|c| is_rejection(c))
        .filter_map(|c| match_one(c, &previous))
        .collect()
}

fn match_one(current: &RejectedIssue, previous: &[&RejectedIssue]) -> Option<RepeatMatch> {
    let found = |prev: &RejectedIssue, kind: MatchKind| RepeatMatch {
        current_id: current.issue_id.clone(),
        previous_id: prev.issue_id.clone(),
        kind,
    };

    if let Some(target) = current.repeat_of.as_deref()
        && let Some(prev) = previous.iter().find(|p| p.issue_id == target)
    {
        return Some(found(*prev, MatchKind::BackReference));
    }
    if current.semantic_key != GENERIC_KEY
        && let Some(prev) = previous
            .iter()
            .find(|p| p.semantic_key == current.semantic_key)
    {
        return Some(found(*prev, MatchKind::SemanticKey));
    }
    previous
        .iter()
        .find(|p| similarity_ratio(&current.original_issue, &p.original_issue) >= SIMILARITY_CUTOFF)
        .map(|prev| found(*prev, MatchKind::Fuzzy))
}

/// Deadlock when at least `threshold` rejections repeat from the previous round.
pub fn detect_deadlock(
    current: &[RejectedIssue],
    previous: &[RejectedIssue],
    threshold: usize,
) -> Option<Vec<RepeatMatch>> {
    let repeats = find_repeats(current, previous);
    if threshold > 0 && repeats.len() >= threshold {
        Some(repeats)
    } else {
        None
    }
}

fn is_rejection(issue: &RejectedIssue) -> bool {
    issue.classification == Disposition::Reject
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected(id: &str, text: &str, repeat_of: Option<&str>) -> RejectedIssue {
        RejectedIssue {
            round: 1,
            issue_id: id.to_string(),
            original_issue: text.to_string(),
            classification: Disposition::Reject,
            semantic_key: semantic_key(text),
            repeat_of: repeat_of.map(str::to_string),
            consecutive_rejections: 1,
        }
    }

    #[test]
    fn key_drops_short_and_stop_words_and_sorts() {
        assert_eq!(
            semantic_key("The retry policy should handle transient network failures"),
            "failures_handle_network_policy_retry_transient"
        );
    }

    #[test]
    fn key_is_generic_for_vague_text() {
        assert_eq!(semantic_key("This is not clear"), GENERIC_KEY);
        assert_eq!(semantic_key(""), GENERIC_KEY);
    }

    #[test]
    fn key_is_invariant_under_word_permutation() {
        let words = [
            "authentication",
            "tokens",
            "expire",
            "without",
            "refresh",
            "handling",
            "in",
            "the",
        ];
        let baseline = semantic_key(&words.join(" "));
        // Every rotation and its reversal is a distinct permutation of the same word set.
        for shift in 0..words.len() {
            let mut rotated = words.to_vec();
            rotated.rotate_left(shift);
            assert_eq!(semantic_key(&rotated.join(" ")), baseline);
            rotated.reverse();
            assert_eq!(semantic_key(&rotated.join(" ")), baseline);
        }
    }

    #[test]
    fn similarity_ratio_bounds() {
        assert_eq!(similarity_ratio("abc", "abc"), 1.0);
        assert_eq!(similarity_ratio("abc", "xyz"), 0.0);
        assert_eq!(similarity_ratio("", ""), 1.0);
        let r = similarity_ratio("Missing rate limiting", "missing rate-limiting");
        assert!(r > 0.9, "ratio {r}");
    }

    #[test]
    fn back_reference_takes_priority() {
        let previous = vec![
            rejected("r1-a", "Database migrations lack rollback scripts", None),
            rejected("r1-b", "Caching strategy undefined for sessions", None),
        ];
        let current = vec![rejected(
            "r2-a",
            "Caching strategy undefined for sessions",
            Some("r1-a"),
        )];
        let repeats = find_repeats(&current, &previous);
        assert_eq!(repeats.len(), 1);
        assert_eq!(repeats[0].previous_id, "r1-a");
        assert_eq!(repeats[0].kind, MatchKind::BackReference);
    }

    #[test]
    fn reworded_issue_matches_by_key() {
        let previous = vec![rejected(
            "r1-a",
            "Pagination support for listing endpoints",
            None,
        )];
        let current = vec![rejected(
            "r2-a",
            "Listing endpoints: pagination support?",
            None,
        )];
        let repeats = find_repeats(&current, &previous);
        assert_eq!(repeats[0].kind, MatchKind::SemanticKey);
    }

    #[test]
    fn near_identical_text_matches_fuzzily() {
        let previous = vec![rejected("r1-a", "Add an index on users.email", None)];
        let current = vec![rejected("r2-a", "Add an index on user.email", None)];
        let repeats = find_repeats(&current, &previous);
        assert_eq!(repeats.len(), 1);
        assert_eq!(repeats[0].kind, MatchKind::Fuzzy);
    }

    #[test]
    fn accepted_issues_are_ignored() {
        let previous = vec![rejected("r1-a", "Pagination support for listing endpoints", None)];
        let mut accepted = rejected("r2-a", "Pagination support for listing endpoints", None);
        accepted.classification = Disposition::Accept;
        assert!(find_repeats(&[accepted], &previous).is_empty());
    }

    #[test]
    fn deadlock_at_threshold() {
        let previous = vec![
            rejected("r1-a", "Pagination support for listing endpoints", None),
            rejected("r1-b", "Webhook signature verification algorithm", None),
        ];
        let one = vec![rejected("r2-a", "Listing endpoints pagination support", None)];
        assert!(detect_deadlock(&one, &previous, 2).is_none());

        let two = vec![
            rejected("r2-a", "Listing endpoints pagination support", None),
            rejected("r2-b", "Verification algorithm for webhook signature", None),
        ];
        let repeats = detect_deadlock(&two, &previous, 2).expect("deadlock");
        assert_eq!(repeats.len(), 2);
    }
}

//! Complexity heuristics for implementation issues.
//!
//! Three tiers: small issues pass instantly, oversized issues fail instantly,
//! and borderline issues are estimated (by a cheap model when available, or by
//! a fixed formula).

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::core::types::{ComplexityEstimate, Issue};

pub const INSTANT_PASS_MAX_CRITERIA: usize = 5;
pub const INSTANT_PASS_MAX_METHODS: usize = 3;
pub const INSTANT_FAIL_MIN_CRITERIA: usize = 12;
pub const INSTANT_FAIL_MIN_METHODS: usize = 8;

pub const INSTANT_PASS_TURNS: u32 = 10;
pub const INSTANT_FAIL_TURNS: u32 = 35;
pub const INSTANT_CONFIDENCE: f64 = 0.95;

/// Formula estimates above this many turns need a split.
pub const SPLIT_TURN_THRESHOLD: u32 = 20;
/// Turns that map to a complexity score of 1.0.
pub const SCORE_SATURATION_TURNS: f64 = 30.0;

const FORMULA_CONFIDENCE: f64 = 0.6;
const METHODS_PER_GROUP: usize = 3;
const CRITERIA_PER_GROUP: usize = 4;

/// Tokens that look like method names but never are.
const FALSE_POSITIVES: &[&str] = &[
    "self", "cls", "none", "true", "false", "str", "int", "float", "bool", "dict", "list",
    "tuple", "set", "bytes", "any", "optional", "object", "type", "print", "len", "range",
    "super", "isinstance", "path", "data", "value", "result", "item", "items", "name", "args",
    "kwargs", "example", "function", "method", "class", "test", "tests",
];

const CRUD_VERBS: &[(&str, &[&str])] = &[
    ("create", &["create", "add", "insert", "new", "register"]),
    ("read", &["get", "read", "list", "fetch", "find", "load", "show"]),
    ("update", &["update", "edit", "modify", "patch", "set"]),
    ("delete", &["delete", "remove", "destroy", "drop", "clear"]),
];

const LAYERS: &[(&str, &[&str])] = &[
    ("model", &["model", "schema", "dataclass", "entity"]),
    ("storage", &["repository", "store", "database", "persist", "migration"]),
    ("service", &["service", "manager", "engine", "handler"]),
    ("api", &["api", "endpoint", "route", "http", "webhook"]),
    ("cli", &["cli", "command", "typer", "argparse"]),
    ("ui", &["ui", "view", "template", "render", "widget"]),
];

const TRIGGER_WORDS: &[&str] = &["when ", "on ", "after ", "before ", "whenever ", "if "];

/// Which decision path an issue takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    InstantPass,
    InstantFail,
    Borderline,
}

/// Counts the gate decides on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueMetrics {
    pub criteria: Vec<String>,
    pub methods: Vec<String>,
}

impl IssueMetrics {
    pub fn from_body(body: &str) -> Self {
        Self {
            criteria: acceptance_criteria(body),
            methods: method_names(body),
        }
    }

    pub fn criteria_count(&self) -> usize {
        self.criteria.len()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn tier(&self) -> Tier {
        classify_tier(self.criteria_count(), self.method_count())
    }
}

pub fn classify_tier(criteria: usize, methods: usize) -> Tier {
    if criteria <= INSTANT_PASS_MAX_CRITERIA && methods <= INSTANT_PASS_MAX_METHODS {
        Tier::InstantPass
    } else if criteria > INSTANT_FAIL_MIN_CRITERIA || methods > INSTANT_FAIL_MIN_METHODS {
        Tier::InstantFail
    } else {
        Tier::Borderline
    }
}

/// Text of each markdown checkbox line (`- [ ]` / `- [x]`, any case).
///
/// Only dash bullets count; `* [ ]` lines are ignored.
pub fn acceptance_criteria(body: &str) -> Vec<String> {
    static CHECKBOX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?im)^[ \t]*-[ \t]*\[[ x]\][ \t]*(.*)$").expect("valid regex")
    });
    CHECKBOX_RE
        .captures_iter(body)
        .map(|caps| caps[1].trim().to_string())
        .collect()
}

pub fn count_acceptance_criteria(body: &str) -> usize {
    acceptance_criteria(body).len()
}

/// Distinct method names mentioned in an issue body, sorted.
///
/// Union of backtick call syntax (`` `name(` ``), `def`/`async def` signatures
/// and "implement `name`" phrasing, minus known false positives.
pub fn method_names(body: &str) -> Vec<String> {
    static PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
        [
            r"`([A-Za-z_][A-Za-z0-9_]*)\s*\(",
            r"\b(?:async\s+)?def\s+([A-Za-z_][A-Za-z0-9_]*)",
            r"(?i)\bimplement\s+`([A-Za-z_][A-Za-z0-9_.]*)`",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
    });

    let mut names = BTreeSet::new();
    for re in PATTERNS.iter() {
        for caps in re.captures_iter(body) {
            let raw = &caps[1];
            let name = raw.rsplit('.').next().unwrap_or(raw);
            if !FALSE_POSITIVES.contains(&name.to_lowercase().as_str()) {
                names.insert(name.to_string());
            }
        }
    }
    names.into_iter().collect()
}

pub fn count_methods(body: &str) -> usize {
    method_names(body).len()
}

pub fn complexity_score(estimated_turns: u32) -> f64 {
    (estimated_turns as f64 / SCORE_SATURATION_TURNS).min(1.0)
}

/// `5 + criteria + 1.5 * methods`, rounded up.
pub fn formula_turns(criteria: usize, methods: usize) -> u32 {
    (5.0 + criteria as f64 + 1.5 * methods as f64).ceil() as u32
}

pub fn instant_pass(metrics: &IssueMetrics) -> ComplexityEstimate {
    ComplexityEstimate {
        estimated_turns: INSTANT_PASS_TURNS,
        complexity_score: complexity_score(INSTANT_PASS_TURNS),
        needs_split: false,
        split_suggestions: Vec::new(),
        confidence: INSTANT_CONFIDENCE,
        reasoning: format!(
            "small issue: {} acceptance criteria, {} methods",
            metrics.criteria_count(),
            metrics.method_count()
        ),
    }
}

pub fn instant_fail(issue: &Issue, metrics: &IssueMetrics) -> ComplexityEstimate {
    ComplexityEstimate {
        estimated_turns: INSTANT_FAIL_TURNS,
        complexity_score: complexity_score(INSTANT_FAIL_TURNS),
        needs_split: true,
        split_suggestions: suggest_splits(issue, metrics),
        confidence: INSTANT_CONFIDENCE,
        reasoning: format!(
            "oversized issue: {} acceptance criteria (max {}), {} methods (max {})",
            metrics.criteria_count(),
            INSTANT_FAIL_MIN_CRITERIA,
            metrics.method_count(),
            INSTANT_FAIL_MIN_METHODS
        ),
    }
}

pub fn formula_estimate(issue: &Issue, metrics: &IssueMetrics, why: &str) -> ComplexityEstimate {
    let turns = formula_turns(metrics.criteria_count(), metrics.method_count());
    let needs_split = turns > SPLIT_TURN_THRESHOLD;
    ComplexityEstimate {
        estimated_turns: turns,
        complexity_score: complexity_score(turns),
        needs_split,
        split_suggestions: if needs_split {
            suggest_splits(issue, metrics)
        } else {
            Vec::new()
        },
        confidence: FORMULA_CONFIDENCE,
        reasoning: format!(
            "{why}; formula 5 + {} + 1.5*{} = {turns} turns",
            metrics.criteria_count(),
            metrics.method_count()
        ),
    }
}

#[derive(Debug, Deserialize)]
struct ModelEstimate {
    estimated_turns: f64,
    #[serde(default)]
    needs_split: Option<bool>,
    #[serde(default)]
    split_suggestions: Vec<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    reasoning: String,
}

/// Parse a cheap-model estimate from free text.
///
/// Returns `None` if no JSON object with a numeric `estimated_turns` is found.
pub fn parse_model_estimate(
    text: &str,
    issue: &Issue,
    metrics: &IssueMetrics,
) -> Option<ComplexityEstimate> {
    let value = crate::core::json::extract_json_object(text)?;
    let parsed: ModelEstimate = serde_json::from_value(value).ok()?;
    if !parsed.estimated_turns.is_finite() || parsed.estimated_turns < 0.0 {
        return None;
    }
    let turns = parsed.estimated_turns.round() as u32;
    let needs_split = parsed
        .needs_split
        .unwrap_or(turns > SPLIT_TURN_THRESHOLD);
    let mut suggestions: Vec<String> = parsed
        .split_suggestions
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if !needs_split {
        suggestions.clear();
    } else if suggestions.is_empty() {
        suggestions = suggest_splits(issue, metrics);
    }
    Some(ComplexityEstimate {
        estimated_turns: turns,
        complexity_score: complexity_score(turns),
        needs_split,
        split_suggestions: suggestions,
        confidence: parsed.confidence.unwrap_or(FORMULA_CONFIDENCE).clamp(0.0, 1.0),
        reasoning: parsed.reasoning,
    })
}

/// Heuristic split suggestions. Never empty.
///
/// Looks for CRUD-verb clusters, architectural layer clusters and
/// trigger-style criteria; falls back to fixed-size groups of methods or
/// criteria.
pub fn suggest_splits(issue: &Issue, metrics: &IssueMetrics) -> Vec<String> {
    let mut suggestions = Vec::new();
    let haystack = format!("{}\n{}", issue.title, issue.body).to_lowercase();

    let crud: Vec<&str> = CRUD_VERBS
        .iter()
        .filter(|(_, verbs)| {
            metrics.methods.iter().any(|m| {
                let m = m.to_lowercase();
                verbs.iter().any(|v| m.starts_with(v))
            })
        })
        .map(|(group, _)| *group)
        .collect();
    if crud.len() >= 2 {
        suggestions.push(format!(
            "Split by operation: one issue each for {} methods",
            crud.join(", ")
        ));
    }

    let layers: Vec<&str> = LAYERS
        .iter()
        .filter(|(_, words)| words.iter().any(|w| contains_word(&haystack, w)))
        .map(|(layer, _)| *layer)
        .collect();
    if layers.len() >= 2 {
        suggestions.push(format!(
            "Split by layer: implement {} separately",
            layers.join(", ")
        ));
    }

    let triggers = metrics
        .criteria
        .iter()
        .filter(|c| {
            let c = c.to_lowercase();
            TRIGGER_WORDS.iter().any(|t| c.starts_with(t))
        })
        .count();
    if triggers >= 3 {
        suggestions.push(format!(
            "Split trigger handling: {triggers} event-driven criteria could move to their own issue"
        ));
    }

    if suggestions.is_empty() {
        suggestions.push(fallback_suggestion(metrics));
    }
    suggestions
}

fn fallback_suggestion(metrics: &IssueMetrics) -> String {
    if metrics.method_count() > METHODS_PER_GROUP {
        let groups: Vec<String> = metrics
            .methods
            .chunks(METHODS_PER_GROUP)
            .map(|chunk| chunk.join(", "))
            .collect();
        return format!(
            "Split into {} issues of ~{} methods: [{}]",
            groups.len(),
            METHODS_PER_GROUP,
            groups.join("] [")
        );
    }
    let parts = metrics.criteria_count().div_ceil(CRITERIA_PER_GROUP).max(2);
    format!(
        "Split the {} acceptance criteria into {} issues of ~{} criteria each",
        metrics.criteria_count(),
        parts,
        CRITERIA_PER_GROUP
    )
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|w| w == word)
}

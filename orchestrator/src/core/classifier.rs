//! Deterministic classification of raw agent error text.
//!
//! Classification is a single ordered table of `(pattern, kind)` pairs matched
//! case-insensitively, top to bottom. Anything unmatched is `Unknown`.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Error taxonomy that drives recovery routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    ImportError,
    SyntaxError,
    TypeError,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::ImportError => "import_error",
            Self::SyntaxError => "syntax_error",
            Self::TypeError => "type_error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Patterns are lower-case; input is lower-cased before matching.
const CLASSIFICATION_TABLE: &[(&str, ErrorKind)] = &[
    ("timed out", ErrorKind::Timeout),
    ("undefined name", ErrorKind::ImportError),
    ("importerror", ErrorKind::ImportError),
    ("modulenotfounderror", ErrorKind::ImportError),
    ("syntaxerror", ErrorKind::SyntaxError),
    ("indentationerror", ErrorKind::SyntaxError),
    ("typeerror", ErrorKind::TypeError),
];

/// Substrings meaning the agent ran out of turns, time or context.
const AUTO_SPLIT_TRIGGERS: &[&str] = &[
    "timed out",
    "error_max_turns",
    "max_turns",
    "context exhausted",
    "window exhausted",
];

/// Errors that have dedicated recovery paths and must never trigger a split.
const AUTO_SPLIT_EXCLUSIONS: &[&str] = &[
    "undefined name",
    "importerror",
    "modulenotfounderror",
    "syntaxerror",
    "indentationerror",
];

/// Map raw error text to an [`ErrorKind`]. Total and case-insensitive.
pub fn classify_error(text: &str) -> ErrorKind {
    let lowered = text.to_lowercase();
    CLASSIFICATION_TABLE
        .iter()
        .find(|(pattern, _)| lowered.contains(pattern))
        .map(|(_, kind)| *kind)
        .unwrap_or(ErrorKind::Unknown)
}

/// Whether a live failure should split the issue instead of retrying it.
pub fn should_auto_split(text: &str) -> bool {
    let lowered = text.to_lowercase();
    if AUTO_SPLIT_EXCLUSIONS.iter().any(|p| lowered.contains(p)) {
        return false;
    }
    AUTO_SPLIT_TRIGGERS.iter().any(|p| lowered.contains(p))
}

/// Extract symbol names from `undefined name(s): path:Symbol, path:Other`.
///
/// Only the text after the marker up to the end of that line is parsed. Tokens
/// without a `path:` prefix are taken whole. Order is preserved, duplicates dropped.
pub fn extract_undefined_names(text: &str) -> Vec<String> {
    static UNDEFINED_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)undefined names?(?:\(s\))?\s*:\s*([^\n]+)").expect("valid regex")
    });

    let mut names: Vec<String> = Vec::new();
    for caps in UNDEFINED_RE.captures_iter(text) {
        for token in caps[1].split(',') {
            let token = token.trim();
            let symbol = token
                .rsplit_once(':')
                .map(|(_, symbol)| symbol)
                .unwrap_or(token)
                .trim()
                .trim_matches(|c: char| !(c.is_alphanumeric() || c == '_'));
            if symbol.is_empty() || names.iter().any(|n| n == symbol) {
                continue;
            }
            names.push(symbol.to_string());
        }
    }
    names
}

//! Recovery routing and hint construction for failed implementation attempts.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::classifier::{ErrorKind, classify_error, extract_undefined_names, should_auto_split};

/// Well-known third-party and stdlib symbols and the import that provides them.
const KNOWN_IMPORTS: &[(&str, &str)] = &[
    ("CliRunner", "from typer.testing import CliRunner"),
    ("Typer", "from typer import Typer"),
    ("Path", "from pathlib import Path"),
    ("Optional", "from typing import Optional"),
    ("Any", "from typing import Any"),
    ("Callable", "from typing import Callable"),
    ("Iterator", "from typing import Iterator"),
    ("dataclass", "from dataclasses import dataclass"),
    ("field", "from dataclasses import field"),
    ("BaseModel", "from pydantic import BaseModel"),
    ("Field", "from pydantic import Field"),
    ("MagicMock", "from unittest.mock import MagicMock"),
    ("patch", "from unittest.mock import patch"),
    ("defaultdict", "from collections import defaultdict"),
    ("datetime", "from datetime import datetime"),
    ("timedelta", "from datetime import timedelta"),
    ("Enum", "from enum import Enum"),
    ("TestClient", "from fastapi.testclient import TestClient"),
];

/// Characters of raw verifier output kept when no structured failures exist.
const RAW_OUTPUT_LIMIT: usize = 2_000;

/// Resolves symbols against the working tree.
pub trait SymbolLocator {
    /// Dotted module path of a file defining `symbol`.
    fn find_definition(&self, symbol: &str) -> Option<String>;
    /// Dotted module path of a module named like `symbol`.
    fn find_module(&self, symbol: &str) -> Option<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    KnownTable,
    Definition,
    Module,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportResolution {
    pub name: String,
    pub statement: Option<String>,
    pub source: Option<ResolutionSource>,
}

impl ImportResolution {
    pub fn is_resolved(&self) -> bool {
        self.statement.is_some()
    }
}

/// Resolve each name: known table first, then definition search, then module search.
pub fn resolve_imports(
    names: &[String],
    locator: Option<&dyn SymbolLocator>,
) -> Vec<ImportResolution> {
    names
        .iter()
        .map(|name| resolve_one(name, locator))
        .collect()
}

fn resolve_one(name: &str, locator: Option<&dyn SymbolLocator>) -> ImportResolution {
    let resolved = |statement: String, source| ImportResolution {
        name: name.to_string(),
        statement: Some(statement),
        source: Some(source),
    };
    if let Some((_, statement)) = KNOWN_IMPORTS.iter().find(|(sym, _)| *sym == name) {
        return resolved(statement.to_string(), ResolutionSource::KnownTable);
    }
    if let Some(locator) = locator {
        if let Some(module) = locator.find_definition(name) {
            return resolved(
                format!("from {module} import {name}"),
                ResolutionSource::Definition,
            );
        }
        if let Some(module) = locator.find_module(name) {
            return resolved(format!("import {module}"), ResolutionSource::Module);
        }
    }
    ImportResolution {
        name: name.to_string(),
        statement: None,
        source: None,
    }
}

pub fn unresolved_names(resolutions: &[ImportResolution]) -> Vec<String> {
    resolutions
        .iter()
        .filter(|r| !r.is_resolved())
        .map(|r| r.name.clone())
        .collect()
}

/// Hint injected into the next coder attempt after an import failure.
pub fn build_import_hint(resolutions: &[ImportResolution]) -> String {
    let mut hint =
        String::from("The previous attempt failed on undefined names. Fix the imports:\n");
    for r in resolutions {
        match &r.statement {
            Some(statement) => hint.push_str(&format!("- {}: `{statement}`\n", r.name)),
            None => hint.push_str(&format!(
                "- {}: no known import; define it or find the correct module\n",
                r.name
            )),
        }
    }
    hint
}

/// What to do after the coder call itself failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureRoute {
    /// Abandon retries and split the issue.
    Split,
    /// Resolve these undefined names and retry with a hint.
    FixImports(Vec<String>),
    /// Ask the recovery agent for a plan.
    Recover,
    /// Retry without guidance.
    Retry,
}

/// Route a coder failure by its classification and the configured switches.
pub fn route_coder_failure(
    error: &str,
    auto_split_on_timeout: bool,
    auto_fix_import_errors: bool,
) -> (ErrorKind, FailureRoute) {
    let kind = classify_error(error);
    // Turn and context exhaustion split too, even though they classify as unknown.
    if auto_split_on_timeout && should_auto_split(error) {
        return (kind, FailureRoute::Split);
    }
    let route = match kind {
        ErrorKind::Timeout => FailureRoute::Retry,
        ErrorKind::ImportError if auto_fix_import_errors => {
            let names = extract_undefined_names(error);
            if names.is_empty() {
                FailureRoute::Recover
            } else {
                FailureRoute::FixImports(names)
            }
        }
        ErrorKind::ImportError
        | ErrorKind::SyntaxError
        | ErrorKind::TypeError
        | ErrorKind::Unknown => FailureRoute::Recover,
    };
    (kind, route)
}

/// Recovery agent verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryVerdict {
    Plan(String),
    Unrecoverable(String),
}

/// Read `recoverable`, `plan` and `explanation` from recovery agent output.
///
/// A recoverable verdict without a concrete plan is treated as no verdict.
pub fn parse_recovery_verdict(output: &Map<String, Value>) -> Option<RecoveryVerdict> {
    let recoverable = output.get("recoverable").and_then(Value::as_bool)?;
    let text = |key: &str| {
        output
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    if recoverable {
        text("plan").map(RecoveryVerdict::Plan)
    } else {
        Some(RecoveryVerdict::Unrecoverable(
            text("explanation")
                .or_else(|| text("plan"))
                .unwrap_or_else(|| "recovery agent judged the failure unrecoverable".to_string()),
        ))
    }
}

/// Failing-test details for the next coder prompt.
///
/// Uses the verifier's structured `failures` (strings or `{test, message}`
/// objects) when present, else the tail of its raw `output`.
pub fn format_test_failures(output: &Map<String, Value>) -> String {
    let failures: Vec<String> = output
        .get("failures")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(format_failure).collect())
        .unwrap_or_default();

    if !failures.is_empty() {
        let mut text = format!("{} failing test(s):\n", failures.len());
        for failure in failures {
            text.push_str(&format!("- {failure}\n"));
        }
        return text;
    }

    let raw = output
        .get("output")
        .and_then(Value::as_str)
        .or_else(|| output.get("text").and_then(Value::as_str))
        .unwrap_or("")
        .trim();
    if raw.is_empty() {
        return "Tests failed without details.".to_string();
    }
    let chars: Vec<char> = raw.chars().collect();
    let tail: String = chars[chars.len().saturating_sub(RAW_OUTPUT_LIMIT)..]
        .iter()
        .collect();
    format!("Test output:\n{tail}")
}

fn format_failure(item: &Value) -> Option<String> {
    match item {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => {
            let test = obj.get("test").and_then(Value::as_str).unwrap_or("unknown test");
            match obj.get("message").and_then(Value::as_str) {
                Some(message) => Some(format!("{test}: {message}")),
                None => Some(test.to_string()),
            }
        }
        _ => None,
    }
}

/// Verifier-reported regressions: previously passing tests that now fail.
pub fn regressions(output: &Map<String, Value>) -> Vec<String> {
    output
        .get("regressions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Most specific blocked error: regressions, then the recovery agent's
/// explanation, then unresolved imports, then the generic retry message.
pub fn most_specific_error(
    regressions: &[String],
    recovery_explanation: Option<&str>,
    unresolved: &[String],
    retries: u32,
) -> String {
    if !regressions.is_empty() {
        return format!("regression detected: {}", regressions.join(", "));
    }
    if let Some(explanation) = recovery_explanation {
        return format!("recovery agent: {explanation}");
    }
    if !unresolved.is_empty() {
        return format!(
            "max retries exceeded ({retries}); unresolved imports: {}",
            unresolved.join(", ")
        );
    }
    format!("max retries exceeded ({retries})")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct FakeLocator;

    impl SymbolLocator for FakeLocator {
        fn find_definition(&self, symbol: &str) -> Option<String> {
            (symbol == "SessionStore").then(|| "app.store".to_string())
        }

        fn find_module(&self, symbol: &str) -> Option<String> {
            (symbol == "helpers").then(|| "app.helpers".to_string())
        }
    }

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn resolves_in_priority_order() {
        let names: Vec<String> = ["CliRunner", "SessionStore", "helpers", "Mystery"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let resolved = resolve_imports(&names, Some(&FakeLocator));
        assert_eq!(
            resolved[0].statement.as_deref(),
            Some("from typer.testing import CliRunner")
        );
        assert_eq!(resolved[0].source, Some(ResolutionSource::KnownTable));
        assert_eq!(
            resolved[1].statement.as_deref(),
            Some("from app.store import SessionStore")
        );
        assert_eq!(resolved[2].statement.as_deref(), Some("import app.helpers"));
        assert!(!resolved[3].is_resolved());
        assert_eq!(unresolved_names(&resolved), vec!["Mystery"]);

        let hint = build_import_hint(&resolved);
        assert!(hint.contains("from typer.testing import CliRunner"));
        assert!(hint.contains("Mystery: no known import"));
    }

    #[test]
    fn routes_by_classification_and_switches() {
        let timeout = "Claude timed out: no response after 300 seconds";
        assert_eq!(route_coder_failure(timeout, true, true).1, FailureRoute::Split);
        assert_eq!(route_coder_failure(timeout, false, true).1, FailureRoute::Retry);

        let import = "undefined name(s): typer/testing.py:CliRunner";
        assert_eq!(
            route_coder_failure(import, true, true),
            (
                ErrorKind::ImportError,
                FailureRoute::FixImports(vec!["CliRunner".to_string()])
            )
        );
        assert_eq!(route_coder_failure(import, true, false).1, FailureRoute::Recover);
        assert_eq!(
            route_coder_failure("SyntaxError: bad", true, true).1,
            FailureRoute::Recover
        );
    }

    #[test]
    fn turn_and_context_exhaustion_split_like_timeouts() {
        for error in [
            "assistant stopped with error_max_turns after 30 turns",
            "reached max_turns",
            "context window exhausted",
        ] {
            assert_eq!(
                route_coder_failure(error, true, true),
                (ErrorKind::Unknown, FailureRoute::Split),
                "{error}"
            );
            assert_eq!(
                route_coder_failure(error, false, true).1,
                FailureRoute::Recover,
                "{error}"
            );
        }
    }

    #[test]
    fn recovery_verdicts() {
        let plan = obj(json!({"recoverable": true, "plan": "rename the fixture"}));
        assert_eq!(
            parse_recovery_verdict(&plan),
            Some(RecoveryVerdict::Plan("rename the fixture".to_string()))
        );
        let vague = obj(json!({"recoverable": true, "plan": "  "}));
        assert_eq!(parse_recovery_verdict(&vague), None);
        let stop = obj(json!({"recoverable": false, "explanation": "needs a schema decision"}));
        assert_eq!(
            parse_recovery_verdict(&stop),
            Some(RecoveryVerdict::Unrecoverable(
                "needs a schema decision".to_string()
            ))
        );
        assert_eq!(parse_recovery_verdict(&obj(json!({}))), None);
    }

    #[test]
    fn formats_structured_and_raw_failures() {
        let structured = obj(json!({"failures": [
            {"test": "test_load", "message": "KeyError: 'id'"},
            "test_save"
        ]}));
        let text = format_test_failures(&structured);
        assert!(text.starts_with("2 failing test(s)"));
        assert!(text.contains("- test_load: KeyError: 'id'"));

        let raw = obj(json!({"output": "FAILED tests/test_x.py::test_y"}));
        assert!(format_test_failures(&raw).contains("test_y"));
        assert_eq!(
            format_test_failures(&Map::new()),
            "Tests failed without details."
        );
    }

    #[test]
    fn blocked_error_priority() {
        let regs = vec!["test_old".to_string()];
        let unresolved = vec!["Mystery".to_string()];
        assert_eq!(
            most_specific_error(&regs, Some("x"), &unresolved, 3),
            "regression detected: test_old"
        );
        assert_eq!(
            most_specific_error(&[], Some("x"), &unresolved, 3),
            "recovery agent: x"
        );
        assert!(most_specific_error(&[], None, &unresolved, 3).contains("Mystery"));
        assert_eq!(most_specific_error(&[], None, &[], 3), "max retries exceeded (3)");
    }
}

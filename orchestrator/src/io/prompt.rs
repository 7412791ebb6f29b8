//! Prompt rendering for LLM-backed agents.
//!
//! One minijinja template per role, embedded at compile time. The agent
//! context map is the template context, so templates read the same keys the
//! orchestrator passes to agents.

use anyhow::{Context, Result};
use minijinja::Environment;
use serde_json::Value;
use tracing::debug;

use crate::agents::AgentRole;
use crate::core::types::AgentContext;

const AUTHOR_TEMPLATE: &str = include_str!("prompts/author.md");
const CRITIC_TEMPLATE: &str = include_str!("prompts/critic.md");
const MODERATOR_TEMPLATE: &str = include_str!("prompts/moderator.md");
const TEST_WRITER_TEMPLATE: &str = include_str!("prompts/test_writer.md");
const CODER_TEMPLATE: &str = include_str!("prompts/coder.md");
const VERIFIER_TEMPLATE: &str = include_str!("prompts/verifier.md");
const RECOVERY_TEMPLATE: &str = include_str!("prompts/recovery.md");
const COMPLEXITY_TEMPLATE: &str = include_str!("prompts/complexity.md");

const TRUNCATION_MARKER: &str = "\n[truncated]";

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
    /// Longest string value passed into a template, in bytes.
    field_budget_bytes: usize,
}

impl PromptEngine {
    pub fn new(field_budget_bytes: usize) -> Result<Self> {
        let mut env = Environment::new();
        for (role, source) in [
            (AgentRole::Author, AUTHOR_TEMPLATE),
            (AgentRole::Critic, CRITIC_TEMPLATE),
            (AgentRole::Moderator, MODERATOR_TEMPLATE),
            (AgentRole::TestWriter, TEST_WRITER_TEMPLATE),
            (AgentRole::Coder, CODER_TEMPLATE),
            (AgentRole::Verifier, VERIFIER_TEMPLATE),
            (AgentRole::Recovery, RECOVERY_TEMPLATE),
            (AgentRole::ComplexityEstimator, COMPLEXITY_TEMPLATE),
        ] {
            env.add_template(role.as_str(), source)
                .with_context(|| format!("load {} template", role.as_str()))?;
        }
        Ok(Self {
            env,
            field_budget_bytes,
        })
    }

    pub fn render(&self, role: AgentRole, context: &AgentContext) -> Result<String> {
        let bounded: AgentContext = context
            .iter()
            .map(|(k, v)| (k.clone(), self.bound(v)))
            .collect();
        let template = self
            .env
            .get_template(role.as_str())
            .with_context(|| format!("missing {} template", role.as_str()))?;
        let rendered = template
            .render(&bounded)
            .with_context(|| format!("render {} prompt", role.as_str()))?;
        debug!(role = role.as_str(), bytes = rendered.len(), "prompt rendered");
        Ok(rendered)
    }

    fn bound(&self, value: &Value) -> Value {
        match value {
            Value::String(s) if s.len() > self.field_budget_bytes => {
                Value::String(truncate_utf8(s, self.field_budget_bytes))
            }
            Value::Array(items) => Value::Array(items.iter().map(|v| self.bound(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.bound(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

fn truncate_utf8(s: &str, budget: usize) -> String {
    let mut cut = budget.saturating_sub(TRUNCATION_MARKER.len());
    while cut > 0 && !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{TRUNCATION_MARKER}", &s[..cut])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ctx(value: Value) -> AgentContext {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn critic_prompt_lists_rubric_and_rejections() {
        let engine = PromptEngine::new(10_000).expect("engine");
        let context = ctx(json!({
            "feature_id": "auth",
            "round": 2,
            "spec": "# Auth spec",
            "thresholds": {"clarity": 0.8, "risk": 0.7},
            "prior_context": {
                "rejected_issues": [{"round": 1, "issue_id": "c1", "issue": "Add OAuth"}],
                "instruction": "Do not re-raise rejected issues."
            }
        }));
        let prompt = engine.render(AgentRole::Critic, &context).expect("render");
        assert!(prompt.contains("round 2"));
        assert!(prompt.contains("- clarity (pass at 0.8)"));
        assert!(prompt.contains("c1: Add OAuth"));
        assert!(prompt.contains("# Auth spec"));
    }

    #[test]
    fn coder_retry_section_only_on_retry() {
        let engine = PromptEngine::new(10_000).expect("engine");
        let first = ctx(json!({"feature_id": "auth", "issue_number": 3, "issue_title": "Login"}));
        assert!(!engine
            .render(AgentRole::Coder, &first)
            .expect("render")
            .contains("<retry>"));

        let retry = ctx(json!({
            "feature_id": "auth",
            "issue_number": 3,
            "issue_title": "Login",
            "retry_number": 1,
            "recovery_hint": "from typer.testing import CliRunner"
        }));
        let prompt = engine.render(AgentRole::Coder, &retry).expect("render");
        assert!(prompt.contains("This is retry 1."));
        assert!(prompt.contains("from typer.testing import CliRunner"));
    }

    #[test]
    fn long_fields_are_truncated() {
        let engine = PromptEngine::new(64).expect("engine");
        let context = ctx(json!({"feature_id": "auth", "prd": "é".repeat(200)}));
        let prompt = engine.render(AgentRole::Author, &context).expect("render");
        assert!(prompt.contains("[truncated]"));
        assert!(prompt.len() < 400);
    }
}

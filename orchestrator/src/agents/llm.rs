//! Agents backed by an [`LlmBackend`].
//!
//! Each role renders its prompt template, runs the backend once and turns the
//! reply into an [`AgentResult`]. Roles with a fixed output shape must reply
//! with a JSON object that passes their schema.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::core::json::extract_json_object;
use crate::core::types::{AgentContext, AgentResult};
use crate::io::backend::{LlmBackend, LlmRequest};
use crate::io::config::SwarmConfig;
use crate::io::prompt::PromptEngine;
use crate::io::schema::validate_output;

use super::{Agent, AgentRole, AgentSet};

const DEFAULT_MAX_TURNS: u32 = 10;

pub struct LlmAgent {
    role: AgentRole,
    backend: Arc<dyn LlmBackend>,
    prompts: Arc<PromptEngine>,
    workdir: PathBuf,
    max_turns: u32,
    model: Option<String>,
}

impl LlmAgent {
    pub fn new(
        role: AgentRole,
        backend: Arc<dyn LlmBackend>,
        prompts: Arc<PromptEngine>,
        workdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            role,
            backend,
            prompts,
            workdir: workdir.into(),
            max_turns: DEFAULT_MAX_TURNS,
            model: None,
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    fn interpret(&self, text: String, cost: f64) -> AgentResult {
        let json = extract_json_object(&text);
        let mut output = match &json {
            Some(Value::Object(map)) => map.clone(),
            _ => Map::new(),
        };

        if let Some(schema) = self.role.output_schema() {
            let Some(value) = json else {
                return AgentResult::failure(
                    vec![format!("{} reply contained no JSON object", self.role.as_str())],
                    cost,
                );
            };
            if let Err(err) = validate_output(schema, &value) {
                return AgentResult::failure(vec![err.to_string()], cost);
            }
        }
        output.insert("text".to_string(), Value::String(text.clone()));

        match self.role {
            AgentRole::Author => {
                if text.trim().is_empty() {
                    return AgentResult::failure(vec!["author returned an empty spec".into()], cost);
                }
                output.insert("spec".to_string(), Value::String(text));
                AgentResult::success(output, cost)
            }
            AgentRole::Verifier => {
                let failed = output
                    .get("tests_failed")
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                let listed = output
                    .get("failures")
                    .and_then(Value::as_array)
                    .map_or(0, Vec::len);
                if failed == 0 && listed == 0 {
                    AgentResult::success(output, cost)
                } else {
                    let count = failed.max(listed as u64);
                    AgentResult::failure_with_output(
                        vec![format!("{count} test(s) failed")],
                        output,
                        cost,
                    )
                }
            }
            AgentRole::Coder | AgentRole::TestWriter => {
                if output.get("success").and_then(Value::as_bool) == Some(false) {
                    let error = output
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("agent reported failure")
                        .to_string();
                    return AgentResult::failure_with_output(vec![error], output, cost);
                }
                AgentResult::success(output, cost)
            }
            AgentRole::Critic
            | AgentRole::Moderator
            | AgentRole::Recovery
            | AgentRole::ComplexityEstimator => AgentResult::success(output, cost),
        }
    }
}

impl Agent for LlmAgent {
    fn role(&self) -> AgentRole {
        self.role
    }

    #[instrument(skip_all, fields(role = self.role.as_str()))]
    fn run(&self, context: &AgentContext) -> AgentResult {
        let prompt = match self.prompts.render(self.role, context) {
            Ok(prompt) => prompt,
            Err(err) => return AgentResult::failed(format!("{err:#}")),
        };
        let request = LlmRequest {
            prompt,
            allowed_tools: self
                .role
                .allowed_tools()
                .iter()
                .map(|t| t.to_string())
                .collect(),
            max_turns: self.max_turns,
            model: self.model.clone(),
            workdir: self.workdir.clone(),
        };
        match self.backend.run(&request) {
            Ok(response) => {
                debug!(cost_usd = response.total_cost_usd, "backend replied");
                self.interpret(response.text, response.total_cost_usd)
            }
            Err(err) => {
                warn!(error = %err, "backend call failed");
                AgentResult::failed(err.to_string())
            }
        }
    }
}

/// Build the full agent set over one backend.
pub fn build_agent_set(
    backend: Arc<dyn LlmBackend>,
    prompts: Arc<PromptEngine>,
    workdir: impl Into<PathBuf>,
    cfg: &SwarmConfig,
) -> AgentSet {
    let workdir = workdir.into();
    let agent = |role: AgentRole| LlmAgent::new(role, backend.clone(), prompts.clone(), &workdir);
    let coder_turns = cfg.sessions.coder_max_turns;
    AgentSet {
        author: Box::new(agent(AgentRole::Author)),
        critic: Box::new(agent(AgentRole::Critic)),
        moderator: Box::new(agent(AgentRole::Moderator)),
        test_writer: Box::new(agent(AgentRole::TestWriter).with_max_turns(coder_turns)),
        coder: Box::new(agent(AgentRole::Coder).with_max_turns(coder_turns)),
        verifier: Box::new(agent(AgentRole::Verifier).with_max_turns(coder_turns)),
        recovery: Some(Box::new(agent(AgentRole::Recovery))),
        // Without a cheap model the gate uses its formula.
        estimator: cfg.complexity.model.clone().map(|model| {
            Box::new(
                agent(AgentRole::ComplexityEstimator)
                    .with_max_turns(cfg.complexity.max_turns)
                    .with_model(Some(model)),
            ) as Box<dyn Agent>
        }),
    }
}

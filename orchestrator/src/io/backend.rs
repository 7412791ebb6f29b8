//! LLM backend invocation.
//!
//! The [`LlmBackend`] trait decouples agents from the assistant CLI. Tests use
//! scripted backends that return canned responses without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::config::BackendConfig;
use crate::io::process::run_with_timeout;

/// One prompt for the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmRequest {
    pub prompt: String,
    pub allowed_tools: Vec<String>,
    pub max_turns: u32,
    pub model: Option<String>,
    pub workdir: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub total_cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Worded so it classifies as a timeout.
    #[error("Claude timed out after {secs} seconds")]
    Timeout { secs: u64 },
    #[error("backend invocation failed: {0}")]
    Invocation(String),
}

pub trait LlmBackend {
    fn run(&self, request: &LlmRequest) -> Result<LlmResponse, BackendError>;
}

/// Backend that spawns the assistant CLI in print mode with JSON output.
#[derive(Debug, Clone)]
pub struct ClaudeCliBackend {
    command: String,
    default_model: Option<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ClaudeCliBackend {
    pub fn from_config(cfg: &BackendConfig) -> Self {
        Self {
            command: cfg.command.clone(),
            default_model: cfg.model.clone(),
            timeout: Duration::from_secs(cfg.timeout_secs),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }
}

impl LlmBackend for ClaudeCliBackend {
    #[instrument(skip_all, fields(max_turns = request.max_turns, timeout_secs = self.timeout.as_secs()))]
    fn run(&self, request: &LlmRequest) -> Result<LlmResponse, BackendError> {
        info!(workdir = %request.workdir.display(), "invoking assistant CLI");
        let mut cmd = Command::new(&self.command);
        cmd.arg("-p")
            .arg("--output-format")
            .arg("json")
            .arg("--max-turns")
            .arg(request.max_turns.to_string());
        if !request.allowed_tools.is_empty() {
            cmd.arg("--allowedTools")
                .arg(request.allowed_tools.join(","));
        }
        if let Some(model) = request.model.as_ref().or(self.default_model.as_ref()) {
            cmd.arg("--model").arg(model);
        }
        cmd.current_dir(&request.workdir);

        let output = run_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .map_err(|err| BackendError::Invocation(format!("{err:#}")))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "assistant CLI timed out");
            return Err(BackendError::Timeout {
                secs: self.timeout.as_secs(),
            });
        }
        if !output.status.success() {
            // The CLI reports max-turn exhaustion as JSON on stdout with a
            // non-zero exit; prefer that over the bare exit status.
            parse_cli_output(&output.stdout_text())?;
            return Err(BackendError::Invocation(format!(
                "exit status {:?}: {}",
                output.status.code(),
                output.diagnostic()
            )));
        }
        let response = parse_cli_output(&output.stdout_text())?;
        debug!(cost_usd = response.total_cost_usd, "assistant CLI finished");
        Ok(response)
    }
}

#[derive(Debug, Deserialize)]
struct CliResult {
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    is_error: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    total_cost_usd: f64,
}

/// Parse the CLI's `--output-format json` result object.
pub fn parse_cli_output(stdout: &str) -> Result<LlmResponse, BackendError> {
    let parsed: CliResult = serde_json::from_str(stdout.trim())
        .map_err(|err| BackendError::Invocation(format!("unparseable CLI output: {err}")))?;
    let subtype = parsed.subtype.unwrap_or_else(|| "success".to_string());
    if parsed.is_error || subtype != "success" {
        let detail = parsed.result.unwrap_or_default();
        return Err(BackendError::Invocation(
            format!("assistant stopped with {subtype} {detail}")
                .trim()
                .to_string(),
        ));
    }
    Ok(LlmResponse {
        text: parsed.result.unwrap_or_default(),
        total_cost_usd: parsed.total_cost_usd,
    })
}

//! Orchestrator configuration stored under `.swarm/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::types::Scores;

/// Orchestrator configuration (TOML).
///
/// Edited by humans; missing fields default to the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SwarmConfig {
    /// Split the issue instead of retrying when the coder times out.
    pub auto_split_on_timeout: bool,

    /// Resolve undefined names and retry with an import hint.
    pub auto_fix_import_errors: bool,

    pub spec_debate: SpecDebateConfig,
    pub sessions: SessionsConfig,
    pub complexity: ComplexityConfig,
    pub backend: BackendConfig,
    pub events: EventsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpecDebateConfig {
    pub max_rounds: u32,
    /// Repeated rejections in one round that count as a deadlock.
    pub disagreement_threshold: usize,
    /// Total critic attempts per round, including the first.
    pub critic_max_attempts: u32,
    /// Rubric dimension to minimum passing score.
    pub rubric_thresholds: Scores,
}

impl Default for SpecDebateConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            disagreement_threshold: 2,
            critic_max_attempts: 3,
            rubric_thresholds: [
                ("architecture", 0.8),
                ("clarity", 0.8),
                ("coverage", 0.8),
                ("risk", 0.7),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionsConfig {
    pub max_implementation_retries: u32,
    /// Turn budget handed to the coder; reported by the complexity gate.
    pub coder_max_turns: u32,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_implementation_retries: 3,
            coder_max_turns: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ComplexityConfig {
    /// Cheap model for borderline estimates. Unset means formula only.
    pub model: Option<String>,
    pub max_turns: u32,
}

impl Default for ComplexityConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_turns: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackendConfig {
    /// Assistant CLI binary.
    pub command: String,
    pub model: Option<String>,
    pub timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            model: None,
            timeout_secs: 300,
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EventsConfig {
    pub persist: bool,
    /// Relative paths resolve against the repository root.
    pub dir: PathBuf,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            persist: true,
            dir: PathBuf::from(".swarm/events"),
        }
    }
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            auto_split_on_timeout: true,
            auto_fix_import_errors: true,
            spec_debate: SpecDebateConfig::default(),
            sessions: SessionsConfig::default(),
            complexity: ComplexityConfig::default(),
            backend: BackendConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

impl SwarmConfig {
    pub fn validate(&self) -> Result<()> {
        if self.spec_debate.max_rounds == 0 {
            return Err(anyhow!("spec_debate.max_rounds must be > 0"));
        }
        if self.spec_debate.critic_max_attempts == 0 {
            return Err(anyhow!("spec_debate.critic_max_attempts must be > 0"));
        }
        for (dim, threshold) in &self.spec_debate.rubric_thresholds {
            if !(0.0..=1.0).contains(threshold) {
                return Err(anyhow!(
                    "spec_debate.rubric_thresholds.{dim} must be within [0, 1], got {threshold}"
                ));
            }
        }
        if self.sessions.max_implementation_retries == 0 {
            return Err(anyhow!("sessions.max_implementation_retries must be > 0"));
        }
        if self.sessions.coder_max_turns == 0 {
            return Err(anyhow!("sessions.coder_max_turns must be > 0"));
        }
        if self.backend.timeout_secs == 0 {
            return Err(anyhow!("backend.timeout_secs must be > 0"));
        }
        if self.backend.output_limit_bytes == 0 {
            return Err(anyhow!("backend.output_limit_bytes must be > 0"));
        }
        if self.backend.command.trim().is_empty() {
            return Err(anyhow!("backend.command must be non-empty"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `SwarmConfig::default()`.
pub fn load_config(path: &Path) -> Result<SwarmConfig> {
    if !path.exists() {
        let cfg = SwarmConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: SwarmConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &SwarmConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

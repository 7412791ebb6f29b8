//! Per-attempt records under `.swarm/sessions/<feature>/<issue>/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one coder/verifier cycle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptRecord {
    pub attempt: u32,
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub coder_success: bool,
    #[serde(default)]
    pub verifier_success: Option<bool>,
    pub cost_usd: f64,
    /// Error classification when the coder call failed.
    #[serde(default)]
    pub error_kind: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// `verified`, `retry`, `retry_with_imports`, `retry_with_plan`, `split`, `block`.
    pub action: String,
    #[serde(default)]
    pub hint: Option<String>,
}

pub fn attempt_path(session_dir: &Path, attempt: u32) -> PathBuf {
    session_dir.join(format!("attempt-{attempt}.json"))
}

pub fn write_attempt(session_dir: &Path, record: &AttemptRecord) -> Result<PathBuf> {
    fs::create_dir_all(session_dir)
        .with_context(|| format!("create session dir {}", session_dir.display()))?;
    let path = attempt_path(session_dir, record.attempt);
    let mut buf = serde_json::to_string_pretty(record).context("serialize attempt record")?;
    buf.push('\n');
    fs::write(&path, buf).with_context(|| format!("write attempt {}", path.display()))?;
    Ok(path)
}

/// All attempt records in `session_dir`, ordered by attempt number.
pub fn read_attempts(session_dir: &Path) -> Result<Vec<AttemptRecord>> {
    if !session_dir.exists() {
        return Ok(Vec::new());
    }
    let mut records = Vec::new();
    for entry in fs::read_dir(session_dir)
        .with_context(|| format!("read session dir {}", session_dir.display()))?
    {
        let path = entry.context("read session dir entry")?.path();
        let is_attempt = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with("attempt-") && n.ends_with(".json"));
        if !is_attempt {
            continue;
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let record: AttemptRecord =
            serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
        records.push(record);
    }
    records.sort_by_key(|r| r.attempt);
    Ok(records)
}

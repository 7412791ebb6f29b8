//! Per-feature persisted state (`.swarm/state/<feature>.json`).
//!
//! Only the orchestrator writes here. Agents never see this store.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::core::types::{FeaturePhase, TaskStage};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureState {
    pub feature_id: String,
    #[serde(default)]
    pub phase: FeaturePhase,
    /// Accumulated USD cost keyed by phase name (`spec_debate`, `implementation`, ...).
    #[serde(default)]
    pub cost_by_phase: BTreeMap<String, f64>,
    /// Implementation tasks keyed by issue number.
    #[serde(default)]
    pub tasks: BTreeMap<u64, TaskRecord>,
    #[serde(default)]
    pub sessions: Vec<SessionRecord>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl FeatureState {
    pub fn new(feature_id: impl Into<String>) -> Self {
        Self {
            feature_id: feature_id.into(),
            phase: FeaturePhase::default(),
            cost_by_phase: BTreeMap::new(),
            tasks: BTreeMap::new(),
            sessions: Vec::new(),
            updated_at: None,
        }
    }

    pub fn total_cost(&self) -> f64 {
        self.cost_by_phase.values().sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TaskRecord {
    pub stage: TaskStage,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub commit: Option<String>,
    #[serde(default)]
    pub sub_issues: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionRecord {
    pub session_id: String,
    pub issue_number: u64,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, feature_id: &str) -> PathBuf {
        self.dir.join(format!("{feature_id}.json"))
    }

    /// Load a feature's state. Missing or corrupt files yield `None`.
    pub fn load(&self, feature_id: &str) -> Result<Option<FeatureState>> {
        let path = self.path_for(feature_id);
        if !path.exists() {
            return Ok(None);
        }
        let contents =
            fs::read_to_string(&path).with_context(|| format!("read state {}", path.display()))?;
        match serde_json::from_str::<FeatureState>(&contents) {
            Ok(state) => Ok(Some(state)),
            Err(err) => {
                warn!(path = %path.display(), err = %err, "ignoring malformed feature state");
                Ok(None)
            }
        }
    }

    /// Atomically write state (temp file + rename).
    pub fn save(&self, state: &mut FeatureState) -> Result<()> {
        state.updated_at = Some(Utc::now());
        let path = self.path_for(&state.feature_id);
        debug!(path = %path.display(), phase = ?state.phase, "writing feature state");
        let mut buf = serde_json::to_string_pretty(state).context("serialize feature state")?;
        buf.push('\n');
        super::write_atomic(&path, &buf)
    }

    /// Read-modify-write helper.
    pub fn update<F>(&self, feature_id: &str, apply: F) -> Result<FeatureState>
    where
        F: FnOnce(&mut FeatureState),
    {
        let mut state = match self.load(feature_id)? {
            Some(state) => state,
            None => {
                self.set_aside_corrupt(feature_id)?;
                FeatureState::new(feature_id)
            }
        };
        apply(&mut state);
        self.save(&mut state)?;
        Ok(state)
    }

    /// Rename an unreadable state file to `<feature>.json.corrupt-<timestamp>`
    /// so a fresh state never overwrites it.
    fn set_aside_corrupt(&self, feature_id: &str) -> Result<()> {
        let path = self.path_for(feature_id);
        if !path.exists() {
            return Ok(());
        }
        let mut name = path
            .file_name()
            .with_context(|| format!("state path missing file name {}", path.display()))?
            .to_os_string();
        name.push(format!(".corrupt-{}", Utc::now().format("%Y%m%dT%H%M%S%.f")));
        let aside = path.with_file_name(name);
        fs::rename(&path, &aside)
            .with_context(|| format!("move corrupt state {} aside", path.display()))?;
        warn!(from = %path.display(), to = %aside.display(), "kept corrupt feature state aside");
        Ok(())
    }

    pub fn set_phase(&self, feature_id: &str, phase: FeaturePhase) -> Result<()> {
        self.update(feature_id, |s| s.phase = phase).map(drop)
    }

    pub fn add_cost(&self, feature_id: &str, phase_name: &str, cost_usd: f64) -> Result<()> {
        if cost_usd == 0.0 {
            return Ok(());
        }
        self.update(feature_id, |s| {
            *s.cost_by_phase.entry(phase_name.to_string()).or_default() += cost_usd;
        })
        .map(drop)
    }

    pub fn update_task<F>(&self, feature_id: &str, issue_number: u64, apply: F) -> Result<()>
    where
        F: FnOnce(&mut TaskRecord),
    {
        self.update(feature_id, |s| apply(s.tasks.entry(issue_number).or_default()))
            .map(drop)
    }

    pub fn set_task_stage(&self, feature_id: &str, issue_number: u64, stage: TaskStage) -> Result<()> {
        self.update_task(feature_id, issue_number, |t| t.stage = stage)
    }

    pub fn task_stage(&self, feature_id: &str, issue_number: u64) -> Result<Option<TaskStage>> {
        Ok(self
            .load(feature_id)?
            .and_then(|s| s.tasks.get(&issue_number).map(|t| t.stage)))
    }

    /// Record a new session and return its id.
    pub fn start_session(&self, feature_id: &str, issue_number: u64) -> Result<String> {
        let session_id = Uuid::new_v4().to_string();
        let record = SessionRecord {
            session_id: session_id.clone(),
            issue_number,
            started_at: Utc::now(),
            ended_at: None,
            status: None,
        };
        self.update(feature_id, |s| s.sessions.push(record))?;
        Ok(session_id)
    }

    pub fn end_session(&self, feature_id: &str, session_id: &str, status: &str) -> Result<()> {
        self.update(feature_id, |s| {
            if let Some(record) = s
                .sessions
                .iter_mut()
                .find(|r| r.session_id == session_id)
            {
                record.ended_at = Some(Utc::now());
                record.status = Some(status.to_string());
            }
        })
        .map(drop)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_state_is_none() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path());
        assert!(store.load("auth").expect("load").is_none());
    }

    #[test]
    fn phase_cost_and_tasks_persist() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path());
        store
            .set_phase("auth", FeaturePhase::SpecInProgress)
            .expect("phase");
        store.add_cost("auth", "spec_debate", 0.25).expect("cost");
        store.add_cost("auth", "spec_debate", 0.5).expect("cost");
        store
            .set_task_stage("auth", 7, TaskStage::Done)
            .expect("stage");

        let state = store.load("auth").expect("load").expect("present");
        assert_eq!(state.phase, FeaturePhase::SpecInProgress);
        assert_eq!(state.cost_by_phase["spec_debate"], 0.75);
        assert_eq!(state.tasks[&7].stage, TaskStage::Done);
        assert_eq!(
            store.task_stage("auth", 7).expect("stage"),
            Some(TaskStage::Done)
        );
    }

    #[test]
    fn corrupt_state_is_treated_as_absent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path());
        fs::write(store.path_for("auth"), "{ not json").expect("write");
        assert!(store.load("auth").expect("load").is_none());
    }

    #[test]
    fn writing_over_corrupt_state_keeps_the_old_file() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path());
        fs::write(store.path_for("auth"), "{ not json").expect("write");

        store
            .set_phase("auth", FeaturePhase::Implementing)
            .expect("phase");

        let state = store.load("auth").expect("load").expect("present");
        assert_eq!(state.phase, FeaturePhase::Implementing);
        let kept: Vec<String> = fs::read_dir(temp.path())
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with("auth.json.corrupt-"))
            .collect();
        assert_eq!(kept.len(), 1);
        let original = fs::read_to_string(temp.path().join(&kept[0])).expect("read aside");
        assert_eq!(original, "{ not json");
    }

    #[test]
    fn sessions_open_and_close() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = StateStore::new(temp.path());
        let id = store.start_session("auth", 3).expect("start");
        store.end_session("auth", &id, "success").expect("end");
        let state = store.load("auth").expect("load").expect("present");
        assert_eq!(state.sessions.len(), 1);
        assert_eq!(state.sessions[0].status.as_deref(), Some("success"));
        assert!(state.sessions[0].ended_at.is_some());
    }
}

//! `.swarm/` layout and scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::io::config::{SwarmConfig, write_config};

const SWARM_GITIGNORE: &str = "locks/\nsessions/\nevents/\n";

/// Canonical paths within `.swarm/` for a project root.
#[derive(Debug, Clone)]
pub struct SwarmPaths {
    pub root: PathBuf,
    pub swarm_dir: PathBuf,
    pub config_path: PathBuf,
    pub state_dir: PathBuf,
    pub specs_dir: PathBuf,
    pub locks_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub gitignore_path: PathBuf,
}

impl SwarmPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let swarm_dir = root.join(".swarm");
        Self {
            root: root.clone(),
            config_path: swarm_dir.join("config.toml"),
            state_dir: swarm_dir.join("state"),
            specs_dir: swarm_dir.join("specs"),
            locks_dir: swarm_dir.join("locks"),
            sessions_dir: swarm_dir.join("sessions"),
            gitignore_path: swarm_dir.join(".gitignore"),
            swarm_dir,
        }
    }

    pub fn spec_dir(&self, feature_id: &str) -> PathBuf {
        self.specs_dir.join(feature_id)
    }

    pub fn spec_draft_path(&self, feature_id: &str) -> PathBuf {
        self.spec_dir(feature_id).join("spec-draft.md")
    }

    pub fn round_path(&self, feature_id: &str, round: u32) -> PathBuf {
        self.spec_dir(feature_id)
            .join("rounds")
            .join(format!("{round}.json"))
    }

    pub fn issue_session_dir(&self, feature_id: &str, issue_number: u64) -> PathBuf {
        self.sessions_dir
            .join(feature_id)
            .join(issue_number.to_string())
    }
}

/// Create `.swarm/` scaffolding with a default config.
///
/// Fails if `.swarm/` already exists unless `force` is set.
pub fn init_swarm(root: &Path, force: bool) -> Result<SwarmPaths> {
    let paths = SwarmPaths::new(root);
    if paths.swarm_dir.exists() && !paths.swarm_dir.is_dir() {
        return Err(anyhow!("swarm init: .swarm exists but is not a directory"));
    }
    if paths.swarm_dir.exists() && !force {
        return Err(anyhow!(
            "swarm init: .swarm already exists (use --force to overwrite)"
        ));
    }
    for dir in [
        &paths.swarm_dir,
        &paths.state_dir,
        &paths.specs_dir,
        &paths.locks_dir,
        &paths.sessions_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }
    fs::write(&paths.gitignore_path, SWARM_GITIGNORE)
        .with_context(|| format!("write {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &SwarmConfig::default())?;
    Ok(paths)
}

//! Exclusive issue claims backed by lock files.
//!
//! A claim is a file created with `create_new`, so at most one session per
//! `(feature_id, issue_number)` can hold it. Claims never wait.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum LockError {
    #[error("issue #{issue_number} of {feature_id} is already claimed by session {holder}")]
    AlreadyClaimed {
        feature_id: String,
        issue_number: u64,
        holder: String,
    },
    #[error(transparent)]
    Io(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockInfo {
    pub session_id: String,
    pub claimed_at: String,
    pub pid: u32,
}

#[derive(Debug, Clone)]
pub struct LockManager {
    dir: PathBuf,
}

impl LockManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn lock_path(&self, feature_id: &str, issue_number: u64) -> PathBuf {
        self.dir.join(format!("{feature_id}-{issue_number}.lock"))
    }

    /// Claim the issue for `session_id`, failing immediately if already held.
    pub fn claim(
        &self,
        feature_id: &str,
        issue_number: u64,
        session_id: &str,
    ) -> Result<(), LockError> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create lock dir {}", self.dir.display()))?;
        let path = self.lock_path(feature_id, issue_number);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                let holder = self
                    .holder(feature_id, issue_number)
                    .map(|info| info.session_id)
                    .unwrap_or_else(|| "unknown".to_string());
                return Err(LockError::AlreadyClaimed {
                    feature_id: feature_id.to_string(),
                    issue_number,
                    holder,
                });
            }
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("create lock {}", path.display()))
                    .into());
            }
        };
        let info = LockInfo {
            session_id: session_id.to_string(),
            claimed_at: Utc::now().to_rfc3339(),
            pid: std::process::id(),
        };
        let body = serde_json::to_string(&info).context("serialize lock info")?;
        file.write_all(body.as_bytes())
            .with_context(|| format!("write lock {}", path.display()))?;
        debug!(path = %path.display(), session_id, "issue claimed");
        Ok(())
    }

    /// Release the claim. Releasing an unclaimed issue is a no-op.
    pub fn release(&self, feature_id: &str, issue_number: u64) -> anyhow::Result<bool> {
        let path = self.lock_path(feature_id, issue_number);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(path = %path.display(), "issue released");
                Ok(true)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("remove lock {}", path.display())),
        }
    }

    pub fn is_claimed(&self, feature_id: &str, issue_number: u64) -> bool {
        self.lock_path(feature_id, issue_number).exists()
    }

    pub fn holder(&self, feature_id: &str, issue_number: u64) -> Option<LockInfo> {
        let path = self.lock_path(feature_id, issue_number);
        let contents = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(info) => Some(info),
            Err(err) => {
                warn!(path = %path.display(), err = %err, "unreadable lock file");
                None
            }
        }
    }
}

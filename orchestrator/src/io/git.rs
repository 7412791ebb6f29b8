//! Source control for implementation sessions.
//!
//! Sessions only need two things from git: a feature branch to work on and a
//! commit at the end. [`SourceControl`] keeps that seam narrow so tests can
//! record calls instead of touching a repository.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

pub trait SourceControl {
    /// Make sure `branch` exists and is checked out.
    fn ensure_branch(&self, branch: &str) -> Result<()>;
    /// Stage everything and commit. Returns the short SHA, or `None` when
    /// there was nothing to commit.
    fn commit_all(&self, message: &str) -> Result<Option<String>>;
}

/// Branch implementation sessions for `feature_id` work on.
pub fn feature_branch(feature_id: &str) -> String {
    format!("feature/{feature_id}")
}

/// Commit message for a finished issue.
pub fn commit_message(feature_id: &str, summary: &str, issue_number: u64) -> String {
    format!("feat({feature_id}): {} (#{issue_number})", summary.trim())
}

/// `git` subprocess wrapper bound to a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn current_branch(&self) -> Result<String> {
        let out = self.capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let reference = format!("refs/heads/{branch}");
        Ok(self
            .run(&["show-ref", "--verify", "--quiet", &reference])?
            .status
            .success())
    }

    fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    fn capture(&self, args: &[&str]) -> Result<String> {
        let output = self.checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl SourceControl for Git {
    #[instrument(skip_all, fields(branch = %branch))]
    fn ensure_branch(&self, branch: &str) -> Result<()> {
        if self.current_branch().ok().as_deref() == Some(branch) {
            return Ok(());
        }
        if self.branch_exists(branch)? {
            debug!("checking out existing branch");
            self.checked(&["checkout", branch])?;
        } else {
            debug!("creating branch");
            self.checked(&["checkout", "-b", branch])?;
        }
        Ok(())
    }

    #[instrument(skip_all)]
    fn commit_all(&self, message: &str) -> Result<Option<String>> {
        self.checked(&["add", "-A"])?;
        if !self.has_staged_changes()? {
            debug!("nothing staged, skipping commit");
            return Ok(None);
        }
        self.checked(&["commit", "-m", message])?;
        let sha = self.capture(&["rev-parse", "--short=12", "HEAD"])?;
        Ok(Some(sha.trim().to_string()))
    }
}

//! External issue tracker.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument};

use crate::core::types::Issue;

pub trait IssueTracker {
    fn fetch_issue(&self, number: u64) -> Result<Issue>;
    /// Comment on the issue and close it.
    fn close_issue(&self, number: u64, comment: &str) -> Result<()>;
    /// File a new issue and return its number.
    fn create_issue(&self, title: &str, body: &str) -> Result<u64>;
}

/// Tracker backed by the GitHub CLI.
#[derive(Debug, Clone)]
pub struct GhTracker {
    workdir: PathBuf,
}

impl GhTracker {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    fn gh(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("gh")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn gh {}", args.first().unwrap_or(&"")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "gh {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl IssueTracker for GhTracker {
    #[instrument(skip_all, fields(number = number))]
    fn fetch_issue(&self, number: u64) -> Result<Issue> {
        let out = self.gh(&[
            "issue",
            "view",
            &number.to_string(),
            "--json",
            "number,title,body",
        ])?;
        serde_json::from_str(&out).with_context(|| format!("parse gh issue #{number}"))
    }

    #[instrument(skip_all, fields(number = number))]
    fn close_issue(&self, number: u64, comment: &str) -> Result<()> {
        self.gh(&["issue", "close", &number.to_string(), "--comment", comment])?;
        debug!("issue closed");
        Ok(())
    }

    #[instrument(skip_all)]
    fn create_issue(&self, title: &str, body: &str) -> Result<u64> {
        let out = self.gh(&["issue", "create", "--title", title, "--body", body])?;
        parse_created_issue_number(&out)
    }
}

/// `gh issue create` prints the new issue URL; its last path segment is the number.
pub fn parse_created_issue_number(stdout: &str) -> Result<u64> {
    let url = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| anyhow!("gh issue create printed nothing"))?;
    url.rsplit('/')
        .next()
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| anyhow!("unexpected gh issue create output: {url}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_issue_number_from_url() {
        let out = "Creating issue in acme/app\n\nhttps://github.com/acme/app/issues/123\n";
        assert_eq!(parse_created_issue_number(out).expect("parse"), 123);
        assert!(parse_created_issue_number("").is_err());
        assert!(parse_created_issue_number("https://github.com/acme/app/pull/x").is_err());
    }
}

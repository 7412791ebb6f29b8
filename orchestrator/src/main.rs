//! `swarm`: multi-agent TDD orchestration CLI.
//!
//! Project state lives under `.swarm/` in the current directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;

use swarm_orchestrator::core::classifier::{classify_error, extract_undefined_names, should_auto_split};
use swarm_orchestrator::core::events::{EventQuery, EventType};
use swarm_orchestrator::core::types::{Issue, IssueSessionStatus, PipelineStatus};
use swarm_orchestrator::exit_codes;
use swarm_orchestrator::gate::estimate_complexity;
use swarm_orchestrator::io::config::load_config;
use swarm_orchestrator::io::event_bus::query_events;
use swarm_orchestrator::io::init::{SwarmPaths, init_swarm};
use swarm_orchestrator::io::locks::LockManager;
use swarm_orchestrator::logging;
use swarm_orchestrator::orchestrator::Orchestrator;

#[derive(Parser)]
#[command(
    name = "swarm",
    version,
    about = "Multi-agent TDD orchestration: spec debate and test-first issue sessions"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.swarm/` with a default config.
    Init {
        /// Overwrite the existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run the spec debate for a feature from its PRD.
    Debate {
        feature: String,
        /// Markdown PRD the author drafts from.
        #[arg(long)]
        prd: PathBuf,
    },
    /// Implement one tracker issue test-first.
    Implement { feature: String, issue: u64 },
    /// Estimate an issue body offline (no estimator call).
    Gate {
        /// Markdown file holding the issue body.
        issue_file: PathBuf,
        #[arg(long, default_value = "issue")]
        title: String,
    },
    /// Classify an error message the way the retry loop does.
    Classify { text: String },
    /// Print persisted events as JSON lines, newest log first.
    Events {
        #[arg(long)]
        feature: Option<String>,
        /// Event type filter, repeatable (e.g. ISSUE_DONE).
        #[arg(long = "type")]
        types: Vec<String>,
        /// RFC 3339 timestamp.
        #[arg(long)]
        since: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Force-release a stale issue claim.
    Unlock { feature: String, issue: u64 },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Debate { feature, prd } => cmd_debate(&root, &feature, &prd),
        Command::Implement { feature, issue } => cmd_implement(&root, &feature, issue),
        Command::Gate { issue_file, title } => cmd_gate(&issue_file, title),
        Command::Classify { text } => cmd_classify(&text),
        Command::Events {
            feature,
            types,
            since,
            limit,
        } => cmd_events(&root, feature, &types, since.as_deref(), limit),
        Command::Unlock { feature, issue } => cmd_unlock(&root, &feature, issue),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_swarm(root, force)?;
    println!("initialized {}", paths.swarm_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_debate(root: &Path, feature: &str, prd: &Path) -> Result<i32> {
    let prd = fs::read_to_string(prd).with_context(|| format!("read {}", prd.display()))?;
    let mut orchestrator = Orchestrator::for_project(root)?;
    let result = orchestrator.run_spec_pipeline(feature, &prd)?;
    print_json(&result)?;
    Ok(match result.status {
        PipelineStatus::Success => exit_codes::OK,
        PipelineStatus::Stalemate | PipelineStatus::Timeout => exit_codes::BLOCKED,
        PipelineStatus::Failure => exit_codes::FAILED,
    })
}

fn cmd_implement(root: &Path, feature: &str, issue: u64) -> Result<i32> {
    let orchestrator = Orchestrator::for_project(root)?;
    let result = orchestrator.implement_issue(feature, issue);
    print_json(&result)?;
    Ok(match result.status {
        IssueSessionStatus::Success => exit_codes::OK,
        IssueSessionStatus::Blocked => exit_codes::BLOCKED,
        IssueSessionStatus::Failed => exit_codes::FAILED,
    })
}

fn cmd_gate(issue_file: &Path, title: String) -> Result<i32> {
    let body = fs::read_to_string(issue_file)
        .with_context(|| format!("read {}", issue_file.display()))?;
    let issue = Issue {
        number: 0,
        title,
        body,
    };
    let (estimate, _) = estimate_complexity("cli", &issue, None);
    print_json(&estimate)?;
    Ok(if estimate.needs_split {
        exit_codes::NEEDS_SPLIT
    } else {
        exit_codes::OK
    })
}

#[derive(Serialize)]
struct Classification<'a> {
    kind: &'a str,
    auto_split: bool,
    undefined_names: Vec<String>,
}

fn cmd_classify(text: &str) -> Result<i32> {
    print_json(&Classification {
        kind: classify_error(text).as_str(),
        auto_split: should_auto_split(text),
        undefined_names: extract_undefined_names(text),
    })?;
    Ok(exit_codes::OK)
}

fn cmd_events(
    root: &Path,
    feature: Option<String>,
    types: &[String],
    since: Option<&str>,
    limit: Option<usize>,
) -> Result<i32> {
    let paths = SwarmPaths::new(root);
    let config = load_config(&paths.config_path)?;
    let event_types = types
        .iter()
        .map(|name| EventType::parse(name).ok_or_else(|| anyhow!("unknown event type `{name}`")))
        .collect::<Result<Vec<_>>>()?;
    let since = since
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .with_context(|| format!("parse --since `{raw}`"))
        })
        .transpose()?;
    let query = EventQuery {
        feature_id: feature,
        event_types,
        since,
        limit,
    };
    for event in query_events(&root.join(&config.events.dir), &query)? {
        println!("{}", serde_json::to_string(&event).context("serialize event")?);
    }
    Ok(exit_codes::OK)
}

fn cmd_unlock(root: &Path, feature: &str, issue: u64) -> Result<i32> {
    let locks = LockManager::new(SwarmPaths::new(root).locks_dir);
    if let Some(holder) = locks.holder(feature, issue) {
        eprintln!(
            "releasing claim held by session {} (pid {}, since {})",
            holder.session_id, holder.pid, holder.claimed_at
        );
    }
    if locks.release(feature, issue)? {
        println!("released {feature}#{issue}");
    } else {
        println!("{feature}#{issue} was not claimed");
    }
    Ok(exit_codes::OK)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serialize output")?
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_force() {
        let cli = Cli::try_parse_from(["swarm", "init", "--force"]).expect("parse");
        assert!(matches!(cli.command, Command::Init { force: true }));
    }

    #[test]
    fn parse_events_filters() {
        let cli = Cli::try_parse_from([
            "swarm",
            "events",
            "--feature",
            "auth",
            "--type",
            "ISSUE_DONE",
            "--type",
            "issue_blocked",
            "--limit",
            "5",
        ])
        .expect("parse");
        let Command::Events {
            feature,
            types,
            limit,
            since,
        } = cli.command
        else {
            panic!("expected events command");
        };
        assert_eq!(feature.as_deref(), Some("auth"));
        assert_eq!(types, vec!["ISSUE_DONE", "issue_blocked"]);
        assert_eq!(limit, Some(5));
        assert!(since.is_none());
    }

    #[test]
    fn parse_implement_requires_issue_number() {
        assert!(Cli::try_parse_from(["swarm", "implement", "auth"]).is_err());
        let cli = Cli::try_parse_from(["swarm", "implement", "auth", "12"]).expect("parse");
        assert!(matches!(cli.command, Command::Implement { issue: 12, .. }));
    }
}

//! Issue implementation sessions.
//!
//! One session claims an issue, runs the complexity gate, writes tests once,
//! then loops coder → verifier until the tests pass or the retry budget runs
//! out. Coder failures are classified and routed (split, import fix,
//! recovery plan or plain retry); verifier failures feed the failing tests
//! into the next coder prompt.
//!
//! The claim is released on every exit path, including errors and panics.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::core::classifier::ErrorKind;
use crate::core::events::EventType;
use crate::core::recovery::{
    FailureRoute, RecoveryVerdict, build_import_hint, format_test_failures, most_specific_error,
    parse_recovery_verdict, regressions, resolve_imports, route_coder_failure, unresolved_names,
};
use crate::core::split::{SplitReason, plan_split, synthesize_timeout_estimate};
use crate::core::types::{
    AgentContext, ComplexityEstimate, FeaturePhase, Issue, IssueSessionResult,
    IssueSessionStatus, SessionAction, TaskStage,
};
use crate::io::attempt_log::{AttemptRecord, write_attempt};
use crate::io::git::{commit_message, feature_branch};
use crate::io::locks::LockManager;
use crate::orchestrator::{Orchestrator, object};

/// Releases an issue claim when dropped.
struct Claim<'a> {
    locks: &'a LockManager,
    feature_id: &'a str,
    issue_number: u64,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.locks.release(self.feature_id, self.issue_number) {
            warn!(err = %format!("{err:#}"), "failed to release issue claim");
        }
    }
}

/// Mutable session totals, kept outside the fallible body so errors keep them.
struct SessionRun {
    feature_id: String,
    session_id: String,
    session_dir: PathBuf,
    result: IssueSessionResult,
}

/// Why the retry loop stopped without verified tests.
#[derive(Debug, Default)]
struct BlockedDetail {
    regressions: Vec<String>,
    recovery_explanation: Option<String>,
    unresolved: Vec<String>,
}

impl Orchestrator {
    /// Implement one issue end to end. Never returns with the issue claimed.
    #[instrument(skip_all, fields(feature_id = %feature_id, issue = issue_number))]
    pub fn implement_issue(&self, feature_id: &str, issue_number: u64) -> IssueSessionResult {
        let session_id = match self.state.start_session(feature_id, issue_number) {
            Ok(id) => id,
            Err(err) => {
                let mut result = IssueSessionResult::new(IssueSessionStatus::Failed, issue_number);
                result.error = Some(format!("{err:#}"));
                return result;
            }
        };

        if let Err(err) = self.locks.claim(feature_id, issue_number, &session_id) {
            warn!(error = %err, "issue claim refused");
            let mut result = IssueSessionResult::new(IssueSessionStatus::Failed, issue_number);
            result.error = Some(err.to_string());
            self.close_session(feature_id, &session_id, &result);
            return result;
        }
        let claim = Claim {
            locks: &self.locks,
            feature_id,
            issue_number,
        };

        let mut run = SessionRun {
            feature_id: feature_id.to_string(),
            session_id,
            session_dir: self.paths.issue_session_dir(feature_id, issue_number),
            result: IssueSessionResult::new(IssueSessionStatus::Failed, issue_number),
        };
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.run_claimed(feature_id, issue_number, &mut run)
        }));
        let aborted = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(format!("{err:#}")),
            Err(panic) => Some(format!("session panicked: {}", panic_message(panic.as_ref()))),
        };
        if let Some(message) = aborted {
            warn!(error = %message, "session aborted");
            run.result.status = IssueSessionStatus::Failed;
            run.result.action = None;
            run.result.error = Some(message.clone());
            if let Err(err) = self.state.update_task(feature_id, issue_number, |task| {
                task.stage = TaskStage::Blocked;
                task.error = Some(message.clone());
            }) {
                warn!(err = %format!("{err:#}"), "failed to record aborted task");
            }
            if let Err(err) = self.emit(
                EventType::IssueFailed,
                feature_id,
                Some(issue_number),
                json!({"error": message}),
            ) {
                warn!(err = %format!("{err:#}"), "failed to emit ISSUE_FAILED");
            }
        }
        drop(claim);

        self.close_session(feature_id, &run.session_id, &run.result);
        if let Err(err) = self
            .state
            .add_cost(feature_id, "implementation", run.result.cost_usd)
        {
            warn!(err = %format!("{err:#}"), "failed to record session cost");
        }
        info!(
            status = ?run.result.status,
            retries = run.result.retries,
            cost_usd = run.result.cost_usd,
            "issue session finished"
        );
        run.result
    }

    fn close_session(&self, feature_id: &str, session_id: &str, result: &IssueSessionResult) {
        let status = match result.status {
            IssueSessionStatus::Success => "success",
            IssueSessionStatus::Failed => "failed",
            IssueSessionStatus::Blocked => "blocked",
        };
        if let Err(err) = self.state.end_session(feature_id, session_id, status) {
            warn!(err = %format!("{err:#}"), "failed to end session");
        }
    }

    fn run_claimed(&self, feature_id: &str, issue_number: u64, run: &mut SessionRun) -> Result<()> {
        self.emit(
            EventType::IssueClaimed,
            feature_id,
            Some(issue_number),
            json!({"session_id": run.session_id}),
        )?;
        self.state.set_phase(feature_id, FeaturePhase::Implementing)?;
        self.state
            .set_task_stage(feature_id, issue_number, TaskStage::InProgress)?;

        let issue = self
            .tracker
            .fetch_issue(issue_number)
            .with_context(|| format!("fetch issue #{issue_number}"))?;

        let (estimate, gate_cost) = self.evaluate_complexity(feature_id, &issue)?;
        run.result.cost_usd += gate_cost;
        if estimate.needs_split {
            return self.split_issue(feature_id, &issue, SplitReason::Complexity, &estimate, run);
        }

        self.vcs.ensure_branch(&feature_branch(feature_id))?;

        let base = issue_context(feature_id, &issue);
        let writer = self.agents.test_writer.run(&base);
        run.result.cost_usd += writer.cost_usd();
        if !writer.is_success() {
            let error = format!("test writer failed: {}", writer.error_text());
            return self.fail(feature_id, issue_number, error, run);
        }
        run.result.tests_written = writer.output_u32("tests_written").unwrap_or(0);
        self.emit(
            EventType::IssueTestsWritten,
            feature_id,
            Some(issue_number),
            json!({"tests_written": run.result.tests_written, "cost_usd": writer.cost_usd()}),
        )?;

        self.retry_loop(feature_id, &issue, base, run)
    }

    fn retry_loop(
        &self,
        feature_id: &str,
        issue: &Issue,
        base: AgentContext,
        run: &mut SessionRun,
    ) -> Result<()> {
        let max_attempts = self.config.sessions.max_implementation_retries;
        let mut coder_context = base;
        let mut detail = BlockedDetail::default();

        for attempt in 1..=max_attempts {
            let started_at = Utc::now();
            let cost_before = run.result.cost_usd;
            detail.regressions.clear();
            if attempt > 1 {
                coder_context.insert("retry_number".into(), json!(attempt - 1));
            }

            let coder = self.agents.coder.run(&coder_context);
            run.result.cost_usd += coder.cost_usd();
            let mut record = AttemptRecord {
                attempt,
                session_id: run.session_id.clone(),
                started_at,
                ended_at: started_at,
                coder_success: coder.is_success(),
                verifier_success: None,
                cost_usd: 0.0,
                error_kind: None,
                error: None,
                action: "retry".to_string(),
                hint: None,
            };

            if !coder.is_success() {
                let error = coder.error_text();
                let (kind, route) = route_coder_failure(
                    &error,
                    self.config.auto_split_on_timeout,
                    self.config.auto_fix_import_errors,
                );
                debug!(attempt, kind = kind.as_str(), route = ?route, "coder failed");
                record.error_kind = Some(kind.as_str().to_string());
                record.error = Some(error.clone());
                for key in ["test_failures", "recovery_hint", "suggested_imports"] {
                    coder_context.remove(key);
                }

                let mut block = false;
                match route {
                    FailureRoute::Split => {
                        record.action = "split".to_string();
                        self.log_attempt(run, record, cost_before, "coder")?;
                        let estimate = synthesize_timeout_estimate(issue, &error);
                        return self.split_issue(
                            feature_id,
                            issue,
                            SplitReason::Timeout,
                            &estimate,
                            run,
                        );
                    }
                    FailureRoute::FixImports(names) => {
                        let resolutions = resolve_imports(&names, self.locator.as_deref());
                        detail.unresolved = unresolved_names(&resolutions);
                        let hint = build_import_hint(&resolutions);
                        let statements: Vec<&str> = resolutions
                            .iter()
                            .filter_map(|r| r.statement.as_deref())
                            .collect();
                        coder_context.insert("recovery_hint".into(), json!(hint));
                        coder_context.insert("suggested_imports".into(), json!(statements));
                        record.action = "retry_with_imports".to_string();
                        record.hint = Some(hint);
                    }
                    FailureRoute::Recover => match self.run_recovery(kind, &error, issue, run) {
                        Some(RecoveryVerdict::Plan(plan)) => {
                            coder_context.insert("recovery_hint".into(), json!(plan));
                            record.action = "retry_with_plan".to_string();
                            record.hint = Some(plan);
                        }
                        Some(RecoveryVerdict::Unrecoverable(explanation)) => {
                            record.action = "block".to_string();
                            record.hint = Some(explanation.clone());
                            detail.recovery_explanation = Some(explanation);
                            block = true;
                        }
                        None => {}
                    },
                    FailureRoute::Retry => {}
                }
                self.log_attempt(run, record, cost_before, "coder")?;
                run.result.retries = attempt;
                if block {
                    break;
                }
                continue;
            }

            let verifier = self.agents.verifier.run(&object(json!({
                "feature_id": feature_id,
                "issue_number": issue.number,
                "issue_title": issue.title,
                "attempt": attempt,
            })));
            run.result.cost_usd += verifier.cost_usd();
            run.result.tests_passed = verifier.output_u32("tests_passed").unwrap_or(0);
            run.result.tests_failed = verifier.output_u32("tests_failed").unwrap_or(0);
            record.verifier_success = Some(verifier.is_success());

            if verifier.is_success() {
                record.action = "verified".to_string();
                self.write_attempt_record(run, record, cost_before);
                return self.finish_success(feature_id, issue, run);
            }

            detail.regressions = regressions(verifier.output());
            coder_context.remove("recovery_hint");
            coder_context.remove("suggested_imports");
            coder_context.insert(
                "test_failures".into(),
                json!(format_test_failures(verifier.output())),
            );
            record.error = Some(verifier.error_text());
            self.log_attempt(run, record, cost_before, "verifier")?;
            run.result.retries = attempt;
        }

        self.finish_blocked(feature_id, issue.number, detail, run)
    }

    /// Ask the recovery agent for a plan. `None` means retry without guidance.
    fn run_recovery(
        &self,
        kind: ErrorKind,
        error: &str,
        issue: &Issue,
        run: &mut SessionRun,
    ) -> Option<RecoveryVerdict> {
        let agent = self.agents.recovery.as_deref()?;
        let result = agent.run(&object(json!({
            "feature_id": run.feature_id,
            "issue_number": issue.number,
            "issue_title": issue.title,
            "issue_body": issue.body,
            "error_kind": kind.as_str(),
            "error": error,
        })));
        run.result.cost_usd += result.cost_usd();
        if !result.is_success() {
            warn!(error = %result.error_text(), "recovery agent failed; retrying without a plan");
            return None;
        }
        parse_recovery_verdict(result.output())
    }

    /// Record a failed cycle on disk and on the bus.
    fn log_attempt(
        &self,
        run: &SessionRun,
        record: AttemptRecord,
        cost_before: f64,
        stage: &str,
    ) -> Result<()> {
        let payload = json!({
            "attempt": record.attempt,
            "stage": stage,
            "error_kind": record.error_kind,
            "error": record.error,
            "action": record.action,
        });
        self.write_attempt_record(run, record, cost_before);
        self.emit(
            EventType::ImplAttemptFailed,
            &run.feature_id,
            Some(run.result.issue_number),
            payload,
        )
    }

    fn write_attempt_record(&self, run: &SessionRun, mut record: AttemptRecord, cost_before: f64) {
        record.ended_at = Utc::now();
        record.cost_usd = run.result.cost_usd - cost_before;
        if let Err(err) = write_attempt(&run.session_dir, &record) {
            warn!(err = %format!("{err:#}"), attempt = record.attempt, "failed to write attempt log");
        }
    }

    /// Split `issue` into tracker sub-issues. An unsplittable issue is blocked.
    fn split_issue(
        &self,
        feature_id: &str,
        issue: &Issue,
        reason: SplitReason,
        estimate: &ComplexityEstimate,
        run: &mut SessionRun,
    ) -> Result<()> {
        run.result.suggestions = estimate.split_suggestions.clone();
        let plan = plan_split(issue, reason, estimate);
        if plan.is_empty() {
            let error = format!(
                "issue needs splitting ({}) but has no acceptance criteria or methods to partition",
                reason.as_str()
            );
            return self.block(feature_id, issue.number, error, run);
        }

        let mut numbers = Vec::with_capacity(plan.len());
        for sub in &plan {
            let number = self
                .tracker
                .create_issue(&sub.title, &sub.body)
                .with_context(|| format!("create sub-issue `{}`", sub.title))?;
            numbers.push(number);
        }
        let list = numbers
            .iter()
            .map(|n| format!("#{n}"))
            .collect::<Vec<_>>()
            .join(", ");
        self.tracker
            .close_issue(issue.number, &format!("Split into {list} ({}).", reason.as_str()))
            .with_context(|| format!("close split issue #{}", issue.number))?;

        self.state.update_task(feature_id, issue.number, |task| {
            task.stage = TaskStage::Split;
            task.sub_issues = numbers.clone();
            task.error = None;
        })?;
        self.emit(
            EventType::IssueSplit,
            feature_id,
            Some(issue.number),
            json!({"reason": reason.as_str(), "sub_issues": numbers}),
        )?;
        info!(sub_issues = numbers.len(), reason = reason.as_str(), "issue split");
        run.result.status = IssueSessionStatus::Success;
        run.result.action = Some(SessionAction::Split);
        run.result.sub_issues = numbers;
        Ok(())
    }

    fn finish_success(&self, feature_id: &str, issue: &Issue, run: &mut SessionRun) -> Result<()> {
        let message = commit_message(feature_id, &issue.title, issue.number);
        let commit = self.vcs.commit_all(&message)?;
        let comment = match &commit {
            Some(sha) => format!("Implemented in {sha} on `{}`.", feature_branch(feature_id)),
            None => format!("Implemented on `{}`.", feature_branch(feature_id)),
        };
        self.tracker
            .close_issue(issue.number, &comment)
            .with_context(|| format!("close issue #{}", issue.number))?;

        let retries = run.result.retries;
        self.state.update_task(feature_id, issue.number, |task| {
            task.stage = TaskStage::Done;
            task.retries = retries;
            task.commit = commit.clone();
            task.error = None;
        })?;
        self.emit(
            EventType::IssueDone,
            feature_id,
            Some(issue.number),
            json!({
                "commit": commit,
                "tests_passed": run.result.tests_passed,
                "retries": retries,
                "cost_usd": run.result.cost_usd,
            }),
        )?;
        run.result.status = IssueSessionStatus::Success;
        run.result.action = Some(SessionAction::Implemented);
        run.result.commits = commit.into_iter().collect();
        Ok(())
    }

    fn finish_blocked(
        &self,
        feature_id: &str,
        issue_number: u64,
        detail: BlockedDetail,
        run: &mut SessionRun,
    ) -> Result<()> {
        let error = most_specific_error(
            &detail.regressions,
            detail.recovery_explanation.as_deref(),
            &detail.unresolved,
            run.result.retries,
        );
        run.result.suggestions.extend(
            detail
                .unresolved
                .iter()
                .map(|name| format!("add the import for `{name}` by hand")),
        );
        if detail.recovery_explanation.is_some() {
            run.result
                .suggestions
                .push("review the recovery agent's explanation before retrying".to_string());
        }
        self.block(feature_id, issue_number, error, run)
    }

    fn block(
        &self,
        feature_id: &str,
        issue_number: u64,
        error: String,
        run: &mut SessionRun,
    ) -> Result<()> {
        let retries = run.result.retries;
        self.state.update_task(feature_id, issue_number, |task| {
            task.stage = TaskStage::Blocked;
            task.retries = retries;
            task.error = Some(error.clone());
        })?;
        self.emit(
            EventType::IssueBlocked,
            feature_id,
            Some(issue_number),
            json!({"error": error, "retries": retries, "suggestions": run.result.suggestions}),
        )?;
        warn!(error = %error, retries, "issue blocked");
        run.result.status = IssueSessionStatus::Blocked;
        run.result.error = Some(error);
        Ok(())
    }

    fn fail(
        &self,
        feature_id: &str,
        issue_number: u64,
        error: String,
        run: &mut SessionRun,
    ) -> Result<()> {
        self.state.update_task(feature_id, issue_number, |task| {
            task.stage = TaskStage::Blocked;
            task.error = Some(error.clone());
        })?;
        self.emit(
            EventType::IssueFailed,
            feature_id,
            Some(issue_number),
            json!({"error": error}),
        )?;
        warn!(error = %error, "issue failed");
        run.result.status = IssueSessionStatus::Failed;
        run.result.error = Some(error);
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn issue_context(feature_id: &str, issue: &Issue) -> AgentContext {
    object(json!({
        "feature_id": feature_id,
        "issue_number": issue.number,
        "issue_title": issue.title,
        "issue_body": issue.body,
    }))
}

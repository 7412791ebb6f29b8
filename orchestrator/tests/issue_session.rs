use serde_json::{Map, Value, json};
use swarm_orchestrator::core::events::EventType;
use swarm_orchestrator::core::recovery::SymbolLocator;
use swarm_orchestrator::core::types::{
    AgentResult, IssueSessionStatus, SessionAction, TaskStage,
};
use swarm_orchestrator::io::attempt_log::read_attempts;
use swarm_orchestrator::test_support::{TestHarness, fail, ok};

const FEATURE: &str = "auth";
const ISSUE: u64 = 12;

fn harness_with_issue() -> TestHarness {
    let harness = TestHarness::new();
    harness.tracker.add_issue(
        ISSUE,
        "Login flow",
        "- [ ] login works\n- [ ] logout works\nImplement `login()`",
    );
    harness
}

fn passing() -> AgentResult {
    ok(json!({"tests_passed": 3, "tests_failed": 0}))
}

fn failing(report: Value) -> AgentResult {
    let output: Map<String, Value> = match report {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    AgentResult::failure_with_output(vec!["1 test(s) failed".to_string()], output, 0.01)
}

fn task_stage(harness: &TestHarness) -> Option<TaskStage> {
    harness
        .orchestrator()
        .state()
        .task_stage(FEATURE, ISSUE)
        .expect("read task stage")
}

fn is_claimed(harness: &TestHarness) -> bool {
    harness.orchestrator().locks().is_claimed(FEATURE, ISSUE)
}

#[test]
fn passing_tests_commit_and_close_the_issue() {
    let harness = harness_with_issue();
    harness.test_writer.push(ok(json!({"tests_written": 3})));
    harness.coder.push(ok(json!({"success": true})));
    harness.verifier.push(passing());

    let result = harness.orchestrator().implement_issue(FEATURE, ISSUE);

    assert_eq!(result.status, IssueSessionStatus::Success);
    assert_eq!(result.action, Some(SessionAction::Implemented));
    assert_eq!(result.tests_written, 3);
    assert_eq!(result.tests_passed, 3);
    assert_eq!(result.retries, 0);
    assert_eq!(result.commits, vec!["c0ffee1"]);
    assert!((result.cost_usd - 0.03).abs() < 1e-9);

    assert_eq!(harness.vcs.branches(), vec!["feature/auth"]);
    assert_eq!(harness.vcs.commits(), vec!["feat(auth): Login flow (#12)"]);
    let closed = harness.tracker.closed();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].0, ISSUE);
    assert!(closed[0].1.contains("c0ffee1"));

    assert_eq!(task_stage(&harness), Some(TaskStage::Done));
    assert!(!is_claimed(&harness));
    assert_eq!(
        harness.event_types(),
        vec![
            EventType::IssueClaimed,
            EventType::IssueComplexityPassed,
            EventType::IssueTestsWritten,
            EventType::IssueDone
        ]
    );
}

#[test]
fn undefined_names_are_resolved_into_the_next_attempt() {
    let harness = harness_with_issue();
    harness.test_writer.push(ok(json!({"tests_written": 2})));
    harness
        .coder
        .push(fail("undefined name(s): typer/testing.py:CliRunner"))
        .push(ok(json!({"success": true})));
    harness.verifier.push(passing());

    let result = harness.orchestrator().implement_issue(FEATURE, ISSUE);

    assert_eq!(result.status, IssueSessionStatus::Success);
    assert_eq!(result.retries, 1);
    assert_eq!(harness.coder.calls(), 2);
    // The recovery agent is not consulted for import errors it can fix.
    assert_eq!(harness.recovery.calls(), 0);

    let retry = harness.coder.context(1);
    assert_eq!(retry["retry_number"], 1);
    assert_eq!(
        retry["suggested_imports"],
        json!(["from typer.testing import CliRunner"])
    );
    let hint = retry["recovery_hint"].as_str().expect("hint");
    assert!(hint.contains("CliRunner"), "{hint}");
    assert!(harness.coder.context(0).get("recovery_hint").is_none());

    let session_dir = harness.paths.issue_session_dir(FEATURE, ISSUE);
    let attempts = read_attempts(&session_dir).expect("attempts");
    assert_eq!(attempts.len(), 2);
    assert_eq!(attempts[0].action, "retry_with_imports");
    assert_eq!(attempts[0].error_kind.as_deref(), Some("import_error"));
    assert!(!attempts[0].coder_success);
    assert_eq!(attempts[1].action, "verified");
}

struct WidgetLocator;

impl SymbolLocator for WidgetLocator {
    fn find_definition(&self, symbol: &str) -> Option<String> {
        (symbol == "Gadget").then(|| "app.widgets".to_string())
    }

    fn find_module(&self, _symbol: &str) -> Option<String> {
        None
    }
}

#[test]
fn locator_resolves_project_symbols() {
    let harness = harness_with_issue();
    harness.test_writer.push(ok(json!({"tests_written": 2})));
    harness
        .coder
        .push(fail("undefined names: app/main.py:Gadget"))
        .push(ok(json!({"success": true})));
    harness.verifier.push(passing());

    let orchestrator = harness.orchestrator().with_locator(Box::new(WidgetLocator));
    let result = orchestrator.implement_issue(FEATURE, ISSUE);

    assert_eq!(result.status, IssueSessionStatus::Success);
    assert_eq!(
        harness.coder.context(1)["suggested_imports"],
        json!(["from app.widgets import Gadget"])
    );
}

#[test]
fn unresolved_imports_name_the_symbols_when_blocked() {
    let mut harness = harness_with_issue();
    harness.config.sessions.max_implementation_retries = 1;
    harness.test_writer.push(ok(json!({"tests_written": 2})));
    harness
        .coder
        .push(fail("undefined name(s): core/engine.py:Frobnicator"));

    let result = harness.orchestrator().implement_issue(FEATURE, ISSUE);

    assert_eq!(result.status, IssueSessionStatus::Blocked);
    assert_eq!(
        result.error.as_deref(),
        Some("max retries exceeded (1); unresolved imports: Frobnicator")
    );
    assert!(
        result
            .suggestions
            .contains(&"add the import for `Frobnicator` by hand".to_string())
    );
    assert_eq!(task_stage(&harness), Some(TaskStage::Blocked));
    assert!(!is_claimed(&harness));
    assert_eq!(
        harness.event_types().last(),
        Some(&EventType::IssueBlocked)
    );
}

#[test]
fn coder_timeout_splits_the_issue() {
    let harness = harness_with_issue();
    harness.test_writer.push(ok(json!({"tests_written": 2})));
    harness
        .coder
        .push(fail("coder timed out: no response after 300 seconds"));

    let result = harness.orchestrator().implement_issue(FEATURE, ISSUE);

    assert_eq!(result.status, IssueSessionStatus::Success);
    assert_eq!(result.action, Some(SessionAction::Split));
    assert_eq!(result.sub_issues, vec![100, 101]);
    assert_eq!(harness.coder.calls(), 1);
    assert_eq!(harness.verifier.calls(), 0);

    let created = harness.tracker.created();
    assert_eq!(created.len(), 2);
    assert_eq!(created[0].title, "Login flow (part 1/2)");
    assert_eq!(created[1].title, "Login flow (part 2/2)");
    assert!(created[0].body.contains("split from #12"));
    let closed = harness.tracker.closed();
    assert_eq!(closed[0], (ISSUE, "Split into #100, #101 (timeout).".to_string()));

    assert_eq!(task_stage(&harness), Some(TaskStage::Split));
    let types = harness.event_types();
    assert!(types.contains(&EventType::ImplAttemptFailed));
    assert_eq!(types.last(), Some(&EventType::IssueSplit));
    assert!(!is_claimed(&harness));
}

#[test]
fn timeout_retries_when_auto_split_is_off() {
    let mut harness = harness_with_issue();
    harness.config.auto_split_on_timeout = false;
    harness.test_writer.push(ok(json!({"tests_written": 2})));
    harness
        .coder
        .push(fail("coder timed out: no response after 300 seconds"))
        .push(ok(json!({"success": true})));
    harness.verifier.push(passing());

    let result = harness.orchestrator().implement_issue(FEATURE, ISSUE);

    assert_eq!(result.status, IssueSessionStatus::Success);
    assert_eq!(result.action, Some(SessionAction::Implemented));
    assert!(harness.tracker.created().is_empty());
}

#[test]
fn verifier_failures_reach_the_next_coder_prompt() {
    let harness = harness_with_issue();
    harness.test_writer.push(ok(json!({"tests_written": 2})));
    harness
        .coder
        .push(ok(json!({"success": true})))
        .push(ok(json!({"success": true})));
    harness
        .verifier
        .push(failing(json!({
            "tests_passed": 1,
            "tests_failed": 1,
            "failures": [{"test": "test_login", "message": "assert 401 == 200"}]
        })))
        .push(passing());

    let result = harness.orchestrator().implement_issue(FEATURE, ISSUE);

    assert_eq!(result.status, IssueSessionStatus::Success);
    assert_eq!(result.retries, 1);
    let retry = harness.coder.context(1);
    let failures = retry["test_failures"].as_str().expect("failures");
    assert!(failures.contains("test_login: assert 401 == 200"), "{failures}");
    assert_eq!(harness.verifier.context(1)["attempt"], 2);
}

#[test]
fn regressions_are_reported_ahead_of_the_retry_count() {
    let mut harness = harness_with_issue();
    harness.config.sessions.max_implementation_retries = 2;
    harness.test_writer.push(ok(json!({"tests_written": 2})));
    harness
        .coder
        .push(ok(json!({"success": true})))
        .push(ok(json!({"success": true})));
    harness
        .verifier
        .push(failing(json!({"tests_failed": 1, "failures": ["test_login"]})))
        .push(failing(json!({
            "tests_failed": 2,
            "failures": ["test_login", "test_signup"],
            "regressions": ["test_signup"]
        })));

    let result = harness.orchestrator().implement_issue(FEATURE, ISSUE);

    assert_eq!(result.status, IssueSessionStatus::Blocked);
    assert_eq!(result.retries, 2);
    assert_eq!(result.tests_failed, 2);
    assert_eq!(
        result.error.as_deref(),
        Some("regression detected: test_signup")
    );
    let attempts = read_attempts(&harness.paths.issue_session_dir(FEATURE, ISSUE))
        .expect("attempts");
    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().all(|a| a.verifier_success == Some(false)));
}

#[test]
fn unrecoverable_verdict_blocks_without_further_attempts() {
    let harness = harness_with_issue();
    harness.test_writer.push(ok(json!({"tests_written": 2})));
    harness
        .coder
        .push(fail("TypeError: login() takes 1 positional argument but 2 were given"));
    harness.recovery.push(ok(json!({
        "recoverable": false,
        "explanation": "the tests assume a session store that does not exist"
    })));

    let result = harness.orchestrator().implement_issue(FEATURE, ISSUE);

    assert_eq!(result.status, IssueSessionStatus::Blocked);
    assert_eq!(
        result.error.as_deref(),
        Some("recovery agent: the tests assume a session store that does not exist")
    );
    assert_eq!(harness.coder.calls(), 1);
    assert_eq!(harness.recovery.context(0)["error_kind"], "type_error");
    assert!((result.cost_usd - 0.03).abs() < 1e-9);
}

#[test]
fn recovery_plan_becomes_the_retry_hint() {
    let harness = harness_with_issue();
    harness.test_writer.push(ok(json!({"tests_written": 2})));
    harness
        .coder
        .push(fail("SyntaxError: unexpected indent"))
        .push(ok(json!({"success": true})));
    harness.recovery.push(ok(json!({
        "recoverable": true,
        "plan": "Rewrite auth/login.py from scratch with consistent indentation."
    })));
    harness.verifier.push(passing());

    let result = harness.orchestrator().implement_issue(FEATURE, ISSUE);

    assert_eq!(result.status, IssueSessionStatus::Success);
    assert_eq!(
        harness.coder.context(1)["recovery_hint"],
        "Rewrite auth/login.py from scratch with consistent indentation."
    );
    let attempts = read_attempts(&harness.paths.issue_session_dir(FEATURE, ISSUE))
        .expect("attempts");
    assert_eq!(attempts[0].action, "retry_with_plan");
}

#[test]
fn a_held_claim_refuses_a_second_session() {
    let harness = harness_with_issue();
    let orchestrator = harness.orchestrator();
    orchestrator
        .locks()
        .claim(FEATURE, ISSUE, "other-session")
        .expect("pre-claim");

    let result = orchestrator.implement_issue(FEATURE, ISSUE);

    assert_eq!(result.status, IssueSessionStatus::Failed);
    assert!(result.error.expect("error").contains("already claimed"));
    assert_eq!(harness.test_writer.calls(), 0);
    let holder = orchestrator.locks().holder(FEATURE, ISSUE).expect("holder");
    assert_eq!(holder.session_id, "other-session");
    assert!(harness.event_types().is_empty());
}

#[test]
fn test_writer_failure_fails_the_session() {
    let harness = harness_with_issue();
    harness.test_writer.push(fail("could not locate the test directory"));

    let result = harness.orchestrator().implement_issue(FEATURE, ISSUE);

    assert_eq!(result.status, IssueSessionStatus::Failed);
    assert_eq!(
        result.error.as_deref(),
        Some("test writer failed: could not locate the test directory")
    );
    assert_eq!(harness.coder.calls(), 0);
    assert_eq!(task_stage(&harness), Some(TaskStage::Blocked));
    assert_eq!(harness.event_types().last(), Some(&EventType::IssueFailed));
    assert!(!is_claimed(&harness));
}

#[test]
fn tracker_errors_abort_and_release_the_claim() {
    let harness = harness_with_issue();
    harness.tracker.fail_fetches();

    let result = harness.orchestrator().implement_issue(FEATURE, ISSUE);

    assert_eq!(result.status, IssueSessionStatus::Failed);
    let error = result.error.expect("error");
    assert!(error.contains("fetch issue #12"), "{error}");
    assert!(error.contains("tracker unavailable"), "{error}");
    assert!(!is_claimed(&harness));
    assert_eq!(
        harness.event_types(),
        vec![EventType::IssueClaimed, EventType::IssueFailed]
    );
}

#[test]
fn oversized_issue_is_split_before_any_code_is_written() {
    let harness = TestHarness::new();
    let body: String = (1..=13)
        .map(|i| format!("- [ ] requirement {i} holds\n"))
        .collect();
    harness.tracker.add_issue(ISSUE, "Everything at once", &body);

    let result = harness.orchestrator().implement_issue(FEATURE, ISSUE);

    assert_eq!(result.status, IssueSessionStatus::Success);
    assert_eq!(result.action, Some(SessionAction::Split));
    assert_eq!(result.sub_issues.len(), 4);
    assert!(!result.suggestions.is_empty());
    assert_eq!(harness.test_writer.calls(), 0);
    assert!(harness.vcs.branches().is_empty());

    let created = harness.tracker.created();
    assert_eq!(created[3].title, "Everything at once (part 4/4)");
    assert!(created[0].body.contains("requirement 1 holds"));
    assert_eq!(
        harness.event_types(),
        vec![
            EventType::IssueClaimed,
            EventType::IssueComplexityFailed,
            EventType::IssueSplit
        ]
    );
}

#[test]
fn running_out_of_turns_splits_the_issue() {
    let harness = harness_with_issue();
    harness.test_writer.push(ok(json!({"tests_written": 2})));
    harness
        .coder
        .push(fail("assistant stopped with error_max_turns after 30 turns"));

    let result = harness.orchestrator().implement_issue(FEATURE, ISSUE);

    assert_eq!(result.status, IssueSessionStatus::Success);
    assert_eq!(result.action, Some(SessionAction::Split));
    assert_eq!(result.sub_issues, vec![100, 101]);
    assert_eq!(harness.recovery.calls(), 0);
    let attempts = read_attempts(&harness.paths.issue_session_dir(FEATURE, ISSUE))
        .expect("attempts");
    assert_eq!(attempts[0].action, "split");
    assert_eq!(attempts[0].error_kind.as_deref(), Some("unknown"));
}

#[test]
fn failed_recovery_call_falls_back_to_a_plain_retry() {
    let harness = harness_with_issue();
    harness.test_writer.push(ok(json!({"tests_written": 2})));
    harness
        .coder
        .push(fail("SyntaxError: unexpected indent"))
        .push(ok(json!({"success": true})));
    harness.recovery.push(fail("recovery backend unavailable"));
    harness.verifier.push(passing());

    let result = harness.orchestrator().implement_issue(FEATURE, ISSUE);

    assert_eq!(result.status, IssueSessionStatus::Success);
    assert_eq!(result.retries, 1);
    assert_eq!(harness.recovery.calls(), 1);
    let retry = harness.coder.context(1);
    assert_eq!(retry["retry_number"], 1);
    assert!(retry.get("recovery_hint").is_none());
    let attempts = read_attempts(&harness.paths.issue_session_dir(FEATURE, ISSUE))
        .expect("attempts");
    assert_eq!(attempts[0].action, "retry");
    assert!(attempts[0].hint.is_none());
}

#[test]
fn a_panicking_agent_ends_the_session_as_failed() {
    let harness = harness_with_issue();
    harness.test_writer.push(ok(json!({"tests_written": 2})));
    harness.coder.push_panic("coder exploded");

    let result = harness.orchestrator().implement_issue(FEATURE, ISSUE);

    assert_eq!(result.status, IssueSessionStatus::Failed);
    assert_eq!(
        result.error.as_deref(),
        Some("session panicked: coder exploded")
    );
    assert_eq!(task_stage(&harness), Some(TaskStage::Blocked));
    assert!(!is_claimed(&harness));
    assert_eq!(harness.event_types().last(), Some(&EventType::IssueFailed));

    let state = harness
        .orchestrator()
        .state()
        .load(FEATURE)
        .expect("load")
        .expect("state");
    assert_eq!(state.sessions.len(), 1);
    assert_eq!(state.sessions[0].status.as_deref(), Some("failed"));
    assert!(state.sessions[0].ended_at.is_some());
}

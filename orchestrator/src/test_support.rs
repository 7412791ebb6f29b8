//! Test doubles and a temp-dir harness for driving the orchestrator.
//!
//! Scripted collaborators share their state through `Rc`, so a test keeps a
//! handle after moving a clone into the orchestrator and can inspect every
//! call afterwards.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use serde_json::Value;
use tempfile::TempDir;

use crate::agents::{Agent, AgentRole, AgentSet};
use crate::core::events::{EventQuery, EventType, SwarmEvent};
use crate::core::types::{AgentContext, AgentResult, Issue};
use crate::io::config::SwarmConfig;
use crate::io::event_bus::EventBus;
use crate::io::git::SourceControl;
use crate::io::init::{SwarmPaths, init_swarm};
use crate::io::tracker::IssueTracker;
use crate::orchestrator::{Orchestrator, object};

/// Successful result whose output is the given JSON object.
pub fn ok(output: Value) -> AgentResult {
    AgentResult::success(object(output), 0.01)
}

/// Failed result with one error.
pub fn fail(error: &str) -> AgentResult {
    AgentResult::failure(vec![error.to_string()], 0.01)
}

enum Step {
    Reply(AgentResult),
    Panic(String),
}

#[derive(Default)]
struct Script {
    queue: VecDeque<Step>,
    contexts: Vec<AgentContext>,
}

/// Agent that replays queued results and records every context it saw.
///
/// An exhausted script fails the call.
#[derive(Clone)]
pub struct ScriptedAgent {
    role: AgentRole,
    script: Rc<RefCell<Script>>,
}

impl ScriptedAgent {
    pub fn new(role: AgentRole) -> Self {
        Self {
            role,
            script: Rc::default(),
        }
    }

    pub fn push(&self, result: AgentResult) -> &Self {
        self.script.borrow_mut().queue.push_back(Step::Reply(result));
        self
    }

    /// Make the next call panic with `message`.
    pub fn push_panic(&self, message: &str) -> &Self {
        self.script
            .borrow_mut()
            .queue
            .push_back(Step::Panic(message.to_string()));
        self
    }

    pub fn calls(&self) -> usize {
        self.script.borrow().contexts.len()
    }

    pub fn contexts(&self) -> Vec<AgentContext> {
        self.script.borrow().contexts.clone()
    }

    /// Context of the `n`th call (0-based).
    pub fn context(&self, n: usize) -> AgentContext {
        self.contexts()
            .get(n)
            .cloned()
            .unwrap_or_else(|| panic!("{} was called fewer than {} times", self.role.as_str(), n + 1))
    }
}

impl Agent for ScriptedAgent {
    fn role(&self) -> AgentRole {
        self.role
    }

    fn run(&self, context: &AgentContext) -> AgentResult {
        let step = {
            let mut script = self.script.borrow_mut();
            script.contexts.push(context.clone());
            script.queue.pop_front()
        };
        match step {
            Some(Step::Reply(result)) => result,
            Some(Step::Panic(message)) => panic!("{message}"),
            None => AgentResult::failed(format!("{} script exhausted", self.role.as_str())),
        }
    }
}

#[derive(Default)]
struct VcsLog {
    branches: Vec<String>,
    commits: Vec<String>,
}

/// Source control that records branch and commit requests.
#[derive(Clone, Default)]
pub struct RecordingVcs {
    log: Rc<RefCell<VcsLog>>,
}

impl RecordingVcs {
    pub fn branches(&self) -> Vec<String> {
        self.log.borrow().branches.clone()
    }

    pub fn commits(&self) -> Vec<String> {
        self.log.borrow().commits.clone()
    }
}

impl SourceControl for RecordingVcs {
    fn ensure_branch(&self, branch: &str) -> Result<()> {
        self.log.borrow_mut().branches.push(branch.to_string());
        Ok(())
    }

    fn commit_all(&self, message: &str) -> Result<Option<String>> {
        let mut log = self.log.borrow_mut();
        log.commits.push(message.to_string());
        Ok(Some(format!("c0ffee{}", log.commits.len())))
    }
}

#[derive(Default)]
struct TrackerState {
    issues: BTreeMap<u64, Issue>,
    created: Vec<Issue>,
    closed: Vec<(u64, String)>,
    next_number: u64,
    fail_fetch: bool,
}

/// In-memory issue tracker. Created issues are numbered from 100.
#[derive(Clone)]
pub struct RecordingTracker {
    state: Rc<RefCell<TrackerState>>,
}

impl Default for RecordingTracker {
    fn default() -> Self {
        Self {
            state: Rc::new(RefCell::new(TrackerState {
                next_number: 100,
                ..TrackerState::default()
            })),
        }
    }
}

impl RecordingTracker {
    pub fn add_issue(&self, number: u64, title: &str, body: &str) {
        self.state.borrow_mut().issues.insert(
            number,
            Issue {
                number,
                title: title.to_string(),
                body: body.to_string(),
            },
        );
    }

    /// Make every fetch fail, to exercise the abort path.
    pub fn fail_fetches(&self) {
        self.state.borrow_mut().fail_fetch = true;
    }

    pub fn created(&self) -> Vec<Issue> {
        self.state.borrow().created.clone()
    }

    pub fn closed(&self) -> Vec<(u64, String)> {
        self.state.borrow().closed.clone()
    }
}

impl IssueTracker for RecordingTracker {
    fn fetch_issue(&self, number: u64) -> Result<Issue> {
        let state = self.state.borrow();
        if state.fail_fetch {
            return Err(anyhow!("tracker unavailable"));
        }
        state
            .issues
            .get(&number)
            .cloned()
            .ok_or_else(|| anyhow!("issue #{number} not found"))
    }

    fn close_issue(&self, number: u64, comment: &str) -> Result<()> {
        self.state
            .borrow_mut()
            .closed
            .push((number, comment.to_string()));
        Ok(())
    }

    fn create_issue(&self, title: &str, body: &str) -> Result<u64> {
        let mut state = self.state.borrow_mut();
        let number = state.next_number;
        state.next_number += 1;
        let issue = Issue {
            number,
            title: title.to_string(),
            body: body.to_string(),
        };
        state.created.push(issue.clone());
        state.issues.insert(number, issue);
        Ok(number)
    }
}

/// Orchestrator wired to scripted agents inside a temp project root.
pub struct TestHarness {
    pub temp: TempDir,
    pub paths: SwarmPaths,
    pub config: SwarmConfig,
    pub bus: Arc<EventBus>,
    pub author: ScriptedAgent,
    pub critic: ScriptedAgent,
    pub moderator: ScriptedAgent,
    pub test_writer: ScriptedAgent,
    pub coder: ScriptedAgent,
    pub verifier: ScriptedAgent,
    pub recovery: ScriptedAgent,
    pub estimator: ScriptedAgent,
    pub vcs: RecordingVcs,
    pub tracker: RecordingTracker,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_swarm(temp.path(), false).expect("init .swarm");
        let config = SwarmConfig::default();
        let bus = Arc::new(EventBus::from_config(temp.path(), &config.events));
        Self {
            paths,
            config,
            bus,
            author: ScriptedAgent::new(AgentRole::Author),
            critic: ScriptedAgent::new(AgentRole::Critic),
            moderator: ScriptedAgent::new(AgentRole::Moderator),
            test_writer: ScriptedAgent::new(AgentRole::TestWriter),
            coder: ScriptedAgent::new(AgentRole::Coder),
            verifier: ScriptedAgent::new(AgentRole::Verifier),
            recovery: ScriptedAgent::new(AgentRole::Recovery),
            estimator: ScriptedAgent::new(AgentRole::ComplexityEstimator),
            vcs: RecordingVcs::default(),
            tracker: RecordingTracker::default(),
            temp,
        }
    }

    /// Build an orchestrator over clones of the harness collaborators.
    pub fn orchestrator(&self) -> Orchestrator {
        let agents = AgentSet {
            author: Box::new(self.author.clone()),
            critic: Box::new(self.critic.clone()),
            moderator: Box::new(self.moderator.clone()),
            test_writer: Box::new(self.test_writer.clone()),
            coder: Box::new(self.coder.clone()),
            verifier: Box::new(self.verifier.clone()),
            recovery: Some(Box::new(self.recovery.clone())),
            estimator: Some(Box::new(self.estimator.clone())),
        };
        Orchestrator::new(
            self.paths.clone(),
            self.config.clone(),
            self.bus.clone(),
            agents,
            Box::new(self.vcs.clone()),
            Box::new(self.tracker.clone()),
        )
    }

    /// Every persisted event, oldest first.
    pub fn events(&self) -> Vec<SwarmEvent> {
        let mut events = self.bus.query(&EventQuery::default()).expect("query events");
        events.sort_by_key(|e| e.timestamp);
        events
    }

    pub fn event_types(&self) -> Vec<EventType> {
        self.events().into_iter().map(|e| e.event_type).collect()
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

//! Orchestrator wiring.
//!
//! The [`Orchestrator`] owns every collaborator the pipelines need: the event
//! bus, the feature state store, issue locks, source control, the issue
//! tracker and the agent set. Collaborators are injected at construction so
//! tests can substitute scripted implementations. The pipelines themselves
//! live in [`crate::debate`], [`crate::gate`] and [`crate::session`].

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use crate::agents::AgentSet;
use crate::agents::llm::build_agent_set;
use crate::core::events::{EventType, SwarmEvent};
use crate::core::memory::DebateMemory;
use crate::core::recovery::SymbolLocator;
use crate::io::backend::{ClaudeCliBackend, LlmBackend};
use crate::io::config::{SwarmConfig, load_config};
use crate::io::event_bus::EventBus;
use crate::io::git::{Git, SourceControl};
use crate::io::init::SwarmPaths;
use crate::io::locks::LockManager;
use crate::io::prompt::PromptEngine;
use crate::io::state_store::StateStore;
use crate::io::symbols::CodebaseLocator;
use crate::io::tracker::{GhTracker, IssueTracker};

/// Source recorded on events the orchestrator emits.
pub const ORCHESTRATOR_SOURCE: &str = "orchestrator";

/// Longest string handed to a prompt template.
const PROMPT_FIELD_BUDGET_BYTES: usize = 200_000;

pub struct Orchestrator {
    pub(crate) paths: SwarmPaths,
    pub(crate) config: SwarmConfig,
    pub(crate) bus: Arc<EventBus>,
    pub(crate) state: StateStore,
    pub(crate) locks: LockManager,
    pub(crate) vcs: Box<dyn SourceControl>,
    pub(crate) tracker: Box<dyn IssueTracker>,
    pub(crate) locator: Option<Box<dyn SymbolLocator>>,
    pub(crate) agents: AgentSet,
    pub(crate) memory: DebateMemory,
}

impl Orchestrator {
    pub fn new(
        paths: SwarmPaths,
        config: SwarmConfig,
        bus: Arc<EventBus>,
        agents: AgentSet,
        vcs: Box<dyn SourceControl>,
        tracker: Box<dyn IssueTracker>,
    ) -> Self {
        Self {
            state: StateStore::new(&paths.state_dir),
            locks: LockManager::new(&paths.locks_dir),
            paths,
            config,
            bus,
            vcs,
            tracker,
            locator: None,
            agents,
            memory: DebateMemory::new(),
        }
    }

    /// Codebase search used when resolving undefined names.
    pub fn with_locator(mut self, locator: Box<dyn SymbolLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    /// Production wiring for a project root: config from `.swarm/config.toml`,
    /// the assistant CLI backend, git and the GitHub CLI.
    pub fn for_project(root: &Path) -> Result<Self> {
        let paths = SwarmPaths::new(root);
        let config = load_config(&paths.config_path)
            .with_context(|| format!("load {}", paths.config_path.display()))?;
        let bus = Arc::new(EventBus::from_config(root, &config.events));
        let backend: Arc<dyn LlmBackend> = Arc::new(ClaudeCliBackend::from_config(&config.backend));
        let prompts = Arc::new(PromptEngine::new(PROMPT_FIELD_BUDGET_BYTES)?);
        let agents = build_agent_set(backend, prompts, root, &config);
        Ok(Self::new(
            paths,
            config,
            bus,
            agents,
            Box::new(Git::new(root)),
            Box::new(GhTracker::new(root)),
        )
        .with_locator(Box::new(CodebaseLocator::new(root))))
    }

    pub fn paths(&self) -> &SwarmPaths {
        &self.paths
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn memory(&self) -> &DebateMemory {
        &self.memory
    }

    /// Emit an orchestrator event. `payload` must be a JSON object.
    pub(crate) fn emit(
        &self,
        event_type: EventType,
        feature_id: &str,
        issue_number: Option<u64>,
        payload: Value,
    ) -> Result<()> {
        let mut event = SwarmEvent::new(event_type, feature_id)
            .with_source(ORCHESTRATOR_SOURCE)
            .with_payload(object(payload));
        event.issue_number = issue_number;
        self.bus.emit(event)?;
        Ok(())
    }
}

/// Unwrap a JSON object literal into an agent context or payload map.
pub(crate) fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

//! In-process publish/subscribe with optional append-only JSONL persistence.
//!
//! `emit` validates the payload before anything else happens: an invalid
//! event is neither persisted nor delivered. Handler failures and panics are
//! contained per handler and never reach the emitter.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::core::events::{EventQuery, EventType, PayloadValidationError, SwarmEvent};
use crate::io::config::EventsConfig;

/// Subscriber callback. Errors are logged, never propagated.
pub type EventHandler = Arc<dyn Fn(&SwarmEvent) -> Result<()> + Send + Sync>;

const LOG_PREFIX: &str = "events-";
const LOG_SUFFIX: &str = ".jsonl";

#[derive(Default)]
struct Handlers {
    typed: BTreeMap<EventType, Vec<EventHandler>>,
    global: Vec<EventHandler>,
}

pub struct EventBus {
    handlers: Mutex<Handlers>,
    log_dir: Option<PathBuf>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("log_dir", &self.log_dir)
            .finish_non_exhaustive()
    }
}

impl EventBus {
    /// Bus that only dispatches.
    pub fn in_memory() -> Self {
        Self {
            handlers: Mutex::new(Handlers::default()),
            log_dir: None,
        }
    }

    /// Bus that also appends every event to daily logs under `dir`.
    pub fn persistent(dir: impl Into<PathBuf>) -> Self {
        Self {
            handlers: Mutex::new(Handlers::default()),
            log_dir: Some(dir.into()),
        }
    }

    pub fn from_config(root: &Path, cfg: &EventsConfig) -> Self {
        if cfg.persist {
            Self::persistent(root.join(&cfg.dir))
        } else {
            Self::in_memory()
        }
    }

    pub fn log_dir(&self) -> Option<&Path> {
        self.log_dir.as_deref()
    }

    pub fn subscribe<F>(&self, event_type: EventType, handler: F)
    where
        F: Fn(&SwarmEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.lock()
            .typed
            .entry(event_type)
            .or_default()
            .push(Arc::new(handler));
    }

    pub fn subscribe_all<F>(&self, handler: F)
    where
        F: Fn(&SwarmEvent) -> Result<()> + Send + Sync + 'static,
    {
        self.lock().global.push(Arc::new(handler));
    }

    /// Build, validate, persist and dispatch an event.
    pub fn emit_event(
        &self,
        event_type: EventType,
        feature_id: &str,
        issue_number: Option<u64>,
        payload: Map<String, Value>,
    ) -> Result<SwarmEvent, PayloadValidationError> {
        let mut event = SwarmEvent::new(event_type, feature_id).with_payload(payload);
        event.issue_number = issue_number;
        self.emit(event)
    }

    #[instrument(skip_all, fields(event_type = %event.event_type, feature_id = %event.feature_id))]
    pub fn emit(&self, event: SwarmEvent) -> Result<SwarmEvent, PayloadValidationError> {
        event.validate()?;

        if let Some(dir) = &self.log_dir
            && let Err(err) = append_event(dir, &event)
        {
            warn!(err = %format!("{err:#}"), "failed to persist event");
        }

        // Snapshot so handlers may subscribe or emit without deadlocking.
        let handlers: Vec<EventHandler> = {
            let table = self.lock();
            table
                .typed
                .get(&event.event_type)
                .into_iter()
                .flatten()
                .chain(table.global.iter())
                .cloned()
                .collect()
        };
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(err = %format!("{err:#}"), "event handler failed"),
                Err(_) => warn!("event handler panicked"),
            }
        }
        debug!("event emitted");
        Ok(event)
    }

    /// Read persisted events. Empty for an in-memory bus.
    pub fn query(&self, query: &EventQuery) -> Result<Vec<SwarmEvent>> {
        match &self.log_dir {
            Some(dir) => query_events(dir, query),
            None => Ok(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Handlers> {
        self.handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Process-wide bus for top-level wiring only; core logic receives its bus explicitly.
pub fn default_bus() -> Arc<EventBus> {
    static DEFAULT: OnceLock<Arc<EventBus>> = OnceLock::new();
    DEFAULT
        .get_or_init(|| Arc::new(EventBus::in_memory()))
        .clone()
}

fn log_path(dir: &Path, event: &SwarmEvent) -> PathBuf {
    dir.join(format!(
        "{LOG_PREFIX}{}{LOG_SUFFIX}",
        event.timestamp.format("%Y-%m-%d")
    ))
}

fn append_event(dir: &Path, event: &SwarmEvent) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("create event dir {}", dir.display()))?;
    let path = log_path(dir, event);
    let mut line = serde_json::to_string(event).context("serialize event")?;
    line.push('\n');
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open event log {}", path.display()))?;
    file.write_all(line.as_bytes())
        .with_context(|| format!("append event log {}", path.display()))
}

/// Read events from the daily logs in `dir`, newest log file first.
///
/// Malformed lines are skipped with a warning.
pub fn query_events(dir: &Path, query: &EventQuery) -> Result<Vec<SwarmEvent>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .with_context(|| format!("read event dir {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(LOG_PREFIX) && n.ends_with(LOG_SUFFIX))
        })
        .collect();
    files.sort();
    files.reverse();

    let limit = query.limit.unwrap_or(usize::MAX);
    let mut events = Vec::new();
    for path in files {
        let file =
            fs::File::open(&path).with_context(|| format!("open event log {}", path.display()))?;
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("read event log {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let event: SwarmEvent = match serde_json::from_str(&line) {
                Ok(event) => event,
                Err(err) => {
                    warn!(path = %path.display(), line = idx + 1, err = %err, "skipping malformed event");
                    continue;
                }
            };
            if query.matches(&event) {
                events.push(event);
                if events.len() >= limit {
                    return Ok(events);
                }
            }
        }
    }
    Ok(events)
}

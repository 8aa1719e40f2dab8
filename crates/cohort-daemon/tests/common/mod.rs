//! Shared fixtures for group integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use cohort_core::group::{GroupEvent, GroupEventKind};
use cohort_daemon::orchestration::{
    CreateGroup, EventSink, ExecutionRequest, ExecutorError, GroupDefaults, GroupManager,
    GroupRepository, InMemoryGroupRepository, NewSession, SessionExecutor, SessionOutcome,
};

/// How one scripted session behaves.
#[derive(Debug, Clone)]
pub struct Script {
    pub cost_usd: f64,
    pub error: Option<String>,
    pub delay: Duration,
    pub panic: bool,
    /// Keep running through cancellation until `delay` elapses.
    pub ignore_cancel: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            cost_usd: 0.1,
            error: None,
            delay: Duration::from_millis(10),
            panic: false,
            ignore_cancel: false,
        }
    }
}

impl Script {
    pub fn cost(cost_usd: f64) -> Self {
        Self {
            cost_usd,
            ..Self::default()
        }
    }

    pub fn failing(error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    #[must_use]
    pub const fn ignoring_cancel(mut self) -> Self {
        self.ignore_cancel = true;
        self
    }
}

/// Executor driven by per-session scripts. Records launch order, requests
/// and the peak number of sessions executing at once. Cancellation is
/// honoured by returning `Cancelled` immediately unless the script ignores it.
#[derive(Default)]
pub struct ScriptedExecutor {
    scripts: HashMap<String, Script>,
    launched: Mutex<Vec<String>>,
    requests: Mutex<Vec<ExecutionRequest>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn script(mut self, session_id: &str, script: Script) -> Self {
        self.scripts.insert(session_id.to_string(), script);
        self
    }

    pub fn launched(&self) -> Vec<String> {
        self.launched.lock().unwrap().clone()
    }

    pub fn request(&self, session_id: &str) -> Option<ExecutionRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.session_id == session_id)
            .cloned()
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<SessionOutcome, ExecutorError> {
        let script = self
            .scripts
            .get(&request.session_id)
            .cloned()
            .unwrap_or_default();
        self.launched.lock().unwrap().push(request.session_id.clone());
        self.requests.lock().unwrap().push(request.clone());

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let cancelled = if script.ignore_cancel {
            tokio::time::sleep(script.delay).await;
            false
        } else {
            tokio::select! {
                () = tokio::time::sleep(script.delay) => false,
                () = cancel.cancelled() => true,
            }
        };
        self.active.fetch_sub(1, Ordering::SeqCst);

        if cancelled {
            return Err(ExecutorError::Cancelled { cost_usd: 0.0 });
        }
        assert!(!script.panic, "scripted panic in {}", request.session_id);
        Ok(match script.error {
            Some(error) => SessionOutcome::failed(script.cost_usd, error),
            None => SessionOutcome::succeeded(script.cost_usd),
        })
    }
}

/// Event sink that keeps every event in order.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<GroupEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<GroupEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn types(&self) -> Vec<&'static str> {
        self.events().iter().map(GroupEvent::event_type).collect()
    }

    /// Position of the first event matching `pred`.
    pub fn position<F>(&self, pred: F) -> Option<usize>
    where
        F: Fn(&GroupEventKind) -> bool,
    {
        self.events().iter().position(|e| pred(&e.kind))
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: GroupEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct Harness {
    pub manager: GroupManager,
    pub executor: Arc<ScriptedExecutor>,
    pub events: Arc<RecordingSink>,
    pub repo: Arc<dyn GroupRepository>,
}

pub fn harness(executor: ScriptedExecutor) -> Harness {
    harness_with_repo(executor, Arc::new(InMemoryGroupRepository::new()))
}

pub fn harness_with_repo(executor: ScriptedExecutor, repo: Arc<dyn GroupRepository>) -> Harness {
    build(executor, repo, Duration::from_secs(2))
}

/// Harness whose runners give cancelled sessions only `cancel_grace`.
pub fn harness_with_grace(executor: ScriptedExecutor, cancel_grace: Duration) -> Harness {
    build(executor, Arc::new(InMemoryGroupRepository::new()), cancel_grace)
}

fn build(
    executor: ScriptedExecutor,
    repo: Arc<dyn GroupRepository>,
    cancel_grace: Duration,
) -> Harness {
    let executor = Arc::new(executor);
    let events = Arc::new(RecordingSink::default());
    let defaults = GroupDefaults {
        cancel_grace,
        ..GroupDefaults::default()
    };
    let manager = GroupManager::new(
        defaults,
        Arc::clone(&repo),
        Arc::clone(&executor) as Arc<dyn SessionExecutor>,
        Arc::clone(&events) as Arc<dyn EventSink>,
    );
    Harness {
        manager,
        executor,
        events,
        repo,
    }
}

pub fn session(id: &str, depends_on: &[&str]) -> NewSession {
    NewSession {
        id: Some(id.to_string()),
        project_path: std::env::temp_dir(),
        prompt: format!("work on {id}"),
        depends_on: depends_on.iter().map(|d| (*d).to_string()).collect(),
    }
}

pub fn definition(name: &str, sessions: Vec<NewSession>) -> CreateGroup {
    CreateGroup {
        name: name.to_string(),
        sessions,
        ..CreateGroup::default()
    }
}

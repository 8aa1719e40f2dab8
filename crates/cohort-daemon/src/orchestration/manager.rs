//! Group lifecycle manager.
//!
//! [`GroupManager`] is the entry point for callers:
//! - creates and edits groups (validation, slugs, persistence)
//! - starts a [`GroupRunner`] per run and keeps a registry of live runner
//!   handles keyed by group id (routing only; no session state)
//! - routes pause / resume / cancel / budget updates to the live runner, or
//!   applies them to the persisted group when nothing is running
//! - recovers groups left `running` by a previous process

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use cohort_core::config::Config;
use cohort_core::group::{
    BudgetConfig, ConcurrencyConfig, DependencyGraph, GroupConfig, GroupEvent, GroupEventKind,
    GroupProgress, GroupSession, GroupStatus, PauseReason, ProgressAggregator, SessionConfig,
    SessionGroup, SessionStatus, slugify,
};

use super::error::GroupError;
use super::executor::SessionExecutor;
use super::repository::GroupRepository;
use super::runner::{DEFAULT_CANCEL_GRACE, GroupRunner, RunOptions, RunSummary, RunnerHandle};
use super::sink::EventSink;

/// Settings applied to every group the manager creates or runs.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupDefaults {
    pub budget: BudgetConfig,
    pub concurrency: ConcurrencyConfig,
    pub session: SessionConfig,
    /// How long cancelled sessions get to acknowledge.
    pub cancel_grace: Duration,
}

impl Default for GroupDefaults {
    fn default() -> Self {
        Self {
            budget: BudgetConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            session: SessionConfig::default(),
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }
}

impl From<&Config> for GroupDefaults {
    fn from(config: &Config) -> Self {
        Self {
            budget: config.groups.budget,
            concurrency: config.groups.concurrency,
            session: config.groups.session.clone(),
            cancel_grace: Duration::from_secs(config.daemon.cancel_grace_secs),
        }
    }
}

/// A session to add to a group.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSession {
    /// Generated when omitted.
    #[serde(default)]
    pub id: Option<String>,
    pub project_path: PathBuf,
    pub prompt: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Request to create a group. Unset configs fall back to [`GroupDefaults`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateGroup {
    pub name: String,
    #[serde(default)]
    pub sessions: Vec<NewSession>,
    #[serde(default)]
    pub budget: Option<BudgetConfig>,
    #[serde(default)]
    pub concurrency: Option<ConcurrencyConfig>,
    #[serde(default)]
    pub session: Option<SessionConfig>,
}

/// Coordinates group persistence and live runners.
#[derive(Clone)]
pub struct GroupManager {
    defaults: GroupDefaults,
    repo: Arc<dyn GroupRepository>,
    executor: Arc<dyn SessionExecutor>,
    events: Arc<dyn EventSink>,
    runners: Arc<RwLock<HashMap<String, RunnerHandle>>>,
}

impl GroupManager {
    pub fn new(
        defaults: GroupDefaults,
        repo: Arc<dyn GroupRepository>,
        executor: Arc<dyn SessionExecutor>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            defaults,
            repo,
            executor,
            events,
            runners: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub const fn defaults(&self) -> &GroupDefaults {
        &self.defaults
    }

    /// Validate, persist and announce a new group.
    pub async fn create_group(&self, request: CreateGroup) -> Result<SessionGroup, GroupError> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(GroupError::validation("group name must not be empty"));
        }

        let config = GroupConfig {
            budget: request.budget.unwrap_or(self.defaults.budget),
            concurrency: request.concurrency.unwrap_or(self.defaults.concurrency),
            session: request
                .session
                .unwrap_or_else(|| self.defaults.session.clone()),
        };
        config.validate()?;

        let sessions = request
            .sessions
            .into_iter()
            .map(build_session)
            .collect::<Result<Vec<_>, _>>()?;
        DependencyGraph::from_sessions(&sessions)?;

        let slug = self.unique_slug(name).await?;
        let mut group = SessionGroup::new(uuid::Uuid::new_v4().to_string(), name, slug, config);
        group.sessions = sessions;
        self.repo.save(&group).await?;

        info!(
            group_id = %group.id,
            slug = %group.slug,
            total_sessions = group.sessions.len(),
            "Group created"
        );
        self.emit(
            &group.id,
            GroupEventKind::GroupCreated {
                name: group.name.clone(),
                slug: group.slug.clone(),
                total_sessions: group.sessions.len(),
            },
        );
        Ok(group)
    }

    async fn unique_slug(&self, name: &str) -> Result<String, GroupError> {
        let base = slugify(name);
        let taken: HashSet<String> = self
            .repo
            .list()
            .await?
            .into_iter()
            .map(|g| g.slug)
            .collect();
        if !taken.contains(&base) {
            return Ok(base);
        }
        let mut n = 2;
        loop {
            let candidate = format!("{base}-{n}");
            if !taken.contains(&candidate) {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    /// Append a pending session to a group that is not running.
    pub async fn add_session(
        &self,
        group_id: &str,
        session: NewSession,
    ) -> Result<GroupSession, GroupError> {
        let mut group = self.editable_group(group_id, "add a session to").await?;
        let session = build_session(session)?;

        let mut sessions = group.sessions.clone();
        sessions.push(session.clone());
        DependencyGraph::from_sessions(&sessions)?;

        group.sessions = sessions;
        group.touch();
        self.repo.save(&group).await?;
        info!(group_id, session_id = %session.id, "Session added to group");
        Ok(session)
    }

    /// Remove a pending session nothing else depends on.
    pub async fn remove_session(&self, group_id: &str, session_id: &str) -> Result<(), GroupError> {
        let mut group = self.editable_group(group_id, "remove a session from").await?;

        let Some(session) = group.session(session_id) else {
            return Err(GroupError::validation(format!(
                "session '{session_id}' is not part of group {group_id}"
            )));
        };
        if session.status != SessionStatus::Pending {
            return Err(GroupError::validation(format!(
                "session '{session_id}' is {} and can no longer be removed",
                session.status
            )));
        }
        let graph = DependencyGraph::from_sessions(&group.sessions)?;
        let dependents = graph.dependents(session_id);
        if !dependents.is_empty() {
            return Err(GroupError::validation(format!(
                "session '{session_id}' is a dependency of {}",
                dependents.join(", ")
            )));
        }

        group.sessions.retain(|s| s.id != session_id);
        group.touch();
        self.repo.save(&group).await?;
        info!(group_id, session_id, "Session removed from group");
        Ok(())
    }

    /// Load a group that may be edited: no live runner and not `running`.
    async fn editable_group(
        &self,
        group_id: &str,
        operation: &'static str,
    ) -> Result<SessionGroup, GroupError> {
        if self.live_handle(group_id).await.is_some() {
            return Err(GroupError::AlreadyRunning {
                id: group_id.to_string(),
            });
        }
        let group = self.get_group(group_id).await?;
        if group.status == GroupStatus::Running {
            return Err(GroupError::InvalidState {
                operation,
                status: group.status,
            });
        }
        Ok(group)
    }

    pub async fn get_group(&self, group_id: &str) -> Result<SessionGroup, GroupError> {
        self.repo
            .find_by_id(group_id)
            .await?
            .ok_or_else(|| GroupError::NotFound {
                id: group_id.to_string(),
            })
    }

    pub async fn find_by_slug(&self, slug: &str) -> Result<Option<SessionGroup>, GroupError> {
        Ok(self.repo.list().await?.into_iter().find(|g| g.slug == slug))
    }

    pub async fn list_groups(&self) -> Result<Vec<SessionGroup>, GroupError> {
        Ok(self.repo.list().await?)
    }

    /// Delete a group that is not running.
    pub async fn delete_group(&self, group_id: &str) -> Result<(), GroupError> {
        self.editable_group(group_id, "delete").await?;
        self.repo.delete(group_id).await?;
        info!(group_id, "Group deleted");
        Ok(())
    }

    /// Run a group to completion (or until it parks as paused) on the
    /// current task.
    pub async fn run(&self, group_id: &str, options: RunOptions) -> Result<RunSummary, GroupError> {
        let runner = self.register(group_id).await?;
        let handle = runner.handle();
        let result = runner.run(options).await;
        self.finish(&handle, result).await
    }

    /// Like [`run`](Self::run) on a spawned task. Registration happens before
    /// this returns, so a second start for the same group fails immediately.
    pub async fn start(
        &self,
        group_id: &str,
        options: RunOptions,
    ) -> Result<JoinHandle<Result<RunSummary, GroupError>>, GroupError> {
        let runner = self.register(group_id).await?;
        let handle = runner.handle();
        let manager = self.clone();
        Ok(tokio::spawn(async move {
            let result = runner.run(options).await;
            manager.finish(&handle, result).await
        }))
    }

    /// Start a new run for a group parked as `paused`. The group is persisted
    /// as `running` and `group_resumed` emitted before this returns; the
    /// scheduling continues on a spawned task.
    pub async fn start_resumed(
        &self,
        group_id: &str,
        options: RunOptions,
    ) -> Result<JoinHandle<Result<RunSummary, GroupError>>, GroupError> {
        let runner = self.register(group_id).await?;
        let handle = runner.handle();
        let started = match runner.resume(options).await {
            Ok(started) => started,
            Err(e) => {
                self.unregister(&handle).await;
                return Err(e);
            }
        };
        info!(group_id, "Resuming paused group with a new run");
        let manager = self.clone();
        Ok(tokio::spawn(async move {
            let result = started.run().await;
            manager.finish(&handle, result).await
        }))
    }

    async fn register(&self, group_id: &str) -> Result<GroupRunner, GroupError> {
        let mut runners = self.runners.write().await;
        if runners.get(group_id).is_some_and(|h| !h.is_closed()) {
            return Err(GroupError::AlreadyRunning {
                id: group_id.to_string(),
            });
        }
        let runner = GroupRunner::new(
            group_id,
            Arc::clone(&self.repo),
            Arc::clone(&self.executor),
            Arc::clone(&self.events),
        )
        .with_cancel_grace(self.defaults.cancel_grace);
        runners.insert(group_id.to_string(), runner.handle());
        drop(runners);
        Ok(runner)
    }

    async fn unregister(&self, handle: &RunnerHandle) {
        let mut runners = self.runners.write().await;
        if runners
            .get(handle.group_id())
            .is_some_and(|h| h.same_runner(handle))
        {
            runners.remove(handle.group_id());
        }
    }

    async fn finish(
        &self,
        handle: &RunnerHandle,
        result: Result<RunSummary, GroupError>,
    ) -> Result<RunSummary, GroupError> {
        self.unregister(handle).await;
        if let Err(e) = &result {
            error!(group_id = %handle.group_id(), error = %e, "Group run ended with error");
        }
        result
    }

    async fn live_handle(&self, group_id: &str) -> Option<RunnerHandle> {
        self.runners
            .read()
            .await
            .get(group_id)
            .filter(|h| !h.is_closed())
            .cloned()
    }

    /// True while a runner is executing the group.
    pub async fn is_live(&self, group_id: &str) -> bool {
        self.live_handle(group_id).await.is_some()
    }

    pub async fn pause(&self, group_id: &str) -> Result<(), GroupError> {
        match self.live_handle(group_id).await {
            Some(handle) => handle.pause().await,
            None => Err(self.not_live(group_id, "pause").await),
        }
    }

    /// Resume a paused group. Without a live runner a new run with `options`
    /// is started in the background from the persisted state; `options` are
    /// ignored when a runner is live.
    pub async fn resume(&self, group_id: &str, options: RunOptions) -> Result<(), GroupError> {
        if let Some(handle) = self.live_handle(group_id).await {
            return handle.resume().await;
        }
        drop(self.start_resumed(group_id, options).await?);
        Ok(())
    }

    pub async fn cancel(&self, group_id: &str) -> Result<(), GroupError> {
        match self.live_handle(group_id).await {
            Some(handle) => handle.cancel().await,
            None => Err(self.not_live(group_id, "cancel").await),
        }
    }

    /// Error for a control operation that needs a live runner.
    async fn not_live(&self, group_id: &str, operation: &'static str) -> GroupError {
        match self.get_group(group_id).await {
            Ok(group) if group.status == GroupStatus::Running => GroupError::RunnerGone {
                id: group_id.to_string(),
            },
            Ok(group) => GroupError::InvalidState {
                operation,
                status: group.status,
            },
            Err(e) => e,
        }
    }

    /// Replace a group's budget policy, live or persisted.
    pub async fn update_budget(
        &self,
        group_id: &str,
        budget: BudgetConfig,
    ) -> Result<(), GroupError> {
        budget.validate()?;
        if let Some(handle) = self.live_handle(group_id).await {
            return handle.update_budget(budget).await;
        }
        let mut group = self.get_group(group_id).await?;
        group.config.budget = budget;
        group.touch();
        self.repo.save(&group).await?;
        info!(group_id, max_budget_usd = ?budget.max_budget_usd, "Group budget updated");
        Ok(())
    }

    /// Progress snapshot from the persisted group.
    pub async fn progress(&self, group_id: &str) -> Result<GroupProgress, GroupError> {
        Ok(ProgressAggregator::group(&self.get_group(group_id).await?))
    }

    /// Reset failed and skipped sessions to pending so the next run retries
    /// them. Returns how many sessions were reset.
    pub async fn retry_failed(&self, group_id: &str) -> Result<usize, GroupError> {
        let mut group = self.editable_group(group_id, "retry").await?;
        let mut reset = 0;
        for session in &mut group.sessions {
            if matches!(session.status, SessionStatus::Failed | SessionStatus::Skipped) {
                session.reset();
                reset += 1;
            }
        }
        group.status = GroupStatus::Created;
        group.pause_reason = None;
        group.error = None;
        group.touch();
        self.repo.save(&group).await?;
        info!(group_id, reset, "Failed sessions reset for retry");
        Ok(reset)
    }

    /// Park groups left `running` by a previous process: they become
    /// `paused` (reason `error`) with their active sessions back to pending.
    /// Returns the ids of recovered groups.
    pub async fn recover_interrupted(&self) -> Result<Vec<String>, GroupError> {
        let mut recovered = Vec::new();
        for mut group in self.repo.list().await? {
            if group.status != GroupStatus::Running || self.is_live(&group.id).await {
                continue;
            }
            let mut reset = 0;
            for session in &mut group.sessions {
                if session.status == SessionStatus::Active {
                    session.reset();
                    reset += 1;
                }
            }
            group.status = GroupStatus::Paused;
            group.pause_reason = Some(PauseReason::Error);
            group.touch();
            self.repo.save(&group).await?;

            warn!(group_id = %group.id, reset, "Recovered interrupted group as paused");
            self.emit(
                &group.id,
                GroupEventKind::GroupPaused {
                    reason: PauseReason::Error,
                },
            );
            recovered.push(group.id);
        }
        Ok(recovered)
    }

    fn emit(&self, group_id: &str, kind: GroupEventKind) {
        self.events.emit(GroupEvent::new(group_id, kind));
    }
}

fn build_session(session: NewSession) -> Result<GroupSession, GroupError> {
    let id = match session.id {
        Some(id) if id.trim().is_empty() => {
            return Err(GroupError::validation("session id must not be empty"));
        }
        Some(id) => id,
        None => uuid::Uuid::new_v4().to_string(),
    };
    if session.prompt.trim().is_empty() {
        return Err(GroupError::validation(format!(
            "session '{id}' has an empty prompt"
        )));
    }
    if session.project_path.as_os_str().is_empty() {
        return Err(GroupError::validation(format!(
            "session '{id}' has an empty project path"
        )));
    }
    Ok(GroupSession::new(
        id,
        session.project_path,
        session.prompt,
        session.depends_on,
    ))
}

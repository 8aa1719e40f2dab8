//! Per-group scheduler.
//!
//! A [`GroupRunner`] drives one group from `running` to `completed` (or to a
//! parked `paused` state). It owns the dependency graph, the set of active
//! sessions and the cumulative cost; nothing else mutates them. The loop
//! suspends only on persistence writes and on a `select!` over session task
//! completions and control commands, so completions are handled strictly one
//! at a time.
//!
//! Control operations reach a live runner through a cloneable
//! [`RunnerHandle`]; each command carries a oneshot reply so callers get
//! `InvalidState` and persistence errors back synchronously.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cohort_core::db::unix_timestamp;
use cohort_core::group::{
    BudgetAction, BudgetConfig, BudgetStatus, BudgetTracker, DependencyGraph,
    DependencyResolution, GroupEvent, GroupEventKind, GroupProgress, GroupStatus, PauseReason,
    ProgressAggregator, SessionGroup, SessionStatus,
};

use super::error::GroupError;
use super::executor::{ExecutionRequest, ExecutorError, SessionExecutor, SessionOutcome};
use super::repository::GroupRepository;
use super::sink::EventSink;

/// Default time a cancelled session gets to acknowledge before it is
/// recorded as failed without cost.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(30);

/// Capacity of the control command channel.
const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Error recorded on sessions stopped by cancellation.
const CANCELLED: &str = "cancelled";

/// Options for a single run.
#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Overrides the group's `max_concurrent_sessions` for this run.
    pub max_concurrent: Option<usize>,
    /// When `false` every pending session is ready and nothing is blocked.
    pub respect_dependencies: bool,
    /// Return from `run` as soon as the group is paused with nothing in
    /// flight, instead of waiting for a resume.
    pub detach_when_paused: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_concurrent: None,
            respect_dependencies: true,
            detach_when_paused: false,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub status: GroupStatus,
    pub pause_reason: Option<PauseReason>,
    pub progress: GroupProgress,
}

/// Control commands accepted by a live runner.
enum RunnerCommand {
    Pause {
        reply: oneshot::Sender<Result<(), GroupError>>,
    },
    Resume {
        reply: oneshot::Sender<Result<(), GroupError>>,
    },
    Cancel {
        reply: oneshot::Sender<Result<(), GroupError>>,
    },
    UpdateBudget {
        budget: BudgetConfig,
        reply: oneshot::Sender<Result<(), GroupError>>,
    },
    Progress {
        reply: oneshot::Sender<GroupProgress>,
    },
}

/// Cloneable handle for controlling a live [`GroupRunner`].
#[derive(Clone)]
pub struct RunnerHandle {
    group_id: String,
    tx: mpsc::Sender<RunnerCommand>,
}

impl RunnerHandle {
    pub fn group_id(&self) -> &str {
        &self.group_id
    }

    /// True once the runner has returned.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// True when both handles control the same runner.
    pub fn same_runner(&self, other: &Self) -> bool {
        self.tx.same_channel(&other.tx)
    }

    /// Pause with reason `user_requested`. In-flight sessions keep running.
    pub async fn pause(&self) -> Result<(), GroupError> {
        self.request(|reply| RunnerCommand::Pause { reply }).await?
    }

    /// Resume a paused group from its persisted state.
    pub async fn resume(&self) -> Result<(), GroupError> {
        self.request(|reply| RunnerCommand::Resume { reply }).await?
    }

    /// Cancel every active session and park the group as paused. Returns
    /// once the cancelled sessions have been accounted for.
    pub async fn cancel(&self) -> Result<(), GroupError> {
        self.request(|reply| RunnerCommand::Cancel { reply }).await?
    }

    /// Replace the group's budget policy.
    pub async fn update_budget(&self, budget: BudgetConfig) -> Result<(), GroupError> {
        self.request(|reply| RunnerCommand::UpdateBudget { budget, reply })
            .await?
    }

    /// Snapshot of the runner's in-memory view.
    pub async fn progress(&self) -> Result<GroupProgress, GroupError> {
        self.request(|reply| RunnerCommand::Progress { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> RunnerCommand,
    ) -> Result<T, GroupError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| self.gone())?;
        reply_rx.await.map_err(|_| self.gone())
    }

    fn gone(&self) -> GroupError {
        GroupError::RunnerGone {
            id: self.group_id.clone(),
        }
    }
}

/// A session currently executing.
struct ActiveSession {
    cancel: CancellationToken,
    abort: AbortHandle,
}

/// Mutable state owned by the scheduling loop.
struct RunnerState {
    group: SessionGroup,
    graph: DependencyGraph,
    tracker: BudgetTracker,
    max_concurrent: usize,
    respect_dependencies: bool,
    active: HashMap<String, ActiveSession>,
    task_sessions: HashMap<tokio::task::Id, String>,
    cumulative_cost: f64,
    /// Sessions that already got a `dependency_waiting` event this run.
    waiting_reported: HashSet<String>,
    /// Set once cancellation was requested; the run ends when `active`
    /// drains or the deadline passes.
    stop_deadline: Option<Instant>,
    cancel_waiters: Vec<oneshot::Sender<Result<(), GroupError>>>,
}

impl RunnerState {
    fn status_of(&self, session_id: &str) -> SessionStatus {
        self.group
            .session(session_id)
            .map_or(SessionStatus::Skipped, |s| s.status)
    }

    const fn stopping(&self) -> bool {
        self.stop_deadline.is_some()
    }
}

/// Drives one group run.
pub struct GroupRunner {
    group_id: String,
    repo: Arc<dyn GroupRepository>,
    executor: Arc<dyn SessionExecutor>,
    events: Arc<dyn EventSink>,
    cancel_grace: Duration,
    commands_tx: mpsc::Sender<RunnerCommand>,
    commands_rx: mpsc::Receiver<RunnerCommand>,
}

impl GroupRunner {
    pub fn new(
        group_id: impl Into<String>,
        repo: Arc<dyn GroupRepository>,
        executor: Arc<dyn SessionExecutor>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        Self {
            group_id: group_id.into(),
            repo,
            executor,
            events,
            cancel_grace: DEFAULT_CANCEL_GRACE,
            commands_tx,
            commands_rx,
        }
    }

    #[must_use]
    pub const fn with_cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Handle for sending control commands while [`run`](Self::run) executes.
    pub fn handle(&self) -> RunnerHandle {
        RunnerHandle {
            group_id: self.group_id.clone(),
            tx: self.commands_tx.clone(),
        }
    }

    /// Run the group until it completes, or until it is parked as paused by a
    /// cancellation, a budget `stop`, or (with `detach_when_paused`) a pause.
    pub async fn run(self, options: RunOptions) -> Result<RunSummary, GroupError> {
        self.start(options).await?.run().await
    }

    /// Validate the group and move it to `running`, emitting `group_started`.
    /// Nothing is launched until [`StartedRun::run`] is awaited.
    pub async fn start(self, options: RunOptions) -> Result<StartedRun, GroupError> {
        let state = self.begin(options, false).await?;
        Ok(StartedRun {
            runner: self,
            state,
            options,
        })
    }

    /// Like [`start`](Self::start) for a group parked as `paused`: the
    /// `running` transition is persisted and `group_resumed` emitted.
    pub async fn resume(self, options: RunOptions) -> Result<StartedRun, GroupError> {
        let state = self.begin(options, true).await?;
        Ok(StartedRun {
            runner: self,
            state,
            options,
        })
    }

    async fn drive(
        &mut self,
        state: &mut RunnerState,
        options: RunOptions,
    ) -> Result<RunSummary, GroupError> {
        let mut tasks: JoinSet<Result<SessionOutcome, ExecutorError>> = JoinSet::new();

        loop {
            self.skip_blocked(state).await?;

            if state.group.status == GroupStatus::Running && !state.stopping() {
                self.launch_ready(state, &mut tasks).await?;
            }

            if state.active.is_empty() {
                if state.graph.is_complete(|id| state.status_of(id)) {
                    return self.complete(state).await;
                }
                if state.stopping() {
                    return Ok(self.finish_stop(state));
                }
                if state.group.status == GroupStatus::Paused && options.detach_when_paused {
                    info!(group_id = %self.group_id, "Group paused with nothing in flight, detaching");
                    return Ok(summary(&state.group));
                }
            }

            let deadline = state.stop_deadline;
            tokio::select! {
                Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                    self.handle_completion(state, joined).await?;
                }
                Some(command) = self.commands_rx.recv() => {
                    self.handle_command(state, command).await;
                }
                () = sleep_until_deadline(deadline), if deadline.is_some() && !state.active.is_empty() => {
                    self.expire_cancelled(state).await?;
                }
            }
        }
    }

    /// Validate and transition the group to `running`.
    async fn begin(&self, options: RunOptions, resumed: bool) -> Result<RunnerState, GroupError> {
        let mut group = self.load().await?;

        if resumed && group.status != GroupStatus::Paused {
            return Err(GroupError::InvalidState {
                operation: "resume",
                status: group.status,
            });
        }
        if group.status == GroupStatus::Running {
            return Err(GroupError::InvalidState {
                operation: "run",
                status: group.status,
            });
        }
        if options.max_concurrent == Some(0) {
            return Err(GroupError::validation("max_concurrent must be at least 1"));
        }

        if group.sessions.is_empty() {
            self.fail(&mut group, GroupError::EmptyGroup.to_string())
                .await?;
            return Err(GroupError::EmptyGroup);
        }

        let graph = match DependencyGraph::from_sessions(&group.sessions) {
            Ok(graph) => graph,
            Err(e) => {
                self.fail(&mut group, e.to_string()).await?;
                return Err(GroupError::Graph(e));
            }
        };

        // Sessions left active by an interrupted run never reported an outcome
        for session in &mut group.sessions {
            if session.status == SessionStatus::Active {
                warn!(group_id = %group.id, session_id = %session.id, "Resetting stale active session");
                session.reset();
            }
        }

        let max_concurrent = options
            .max_concurrent
            .unwrap_or(group.config.concurrency.max_concurrent_sessions)
            .max(1);
        let cumulative_cost = group.terminal_cost();

        group.status = GroupStatus::Running;
        group.pause_reason = None;
        group.error = None;
        group.touch();
        self.repo.save(&group).await?;

        info!(
            group_id = %group.id,
            total_sessions = group.sessions.len(),
            max_concurrent,
            cumulative_cost,
            resumed,
            "Group run started"
        );
        if resumed {
            self.emit(GroupEventKind::GroupResumed);
        } else {
            self.emit(GroupEventKind::GroupStarted {
                total_sessions: group.sessions.len(),
                max_concurrent,
            });
        }

        Ok(RunnerState {
            tracker: BudgetTracker::new(group.config.budget),
            group,
            graph,
            max_concurrent,
            respect_dependencies: options.respect_dependencies,
            active: HashMap::new(),
            task_sessions: HashMap::new(),
            cumulative_cost,
            waiting_reported: HashSet::new(),
            stop_deadline: None,
            cancel_waiters: Vec::new(),
        })
    }

    async fn load(&self) -> Result<SessionGroup, GroupError> {
        self.repo
            .find_by_id(&self.group_id)
            .await?
            .ok_or_else(|| GroupError::NotFound {
                id: self.group_id.clone(),
            })
    }

    /// Configuration error: the group moves to `failed` and nothing launches.
    async fn fail(&self, group: &mut SessionGroup, message: String) -> Result<(), GroupError> {
        error!(group_id = %group.id, error = %message, "Group configuration invalid");
        group.status = GroupStatus::Failed;
        group.error = Some(message.clone());
        group.touch();
        self.repo.save(group).await?;
        self.emit(GroupEventKind::GroupFailed { error: message });
        Ok(())
    }

    /// Skip every pending session that can no longer become ready.
    async fn skip_blocked(&self, state: &mut RunnerState) -> Result<(), GroupError> {
        if !state.respect_dependencies {
            return Ok(());
        }
        let blocked = state.graph.propagate_blocked(|id| state.status_of(id));
        if blocked.is_empty() {
            return Ok(());
        }

        let blocked_set: HashSet<&str> = blocked.iter().map(String::as_str).collect();
        let now = unix_timestamp();
        let mut reasons = Vec::with_capacity(blocked.len());
        for id in &blocked {
            let blockers: Vec<&str> = state
                .graph
                .dependencies(id)
                .into_iter()
                .filter(|dep| {
                    blocked_set.contains(dep) || state.status_of(dep).blocks_dependents()
                })
                .collect();
            reasons.push(format!("blocked by dependency {}", blockers.join(", ")));
        }

        for (id, reason) in blocked.iter().zip(reasons) {
            if let Some(session) = state.group.session_mut(id) {
                debug!(group_id = %self.group_id, session_id = %id, %reason, "Skipping blocked session");
                session.status = SessionStatus::Skipped;
                session.error = Some(reason);
                session.completed_at = Some(now);
            }
        }
        state.group.touch();
        self.repo.save(&state.group).await?;

        for id in blocked {
            self.emit(GroupEventKind::DependencyResolved {
                session_id: id,
                reason: DependencyResolution::Blocked,
            });
        }
        Ok(())
    }

    /// Launch ready sessions in group order while slots are free, and report
    /// sessions still waiting on dependencies.
    async fn launch_ready(
        &self,
        state: &mut RunnerState,
        tasks: &mut JoinSet<Result<SessionOutcome, ExecutorError>>,
    ) -> Result<(), GroupError> {
        let ready: Vec<String> = if state.respect_dependencies {
            state.graph.ready(|id| state.status_of(id))
        } else {
            state
                .group
                .sessions
                .iter()
                .filter(|s| s.status == SessionStatus::Pending)
                .map(|s| s.id.clone())
                .collect()
        };

        if state.respect_dependencies {
            let waiting: Vec<(String, Vec<String>)> = state
                .group
                .sessions
                .iter()
                .filter(|s| s.status == SessionStatus::Pending)
                .filter(|s| !state.waiting_reported.contains(&s.id))
                .filter_map(|s| {
                    let waiting_on = state.graph.waiting_on(&s.id, |id| state.status_of(id));
                    (!waiting_on.is_empty()).then(|| (s.id.clone(), waiting_on))
                })
                .collect();
            for (session_id, waiting_on) in waiting {
                debug!(group_id = %self.group_id, %session_id, ?waiting_on, "Session waiting on dependencies");
                state.waiting_reported.insert(session_id.clone());
                self.emit(GroupEventKind::DependencyWaiting {
                    session_id,
                    waiting_on,
                });
            }
        }

        let slots = state.max_concurrent.saturating_sub(state.active.len());
        for session_id in ready.into_iter().take(slots) {
            self.launch(state, tasks, &session_id).await?;
        }
        Ok(())
    }

    async fn launch(
        &self,
        state: &mut RunnerState,
        tasks: &mut JoinSet<Result<SessionOutcome, ExecutorError>>,
        session_id: &str,
    ) -> Result<(), GroupError> {
        let session_config = state.group.config.session.clone();
        let resume_from = if session_config.session_chaining && state.respect_dependencies {
            state.group.session(session_id).and_then(|s| {
                s.depends_on
                    .iter()
                    .rev()
                    .find_map(|dep| state.group.session(dep)?.claude_session_id.clone())
            })
        } else {
            None
        };

        let claude_session_id = uuid::Uuid::new_v4().to_string();
        let Some(session) = state.group.session_mut(session_id) else {
            return Ok(());
        };
        session.status = SessionStatus::Active;
        session.claude_session_id = Some(claude_session_id.clone());
        session.cost_usd = 0.0;
        session.error = None;
        session.started_at = Some(unix_timestamp());
        session.completed_at = None;

        let request = ExecutionRequest {
            group_id: self.group_id.clone(),
            session_id: session.id.clone(),
            project_path: session.project_path.clone(),
            prompt: session.prompt.clone(),
            claude_session_id: claude_session_id.clone(),
            resume_from,
            config: session_config,
        };
        let has_dependencies = !session.depends_on.is_empty();

        state.group.touch();
        self.repo.save(&state.group).await?;

        info!(
            group_id = %self.group_id,
            session_id,
            %claude_session_id,
            project_path = %request.project_path.display(),
            "Launching group session"
        );
        if has_dependencies && state.respect_dependencies {
            self.emit(GroupEventKind::DependencyResolved {
                session_id: session_id.to_string(),
                reason: DependencyResolution::Satisfied,
            });
        }
        self.emit(GroupEventKind::GroupSessionStarted {
            session_id: session_id.to_string(),
            claude_session_id,
            project_path: request.project_path.display().to_string(),
        });

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let executor = Arc::clone(&self.executor);
        let abort = tasks.spawn(async move { executor.execute(request, token).await });

        state
            .task_sessions
            .insert(abort.id(), session_id.to_string());
        state
            .active
            .insert(session_id.to_string(), ActiveSession { cancel, abort });
        Ok(())
    }

    /// Record the outcome of a finished session task.
    async fn handle_completion(
        &self,
        state: &mut RunnerState,
        joined: Result<(tokio::task::Id, Result<SessionOutcome, ExecutorError>), JoinError>,
    ) -> Result<(), GroupError> {
        let (task_id, result) = match joined {
            Ok((id, result)) => (id, result),
            Err(join_error) => {
                let id = join_error.id();
                (id, Err(ExecutorError::Other(describe_join_error(join_error))))
            }
        };
        // Sessions expired by the cancel deadline were already recorded
        let Some(session_id) = state.task_sessions.remove(&task_id) else {
            return Ok(());
        };
        state.active.remove(&session_id);

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e @ ExecutorError::Cancelled { .. }) => SessionOutcome::failed(e.cost_usd(), CANCELLED),
            Err(e) => SessionOutcome::failed(e.cost_usd(), e.to_string()),
        };
        self.record_outcome(state, &session_id, outcome).await
    }

    async fn record_outcome(
        &self,
        state: &mut RunnerState,
        session_id: &str,
        outcome: SessionOutcome,
    ) -> Result<(), GroupError> {
        let cost = if outcome.cost_usd.is_finite() {
            outcome.cost_usd.max(0.0)
        } else {
            0.0
        };
        let Some(session) = state.group.session_mut(session_id) else {
            return Ok(());
        };
        session.cost_usd = cost;
        session.completed_at = Some(unix_timestamp());
        if outcome.success {
            session.status = SessionStatus::Completed;
            session.error = None;
        } else {
            session.status = SessionStatus::Failed;
            session.error = Some(
                outcome
                    .error
                    .unwrap_or_else(|| "session failed".to_string()),
            );
        }
        let session_progress = ProgressAggregator::session(session);
        let error_message = session.error.clone();

        state.group.touch();
        self.repo.save(&state.group).await?;
        state.cumulative_cost += cost;

        if let Some(error) = error_message {
            warn!(group_id = %self.group_id, session_id, cost_usd = cost, %error, "Group session failed");
            self.emit(GroupEventKind::GroupSessionFailed {
                session_id: session_id.to_string(),
                cost_usd: cost,
                error,
            });
        } else {
            info!(group_id = %self.group_id, session_id, cost_usd = cost, "Group session completed");
            self.emit(GroupEventKind::GroupSessionCompleted {
                session_id: session_id.to_string(),
                cost_usd: cost,
            });
        }
        self.emit(GroupEventKind::SessionProgress {
            progress: session_progress,
        });
        self.emit(GroupEventKind::GroupProgress {
            progress: ProgressAggregator::group(&state.group),
        });

        self.check_budget(state).await
    }

    async fn check_budget(&self, state: &mut RunnerState) -> Result<(), GroupError> {
        let config = *state.tracker.config();
        let Some(max_budget_usd) = config.max_budget_usd else {
            return Ok(());
        };
        let current_cost_usd = state.cumulative_cost;

        match state.tracker.classify(current_cost_usd) {
            BudgetStatus::Ok => Ok(()),
            BudgetStatus::Warning => {
                self.emit(GroupEventKind::BudgetWarning {
                    current_cost_usd,
                    max_budget_usd,
                    warning_threshold: config.warning_threshold,
                });
                Ok(())
            }
            BudgetStatus::Exceeded => {
                warn!(
                    group_id = %self.group_id,
                    current_cost_usd,
                    max_budget_usd,
                    action = %config.on_budget_exceeded,
                    "Group budget exceeded"
                );
                self.emit(GroupEventKind::BudgetExceeded {
                    current_cost_usd,
                    max_budget_usd,
                    action: config.on_budget_exceeded,
                });
                match config.on_budget_exceeded {
                    BudgetAction::Continue => Ok(()),
                    BudgetAction::Pause => {
                        if state.group.status == GroupStatus::Running {
                            self.set_paused(state, PauseReason::BudgetExceeded).await?;
                        }
                        Ok(())
                    }
                    BudgetAction::Stop => {
                        if state.group.status == GroupStatus::Running {
                            self.set_paused(state, PauseReason::BudgetExceeded).await?;
                        }
                        self.begin_stop(state);
                        Ok(())
                    }
                }
            }
        }
    }

    async fn set_paused(
        &self,
        state: &mut RunnerState,
        reason: PauseReason,
    ) -> Result<(), GroupError> {
        state.group.status = GroupStatus::Paused;
        state.group.pause_reason = Some(reason);
        state.group.touch();
        self.repo.save(&state.group).await?;
        info!(group_id = %self.group_id, %reason, active = state.active.len(), "Group paused");
        self.emit(GroupEventKind::GroupPaused { reason });
        Ok(())
    }

    /// Request cancellation of every active session.
    fn begin_stop(&self, state: &mut RunnerState) {
        if state.stopping() {
            return;
        }
        info!(
            group_id = %self.group_id,
            active = state.active.len(),
            grace_secs = self.cancel_grace.as_secs(),
            "Cancelling in-flight sessions"
        );
        state.stop_deadline = Some(Instant::now() + self.cancel_grace);
        for active in state.active.values() {
            active.cancel.cancel();
        }
    }

    /// Sessions that ignored cancellation past the grace period are recorded
    /// as failed without cost.
    async fn expire_cancelled(&self, state: &mut RunnerState) -> Result<(), GroupError> {
        let expired: Vec<(String, ActiveSession)> = state.active.drain().collect();
        for (session_id, active) in expired {
            warn!(group_id = %self.group_id, %session_id, "Session did not acknowledge cancellation in time");
            active.abort.abort();
            state.task_sessions.retain(|_, id| *id != session_id);
            self.record_outcome(state, &session_id, SessionOutcome::failed(0.0, CANCELLED))
                .await?;
        }
        Ok(())
    }

    fn finish_stop(&self, state: &mut RunnerState) -> RunSummary {
        info!(group_id = %self.group_id, "Group stopped");
        for waiter in state.cancel_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
        summary(&state.group)
    }

    async fn complete(&self, state: &mut RunnerState) -> Result<RunSummary, GroupError> {
        state.group.status = GroupStatus::Completed;
        state.group.pause_reason = None;
        state.group.touch();
        self.repo.save(&state.group).await?;

        let stats = ProgressAggregator::group(&state.group);
        info!(
            group_id = %self.group_id,
            completed = stats.completed,
            failed = stats.failed,
            skipped = stats.skipped,
            total_cost_usd = stats.total_cost_usd,
            "Group completed"
        );
        self.emit(GroupEventKind::GroupCompleted {
            stats: stats.clone(),
        });
        for waiter in state.cancel_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
        Ok(RunSummary {
            status: GroupStatus::Completed,
            pause_reason: None,
            progress: stats,
        })
    }

    async fn handle_command(&self, state: &mut RunnerState, command: RunnerCommand) {
        match command {
            RunnerCommand::Pause { reply } => {
                let result = if state.group.status == GroupStatus::Running {
                    self.set_paused(state, PauseReason::UserRequested).await
                } else {
                    Err(GroupError::InvalidState {
                        operation: "pause",
                        status: state.group.status,
                    })
                };
                let _ = reply.send(result);
            }
            RunnerCommand::Resume { reply } => {
                let _ = reply.send(self.resume_paused(state).await);
            }
            RunnerCommand::Cancel { reply } => match state.group.status {
                GroupStatus::Running | GroupStatus::Paused => {
                    if state.group.status == GroupStatus::Running
                        && let Err(e) = self.set_paused(state, PauseReason::UserRequested).await
                    {
                        let _ = reply.send(Err(e));
                        return;
                    }
                    self.begin_stop(state);
                    state.cancel_waiters.push(reply);
                }
                status => {
                    let _ = reply.send(Err(GroupError::InvalidState {
                        operation: "cancel",
                        status,
                    }));
                }
            },
            RunnerCommand::UpdateBudget { budget, reply } => {
                let _ = reply.send(self.update_budget(state, budget).await);
            }
            RunnerCommand::Progress { reply } => {
                let _ = reply.send(ProgressAggregator::group(&state.group));
            }
        }
    }

    async fn resume_paused(&self, state: &mut RunnerState) -> Result<(), GroupError> {
        if state.group.status != GroupStatus::Paused {
            return Err(GroupError::InvalidState {
                operation: "resume",
                status: state.group.status,
            });
        }
        if state.stopping() {
            return Err(GroupError::validation(
                "group is being cancelled; resume after in-flight sessions stop",
            ));
        }

        let mut group = self.load().await?;
        group.status = GroupStatus::Running;
        group.pause_reason = None;
        group.touch();
        self.repo.save(&group).await?;

        state.tracker = BudgetTracker::new(group.config.budget);
        state.group = group;
        info!(group_id = %self.group_id, "Group resumed");
        self.emit(GroupEventKind::GroupResumed);
        Ok(())
    }

    async fn update_budget(
        &self,
        state: &mut RunnerState,
        budget: BudgetConfig,
    ) -> Result<(), GroupError> {
        budget.validate()?;
        state.group.config.budget = budget;
        state.group.touch();
        self.repo.save(&state.group).await?;
        state.tracker = BudgetTracker::new(budget);
        info!(group_id = %self.group_id, max_budget_usd = ?budget.max_budget_usd, "Group budget updated");
        Ok(())
    }

    fn emit(&self, kind: GroupEventKind) {
        self.events.emit(GroupEvent::new(self.group_id.clone(), kind));
    }
}

/// A run whose group is already persisted as `running`.
pub struct StartedRun {
    runner: GroupRunner,
    state: RunnerState,
    options: RunOptions,
}

impl StartedRun {
    pub fn handle(&self) -> RunnerHandle {
        self.runner.handle()
    }

    /// Schedule sessions until the group completes or parks as paused.
    pub async fn run(self) -> Result<RunSummary, GroupError> {
        let Self {
            mut runner,
            mut state,
            options,
        } = self;
        runner.drive(&mut state, options).await
    }
}

fn summary(group: &SessionGroup) -> RunSummary {
    RunSummary {
        status: group.status,
        pause_reason: group.pause_reason,
        progress: ProgressAggregator::group(group),
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn describe_join_error(err: JoinError) -> String {
    if err.is_cancelled() {
        return CANCELLED.to_string();
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("executor panicked: {message}")
}

//! Data model for session groups.
//!
//! A [`SessionGroup`] is an ordered collection of [`GroupSession`]s run under
//! one concurrency cap and one cost budget. Session order is creation order
//! and doubles as the FIFO tie-break when several sessions become ready at
//! the same time.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::db::unix_timestamp;
use crate::error::{Error, Result};

/// Lifecycle status of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupStatus {
    Created,
    Running,
    Paused,
    Completed,
    Failed,
}

impl GroupStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(Error::InvalidGroup(format!("unknown group status '{other}'"))),
        }
    }
}

/// Lifecycle status of a session inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Not started yet.
    Pending,
    /// Currently executing.
    Active,
    /// Finished successfully.
    Completed,
    /// Finished unsuccessfully (including cancellation).
    Failed,
    /// Never launched because a dependency failed or was skipped.
    Skipped,
}

impl SessionStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Terminal statuses never transition again.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// A dependency in this status can never be satisfied.
    pub const fn blocks_dependents(&self) -> bool {
        matches!(self, Self::Failed | Self::Skipped)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(Error::InvalidGroup(format!(
                "unknown session status '{other}'"
            ))),
        }
    }
}

/// Why a group is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    UserRequested,
    BudgetExceeded,
    /// The run was interrupted (e.g. the daemon restarted mid-run).
    Error,
}

impl PauseReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::UserRequested => "user_requested",
            Self::BudgetExceeded => "budget_exceeded",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PauseReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user_requested" => Ok(Self::UserRequested),
            "budget_exceeded" => Ok(Self::BudgetExceeded),
            "error" => Ok(Self::Error),
            other => Err(Error::InvalidGroup(format!("unknown pause reason '{other}'"))),
        }
    }
}

/// What to do once the cumulative cost reaches the budget ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetAction {
    /// Stop launching; in-flight sessions finish; group becomes paused.
    #[default]
    Pause,
    /// Like `Pause`, and also cancel every in-flight session.
    Stop,
    /// Only report the overrun and keep scheduling.
    Continue,
}

impl BudgetAction {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pause => "pause",
            Self::Stop => "stop",
            Self::Continue => "continue",
        }
    }
}

impl fmt::Display for BudgetAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Budget policy for a group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Ceiling in USD; `None` means unlimited.
    pub max_budget_usd: Option<f64>,
    pub on_budget_exceeded: BudgetAction,
    /// Fraction of `max_budget_usd` at which a warning is emitted, in (0, 1].
    pub warning_threshold: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_budget_usd: None,
            on_budget_exceeded: BudgetAction::Pause,
            warning_threshold: 0.8,
        }
    }
}

impl BudgetConfig {
    /// Check the budget fields are usable.
    pub fn validate(&self) -> Result<()> {
        if let Some(max) = self.max_budget_usd
            && (!max.is_finite() || max < 0.0)
        {
            return Err(Error::InvalidGroup(format!(
                "max_budget_usd must be a non-negative number, got {max}"
            )));
        }
        if !(self.warning_threshold > 0.0 && self.warning_threshold <= 1.0) {
            return Err(Error::InvalidGroup(format!(
                "warning_threshold must be in (0, 1], got {}",
                self.warning_threshold
            )));
        }
        Ok(())
    }
}

/// Concurrency policy for a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 3,
        }
    }
}

impl ConcurrencyConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_sessions == 0 {
            return Err(Error::InvalidGroup(
                "max_concurrent_sessions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Permission handling passed to the agent subprocess.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    #[default]
    Default,
    AcceptEdits,
    BypassPermissions,
}

impl PermissionMode {
    /// Value for the `--permission-mode` CLI flag.
    pub const fn as_cli_arg(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::BypassPermissions => "bypassPermissions",
        }
    }
}

/// Default execution settings applied to every session of a group.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub model: Option<String>,
    pub max_turns: Option<u32>,
    pub permission_mode: PermissionMode,
    /// Fork the Claude session of a session's last listed dependency instead
    /// of starting a fresh conversation.
    pub session_chaining: bool,
}

/// All per-group configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    pub budget: BudgetConfig,
    pub concurrency: ConcurrencyConfig,
    pub session: SessionConfig,
}

impl GroupConfig {
    pub fn validate(&self) -> Result<()> {
        self.budget.validate()?;
        self.concurrency.validate()
    }
}

/// One prompt-driven unit of work inside a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSession {
    pub id: String,
    pub project_path: PathBuf,
    pub prompt: String,
    /// Ids of sessions in the same group that must complete first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub status: SessionStatus,
    pub claude_session_id: Option<String>,
    #[serde(default)]
    pub cost_usd: f64,
    /// Failure or skip reason.
    pub error: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl GroupSession {
    /// Create a pending session.
    pub fn new(
        id: impl Into<String>,
        project_path: impl Into<PathBuf>,
        prompt: impl Into<String>,
        depends_on: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            project_path: project_path.into(),
            prompt: prompt.into(),
            depends_on,
            status: SessionStatus::Pending,
            claude_session_id: None,
            cost_usd: 0.0,
            error: None,
            created_at: unix_timestamp(),
            started_at: None,
            completed_at: None,
        }
    }

    pub const fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Put the session back to `pending`, discarding any run results.
    pub fn reset(&mut self) {
        self.status = SessionStatus::Pending;
        self.claude_session_id = None;
        self.cost_usd = 0.0;
        self.error = None;
        self.started_at = None;
        self.completed_at = None;
    }
}

/// A named collection of sessions run under one policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionGroup {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub status: GroupStatus,
    pub sessions: Vec<GroupSession>,
    pub config: GroupConfig,
    pub pause_reason: Option<PauseReason>,
    /// Configuration error that moved the group to `failed`.
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SessionGroup {
    /// Create an empty group in `created` status.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        slug: impl Into<String>,
        config: GroupConfig,
    ) -> Self {
        let now = unix_timestamp();
        Self {
            id: id.into(),
            name: name.into(),
            slug: slug.into(),
            status: GroupStatus::Created,
            sessions: Vec::new(),
            config,
            pause_reason: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn session(&self, id: &str) -> Option<&GroupSession> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn session_mut(&mut self, id: &str) -> Option<&mut GroupSession> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    /// Snapshot of every session's status keyed by id.
    pub fn statuses(&self) -> HashMap<String, SessionStatus> {
        self.sessions
            .iter()
            .map(|s| (s.id.clone(), s.status))
            .collect()
    }

    /// Sum of `cost_usd` over terminal sessions.
    pub fn terminal_cost(&self) -> f64 {
        self.sessions
            .iter()
            .filter(|s| s.is_terminal())
            .map(|s| s.cost_usd)
            .sum()
    }

    /// Bump `updated_at`.
    pub fn touch(&mut self) {
        self.updated_at = unix_timestamp();
    }
}

/// Derive a URL-safe slug from a group name.
///
/// Lowercases ASCII alphanumerics, collapses every other run of characters
/// into a single `-`, and trims leading/trailing dashes. Falls back to
/// `"group"` when nothing usable remains.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    if slug.is_empty() {
        "group".to_string()
    } else {
        slug
    }
}

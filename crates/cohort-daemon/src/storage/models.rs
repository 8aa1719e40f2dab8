//! Database rows for session groups and their conversion to domain types.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use cohort_core::group::{
    GroupConfig, GroupSession, GroupStatus, PauseReason, SessionGroup, SessionStatus,
};

use super::db::DatabaseError;

/// `session_groups` record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GroupRow {
    pub id: String,
    pub name: String,
    pub slug: String,
    pub status: String,
    pub config: String,
    pub pause_reason: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// `group_sessions` record.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct GroupSessionRow {
    pub group_id: String,
    pub id: String,
    pub position: i64,
    pub project_path: String,
    pub prompt: String,
    pub depends_on: String,
    pub status: String,
    pub claude_session_id: Option<String>,
    pub cost_usd: f64,
    pub error: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

fn corrupt(what: &str, id: &str, e: impl std::fmt::Display) -> DatabaseError {
    DatabaseError::Corrupt(format!("{what} {id}: {e}"))
}

impl GroupRow {
    pub fn from_group(group: &SessionGroup) -> Result<Self, DatabaseError> {
        let config =
            serde_json::to_string(&group.config).map_err(|e| corrupt("group", &group.id, e))?;
        Ok(Self {
            id: group.id.clone(),
            name: group.name.clone(),
            slug: group.slug.clone(),
            status: group.status.as_str().to_string(),
            config,
            pause_reason: group.pause_reason.map(|r| r.as_str().to_string()),
            error: group.error.clone(),
            created_at: group.created_at,
            updated_at: group.updated_at,
        })
    }

    /// Assemble the domain group from this row and its session rows, which
    /// must already be ordered by position.
    pub fn into_group(self, sessions: Vec<GroupSessionRow>) -> Result<SessionGroup, DatabaseError> {
        let status =
            GroupStatus::from_str(&self.status).map_err(|e| corrupt("group", &self.id, e))?;
        let pause_reason = self
            .pause_reason
            .as_deref()
            .map(PauseReason::from_str)
            .transpose()
            .map_err(|e| corrupt("group", &self.id, e))?;
        let config: GroupConfig =
            serde_json::from_str(&self.config).map_err(|e| corrupt("group", &self.id, e))?;
        let sessions = sessions
            .into_iter()
            .map(GroupSessionRow::into_session)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SessionGroup {
            id: self.id,
            name: self.name,
            slug: self.slug,
            status,
            sessions,
            config,
            pause_reason,
            error: self.error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

impl GroupSessionRow {
    pub fn from_session(
        group_id: &str,
        position: usize,
        session: &GroupSession,
    ) -> Result<Self, DatabaseError> {
        let depends_on = serde_json::to_string(&session.depends_on)
            .map_err(|e| corrupt("session", &session.id, e))?;
        Ok(Self {
            group_id: group_id.to_string(),
            id: session.id.clone(),
            position: i64::try_from(position).map_err(|e| corrupt("session", &session.id, e))?,
            project_path: session.project_path.to_string_lossy().into_owned(),
            prompt: session.prompt.clone(),
            depends_on,
            status: session.status.as_str().to_string(),
            claude_session_id: session.claude_session_id.clone(),
            cost_usd: session.cost_usd,
            error: session.error.clone(),
            created_at: session.created_at,
            started_at: session.started_at,
            completed_at: session.completed_at,
        })
    }

    pub fn into_session(self) -> Result<GroupSession, DatabaseError> {
        let status =
            SessionStatus::from_str(&self.status).map_err(|e| corrupt("session", &self.id, e))?;
        let depends_on: Vec<String> =
            serde_json::from_str(&self.depends_on).map_err(|e| corrupt("session", &self.id, e))?;
        Ok(GroupSession {
            id: self.id,
            project_path: PathBuf::from(self.project_path),
            prompt: self.prompt,
            depends_on,
            status,
            claude_session_id: self.claude_session_id,
            cost_usd: self.cost_usd,
            error: self.error,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        })
    }
}

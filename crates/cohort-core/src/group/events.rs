//! Events produced while a group is created and run.
//!
//! Every event carries the group id and a unix timestamp. The serialized form
//! is a flat JSON object whose `type` field is the event name
//! (`group_started`, `budget_warning`, ...).

use serde::{Deserialize, Serialize};

use super::progress::{GroupProgress, SessionProgress};
use super::types::{BudgetAction, PauseReason};
use crate::db::unix_timestamp;

/// Why a dependency wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyResolution {
    /// Every dependency completed; the session launches.
    Satisfied,
    /// A dependency failed or was skipped; the session is skipped.
    Blocked,
}

/// Event payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GroupEventKind {
    GroupCreated {
        name: String,
        slug: String,
        total_sessions: usize,
    },
    GroupStarted {
        total_sessions: usize,
        max_concurrent: usize,
    },
    GroupPaused {
        reason: PauseReason,
    },
    GroupResumed,
    GroupCompleted {
        stats: GroupProgress,
    },
    GroupFailed {
        error: String,
    },
    GroupSessionStarted {
        session_id: String,
        claude_session_id: String,
        project_path: String,
    },
    GroupSessionCompleted {
        session_id: String,
        cost_usd: f64,
    },
    GroupSessionFailed {
        session_id: String,
        cost_usd: f64,
        error: String,
    },
    BudgetWarning {
        current_cost_usd: f64,
        max_budget_usd: f64,
        warning_threshold: f64,
    },
    BudgetExceeded {
        current_cost_usd: f64,
        max_budget_usd: f64,
        action: BudgetAction,
    },
    DependencyWaiting {
        session_id: String,
        waiting_on: Vec<String>,
    },
    DependencyResolved {
        session_id: String,
        reason: DependencyResolution,
    },
    SessionProgress {
        progress: SessionProgress,
    },
    GroupProgress {
        progress: GroupProgress,
    },
}

impl GroupEventKind {
    /// Wire name of the event, identical to the serialized `type` tag.
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::GroupCreated { .. } => "group_created",
            Self::GroupStarted { .. } => "group_started",
            Self::GroupPaused { .. } => "group_paused",
            Self::GroupResumed => "group_resumed",
            Self::GroupCompleted { .. } => "group_completed",
            Self::GroupFailed { .. } => "group_failed",
            Self::GroupSessionStarted { .. } => "group_session_started",
            Self::GroupSessionCompleted { .. } => "group_session_completed",
            Self::GroupSessionFailed { .. } => "group_session_failed",
            Self::BudgetWarning { .. } => "budget_warning",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::DependencyWaiting { .. } => "dependency_waiting",
            Self::DependencyResolved { .. } => "dependency_resolved",
            Self::SessionProgress { .. } => "session_progress",
            Self::GroupProgress { .. } => "group_progress",
        }
    }
}

/// An event addressed to one group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupEvent {
    pub group_id: String,
    pub timestamp: i64,
    #[serde(flatten)]
    pub kind: GroupEventKind,
}

impl GroupEvent {
    /// Stamp `kind` with the current time.
    pub fn new(group_id: impl Into<String>, kind: GroupEventKind) -> Self {
        Self {
            group_id: group_id.into(),
            timestamp: unix_timestamp(),
            kind,
        }
    }

    pub const fn event_type(&self) -> &'static str {
        self.kind.event_type()
    }

    /// Session the event refers to, if any.
    pub fn session_id(&self) -> Option<&str> {
        match &self.kind {
            GroupEventKind::GroupSessionStarted { session_id, .. }
            | GroupEventKind::GroupSessionCompleted { session_id, .. }
            | GroupEventKind::GroupSessionFailed { session_id, .. }
            | GroupEventKind::DependencyWaiting { session_id, .. }
            | GroupEventKind::DependencyResolved { session_id, .. } => Some(session_id),
            GroupEventKind::SessionProgress { progress } => Some(&progress.session_id),
            _ => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn serialized_type_matches_event_type() {
        let events = [
            GroupEventKind::GroupResumed,
            GroupEventKind::GroupPaused {
                reason: PauseReason::BudgetExceeded,
            },
            GroupEventKind::DependencyResolved {
                session_id: "b".to_string(),
                reason: DependencyResolution::Blocked,
            },
            GroupEventKind::BudgetExceeded {
                current_cost_usd: 1.2,
                max_budget_usd: 1.0,
                action: BudgetAction::Stop,
            },
        ];
        for kind in events {
            let event = GroupEvent::new("g-1", kind);
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.event_type());
            assert_eq!(value["group_id"], "g-1");
        }
    }

    #[test]
    fn flattened_payload_fields() {
        let event = GroupEvent::new(
            "g-1",
            GroupEventKind::GroupPaused {
                reason: PauseReason::UserRequested,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""reason":"user_requested""#), "{json}");

        let back: GroupEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn session_id_accessor() {
        let event = GroupEvent::new(
            "g",
            GroupEventKind::GroupSessionFailed {
                session_id: "s-1".to_string(),
                cost_usd: 0.0,
                error: "cancelled".to_string(),
            },
        );
        assert_eq!(event.session_id(), Some("s-1"));
        let event = GroupEvent::new("g", GroupEventKind::GroupResumed);
        assert!(event.session_id().is_none());
    }
}

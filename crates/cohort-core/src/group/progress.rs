//! Progress snapshots for sessions and groups.

use serde::{Deserialize, Serialize};

use super::types::{GroupSession, GroupStatus, SessionGroup, SessionStatus};

/// Progress of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionProgress {
    pub session_id: String,
    pub status: SessionStatus,
    pub cost_usd: f64,
    pub error: Option<String>,
}

/// Aggregate progress of a group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupProgress {
    pub group_id: String,
    pub status: GroupStatus,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub pending: usize,
    pub active: usize,
    pub total_cost_usd: f64,
    /// `(completed + failed + skipped) / total`, as a percentage in 0..=100.
    pub percent_complete: f64,
}

impl GroupProgress {
    /// Sessions that reached a terminal state.
    pub const fn finished(&self) -> usize {
        self.completed + self.failed + self.skipped
    }

    /// True only when every session completed successfully.
    pub const fn is_fully_successful(&self) -> bool {
        self.total > 0 && self.completed == self.total
    }
}

/// Stateless snapshot builder; safe to call at any point.
pub struct ProgressAggregator;

impl ProgressAggregator {
    pub fn session(session: &GroupSession) -> SessionProgress {
        SessionProgress {
            session_id: session.id.clone(),
            status: session.status,
            cost_usd: session.cost_usd,
            error: session.error.clone(),
        }
    }

    pub fn sessions(group: &SessionGroup) -> Vec<SessionProgress> {
        group.sessions.iter().map(Self::session).collect()
    }

    /// Counts and cost for the whole group. Cost only includes sessions
    /// that reached a terminal state.
    #[allow(clippy::cast_precision_loss)]
    pub fn group(group: &SessionGroup) -> GroupProgress {
        let mut progress = GroupProgress {
            group_id: group.id.clone(),
            status: group.status,
            total: group.sessions.len(),
            completed: 0,
            failed: 0,
            skipped: 0,
            pending: 0,
            active: 0,
            total_cost_usd: group.terminal_cost(),
            percent_complete: 0.0,
        };
        for session in &group.sessions {
            match session.status {
                SessionStatus::Pending => progress.pending += 1,
                SessionStatus::Active => progress.active += 1,
                SessionStatus::Completed => progress.completed += 1,
                SessionStatus::Failed => progress.failed += 1,
                SessionStatus::Skipped => progress.skipped += 1,
            }
        }
        if progress.total > 0 {
            progress.percent_complete =
                progress.finished() as f64 / progress.total as f64 * 100.0;
        }
        progress
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::group::types::GroupConfig;

    fn session(id: &str, status: SessionStatus, cost: f64) -> GroupSession {
        let mut s = GroupSession::new(id, "/tmp", "prompt", vec![]);
        s.status = status;
        s.cost_usd = cost;
        s
    }

    #[test]
    fn empty_group_is_zero_percent() {
        let group = SessionGroup::new("g", "G", "g", GroupConfig::default());
        let p = ProgressAggregator::group(&group);
        assert_eq!(p.total, 0);
        assert!(p.percent_complete.abs() < f64::EPSILON);
        assert!(!p.is_fully_successful());
    }

    #[test]
    fn counts_each_status() {
        let mut group = SessionGroup::new("g", "G", "g", GroupConfig::default());
        group.sessions = vec![
            session("a", SessionStatus::Completed, 0.5),
            session("b", SessionStatus::Failed, 0.25),
            session("c", SessionStatus::Skipped, 0.0),
            session("d", SessionStatus::Active, 0.0),
        ];
        let p = ProgressAggregator::group(&group);
        assert_eq!(
            (p.completed, p.failed, p.skipped, p.active, p.pending),
            (1, 1, 1, 1, 0)
        );
        assert!((p.total_cost_usd - 0.75).abs() < 1e-9);
        assert!((p.percent_complete - 75.0).abs() < 1e-9);
        assert_eq!(p.finished(), 3);
    }

    #[test]
    fn full_success_requires_every_session_completed() {
        let mut group = SessionGroup::new("g", "G", "g", GroupConfig::default());
        group.sessions = vec![
            session("a", SessionStatus::Completed, 0.1),
            session("b", SessionStatus::Completed, 0.1),
        ];
        assert!(ProgressAggregator::group(&group).is_fully_successful());

        group.sessions[1].status = SessionStatus::Skipped;
        assert!(!ProgressAggregator::group(&group).is_fully_successful());
    }

    #[test]
    fn session_snapshot_copies_fields() {
        let mut s = session("x", SessionStatus::Failed, 0.3);
        s.error = Some("boom".to_string());
        let p = ProgressAggregator::session(&s);
        assert_eq!(p.session_id, "x");
        assert_eq!(p.status, SessionStatus::Failed);
        assert_eq!(p.error.as_deref(), Some("boom"));
    }
}

//! Errors surfaced by group operations.

use cohort_core::db::DatabaseError;
use cohort_core::group::{GraphError, GroupStatus};

/// Errors from [`GroupManager`](super::GroupManager) and
/// [`GroupRunner`](super::GroupRunner) operations.
#[derive(Debug, thiserror::Error)]
pub enum GroupError {
    #[error("Group not found: {id}")]
    NotFound { id: String },

    /// The operation is not valid for the group's current status. Nothing was
    /// changed.
    #[error("Cannot {operation} a group that is {status}")]
    InvalidState {
        operation: &'static str,
        status: GroupStatus,
    },

    #[error("Invalid dependency configuration: {0}")]
    Graph(#[from] GraphError),

    #[error("Group has no sessions")]
    EmptyGroup,

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Group {id} already has a live runner")]
    AlreadyRunning { id: String },

    #[error("Persistence error: {0}")]
    Persistence(#[from] DatabaseError),

    /// The runner task ended before answering a control request.
    #[error("Runner for group {id} is no longer available")]
    RunnerGone { id: String },
}

impl GroupError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

impl From<cohort_core::Error> for GroupError {
    fn from(e: cohort_core::Error) -> Self {
        Self::validation(e.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn invalid_state_message_names_operation_and_status() {
        let err = GroupError::InvalidState {
            operation: "pause",
            status: GroupStatus::Paused,
        };
        assert_eq!(err.to_string(), "Cannot pause a group that is paused");
    }

    #[test]
    fn graph_error_converts() {
        let err: GroupError = GraphError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        }
        .into();
        assert!(err.to_string().contains("a -> b -> a"));
    }
}

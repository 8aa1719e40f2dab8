//! The boundary between the scheduler and whatever actually runs a session.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use cohort_core::group::SessionConfig;

/// Everything an executor needs to run one group session.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub group_id: String,
    pub session_id: String,
    pub project_path: PathBuf,
    pub prompt: String,
    /// Claude session id assigned to this run.
    pub claude_session_id: String,
    /// Claude session to continue from when session chaining is enabled.
    pub resume_from: Option<String>,
    pub config: SessionConfig,
}

/// Result of a session that ran to the end.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub success: bool,
    pub cost_usd: f64,
    pub error: Option<String>,
}

impl SessionOutcome {
    pub const fn succeeded(cost_usd: f64) -> Self {
        Self {
            success: true,
            cost_usd,
            error: None,
        }
    }

    pub fn failed(cost_usd: f64, error: impl Into<String>) -> Self {
        Self {
            success: false,
            cost_usd,
            error: Some(error.into()),
        }
    }
}

/// Errors raised by an executor instead of an outcome.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Failed to spawn session process: {reason}")]
    Spawn { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The run was cancelled through its token. `cost_usd` is whatever was
    /// spent before the process stopped.
    #[error("cancelled")]
    Cancelled { cost_usd: f64 },

    #[error("{0}")]
    Other(String),
}

impl ExecutorError {
    /// Cost incurred before the error.
    pub const fn cost_usd(&self) -> f64 {
        match self {
            Self::Cancelled { cost_usd } => *cost_usd,
            _ => 0.0,
        }
    }
}

/// Runs one session to completion.
///
/// Implementations must honour `cancel`: once it fires they should stop the
/// underlying work and return [`ExecutorError::Cancelled`] promptly.
#[async_trait]
pub trait SessionExecutor: Send + Sync {
    async fn execute(
        &self,
        request: ExecutionRequest,
        cancel: CancellationToken,
    ) -> Result<SessionOutcome, ExecutorError>;
}

//! Session group orchestration: running a group's sessions under its
//! dependency graph, concurrency cap and budget.
//!
//! - [`GroupRunner`]: drives one group run to a stop point.
//! - [`GroupManager`]: registry of groups and their live runners.
//! - [`SessionExecutor`]: the seam between scheduling and process execution.
//! - [`GroupRepository`]: persistence of group snapshots.
//! - [`EventSink`]: where group events are published.

pub mod error;
pub mod executor;
pub mod manager;
pub mod repository;
pub mod runner;
pub mod sink;

pub use error::GroupError;
pub use executor::{ExecutionRequest, ExecutorError, SessionExecutor, SessionOutcome};
pub use manager::{CreateGroup, GroupDefaults, GroupManager, NewSession};
pub use repository::{GroupRepository, InMemoryGroupRepository};
pub use runner::{
    DEFAULT_CANCEL_GRACE, GroupRunner, RunOptions, RunSummary, RunnerHandle, StartedRun,
};
pub use sink::{BroadcastEventSink, EventSink, MultiEventSink, TracingEventSink};

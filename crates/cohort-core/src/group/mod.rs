//! Session group domain: data model and the pure scheduling building blocks.
//!
//! - [`types`]: `SessionGroup`, `GroupSession`, statuses and policy configs.
//! - [`DependencyGraph`]: readiness, blocking propagation, cycle detection.
//! - [`BudgetTracker`]: ok / warning / exceeded classification.
//! - [`ProgressAggregator`]: per-session and per-group snapshots.
//! - [`events`]: the events a group run emits.

pub mod budget;
pub mod events;
pub mod graph;
pub mod progress;
pub mod types;

pub use budget::{BudgetStatus, BudgetTracker};
pub use events::{DependencyResolution, GroupEvent, GroupEventKind};
pub use graph::{DependencyGraph, GraphError};
pub use progress::{GroupProgress, ProgressAggregator, SessionProgress};
pub use types::{
    BudgetAction, BudgetConfig, ConcurrencyConfig, GroupConfig, GroupSession, GroupStatus,
    PauseReason, PermissionMode, SessionConfig, SessionGroup, SessionStatus, slugify,
};

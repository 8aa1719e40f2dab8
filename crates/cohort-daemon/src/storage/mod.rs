//! `SQLite` storage for the Cohort daemon.
//!
//! Persists session groups and their sessions; [`Database`] implements
//! [`GroupRepository`](crate::orchestration::GroupRepository).

mod db;
mod models;
mod queries_groups;

pub use db::{Database, DatabaseError};
pub use models::{GroupRow, GroupSessionRow};

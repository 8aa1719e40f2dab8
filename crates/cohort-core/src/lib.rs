//! Cohort Core Library
//!
//! Shared functionality for Cohort components:
//! - Session group model, dependency graph, budget and progress tracking
//! - Configuration resolution and hierarchy
//! - NDJSON parsing for the Claude Code stream-json protocol
//! - Storage error type and tracing setup
//! - Common error types

pub mod config;
pub mod db;
pub mod error;
pub mod group;
pub mod ndjson;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};

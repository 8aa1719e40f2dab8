//! Cohort Daemon Library
//!
//! Core functionality for the Cohort daemon:
//! - Session group scheduling under dependencies, concurrency and budget
//! - Subprocess management for Claude Code processes
//! - SQLite storage for groups and their sessions

pub mod orchestration;
pub mod storage;
pub mod subprocess;

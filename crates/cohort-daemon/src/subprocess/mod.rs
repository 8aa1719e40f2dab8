//! Claude Code subprocesses: the shared process pool and the executor that
//! runs group sessions through the `claude` CLI.

pub mod claude;
pub mod pool;

pub use claude::ClaudeExecutor;
pub use pool::{PoolEntry, PoolError, PoolPermit, ProcessPool};

//! Cohort Daemon
//!
//! Runs session groups: batches of Claude Code sessions scheduled under a
//! dependency graph, a concurrency cap and a cost budget.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{info, warn};

use cohort_core::group::{GroupEvent, GroupStatus, SessionGroup};
use cohort_daemon::orchestration::{
    BroadcastEventSink, CreateGroup, EventSink, GroupDefaults, GroupManager, MultiEventSink,
    RunOptions, RunSummary, TracingEventSink,
};
use cohort_daemon::storage::Database;
use cohort_daemon::subprocess::{ClaudeExecutor, ProcessPool};

#[derive(Parser, Debug)]
#[command(name = "cohort-daemon")]
#[command(version, about = "Cohort daemon - run batches of Claude Code sessions as a group")]
struct Args {
    /// Database file path
    #[arg(long, global = true)]
    db_path: Option<PathBuf>,

    /// Path to the `claude` CLI binary
    #[arg(long, global = true)]
    claude_bin: Option<PathBuf>,

    /// Maximum concurrent Claude subprocesses across all groups
    #[arg(long, global = true)]
    max_processes: Option<usize>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, global = true, env = "COHORT_LOG_JSON")]
    log_json: bool,

    /// Seconds to wait for graceful subprocess shutdown before SIGKILL.
    #[arg(long, global = true)]
    terminate_timeout: Option<u64>,

    /// Project directory whose `.cohort/settings.json` is applied.
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: GroupAction,
}

/// Group subcommand actions.
#[derive(Subcommand, Debug)]
enum GroupAction {
    /// Create a group from a JSON definition and run it
    Run {
        /// Group definition file (name, sessions, optional budget/concurrency/session)
        file: PathBuf,
        #[command(flatten)]
        run: RunFlags,
    },
    /// Create a group without running it
    Create {
        /// Group definition file
        file: PathBuf,
    },
    /// Run an existing created or paused group
    Resume {
        /// Group ID or slug
        group: String,
        #[command(flatten)]
        run: RunFlags,
    },
    /// List groups
    List,
    /// Show a group's sessions and progress
    Status {
        /// Group ID or slug
        group: String,
    },
    /// Reset failed and skipped sessions so the next run retries them
    Retry {
        /// Group ID or slug
        group: String,
    },
    /// Delete a group
    Delete {
        /// Group ID or slug
        group: String,
    },
}

#[derive(clap::Args, Debug, Clone, Copy)]
struct RunFlags {
    /// Override the group's concurrent session limit for this run
    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Launch every pending session regardless of dependencies
    #[arg(long)]
    ignore_dependencies: bool,

    /// Print every group event as a JSON line
    #[arg(long)]
    events: bool,
}

impl From<RunFlags> for RunOptions {
    fn from(flags: RunFlags) -> Self {
        Self {
            max_concurrent: flags.max_concurrent,
            respect_dependencies: !flags.ignore_dependencies,
            detach_when_paused: true,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let project_dir = match &args.project_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let mut config = cohort_core::config::load_config(Some(&project_dir))?;
    if let Some(path) = &args.db_path {
        config.daemon.database_path = Some(path.clone());
    }
    if let Some(bin) = &args.claude_bin {
        config.daemon.claude_bin.clone_from(bin);
    }
    if let Some(n) = args.max_processes {
        config.daemon.max_processes = n;
    }
    if let Some(level) = &args.log_level {
        config.daemon.log_level.clone_from(level);
    }
    if let Some(secs) = args.terminate_timeout {
        config.daemon.terminate_timeout_secs = secs;
    }

    let log_filter = cohort_core::tracing_init::filter_for("cohort_daemon", &config.daemon.log_level);
    cohort_core::tracing_init::init_tracing(&log_filter, args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        max_processes = config.daemon.max_processes,
        claude_bin = %config.daemon.claude_bin.display(),
        "Starting cohort-daemon"
    );

    let db = match &config.daemon.database_path {
        Some(path) => {
            info!(path = %path.display(), "Opening database");
            Database::open(path).await?
        }
        None => {
            let default_path = default_db_path()?;
            info!(path = %default_path.display(), "Opening database (default path)");
            Database::open(&default_path).await?
        }
    };

    let pool = Arc::new(ProcessPool::new(config.daemon.max_processes));
    let executor = ClaudeExecutor::new(config.daemon.claude_bin.clone(), Arc::clone(&pool))
        .with_terminate_timeout(Duration::from_secs(config.daemon.terminate_timeout_secs));
    let broadcast = Arc::new(BroadcastEventSink::new());
    let events: Arc<dyn EventSink> = Arc::new(
        MultiEventSink::default()
            .with(Arc::new(TracingEventSink))
            .with(Arc::clone(&broadcast) as Arc<dyn EventSink>),
    );

    let manager = GroupManager::new(
        GroupDefaults::from(&config),
        Arc::new(db),
        Arc::new(executor),
        events,
    );

    let recovered = manager.recover_interrupted().await?;
    if !recovered.is_empty() {
        warn!(count = recovered.len(), "Recovered groups interrupted by a previous run");
    }

    let mut out = io::stdout();
    match args.command {
        GroupAction::Run { file, run } => {
            let group = manager.create_group(read_definition(&file)?).await?;
            writeln!(out, "Created group {} ({})", group.slug, group.id)?;
            let summary = run_group(&manager, &broadcast, &group.id, run, false).await?;
            print_summary(&mut out, &summary)?;
        }
        GroupAction::Create { file } => {
            let group = manager.create_group(read_definition(&file)?).await?;
            writeln!(out, "Created group {} ({})", group.slug, group.id)?;
        }
        GroupAction::Resume { group, run } => {
            let group = resolve(&manager, &group).await?;
            let resumed = group.status == GroupStatus::Paused;
            let summary = run_group(&manager, &broadcast, &group.id, run, resumed).await?;
            print_summary(&mut out, &summary)?;
        }
        GroupAction::List => {
            let groups = manager.list_groups().await?;
            if groups.is_empty() {
                writeln!(out, "No groups found.")?;
            } else {
                writeln!(
                    out,
                    "{:<36}  {:<24}  {:<10}  {:>8}  {:>9}",
                    "ID", "SLUG", "STATUS", "SESSIONS", "COST"
                )?;
                for g in &groups {
                    writeln!(
                        out,
                        "{:<36}  {:<24}  {:<10}  {:>8}  {:>9.4}",
                        g.id,
                        g.slug,
                        g.status.as_str(),
                        g.sessions.len(),
                        g.terminal_cost()
                    )?;
                }
            }
        }
        GroupAction::Status { group } => {
            let group = resolve(&manager, &group).await?;
            print_status(&mut out, &group)?;
        }
        GroupAction::Retry { group } => {
            let group = resolve(&manager, &group).await?;
            let reset = manager.retry_failed(&group.id).await?;
            writeln!(out, "Reset {reset} session(s) in {}", group.slug)?;
        }
        GroupAction::Delete { group } => {
            let group = resolve(&manager, &group).await?;
            manager.delete_group(&group.id).await?;
            writeln!(out, "Deleted group {}", group.slug)?;
        }
    }

    pool.close();
    info!("Daemon stopped");
    Ok(())
}

/// Run a group until it completes, fails or parks as paused. Ctrl+C and
/// SIGTERM cancel the run, which then ends paused. A `resumed` run continues
/// a paused group.
async fn run_group(
    manager: &GroupManager,
    broadcast: &BroadcastEventSink,
    group_id: &str,
    flags: RunFlags,
    resumed: bool,
) -> anyhow::Result<RunSummary> {
    let printer = flags
        .events
        .then(|| tokio::spawn(print_events(broadcast.subscribe())));

    let mut handle = if resumed {
        manager.start_resumed(group_id, flags.into()).await?
    } else {
        manager.start(group_id, flags.into()).await?
    };

    #[cfg(unix)]
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    #[cfg(unix)]
    let sigterm_future = sigterm.recv();
    #[cfg(not(unix))]
    let sigterm_future = std::future::pending::<Option<()>>();

    let result = tokio::select! {
        result = &mut handle => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, cancelling group");
            manager.cancel(group_id).await?;
            handle.await
        }
        _ = sigterm_future => {
            info!("Received SIGTERM, cancelling group");
            manager.cancel(group_id).await?;
            handle.await
        }
    };

    if let Some(printer) = printer {
        printer.abort();
    }
    Ok(result??)
}

async fn print_events(mut rx: broadcast::Receiver<GroupEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(line) => {
                    let _ = writeln!(io::stdout(), "{line}");
                }
                Err(e) => warn!(error = %e, "Failed to serialize event"),
            },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "Event printer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn read_definition(path: &Path) -> anyhow::Result<CreateGroup> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Invalid group definition {}: {e}", path.display()))
}

/// Look a group up by id, then by slug.
async fn resolve(manager: &GroupManager, key: &str) -> anyhow::Result<SessionGroup> {
    if let Ok(group) = manager.get_group(key).await {
        return Ok(group);
    }
    manager
        .find_by_slug(key)
        .await?
        .ok_or_else(|| anyhow::anyhow!("No group with id or slug '{key}'"))
}

fn print_summary(out: &mut impl Write, summary: &RunSummary) -> io::Result<()> {
    let p = &summary.progress;
    match summary.pause_reason {
        Some(reason) => writeln!(out, "Group {} ({reason})", summary.status)?,
        None => writeln!(out, "Group {}", summary.status)?,
    }
    writeln!(
        out,
        "  {}/{} completed, {} failed, {} skipped, {} pending ({:.0}%)",
        p.completed, p.total, p.failed, p.skipped, p.pending, p.percent_complete
    )?;
    writeln!(out, "  cost: ${:.4}", p.total_cost_usd)
}

fn print_status(out: &mut impl Write, group: &SessionGroup) -> io::Result<()> {
    writeln!(out, "{} ({})  {}", group.name, group.slug, group.status)?;
    if let Some(reason) = group.pause_reason {
        writeln!(out, "  paused: {reason}")?;
    }
    if let Some(error) = &group.error {
        writeln!(out, "  error: {error}")?;
    }
    writeln!(
        out,
        "  {:<20}  {:<10}  {:>9}  {:<20}  ERROR",
        "SESSION", "STATUS", "COST", "DEPENDS ON"
    )?;
    for s in &group.sessions {
        writeln!(
            out,
            "  {:<20}  {:<10}  {:>9.4}  {:<20}  {}",
            s.id,
            s.status.as_str(),
            s.cost_usd,
            s.depends_on.join(","),
            s.error.as_deref().unwrap_or("")
        )?;
    }
    Ok(())
}

/// Default database path: ~/.cohort/groups.db, unless the platform config
/// directory is known.
fn default_db_path() -> anyhow::Result<PathBuf> {
    if let Some(path) = cohort_core::config::database_path() {
        return Ok(path);
    }
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".cohort").join("groups.db"))
}

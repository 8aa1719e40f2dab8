//! Configuration resolution for Cohort.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/cohort/settings.json)
//! 3. Project config (.cohort/settings.json)
//! 4. Environment variables (`COHORT_*`)
//! 5. CLI arguments (highest priority, applied by the binary)
//!
//! Files are merged key by key, so a project file only needs the fields it
//! changes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::group::{BudgetAction, GroupConfig, PermissionMode};

/// Complete Cohort configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Defaults applied to every new group.
    #[serde(default)]
    pub groups: GroupConfig,
}

/// Daemon-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub database_path: Option<PathBuf>,
    /// Path to the `claude` CLI binary.
    pub claude_bin: PathBuf,
    /// Upper bound on Claude subprocesses across all running groups.
    pub max_processes: usize,
    pub log_level: String,
    /// Seconds between SIGTERM and SIGKILL when cancelling a session.
    pub terminate_timeout_secs: u64,
    /// Seconds the scheduler waits for a cancelled session to acknowledge.
    pub cancel_grace_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            claude_bin: PathBuf::from("claude"),
            max_processes: 8,
            log_level: "info".to_string(),
            terminate_timeout_secs: 5,
            cancel_grace_secs: 30,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(project_dir: Option<&Path>) -> Result<Config> {
    let mut merged = serde_json::to_value(Config::default())?;

    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        merge_json(&mut merged, load_config_file(&global_path)?);
    }

    if let Some(dir) = project_dir {
        let project_path = dir.join(".cohort").join("settings.json");
        if project_path.exists() {
            merge_json(&mut merged, load_config_file(&project_path)?);
        }
    }

    let mut config: Config = serde_json::from_value(merged)
        .map_err(|e| Error::Config(format!("Invalid merged configuration: {e}")))?;

    apply_env_overrides(&mut config);

    config
        .groups
        .validate()
        .map_err(|e| Error::Config(e.to_string()))?;

    Ok(config)
}

fn config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .ok()
            .map(|h| PathBuf::from(h).join(".cohort"))
    }
    #[cfg(target_os = "macos")]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library/Application Support/cohort"))
    }
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CONFIG_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| std::env::var("HOME").ok().map(|h| PathBuf::from(h).join(".config")))
            .map(|p| p.join("cohort"))
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
    {
        None
    }
}

/// Get the global config file path.
pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("settings.json"))
}

/// Get the default database path for the daemon.
pub fn database_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("groups.db"))
}

fn load_config_file(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

/// Recursively overlay `overlay` onto `base`: objects merge per key, every
/// other value replaces what was there.
fn merge_json(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn apply_env_overrides(config: &mut Config) {
    apply_overrides_from(config, |key| std::env::var(key).ok());
}

/// Apply `COHORT_*` overrides read through `lookup`. Unparseable values are
/// ignored.
fn apply_overrides_from<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("COHORT_DB_PATH") {
        config.daemon.database_path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("COHORT_CLAUDE_BIN") {
        config.daemon.claude_bin = PathBuf::from(val);
    }
    if let Some(n) = lookup("COHORT_MAX_PROCESSES").and_then(|v| v.parse().ok()) {
        config.daemon.max_processes = n;
    }
    if let Some(val) = lookup("COHORT_LOG_LEVEL") {
        config.daemon.log_level = val;
    }
    if let Some(n) = lookup("COHORT_MAX_CONCURRENT").and_then(|v| v.parse().ok()) {
        config.groups.concurrency.max_concurrent_sessions = n;
    }
    if let Some(n) = lookup("COHORT_MAX_BUDGET_USD").and_then(|v| v.parse().ok()) {
        config.groups.budget.max_budget_usd = Some(n);
    }
    if let Some(action) = lookup("COHORT_ON_BUDGET_EXCEEDED").and_then(|v| match v.as_str() {
        "pause" => Some(BudgetAction::Pause),
        "stop" => Some(BudgetAction::Stop),
        "continue" => Some(BudgetAction::Continue),
        _ => None,
    }) {
        config.groups.budget.on_budget_exceeded = action;
    }
    if let Some(val) = lookup("COHORT_DEFAULT_MODEL") {
        config.groups.session.model = Some(val);
    }
    if let Some(mode) = lookup("COHORT_PERMISSION_MODE").and_then(|v| match v.as_str() {
        "default" => Some(PermissionMode::Default),
        "accept_edits" => Some(PermissionMode::AcceptEdits),
        "bypass_permissions" => Some(PermissionMode::BypassPermissions),
        _ => None,
    }) {
        config.groups.session.permission_mode = mode;
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.daemon.max_processes, 8);
        assert_eq!(config.daemon.cancel_grace_secs, 30);
        assert_eq!(config.groups.concurrency.max_concurrent_sessions, 3);
        assert!(config.groups.budget.max_budget_usd.is_none());
    }

    #[test]
    fn merge_keeps_unmentioned_fields() {
        let mut base = serde_json::to_value(Config::default()).unwrap();
        let overlay = serde_json::json!({
            "daemon": { "max_processes": 2 },
            "groups": { "budget": { "max_budget_usd": 5.0 } }
        });
        merge_json(&mut base, overlay);
        let config: Config = serde_json::from_value(base).unwrap();
        assert_eq!(config.daemon.max_processes, 2);
        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.groups.budget.max_budget_usd, Some(5.0));
        assert!((config.groups.budget.warning_threshold - 0.8).abs() < f64::EPSILON);
    }

    #[test]
    fn env_overrides_apply() {
        let vars: HashMap<&str, &str> = [
            ("COHORT_MAX_CONCURRENT", "7"),
            ("COHORT_MAX_BUDGET_USD", "12.5"),
            ("COHORT_ON_BUDGET_EXCEEDED", "stop"),
            ("COHORT_MAX_PROCESSES", "not-a-number"),
            ("COHORT_PERMISSION_MODE", "accept_edits"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();
        apply_overrides_from(&mut config, |k| vars.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.groups.concurrency.max_concurrent_sessions, 7);
        assert_eq!(config.groups.budget.max_budget_usd, Some(12.5));
        assert_eq!(config.groups.budget.on_budget_exceeded, BudgetAction::Stop);
        assert_eq!(
            config.groups.session.permission_mode,
            PermissionMode::AcceptEdits
        );
        // Invalid value leaves the default untouched
        assert_eq!(config.daemon.max_processes, 8);
    }

    #[test]
    fn project_settings_file_is_loaded() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings_dir = dir.path().join(".cohort");
        std::fs::create_dir_all(&settings_dir).unwrap();
        std::fs::write(
            settings_dir.join("settings.json"),
            r#"{"groups":{"concurrency":{"max_concurrent_sessions":5}}}"#,
        )
        .unwrap();

        let config = load_config(Some(dir.path())).unwrap();
        // An env override may win, but the project value must never be lost to
        // the built-in default.
        if std::env::var("COHORT_MAX_CONCURRENT").is_err() {
            assert_eq!(config.groups.concurrency.max_concurrent_sessions, 5);
        }
    }

    #[test]
    fn malformed_project_settings_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let settings_dir = dir.path().join(".cohort");
        std::fs::create_dir_all(&settings_dir).unwrap();
        std::fs::write(settings_dir.join("settings.json"), "{ not json").unwrap();

        let err = load_config(Some(dir.path())).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}

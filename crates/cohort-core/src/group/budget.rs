//! Budget classification for a group's cumulative cost.

use serde::{Deserialize, Serialize};

use super::types::BudgetConfig;

/// Where the cumulative cost sits relative to the configured ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    Ok,
    /// At or past the warning threshold but below the ceiling.
    Warning,
    /// At or past the ceiling.
    Exceeded,
}

/// Evaluates cumulative cost against a [`BudgetConfig`].
///
/// Cost is only known once a session finishes, so callers classify after
/// every completion rather than continuously.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetTracker {
    config: BudgetConfig,
}

impl BudgetTracker {
    pub const fn new(config: BudgetConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Classify `cost`. Without a ceiling everything is `Ok`.
    pub fn classify(&self, cost: f64) -> BudgetStatus {
        let Some(max) = self.config.max_budget_usd else {
            return BudgetStatus::Ok;
        };
        if cost >= max {
            BudgetStatus::Exceeded
        } else if cost >= self.config.warning_threshold * max {
            BudgetStatus::Warning
        } else {
            BudgetStatus::Ok
        }
    }
}

//! Event sinks: where a running group's events go.
//!
//! Emission is synchronous and infallible so the scheduling loop never waits
//! on, or fails because of, a subscriber.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use cohort_core::group::{GroupEvent, GroupEventKind};

/// Broadcast channel capacity for group events.
const EVENT_BROADCAST_CAPACITY: usize = 256;

/// Receives every event a group produces.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: GroupEvent);
}

/// Fans events out to any number of `tokio` broadcast subscribers.
///
/// Events sent while nobody is subscribed are dropped; slow subscribers see
/// `RecvError::Lagged`.
pub struct BroadcastEventSink {
    tx: broadcast::Sender<GroupEvent>,
}

impl BroadcastEventSink {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BROADCAST_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GroupEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: GroupEvent) {
        let _ = self.tx.send(event);
    }
}

/// Writes one structured log line per event.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: GroupEvent) {
        let group_id = event.group_id.as_str();
        let event_type = event.event_type();
        match &event.kind {
            GroupEventKind::GroupSessionFailed {
                session_id,
                cost_usd,
                error,
            } => {
                warn!(group_id, session_id, cost_usd, error, event_type, "Group session failed");
            }
            GroupEventKind::GroupFailed { error } => {
                warn!(group_id, error, event_type, "Group failed");
            }
            GroupEventKind::BudgetWarning {
                current_cost_usd,
                max_budget_usd,
                ..
            } => {
                warn!(group_id, current_cost_usd, max_budget_usd, event_type, "Budget warning");
            }
            GroupEventKind::BudgetExceeded {
                current_cost_usd,
                max_budget_usd,
                action,
            } => {
                warn!(
                    group_id,
                    current_cost_usd,
                    max_budget_usd,
                    action = %action,
                    event_type,
                    "Budget exceeded"
                );
            }
            GroupEventKind::SessionProgress { .. } | GroupEventKind::GroupProgress { .. } => {
                debug!(group_id, session_id = event.session_id(), event_type, "Progress");
            }
            _ => {
                info!(group_id, session_id = event.session_id(), event_type, "Group event");
            }
        }
    }
}

/// Forwards each event to every inner sink, in order.
#[derive(Default)]
pub struct MultiEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl MultiEventSink {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    #[must_use]
    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for MultiEventSink {
    fn emit(&self, event: GroupEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.emit(event.clone());
            }
            last.emit(event);
        }
    }
}

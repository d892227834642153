use serde::Serialize;
use std::collections::HashMap;

/// Counters kept by the dispatch task
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    pub commands_processed: u64,
    pub engine_callbacks: u64,
    pub app_commands: u64,
    pub events_emitted: u64,
    /// Callbacks discarded because their handles did not resolve
    pub callbacks_dropped: u64,
    pub dropped_by_kind: HashMap<String, u64>,
    pub decode_failures: u64,
    pub transitions_rejected: u64,
    pub precondition_violations: u64,
    pub queries_issued: u64,
    pub queries_failed: u64,
}

impl DispatchStats {
    pub(crate) fn record_drop(&mut self, kind: &str) {
        self.callbacks_dropped += 1;
        *self.dropped_by_kind.entry(kind.to_string()).or_insert(0) += 1;
    }

    pub fn dropped(&self, kind: &str) -> u64 {
        self.dropped_by_kind.get(kind).copied().unwrap_or(0)
    }
}

//! Runtime configuration for a [`System`](super::System)

use serde::{Deserialize, Serialize};

use crate::errors::{WalletSystemError, WalletSystemResult};

/// Upper bound on the dispatch queue; larger values are almost certainly a unit mistake
const MAX_DISPATCH_QUEUE_CAPACITY: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Capacity of the bounded engine -> dispatch queue
    pub dispatch_queue_capacity: usize,
    /// Maximum number of registered listeners (unlimited if `None`)
    pub max_listeners: Option<usize>,
    /// Treat precondition violations as fatal (debug assertion)
    pub strict_preconditions: bool,
    /// Log every event at debug level when it is queued for delivery
    pub trace_events: bool,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            dispatch_queue_capacity: 1024,
            max_listeners: None,
            strict_preconditions: cfg!(debug_assertions),
            trace_events: false,
        }
    }
}

impl SystemConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dispatch_queue_capacity(mut self, capacity: usize) -> Self {
        self.dispatch_queue_capacity = capacity;
        self
    }

    pub fn with_max_listeners(mut self, max_listeners: usize) -> Self {
        self.max_listeners = Some(max_listeners);
        self
    }

    pub fn with_strict_preconditions(mut self, strict: bool) -> Self {
        self.strict_preconditions = strict;
        self
    }

    pub fn with_trace_events(mut self, trace: bool) -> Self {
        self.trace_events = trace;
        self
    }

    /// Parse from JSON; missing fields take their defaults
    pub fn from_json_str(json: &str) -> WalletSystemResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| WalletSystemError::configuration("json", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> WalletSystemResult<()> {
        if self.dispatch_queue_capacity == 0 {
            return Err(WalletSystemError::configuration(
                "dispatch_queue_capacity",
                "must be greater than zero",
            ));
        }
        if self.dispatch_queue_capacity > MAX_DISPATCH_QUEUE_CAPACITY {
            return Err(WalletSystemError::configuration(
                "dispatch_queue_capacity",
                format!("must be at most {MAX_DISPATCH_QUEUE_CAPACITY}"),
            ));
        }
        if self.max_listeners == Some(0) {
            return Err(WalletSystemError::configuration(
                "max_listeners",
                "must allow at least one listener",
            ));
        }
        Ok(())
    }
}

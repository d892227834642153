//! Listener that writes every event to `tracing`
//!
//! Lifecycle changes and failures log at `info!`/`warn!`; chatty events
//! (sync progress, block updates, confirmation counts) log at `debug!` so a
//! default `info` filter keeps the output readable.

use async_trait::async_trait;

use crate::events::types::{Event, EventType, ManagerEvent, SerializableEvent, TransferEvent, WalletEvent};
use crate::events::{EventListener, ListenerResult, SharedEvent};
use crate::records::TransferState;

/// Verbosity levels for event logging
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Only failures: sync errors and failed transfers
    Minimal,
    /// Lifecycle events and balance changes
    Normal,
    /// Everything
    Verbose,
}

impl LogLevel {
    /// Check if an event should be logged at this level
    pub fn should_log(&self, event: &Event) -> bool {
        match self {
            LogLevel::Verbose => true,
            LogLevel::Normal => !is_chatty(event),
            LogLevel::Minimal => is_failure(event),
        }
    }
}

fn is_chatty(event: &Event) -> bool {
    matches!(
        event,
        Event::Manager {
            event: ManagerEvent::SyncProgress { .. } | ManagerEvent::BlockUpdated { .. },
            ..
        } | Event::Transfer {
            event: TransferEvent::ConfirmationsUpdated { .. },
            ..
        }
    )
}

fn is_failure(event: &Event) -> bool {
    match event {
        Event::Manager {
            event: ManagerEvent::SyncEnded { reason },
            ..
        } => !reason.is_success(),
        Event::Transfer {
            event:
                TransferEvent::Changed {
                    new_state: TransferState::Failed { .. },
                    ..
                },
            ..
        } => true,
        _ => false,
    }
}

/// Logs delivered events through `tracing`
#[derive(Debug, Clone)]
pub struct TracingLoggingListener {
    level: LogLevel,
    /// Log the compact JSON form instead of the one-line summary
    json: bool,
}

impl TracingLoggingListener {
    pub fn new() -> Self {
        Self {
            level: LogLevel::Normal,
            json: false,
        }
    }

    pub fn with_log_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    fn render(&self, event: &Event) -> String {
        if self.json {
            event
                .to_compact_json()
                .unwrap_or_else(|_| event.summary())
        } else {
            event.summary()
        }
    }
}

impl Default for TracingLoggingListener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventListener for TracingLoggingListener {
    fn name(&self) -> &'static str {
        "TracingLoggingListener"
    }

    fn wants_event(&self, event: &SharedEvent) -> bool {
        self.level.should_log(event)
    }

    async fn handle_event(&mut self, event: &SharedEvent) -> ListenerResult {
        let event_type = event.event_type();
        let message = self.render(event);

        if is_failure(event) {
            tracing::warn!(event_type, "{}", message);
        } else if is_chatty(event) {
            tracing::debug!(event_type, "{}", message);
        } else if let Event::Wallet {
            event: WalletEvent::FeeBasisUpdated { .. },
            ..
        } = event.as_ref()
        {
            tracing::debug!(event_type, "{}", message);
        } else {
            tracing::info!(event_type, "{}", message);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::{Backend, ManagerHandle, TransferHandle, WalletHandle, WalletPath};
    use crate::events::EventMetadata;
    use crate::records::{SyncStoppedReason, TransferFailure, TransferFailureReason};
    use std::sync::Arc;

    fn manager_event(event: ManagerEvent) -> Event {
        Event::Manager {
            metadata: EventMetadata::new(1, "test"),
            manager: ManagerHandle::new(Backend::Utxo, 1),
            event,
        }
    }

    #[test]
    fn test_levels() {
        let progress = manager_event(ManagerEvent::SyncProgress {
            percent_complete: 50.0,
            timestamp: None,
        });
        let failed_sync = manager_event(ManagerEvent::SyncEnded {
            reason: SyncStoppedReason::Unknown,
        });
        let created = manager_event(ManagerEvent::Created);

        assert!(LogLevel::Verbose.should_log(&progress));
        assert!(!LogLevel::Normal.should_log(&progress));
        assert!(LogLevel::Normal.should_log(&created));
        assert!(!LogLevel::Minimal.should_log(&created));
        assert!(LogLevel::Minimal.should_log(&failed_sync));
    }

    #[test]
    fn test_failed_transfer_is_a_failure() {
        let transfer = WalletPath::new(
            ManagerHandle::new(Backend::Account, 1),
            WalletHandle::new(Backend::Account, 2),
        )
        .transfer(TransferHandle::new(Backend::Account, 3));
        let event = Event::Transfer {
            metadata: EventMetadata::new(9, "test"),
            transfer,
            event: TransferEvent::Changed {
                old_state: TransferState::Submitted,
                new_state: TransferState::Failed {
                    failure: TransferFailure::new(TransferFailureReason::NonceTooLow),
                },
            },
        };
        assert!(LogLevel::Minimal.should_log(&event));
    }

    #[tokio::test]
    async fn test_handle_event_never_fails() {
        let mut listener = TracingLoggingListener::new()
            .with_log_level(LogLevel::Verbose)
            .with_json(true);
        let event = Arc::new(manager_event(ManagerEvent::BlockUpdated { height: 10 }));
        assert!(listener.wants_event(&event));
        assert!(listener.handle_event(&event).await.is_ok());
    }
}

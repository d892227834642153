//! Listener that records events for assertions in tests
//!
//! Events are captured into an `Arc<Mutex<Vec<_>>>` shared with a
//! [`RecordedEvents`] handle, so a test can keep inspecting them after the
//! listener itself has been moved into the system.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::data_structures::{ManagerHandle, TransferPath, WalletPath};
use crate::events::types::{Event, EventType};
use crate::events::{EventListener, ListenerResult, SharedEvent};

/// Read side of a [`RecordingListener`]
#[derive(Debug, Clone, Default)]
pub struct RecordedEvents {
    events: Arc<Mutex<Vec<SharedEvent>>>,
}

impl RecordedEvents {
    fn lock(&self) -> MutexGuard<'_, Vec<SharedEvent>> {
        self.events.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn all(&self) -> Vec<SharedEvent> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Event type names in delivery order
    pub fn types(&self) -> Vec<&'static str> {
        self.lock().iter().map(|event| event.event_type()).collect()
    }

    pub fn count_of(&self, event_type: &str) -> usize {
        self.lock()
            .iter()
            .filter(|event| event.event_type() == event_type)
            .count()
    }

    /// Events about one manager (manager scope only)
    pub fn for_manager(&self, manager: &ManagerHandle) -> Vec<SharedEvent> {
        self.filtered(|event| matches!(event, Event::Manager { manager: m, .. } if m == manager))
    }

    /// Events about one wallet (wallet scope only)
    pub fn for_wallet(&self, wallet: &WalletPath) -> Vec<SharedEvent> {
        self.filtered(|event| matches!(event, Event::Wallet { wallet: w, .. } if w == wallet))
    }

    /// Events about one transfer (transfer scope only)
    pub fn for_transfer(&self, transfer: &TransferPath) -> Vec<SharedEvent> {
        self.filtered(|event| matches!(event, Event::Transfer { transfer: t, .. } if t == transfer))
    }

    fn filtered(&self, predicate: impl Fn(&Event) -> bool) -> Vec<SharedEvent> {
        self.lock()
            .iter()
            .filter(|event| predicate(event))
            .cloned()
            .collect()
    }

    /// Sequence numbers in delivery order
    pub fn sequences(&self) -> Vec<u64> {
        self.lock()
            .iter()
            .map(|event| event.metadata().sequence)
            .collect()
    }

    /// Poll until at least `count` events arrived or `timeout` elapsed
    pub async fn wait_for_count(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Captures every delivered event
#[derive(Debug)]
pub struct RecordingListener {
    name: &'static str,
    events: RecordedEvents,
    /// Event types this listener reports an error for, after recording them
    fail_on: Vec<&'static str>,
}

impl RecordingListener {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            events: RecordedEvents::default(),
            fail_on: Vec::new(),
        }
    }

    /// Return an error from `handle_event` for these event types
    pub fn failing_on(mut self, event_types: &[&'static str]) -> Self {
        self.fail_on = event_types.to_vec();
        self
    }

    pub fn events(&self) -> RecordedEvents {
        self.events.clone()
    }
}

#[async_trait]
impl EventListener for RecordingListener {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn handle_event(&mut self, event: &SharedEvent) -> ListenerResult {
        self.events.lock().push(Arc::clone(event));
        let event_type = event.event_type();
        if self.fail_on.contains(&event_type) {
            return Err(format!("{} configured to fail on {event_type}", self.name).into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::Backend;
    use crate::events::types::{EventMetadata, ManagerEvent, SystemEvent};

    #[tokio::test]
    async fn test_records_in_order_and_filters() {
        let mut listener = RecordingListener::new("recorder").failing_on(&["SystemDeleted"]);
        let events = listener.events();
        let manager = ManagerHandle::new(Backend::Utxo, 5);

        listener
            .handle_event(&Arc::new(Event::System {
                metadata: EventMetadata::new(1, "test"),
                event: SystemEvent::ManagerAdded { manager },
            }))
            .await
            .unwrap();
        listener
            .handle_event(&Arc::new(Event::Manager {
                metadata: EventMetadata::new(2, "test"),
                manager,
                event: ManagerEvent::Created,
            }))
            .await
            .unwrap();
        let result = listener
            .handle_event(&Arc::new(Event::System {
                metadata: EventMetadata::new(3, "test"),
                event: SystemEvent::Deleted,
            }))
            .await;

        assert!(result.is_err());
        assert_eq!(
            events.types(),
            vec!["SystemManagerAdded", "ManagerCreated", "SystemDeleted"]
        );
        assert_eq!(events.sequences(), vec![1, 2, 3]);
        assert_eq!(events.for_manager(&manager).len(), 1);
        assert_eq!(events.count_of("ManagerCreated"), 1);
        assert!(events.wait_for_count(3, Duration::from_millis(10)).await);

        events.clear();
        assert!(events.is_empty());
    }
}

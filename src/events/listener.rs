//! Event listener trait and registry
//!
//! Listeners are called from the notifier task, never from an engine thread
//! and never while the dispatch context holds record state. A failing
//! listener is logged and counted; it does not stop delivery to the others.

use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error;
use tracing::{debug, info, warn};

use crate::data_structures::{ManagerHandle, TransferPath, WalletPath};
use crate::errors::{WalletSystemError, WalletSystemResult};
use crate::events::types::{
    Event, EventMetadata, EventType, ManagerEvent, SharedEvent, SystemEvent, TransferEvent,
    WalletEvent,
};

pub type ListenerResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Receives the system's event stream
///
/// There is one method per event scope. The default [`handle_event`]
/// routes each event to the matching method; override it instead to see
/// every event in one place.
///
/// # Examples
///
/// ```rust,no_run
/// use async_trait::async_trait;
/// use multichain_wallet_libs::data_structures::TransferPath;
/// use multichain_wallet_libs::events::{EventListener, EventMetadata, ListenerResult, TransferEvent};
///
/// struct ConfirmationPrinter;
///
/// #[async_trait]
/// impl EventListener for ConfirmationPrinter {
///     fn name(&self) -> &'static str {
///         "ConfirmationPrinter"
///     }
///
///     async fn on_transfer_event(
///         &mut self,
///         _metadata: &EventMetadata,
///         transfer: &TransferPath,
///         event: &TransferEvent,
///     ) -> ListenerResult {
///         if let TransferEvent::ConfirmationsUpdated { confirmations } = event {
///             println!("{transfer}: {confirmations} confirmations");
///         }
///         Ok(())
///     }
/// }
/// ```
///
/// [`handle_event`]: EventListener::handle_event
#[async_trait]
pub trait EventListener: Send + Sync {
    /// Unique name, used to reject duplicate registrations and in logs
    fn name(&self) -> &'static str;

    async fn on_system_event(&mut self, _metadata: &EventMetadata, _event: &SystemEvent) -> ListenerResult {
        Ok(())
    }

    async fn on_manager_event(
        &mut self,
        _metadata: &EventMetadata,
        _manager: &ManagerHandle,
        _event: &ManagerEvent,
    ) -> ListenerResult {
        Ok(())
    }

    async fn on_wallet_event(
        &mut self,
        _metadata: &EventMetadata,
        _wallet: &WalletPath,
        _event: &WalletEvent,
    ) -> ListenerResult {
        Ok(())
    }

    async fn on_transfer_event(
        &mut self,
        _metadata: &EventMetadata,
        _transfer: &TransferPath,
        _event: &TransferEvent,
    ) -> ListenerResult {
        Ok(())
    }

    /// Handle one event; routes by scope unless overridden
    async fn handle_event(&mut self, event: &SharedEvent) -> ListenerResult {
        match event.as_ref() {
            Event::System { metadata, event } => self.on_system_event(metadata, event).await,
            Event::Manager {
                metadata,
                manager,
                event,
            } => self.on_manager_event(metadata, manager, event).await,
            Event::Wallet {
                metadata,
                wallet,
                event,
            } => self.on_wallet_event(metadata, wallet, event).await,
            Event::Transfer {
                metadata,
                transfer,
                event,
            } => self.on_transfer_event(metadata, transfer, event).await,
        }
    }

    /// Check if this listener should receive `event`; all events by default
    fn wants_event(&self, _event: &SharedEvent) -> bool {
        true
    }

    /// Called once at registration; a failure rejects the registration
    async fn initialize(&mut self) -> ListenerResult {
        Ok(())
    }

    /// Called on removal and at system teardown; failures are only logged
    async fn cleanup(&mut self) -> ListenerResult {
        Ok(())
    }
}

/// Statistics about listener registry operations
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegistryStats {
    pub total_events_dispatched: u64,
    pub total_listener_calls: u64,
    pub total_listener_errors: u64,
    pub listeners_registered: u64,
    pub listeners_removed: u64,
    pub events_by_type: HashMap<String, u64>,
    pub errors_by_listener: HashMap<String, u64>,
}

/// Ordered set of listeners owned by the notifier task
pub struct ListenerRegistry {
    listeners: Vec<Box<dyn EventListener>>,
    max_listeners: Option<usize>,
    stats: RegistryStats,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: Vec::new(),
            max_listeners: None,
            stats: RegistryStats::default(),
        }
    }

    pub fn with_max_listeners(max_listeners: usize) -> Self {
        Self {
            max_listeners: Some(max_listeners),
            ..Self::new()
        }
    }

    /// Validate, initialize and append a listener
    ///
    /// # Errors
    ///
    /// - `InvalidListenerName` for an empty or whitespace-only name
    /// - `DuplicateListener` if a listener with the same name is registered
    /// - `TooManyListeners` if the limit would be exceeded
    /// - `ListenerInitialization` if `initialize` fails
    pub async fn register(&mut self, mut listener: Box<dyn EventListener>) -> WalletSystemResult<()> {
        let name = listener.name();

        if name.trim().is_empty() {
            return Err(WalletSystemError::InvalidListenerName {
                name: name.to_string(),
            });
        }

        if self.has_listener(name) {
            return Err(WalletSystemError::DuplicateListener {
                name: name.to_string(),
            });
        }

        if let Some(max) = self.max_listeners {
            if self.listeners.len() >= max {
                return Err(WalletSystemError::TooManyListeners {
                    current: self.listeners.len(),
                    max,
                });
            }
        }

        listener
            .initialize()
            .await
            .map_err(|e| WalletSystemError::ListenerInitialization {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        self.listeners.push(listener);
        self.stats.listeners_registered += 1;
        info!(listener = name, "Registered event listener");
        Ok(())
    }

    /// Clean up and remove a listener by name
    pub async fn remove(&mut self, name: &str) -> WalletSystemResult<()> {
        let index = self
            .listeners
            .iter()
            .position(|listener| listener.name() == name)
            .ok_or_else(|| WalletSystemError::ListenerNotFound {
                name: name.to_string(),
            })?;

        let mut listener = self.listeners.remove(index);
        if let Err(e) = listener.cleanup().await {
            warn!(listener = name, error = %e, "Listener cleanup failed");
        }
        self.stats.listeners_removed += 1;
        info!(listener = name, "Removed event listener");
        Ok(())
    }

    /// Deliver an event to every interested listener, in registration order
    pub async fn dispatch(&mut self, event: &SharedEvent) {
        let event_type = event.event_type();
        self.stats.total_events_dispatched += 1;
        *self
            .stats
            .events_by_type
            .entry(event_type.to_string())
            .or_insert(0) += 1;

        for listener in &mut self.listeners {
            if !listener.wants_event(event) {
                continue;
            }

            let listener_name = listener.name();
            self.stats.total_listener_calls += 1;

            if let Err(e) = listener.handle_event(event).await {
                self.stats.total_listener_errors += 1;
                *self
                    .stats
                    .errors_by_listener
                    .entry(listener_name.to_string())
                    .or_insert(0) += 1;
                warn!(
                    listener = listener_name,
                    event_type,
                    sequence = event.metadata().sequence,
                    error = %e,
                    "Event listener failed"
                );
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    pub fn has_listener(&self, name: &str) -> bool {
        self.listeners.iter().any(|listener| listener.name() == name)
    }

    /// Names in registration order
    pub fn listener_names(&self) -> Vec<&'static str> {
        self.listeners.iter().map(|listener| listener.name()).collect()
    }

    pub fn stats(&self) -> &RegistryStats {
        &self.stats
    }

    /// Clean up and drop every listener
    pub async fn shutdown(&mut self) {
        debug!(listeners = self.listeners.len(), "Shutting down listener registry");
        for listener in &mut self.listeners {
            if let Err(e) = listener.cleanup().await {
                warn!(listener = listener.name(), error = %e, "Listener cleanup failed");
            }
        }
        self.stats.listeners_removed += self.listeners.len() as u64;
        self.listeners.clear();
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::Backend;
    use std::sync::{Arc, Mutex};

    struct TestListener {
        name: &'static str,
        received: Arc<Mutex<Vec<String>>>,
        fail: bool,
        only_manager_events: bool,
        fail_init: bool,
        cleaned_up: Arc<Mutex<bool>>,
    }

    impl TestListener {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                received: Arc::new(Mutex::new(Vec::new())),
                fail: false,
                only_manager_events: false,
                fail_init: false,
                cleaned_up: Arc::new(Mutex::new(false)),
            }
        }
    }

    #[async_trait]
    impl EventListener for TestListener {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn handle_event(&mut self, event: &SharedEvent) -> ListenerResult {
            self.received
                .lock()
                .unwrap()
                .push(event.event_type().to_string());
            if self.fail {
                return Err("listener failure".into());
            }
            Ok(())
        }

        fn wants_event(&self, event: &SharedEvent) -> bool {
            !self.only_manager_events || event.scope() == "manager"
        }

        async fn initialize(&mut self) -> ListenerResult {
            if self.fail_init {
                return Err("no database".into());
            }
            Ok(())
        }

        async fn cleanup(&mut self) -> ListenerResult {
            *self.cleaned_up.lock().unwrap() = true;
            Ok(())
        }
    }

    fn system_event() -> SharedEvent {
        Arc::new(Event::System {
            metadata: EventMetadata::new(1, "test"),
            event: SystemEvent::Created,
        })
    }

    fn manager_event() -> SharedEvent {
        Arc::new(Event::Manager {
            metadata: EventMetadata::new(2, "test"),
            manager: ManagerHandle::new(Backend::Utxo, 1),
            event: ManagerEvent::SyncStarted,
        })
    }

    #[tokio::test]
    async fn test_registration_rules() {
        let mut registry = ListenerRegistry::with_max_listeners(2);
        registry.register(Box::new(TestListener::new("a"))).await.unwrap();

        let err = registry
            .register(Box::new(TestListener::new("a")))
            .await
            .unwrap_err();
        assert_eq!(err, WalletSystemError::DuplicateListener { name: "a".to_string() });

        let err = registry
            .register(Box::new(TestListener::new("  ")))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletSystemError::InvalidListenerName { .. }));

        let mut failing = TestListener::new("b");
        failing.fail_init = true;
        let err = registry.register(Box::new(failing)).await.unwrap_err();
        assert!(matches!(err, WalletSystemError::ListenerInitialization { .. }));

        registry.register(Box::new(TestListener::new("c"))).await.unwrap();
        let err = registry
            .register(Box::new(TestListener::new("d")))
            .await
            .unwrap_err();
        assert_eq!(err, WalletSystemError::TooManyListeners { current: 2, max: 2 });
        assert_eq!(registry.listener_names(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_failing_listener_is_isolated() {
        let mut registry = ListenerRegistry::new();
        let mut failing = TestListener::new("failing");
        failing.fail = true;
        let healthy = TestListener::new("healthy");
        let healthy_received = healthy.received.clone();

        registry.register(Box::new(failing)).await.unwrap();
        registry.register(Box::new(healthy)).await.unwrap();
        registry.dispatch(&system_event()).await;

        assert_eq!(*healthy_received.lock().unwrap(), vec!["SystemCreated"]);
        let stats = registry.stats();
        assert_eq!(stats.total_listener_calls, 2);
        assert_eq!(stats.total_listener_errors, 1);
        assert_eq!(stats.errors_by_listener.get("failing"), Some(&1));
    }

    #[tokio::test]
    async fn test_wants_event_filters() {
        let mut registry = ListenerRegistry::new();
        let mut selective = TestListener::new("selective");
        selective.only_manager_events = true;
        let received = selective.received.clone();
        registry.register(Box::new(selective)).await.unwrap();

        registry.dispatch(&system_event()).await;
        registry.dispatch(&manager_event()).await;
        assert_eq!(*received.lock().unwrap(), vec!["ManagerSyncStarted"]);
        assert_eq!(registry.stats().total_events_dispatched, 2);
        assert_eq!(registry.stats().total_listener_calls, 1);
    }

    #[tokio::test]
    async fn test_remove_and_shutdown_clean_up() {
        let mut registry = ListenerRegistry::new();
        let first = TestListener::new("first");
        let first_cleaned = first.cleaned_up.clone();
        let second = TestListener::new("second");
        let second_cleaned = second.cleaned_up.clone();
        registry.register(Box::new(first)).await.unwrap();
        registry.register(Box::new(second)).await.unwrap();

        registry.remove("first").await.unwrap();
        assert!(*first_cleaned.lock().unwrap());
        assert!(matches!(
            registry.remove("first").await,
            Err(WalletSystemError::ListenerNotFound { .. })
        ));

        registry.shutdown().await;
        assert!(*second_cleaned.lock().unwrap());
        assert_eq!(registry.listener_count(), 0);
        assert_eq!(registry.stats().listeners_removed, 2);
    }

    struct RoutingListener {
        scopes: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl EventListener for RoutingListener {
        fn name(&self) -> &'static str {
            "routing"
        }

        async fn on_system_event(&mut self, _: &EventMetadata, _: &SystemEvent) -> ListenerResult {
            self.scopes.lock().unwrap().push("system");
            Ok(())
        }

        async fn on_manager_event(
            &mut self,
            _: &EventMetadata,
            _: &ManagerHandle,
            _: &ManagerEvent,
        ) -> ListenerResult {
            self.scopes.lock().unwrap().push("manager");
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_handle_event_routes_by_scope() {
        let scopes = Arc::new(Mutex::new(Vec::new()));
        let mut listener = RoutingListener {
            scopes: scopes.clone(),
        };
        listener.handle_event(&manager_event()).await.unwrap();
        listener.handle_event(&system_event()).await.unwrap();
        assert_eq!(*scopes.lock().unwrap(), vec!["manager", "system"]);
    }
}

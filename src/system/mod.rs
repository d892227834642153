//! The wallet system context
//!
//! A [`System`] is constructed once by the application and owns everything
//! else: the record tree, the dispatch task, the notifier task and the
//! attached engines. There is no global instance; pass the `System` (or an
//! `Arc` of it) to whatever needs it.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use multichain_wallet_libs::data_structures::{Account, Backend, Network};
//! use multichain_wallet_libs::engine::mocks::MockUtxoEngine;
//! use multichain_wallet_libs::records::ManagerMode;
//! use multichain_wallet_libs::system::{System, SystemConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let builder = System::builder(SystemConfig::default());
//! let engine = MockUtxoEngine::new().with_callbacks(builder.callbacks(Backend::Utxo));
//! let system = builder.with_utxo_engine(Arc::new(engine)).build()?;
//!
//! let manager = system
//!     .create_manager(Account::new("alice", 0), Network::bitcoin(false), ManagerMode::P2pOnly, "/tmp/wallet")
//!     .await?;
//! system.connect(manager).await?;
//! system.flush().await?;
//! println!("{:?}", system.manager_state(&manager));
//! system.shutdown().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;

pub use config::SystemConfig;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::data_structures::{
    Account, Address, Amount, Backend, FeeBasis, ManagerHandle, Network, TransferPath, WalletPath,
};
use crate::dispatch::callbacks::Intake;
use crate::dispatch::command::{AppCommand, DispatchCommand, Reply};
use crate::dispatch::dispatcher::{Engines, EventDispatcher};
use crate::dispatch::notifier::Notifier;
use crate::dispatch::{DispatchStats, EngineCallbacks};
use crate::engine::{AccountEngine, EngineBackend, SubmitAuth, UtxoEngine};
use crate::errors::{WalletSystemError, WalletSystemResult};
use crate::events::{EventListener, ListenerRegistry, RegistryStats};
use crate::query::QueryClient;
use crate::records::{ManagerMode, ManagerState, SystemState, TransferRecord, TransferState};

/// Assembles a [`System`]
///
/// The dispatch queue exists from the moment the builder does, so engines can
/// be handed their [`EngineCallbacks`] before they are attached.
pub struct SystemBuilder {
    config: SystemConfig,
    intake: Intake,
    receiver: mpsc::Receiver<DispatchCommand>,
    engines: Engines,
    query_client: Option<Arc<dyn QueryClient>>,
    listeners: Vec<Box<dyn EventListener>>,
}

impl SystemBuilder {
    fn new(config: SystemConfig) -> Self {
        // A zero capacity is reported by `build`; the channel itself needs at least one slot
        let (sender, receiver) = mpsc::channel(config.dispatch_queue_capacity.max(1));
        Self {
            config,
            intake: Intake::new(sender),
            receiver,
            engines: Engines::default(),
            query_client: None,
            listeners: Vec::new(),
        }
    }

    /// Callback entry points for the engine serving `backend`
    pub fn callbacks(&self, backend: Backend) -> EngineCallbacks {
        EngineCallbacks::new(backend, self.intake.clone())
    }

    pub fn with_utxo_engine(mut self, engine: Arc<dyn UtxoEngine>) -> Self {
        self.engines.attach(EngineBackend::Utxo(engine));
        self
    }

    pub fn with_account_engine(mut self, engine: Arc<dyn AccountEngine>) -> Self {
        self.engines.attach(EngineBackend::Account(engine));
        self
    }

    pub fn with_query_client(mut self, client: Arc<dyn QueryClient>) -> Self {
        self.query_client = Some(client);
        self
    }

    /// Register a listener before the system starts, so it also sees
    /// `SystemEvent::Created`
    pub fn with_listener(mut self, listener: Box<dyn EventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Validate the configuration and start the dispatch and notifier tasks
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> WalletSystemResult<System> {
        self.config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| WalletSystemError::configuration("runtime", e.to_string()))?;

        let state = Arc::new(RwLock::new(SystemState::new()));
        let stats = Arc::new(Mutex::new(DispatchStats::default()));
        let listener_stats = Arc::new(Mutex::new(RegistryStats::default()));

        let registry = match self.config.max_listeners {
            Some(max) => ListenerRegistry::with_max_listeners(max),
            None => ListenerRegistry::new(),
        };
        let (notify_sender, notify_receiver) = mpsc::unbounded_channel();
        let notifier = Notifier::new(registry, notify_receiver, Arc::clone(&listener_stats));
        let notifier_task = runtime.spawn(notifier.run(self.listeners));

        let dispatcher = EventDispatcher::new(
            Arc::clone(&state),
            self.engines,
            self.query_client,
            self.config.clone(),
            Arc::clone(&stats),
            notify_sender,
            self.intake.downgrade(),
        );
        let dispatcher_task = runtime.spawn(dispatcher.run(self.receiver));

        info!(
            queue_capacity = self.config.dispatch_queue_capacity,
            strict_preconditions = self.config.strict_preconditions,
            "Wallet system started"
        );

        Ok(System {
            intake: self.intake,
            state,
            stats,
            listener_stats,
            config: self.config,
            tasks: Mutex::new(Some((dispatcher_task, notifier_task))),
            shut_down: AtomicBool::new(false),
        })
    }
}

/// The running wallet system
pub struct System {
    intake: Intake,
    state: Arc<RwLock<SystemState>>,
    stats: Arc<Mutex<DispatchStats>>,
    listener_stats: Arc<Mutex<RegistryStats>>,
    config: SystemConfig,
    tasks: Mutex<Option<(JoinHandle<()>, JoinHandle<()>)>>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for System {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("System")
            .field("config", &self.config)
            .field("shut_down", &self.shut_down.load(Ordering::Relaxed))
            .finish()
    }
}

impl System {
    pub fn builder(config: SystemConfig) -> SystemBuilder {
        SystemBuilder::new(config)
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Additional callback entry points for `backend`
    pub fn callbacks(&self, backend: Backend) -> EngineCallbacks {
        EngineCallbacks::new(backend, self.intake.clone())
    }

    async fn send(&self, command: DispatchCommand) -> WalletSystemResult<()> {
        if self.intake.send_async(command).await {
            Ok(())
        } else {
            Err(WalletSystemError::DispatcherClosed)
        }
    }

    /// Enqueue an application command and wait for the dispatch task's answer
    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> AppCommand) -> WalletSystemResult<T> {
        let (reply, response) = oneshot::channel();
        self.send(DispatchCommand::App(command(reply))).await?;
        response.await.map_err(|_| WalletSystemError::DispatcherClosed)?
    }

    // ---- commands ----

    /// Create (or find) the manager for `account` on `network`
    ///
    /// The manager's primary wallet, holding the network's native currency, is
    /// created with it.
    pub async fn create_manager(
        &self,
        account: Account,
        network: Network,
        mode: ManagerMode,
        storage_path: impl Into<PathBuf>,
    ) -> WalletSystemResult<ManagerHandle> {
        let storage_path = storage_path.into();
        self.request(|reply| AppCommand::CreateManager {
            account,
            network,
            mode,
            storage_path,
            reply,
        })
        .await
    }

    /// Create (or find) the wallet holding `currency_code` under `manager`
    pub async fn create_wallet(
        &self,
        manager: ManagerHandle,
        currency_code: &str,
    ) -> WalletSystemResult<WalletPath> {
        let currency = currency_code.to_string();
        self.request(|reply| AppCommand::CreateWallet {
            manager,
            currency,
            reply,
        })
        .await
    }

    /// Ask the engine to start network activity; a no-op while connected or syncing
    pub async fn connect(&self, manager: ManagerHandle) -> WalletSystemResult<()> {
        self.request(|reply| AppCommand::Connect { manager, reply })
            .await
    }

    pub async fn disconnect(&self, manager: ManagerHandle) -> WalletSystemResult<()> {
        self.request(|reply| AppCommand::Disconnect { manager, reply })
            .await
    }

    /// Ask the engine for a full rescan
    pub async fn sync(&self, manager: ManagerHandle) -> WalletSystemResult<()> {
        self.request(|reply| AppCommand::Sync { manager, reply }).await
    }

    pub async fn set_mode(&self, manager: ManagerHandle, mode: ManagerMode) -> WalletSystemResult<()> {
        self.request(|reply| AppCommand::SetMode {
            manager,
            mode,
            reply,
        })
        .await
    }

    /// Create a transfer from `wallet`; without `fee_basis` the wallet's
    /// default fee basis is used
    pub async fn create_transfer(
        &self,
        wallet: WalletPath,
        target: Address,
        amount: Amount,
        fee_basis: Option<FeeBasis>,
    ) -> WalletSystemResult<TransferPath> {
        self.request(|reply| AppCommand::CreateTransfer {
            wallet,
            target,
            amount,
            fee_basis,
            reply,
        })
        .await
    }

    /// Hand a transfer to its engine for signing and broadcast
    ///
    /// Returns once the engine accepted the command; progress arrives as
    /// transfer events.
    pub async fn submit_transfer(&self, transfer: TransferPath, auth: SubmitAuth) -> WalletSystemResult<()> {
        self.request(|reply| AppCommand::SubmitTransfer {
            transfer,
            auth,
            reply,
        })
        .await
    }

    pub async fn register_listener(&self, listener: Box<dyn EventListener>) -> WalletSystemResult<()> {
        let (reply, response) = oneshot::channel();
        self.send(DispatchCommand::RegisterListener { listener, reply })
            .await?;
        response.await.map_err(|_| WalletSystemError::DispatcherClosed)?
    }

    pub async fn remove_listener(&self, name: &str) -> WalletSystemResult<()> {
        let (reply, response) = oneshot::channel();
        self.send(DispatchCommand::RemoveListener {
            name: name.to_string(),
            reply,
        })
        .await?;
        response.await.map_err(|_| WalletSystemError::DispatcherClosed)?
    }

    /// Wait until everything enqueued before this call has been applied and
    /// its events delivered to every listener
    pub async fn flush(&self) -> WalletSystemResult<()> {
        let (reply, reached) = oneshot::channel();
        self.send(DispatchCommand::Flush { reply }).await?;
        reached.await.map_err(|_| WalletSystemError::DispatcherClosed)
    }

    /// Delete every manager, deliver the remaining events, clean up listeners
    /// and stop both tasks
    ///
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) -> WalletSystemResult<()> {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let (reply, done) = oneshot::channel();
        self.send(DispatchCommand::Shutdown { reply: Some(reply) })
            .await?;
        done.await.map_err(|_| WalletSystemError::DispatcherClosed)?;

        let tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some((dispatcher, notifier)) = tasks {
            for (name, task) in [("dispatcher", dispatcher), ("notifier", notifier)] {
                if let Err(e) = task.await {
                    warn!(task = name, error = %e, "Task ended abnormally");
                }
            }
        }
        info!("Wallet system stopped");
        Ok(())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    // ---- reads ----

    /// Shared read access to the whole record tree
    ///
    /// Hold the guard briefly: the dispatch task waits for it before applying
    /// the next command.
    pub fn read(&self) -> RwLockReadGuard<'_, SystemState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn managers(&self) -> Vec<ManagerHandle> {
        self.read().managers().handles().copied().collect()
    }

    pub fn manager_state(&self, manager: &ManagerHandle) -> Option<ManagerState> {
        self.read()
            .manager(manager)
            .map(|record| record.state().clone())
    }

    pub fn manager_height(&self, manager: &ManagerHandle) -> Option<u64> {
        self.read().manager(manager).map(|record| record.height())
    }

    pub fn manager_mode(&self, manager: &ManagerHandle) -> Option<ManagerMode> {
        self.read().manager(manager).map(|record| record.mode())
    }

    /// Wallets of `manager`, in creation order
    pub fn wallets(&self, manager: &ManagerHandle) -> Vec<WalletPath> {
        self.read()
            .manager(manager)
            .map(|record| record.wallets().iter().map(|(_, wallet)| *wallet.path()).collect())
            .unwrap_or_default()
    }

    pub fn primary_wallet(&self, manager: &ManagerHandle) -> Option<WalletPath> {
        self.read()
            .manager(manager)
            .and_then(|record| record.primary_wallet())
            .map(|wallet| *wallet.path())
    }

    pub fn wallet_balance(&self, wallet: &WalletPath) -> Option<Amount> {
        self.read().wallet(wallet).map(|record| record.balance().clone())
    }

    pub fn wallet_fee_basis(&self, wallet: &WalletPath) -> Option<FeeBasis> {
        self.read()
            .wallet(wallet)
            .and_then(|record| record.default_fee_basis().cloned())
    }

    /// Snapshot of a wallet's transfers, in creation order
    pub fn transfers(&self, wallet: &WalletPath) -> Vec<TransferRecord> {
        self.read()
            .wallet(wallet)
            .map(|record| {
                record
                    .transfers()
                    .iter()
                    .map(|(_, transfer)| transfer.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn transfer(&self, transfer: &TransferPath) -> Option<TransferRecord> {
        self.read().transfer(transfer).cloned()
    }

    pub fn transfer_state(&self, transfer: &TransferPath) -> Option<TransferState> {
        self.read()
            .transfer(transfer)
            .map(|record| record.state().clone())
    }

    /// Confirmations at the manager's current height; `None` unless included
    pub fn confirmations(&self, transfer: &TransferPath) -> Option<u64> {
        self.read().confirmations(transfer)
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn listener_stats(&self) -> RegistryStats {
        self.listener_stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Drop for System {
    fn drop(&mut self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        // Best effort: the dispatcher tears down on its own once this arrives
        if !self.intake.try_send(DispatchCommand::Shutdown { reply: None }) {
            debug!("System dropped while the dispatch queue was full or closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mocks::{MockAccountEngine, MockUtxoEngine};
    use crate::events::listeners::RecordingListener;
    use std::time::Duration;

    fn build_utxo() -> (System, MockUtxoEngine) {
        let builder = System::builder(SystemConfig::default());
        let engine = MockUtxoEngine::new().with_callbacks(builder.callbacks(Backend::Utxo));
        let system = builder
            .with_utxo_engine(Arc::new(engine.clone()))
            .build()
            .unwrap();
        (system, engine)
    }

    #[test]
    fn test_build_requires_runtime() {
        let err = System::builder(SystemConfig::default()).build().unwrap_err();
        assert_eq!(err.category(), "configuration");
    }

    #[tokio::test]
    async fn test_build_rejects_invalid_config() {
        let err = System::builder(SystemConfig::new().with_dispatch_queue_capacity(0))
            .build()
            .unwrap_err();
        assert!(matches!(err, WalletSystemError::Configuration { .. }));
    }

    #[tokio::test]
    async fn test_create_manager_is_idempotent_per_account_and_network() {
        let (system, engine) = build_utxo();
        let account = Account::new("alice", 0);

        let first = system
            .create_manager(account.clone(), Network::bitcoin(false), ManagerMode::P2pOnly, "/tmp/a")
            .await
            .unwrap();
        let second = system
            .create_manager(account, Network::bitcoin(false), ManagerMode::P2pOnly, "/tmp/a")
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(system.managers(), vec![first]);
        assert_eq!(engine.commands(), vec!["create_manager"]);
        assert_eq!(system.wallets(&first).len(), 1);
        assert!(system.primary_wallet(&first).is_some());
        system.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_and_sync_round_trip_through_engine_callbacks() {
        let (system, engine) = build_utxo();
        let manager = system
            .create_manager(Account::new("bob", 0), Network::bitcoin(true), ManagerMode::P2pOnly, "/tmp/b")
            .await
            .unwrap();

        system.connect(manager).await.unwrap();
        system.flush().await.unwrap();
        assert_eq!(system.manager_state(&manager), Some(ManagerState::Connected));

        system.sync(manager).await.unwrap();
        system.flush().await.unwrap();
        assert_eq!(system.manager_state(&manager), Some(ManagerState::Connected));

        // Already connected: no second engine command
        system.connect(manager).await.unwrap();
        assert_eq!(engine.commands(), vec!["create_manager", "connect", "sync"]);
        system.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_and_closes_commands() {
        let (system, engine) = build_utxo();
        let recorder = RecordingListener::new("recorder");
        let events = recorder.events();
        system.register_listener(Box::new(recorder)).await.unwrap();
        system
            .create_manager(Account::new("carol", 0), Network::bitcoin(true), ManagerMode::ApiOnly, "/tmp/c")
            .await
            .unwrap();

        system.shutdown().await.unwrap();
        system.shutdown().await.unwrap();
        assert!(system.is_shut_down());
        assert!(engine.commands().contains(&"release_manager".to_string()));
        assert_eq!(events.types().last().copied(), Some("SystemDeleted"));
        assert!(events.wait_for_count(1, Duration::from_millis(10)).await);

        let err = system.connect(ManagerHandle::new(Backend::Utxo, 1)).await.unwrap_err();
        assert_eq!(err, WalletSystemError::DispatcherClosed);
        assert_eq!(system.listener_stats().listeners_removed, 1);
    }

    #[tokio::test]
    async fn test_set_mode_only_while_idle() {
        let builder = System::builder(SystemConfig::default());
        let engine = MockAccountEngine::new().with_callbacks(builder.callbacks(Backend::Account));
        let system = builder
            .with_account_engine(Arc::new(engine.clone()))
            .build()
            .unwrap();
        let manager = system
            .create_manager(Account::new("dave", 0), Network::ethereum(true), ManagerMode::ApiOnly, "/tmp/d")
            .await
            .unwrap();

        system.set_mode(manager, ManagerMode::P2pOnly).await.unwrap();
        assert_eq!(system.manager_mode(&manager), Some(ManagerMode::P2pOnly));

        system.connect(manager).await.unwrap();
        system.flush().await.unwrap();
        let err = system.set_mode(manager, ManagerMode::ApiOnly).await.unwrap_err();
        assert!(matches!(err, WalletSystemError::InvalidManagerState { .. }));
        assert_eq!(system.manager_mode(&manager), Some(ManagerMode::P2pOnly));
        assert!(engine.commands().contains(&"set_mode:p2p_only".to_string()));
        system.shutdown().await.unwrap();
    }
}

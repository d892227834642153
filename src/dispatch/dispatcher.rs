//! The serialized dispatch context
//!
//! One task drains the dispatch queue and applies every engine callback and
//! application command to the record tree, in queue order. It is the only
//! code that admits, mutates or removes records. Each command runs under a
//! single write lock; the events it produced are numbered and handed to the
//! notifier after the lock is released.
//!
//! Callback handling follows one pattern:
//!
//! 1. tag the raw handles with the callback's backend;
//! 2. resolve the manager, then the wallet, then the transfer; anything that
//!    does not resolve is dropped with a diagnostic (only "created" callbacks
//!    admit new records);
//! 3. decode raw values into normalized types;
//! 4. apply the transition and emit events in the order it was applied.

use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock, RwLockWriteGuard};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::callbacks::{
    EngineCallback, ManagerCallback, TransferCallback, WalletCallback, REENTRANT_CALLBACKS,
};
use super::command::{AppCommand, DispatchCommand, Reply};
use super::notifier::Notification;
use super::stats::DispatchStats;
use crate::data_structures::{
    Account, Address, Amount, Backend, Currency, EngineHandle, FeeBasis, ManagerHandle, Network,
    TransferHandle, TransferHash, TransferPath, WalletHandle, WalletPath,
};
use crate::engine::{EngineBackend, ManagerParams, RawTransfer, SubmitAuth, TransferRequest};
use crate::errors::{
    DecodeError, PreconditionError, QueryError, ResolutionError, StateTransitionError,
    WalletSystemError, WalletSystemResult,
};
use crate::events::{
    Event, EventMetadata, EventType, ManagerEvent, SystemEvent, TransferEvent, WalletEvent,
};
use crate::query::{self, QueryClient, QueryRequest, QueryResponse, RequestId};
use crate::records::{
    DisconnectReason, ManagerMode, ManagerRecord, ManagerState, SystemState, TransferConfirmation,
    TransferFailure, TransferFailureReason, TransferRecord, TransferState, WalletRecord, WalletState,
};
use crate::system::SystemConfig;

const EVENT_SOURCE: &str = "dispatcher";

/// The engines attached to a system, at most one per backend
#[derive(Debug, Clone, Default)]
pub(crate) struct Engines {
    utxo: Option<EngineBackend>,
    account: Option<EngineBackend>,
}

impl Engines {
    pub(crate) fn attach(&mut self, engine: EngineBackend) {
        match engine.backend() {
            Backend::Utxo => self.utxo = Some(engine),
            Backend::Account => self.account = Some(engine),
        }
    }

    pub(crate) fn get(&self, backend: Backend) -> Option<&EngineBackend> {
        match backend {
            Backend::Utxo => self.utxo.as_ref(),
            Backend::Account => self.account.as_ref(),
        }
    }
}

fn write_state(state: &RwLock<SystemState>) -> RwLockWriteGuard<'_, SystemState> {
    state.write().unwrap_or_else(|e| e.into_inner())
}

fn decode_hash(backend: Backend, hash: Option<Vec<u8>>) -> Result<Option<TransferHash>, DecodeError> {
    hash.map(|bytes| TransferHash::decode_raw(backend, &bytes))
        .transpose()
}

pub(crate) struct EventDispatcher {
    state: Arc<RwLock<SystemState>>,
    engines: Engines,
    query_client: Option<Arc<dyn QueryClient>>,
    config: SystemConfig,
    stats: DispatchStats,
    shared_stats: Arc<Mutex<DispatchStats>>,
    notifier: mpsc::UnboundedSender<Notification>,
    /// Completed queries re-enter through this; weak so it never keeps the queue open
    requeue: mpsc::WeakSender<DispatchCommand>,
    sequence: u64,
    pending: Vec<Event>,
}

impl EventDispatcher {
    pub(crate) fn new(
        state: Arc<RwLock<SystemState>>,
        engines: Engines,
        query_client: Option<Arc<dyn QueryClient>>,
        config: SystemConfig,
        shared_stats: Arc<Mutex<DispatchStats>>,
        notifier: mpsc::UnboundedSender<Notification>,
        requeue: mpsc::WeakSender<DispatchCommand>,
    ) -> Self {
        Self {
            state,
            engines,
            query_client,
            config,
            stats: DispatchStats::default(),
            shared_stats,
            notifier,
            requeue,
            sequence: 0,
            pending: Vec::new(),
        }
    }

    /// Drain the queue until shutdown
    pub(crate) async fn run(mut self, mut receiver: mpsc::Receiver<DispatchCommand>) {
        REENTRANT_CALLBACKS
            .scope(RefCell::new(Vec::new()), async move {
                self.emit_system(SystemEvent::Created);
                self.publish();
                info!("Dispatch context started");

                let mut stopped = false;
                while let Some(command) = receiver.recv().await {
                    if self.process(command) {
                        stopped = true;
                        break;
                    }
                    // Callbacks an engine raised synchronously from inside that command
                    loop {
                        let deferred =
                            REENTRANT_CALLBACKS.with(|queue| std::mem::take(&mut *queue.borrow_mut()));
                        if deferred.is_empty() {
                            break;
                        }
                        for command in deferred {
                            stopped |= self.process(command);
                        }
                    }
                    if stopped {
                        break;
                    }
                }

                if !stopped {
                    debug!("Dispatch queue closed without shutdown; tearing down");
                    self.process(DispatchCommand::Shutdown { reply: None });
                }
                info!("Dispatch context stopped");
            })
            .await
    }

    /// Apply one command; returns `true` once the system has shut down
    fn process(&mut self, command: DispatchCommand) -> bool {
        self.stats.commands_processed += 1;
        let state = Arc::clone(&self.state);

        let stop = match command {
            DispatchCommand::Engine { backend, callback } => {
                self.stats.engine_callbacks += 1;
                let mut guard = write_state(&state);
                self.handle_callback(&mut guard, backend, callback);
                false
            }
            DispatchCommand::App(command) => {
                self.stats.app_commands += 1;
                self.handle_app(command);
                false
            }
            DispatchCommand::QueryCompleted {
                backend,
                manager,
                request_id,
                request,
                result,
            } => {
                match self.engines.get(backend).cloned() {
                    Some(engine) => self.announce(&engine, manager, request_id, &request, result),
                    None => warn!(%backend, request = %request_id, "Query completed for a detached engine"),
                }
                false
            }
            DispatchCommand::RegisterListener { listener, reply } => {
                self.notify(Notification::Register { listener, reply });
                false
            }
            DispatchCommand::RemoveListener { name, reply } => {
                self.notify(Notification::Remove { name, reply });
                false
            }
            DispatchCommand::Flush { reply } => {
                self.notify(Notification::Barrier(reply));
                false
            }
            DispatchCommand::Shutdown { reply } => {
                {
                    let mut guard = write_state(&state);
                    self.teardown(&mut guard);
                }
                self.publish();
                self.notify(Notification::Shutdown(reply));
                true
            }
        };

        self.publish();
        stop
    }

    // ---- event plumbing ----

    fn next_metadata(&mut self) -> EventMetadata {
        self.sequence += 1;
        EventMetadata::new(self.sequence, EVENT_SOURCE)
    }

    fn push(&mut self, event: Event) {
        if self.config.trace_events {
            debug!(sequence = event.metadata().sequence, event = event.event_type(), "Event queued");
        }
        self.stats.events_emitted += 1;
        self.pending.push(event);
    }

    fn emit_system(&mut self, event: SystemEvent) {
        let metadata = self.next_metadata();
        self.push(Event::System { metadata, event });
    }

    fn emit_manager(&mut self, manager: ManagerHandle, event: ManagerEvent) {
        let metadata = self.next_metadata();
        self.push(Event::Manager {
            metadata,
            manager,
            event,
        });
    }

    fn emit_wallet(&mut self, wallet: WalletPath, event: WalletEvent) {
        let metadata = self.next_metadata();
        self.push(Event::Wallet {
            metadata,
            wallet,
            event,
        });
    }

    fn emit_transfer(&mut self, transfer: TransferPath, event: TransferEvent) {
        let metadata = self.next_metadata();
        self.push(Event::Transfer {
            metadata,
            transfer,
            event,
        });
    }

    /// Hand pending events to the notifier and publish counters
    fn publish(&mut self) {
        for event in self.pending.drain(..) {
            if self.notifier.send(Notification::Event(Arc::new(event))).is_err() {
                trace!("Notifier stopped; discarding event");
            }
        }
        let mut shared = self.shared_stats.lock().unwrap_or_else(|e| e.into_inner());
        *shared = self.stats.clone();
    }

    fn notify(&self, notification: Notification) {
        if self.notifier.send(notification).is_err() {
            debug!("Notifier stopped; request dropped");
        }
    }

    // ---- error plumbing ----

    fn precondition(&mut self, violation: PreconditionError) -> WalletSystemError {
        self.stats.precondition_violations += 1;
        error!(error = %violation, "Precondition violated");
        debug_assert!(
            !self.config.strict_preconditions,
            "precondition violated: {violation}"
        );
        violation.into()
    }

    fn engine(&mut self, backend: Backend) -> WalletSystemResult<EngineBackend> {
        if let Some(engine) = self.engines.get(backend).cloned() {
            return Ok(engine);
        }
        Err(self.precondition(PreconditionError::MissingEngine { backend }))
    }

    /// Resolve a manager that application commands may still operate on
    fn live_manager<'s>(
        &mut self,
        state: &'s mut SystemState,
        handle: ManagerHandle,
        operation: &str,
    ) -> WalletSystemResult<&'s mut ManagerRecord> {
        let record = state.resolve_manager_mut(&handle)?;
        if matches!(record.state(), ManagerState::Deleted) {
            return Err(self.precondition(PreconditionError::RecordDeleted {
                record: format!("manager {handle}"),
                operation: operation.to_string(),
            }));
        }
        Ok(record)
    }

    fn discard(&mut self, callback: &str, error: WalletSystemError) {
        match &error {
            WalletSystemError::Resolution(e) => {
                self.stats.record_drop(e.kind());
                warn!(callback, error = %e, "Dropping engine callback");
            }
            WalletSystemError::Decode(e) => {
                self.stats.decode_failures += 1;
                warn!(callback, error = %e, "Dropping engine callback with undecodable payload");
            }
            WalletSystemError::Transition(e) => {
                self.stats.transitions_rejected += 1;
                debug!(callback, error = %e, "Ignoring state change");
            }
            other => warn!(callback, error = %other, "Engine callback failed"),
        }
    }

    fn decode_failure(&mut self, wallet: &WalletPath, error: DecodeError) {
        self.stats.decode_failures += 1;
        warn!(wallet = %wallet, error = %error, "Ignoring undecodable engine value");
    }

    // ---- engine callbacks ----

    fn handle_callback(&mut self, state: &mut SystemState, backend: Backend, callback: EngineCallback) {
        let kind = callback.kind();
        let result = match callback {
            EngineCallback::Manager { manager, event } => {
                self.on_manager(state, ManagerHandle::from_engine(backend, manager), event)
            }
            EngineCallback::Wallet {
                manager,
                wallet,
                event,
            } => {
                let path = WalletPath::new(
                    ManagerHandle::from_engine(backend, manager),
                    WalletHandle::from_engine(backend, wallet),
                );
                self.on_wallet(state, path, event)
            }
            EngineCallback::Transfer {
                manager,
                wallet,
                transfer,
                event,
            } => {
                let path = WalletPath::new(
                    ManagerHandle::from_engine(backend, manager),
                    WalletHandle::from_engine(backend, wallet),
                )
                .transfer(TransferHandle::from_engine(backend, transfer));
                self.on_transfer(state, path, event)
            }
            EngineCallback::QueryRequested {
                manager,
                request_id,
                request,
            } => {
                self.on_query_requested(state, backend, manager, request_id, request);
                Ok(())
            }
        };

        if let Err(e) = result {
            self.discard(kind, e);
        }
    }

    /// Resolve the manager a callback addresses; deleted managers accept nothing
    fn callback_manager<'s>(
        state: &'s mut SystemState,
        handle: ManagerHandle,
    ) -> Result<&'s mut ManagerRecord, ResolutionError> {
        let record = state.resolve_manager_mut(&handle)?;
        if matches!(record.state(), ManagerState::Deleted) {
            return Err(ResolutionError::ManagerDeleted { manager: handle });
        }
        Ok(record)
    }

    fn transition_manager(
        &mut self,
        record: &mut ManagerRecord,
        new_state: ManagerState,
    ) -> Result<bool, StateTransitionError> {
        match record.transition(new_state)? {
            Some((old_state, new_state)) => {
                self.emit_manager(
                    record.handle(),
                    ManagerEvent::Changed {
                        old_state,
                        new_state,
                    },
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn on_manager(
        &mut self,
        state: &mut SystemState,
        handle: ManagerHandle,
        event: ManagerCallback,
    ) -> WalletSystemResult<()> {
        if let ManagerCallback::Deleted = event {
            let record = state.resolve_manager_mut(&handle)?;
            if matches!(record.state(), ManagerState::Deleted) {
                return Ok(());
            }
            self.delete_wallets(record);
            if self.transition_manager(record, ManagerState::Deleted)? {
                self.emit_manager(handle, ManagerEvent::Deleted);
                self.emit_system(SystemEvent::ManagerDeleted { manager: handle });
            }
            return Ok(());
        }

        let record = Self::callback_manager(state, handle)?;
        match event {
            ManagerCallback::Created => {
                // Admitted by the create-manager command; this is the engine echoing it
                trace!(manager = %handle, "Manager already registered");
            }
            ManagerCallback::Connected => {
                self.transition_manager(record, ManagerState::Connected)?;
            }
            ManagerCallback::Disconnected { reason } => {
                self.transition_manager(record, ManagerState::Disconnected { reason })?;
            }
            ManagerCallback::SyncStarted => {
                if self.transition_manager(record, ManagerState::Syncing)? {
                    self.emit_manager(handle, ManagerEvent::SyncStarted);
                }
            }
            ManagerCallback::SyncProgress {
                percent_complete,
                timestamp,
            } => {
                if matches!(record.state(), ManagerState::Syncing) {
                    self.emit_manager(
                        handle,
                        ManagerEvent::SyncProgress {
                            percent_complete: percent_complete.clamp(0.0, 100.0),
                            timestamp,
                        },
                    );
                }
            }
            ManagerCallback::SyncStopped { reason } => {
                // A failed connect or sync can end before sync-started was ever raised
                if matches!(record.state(), ManagerState::Syncing) {
                    self.transition_manager(record, ManagerState::Connected)?;
                } else {
                    debug!(manager = %handle, state = %record.state(), "Sync stopped while not syncing");
                }
                if !reason.is_success() {
                    warn!(manager = %handle, %reason, "Sync ended with failure");
                }
                self.emit_manager(handle, ManagerEvent::SyncEnded { reason });
            }
            ManagerCallback::BlockHeightUpdated { height } => {
                if record.set_height(height) {
                    self.emit_manager(handle, ManagerEvent::BlockUpdated { height });
                    self.update_confirmations(record);
                }
            }
            ManagerCallback::Deleted => {}
        }
        Ok(())
    }

    /// Re-derive confirmation counts for every included transfer after a height change
    fn update_confirmations(&mut self, record: &ManagerRecord) {
        let height = record.height();
        let limit = u64::from(record.network().confirmations_until_final);
        for (_, wallet) in record.wallets().iter() {
            for (_, transfer) in wallet.transfers().iter() {
                if let Some(confirmations) = transfer.confirmations(height) {
                    if confirmations <= limit {
                        self.emit_transfer(
                            *transfer.path(),
                            TransferEvent::ConfirmationsUpdated { confirmations },
                        );
                    }
                }
            }
        }
    }

    fn on_wallet(
        &mut self,
        state: &mut SystemState,
        path: WalletPath,
        event: WalletCallback,
    ) -> WalletSystemResult<()> {
        let manager = Self::callback_manager(state, path.manager)?;

        if let WalletCallback::Created { currency } = &event {
            self.admit_wallet(manager, path.wallet, currency)?;
            return Ok(());
        }

        let wallet = manager
            .wallets_mut()
            .find_mut(&path.wallet)
            .ok_or(ResolutionError::UnknownWallet { wallet: path })?;

        match event {
            WalletCallback::Created { .. } => {}
            WalletCallback::BalanceUpdated { balance } => {
                let amount = wallet.normalize_balance(&balance)?;
                self.apply_balance(wallet, amount);
            }
            WalletCallback::DefaultFeeBasisUpdated { fee_basis } => {
                let basis = wallet.normalize_fee_basis(&fee_basis)?;
                self.apply_fee_basis(wallet, basis);
            }
            WalletCallback::Deleted => {
                self.delete_wallet(wallet)?;
                manager.wallets_mut().remove(&path.wallet);
            }
        }
        Ok(())
    }

    /// Announce the deletion of `wallet`, its transfers first; the caller
    /// removes the record
    fn delete_wallet(&mut self, wallet: &mut WalletRecord) -> Result<(), StateTransitionError> {
        let path = *wallet.path();
        let transfers: Vec<TransferHandle> = wallet.transfers().handles().copied().collect();
        for handle in transfers {
            if let Some(mut transfer) = wallet.transfers_mut().remove(&handle) {
                self.retire_transfer(&mut transfer);
            }
        }

        if let Some((old_state, new_state)) = wallet.transition(WalletState::Deleted)? {
            self.emit_wallet(
                path,
                WalletEvent::Changed {
                    old_state,
                    new_state,
                },
            );
        }
        self.emit_wallet(path, WalletEvent::Deleted);
        self.emit_manager(path.manager, ManagerEvent::WalletDeleted { wallet: path.wallet });
        Ok(())
    }

    /// Delete every wallet under a manager that is going away
    fn delete_wallets(&mut self, manager: &mut ManagerRecord) {
        let wallets: Vec<WalletHandle> = manager.wallets().handles().copied().collect();
        for handle in wallets {
            if let Some(mut wallet) = manager.wallets_mut().remove(&handle) {
                if let Err(e) = self.delete_wallet(&mut wallet) {
                    debug!(wallet = %wallet.path(), error = %e, "Wallet already deleted");
                }
            }
        }
    }

    /// Admit a wallet under `manager`; a no-op for a handle already registered
    fn admit_wallet(
        &mut self,
        manager: &mut ManagerRecord,
        handle: WalletHandle,
        currency_code: &str,
    ) -> WalletSystemResult<WalletPath> {
        let network = manager.network();
        let currency = network.currency(currency_code).cloned().ok_or_else(|| {
            ResolutionError::UnknownCurrency {
                network: network.name.clone(),
                currency: currency_code.to_string(),
            }
        })?;
        let is_native = currency.code.eq_ignore_ascii_case(&network.native_currency);
        let fee_currency = manager.fee_currency_for(&currency);
        let path = WalletPath::new(manager.handle(), handle);

        let (_, created) = manager
            .wallets_mut()
            .find_or_create(handle, || WalletRecord::new(path, currency, fee_currency));
        if !created {
            trace!(wallet = %path, "Wallet already registered");
            return Ok(path);
        }

        if is_native && manager.primary_wallet_handle().is_none() {
            manager.set_primary_wallet(handle);
        }
        debug!(wallet = %path, currency = currency_code, "Wallet admitted");
        self.emit_wallet(path, WalletEvent::Created);
        self.emit_manager(path.manager, ManagerEvent::WalletAdded { wallet: handle });

        if let Some(wallet) = manager.wallets_mut().find_mut(&handle) {
            self.refresh_balance(wallet);
            self.refresh_fee_basis(wallet);
        }
        Ok(path)
    }

    fn apply_balance(&mut self, wallet: &mut WalletRecord, amount: Amount) {
        if let Some(balance) = wallet.apply_balance(amount) {
            let path = *wallet.path();
            self.emit_wallet(path, WalletEvent::BalanceUpdated { balance });
            self.emit_manager(path.manager, ManagerEvent::WalletChanged { wallet: path.wallet });
        }
    }

    fn apply_fee_basis(&mut self, wallet: &mut WalletRecord, fee_basis: FeeBasis) {
        if wallet.apply_fee_basis(fee_basis.clone()) {
            let path = *wallet.path();
            self.emit_wallet(path, WalletEvent::FeeBasisUpdated { fee_basis });
            self.emit_manager(path.manager, ManagerEvent::WalletChanged { wallet: path.wallet });
        }
    }

    /// Pull the wallet's balance from its engine
    fn refresh_balance(&mut self, wallet: &mut WalletRecord) {
        let path = *wallet.path();
        let Some(engine) = self.engines.get(wallet.backend()).cloned() else {
            return;
        };
        if let Some(raw) = engine.raw_balance(path.manager.engine_handle(), path.wallet.engine_handle()) {
            match wallet.normalize_balance(&raw) {
                Ok(amount) => self.apply_balance(wallet, amount),
                Err(e) => self.decode_failure(&path, e),
            }
        }
    }

    fn refresh_fee_basis(&mut self, wallet: &mut WalletRecord) {
        let path = *wallet.path();
        let Some(engine) = self.engines.get(wallet.backend()).cloned() else {
            return;
        };
        if let Some(raw) = engine.raw_fee_basis(path.manager.engine_handle(), path.wallet.engine_handle()) {
            match wallet.normalize_fee_basis(&raw) {
                Ok(basis) => self.apply_fee_basis(wallet, basis),
                Err(e) => self.decode_failure(&path, e),
            }
        }
    }

    fn on_transfer(
        &mut self,
        state: &mut SystemState,
        path: TransferPath,
        event: TransferCallback,
    ) -> WalletSystemResult<()> {
        let manager = Self::callback_manager(state, path.manager)?;
        let wallet = manager
            .wallets_mut()
            .find_mut(&path.wallet)
            .ok_or(ResolutionError::UnknownWallet {
                wallet: path.wallet_path(),
            })?;
        let backend = wallet.backend();

        match event {
            TransferCallback::Created { attributes } => {
                self.admit_transfer(wallet, path.transfer, &attributes)?;
            }
            TransferCallback::Signed { hash } => {
                let hash = decode_hash(backend, hash)?;
                self.advance_transfer(wallet, path, hash, TransferState::Signed)?;
            }
            TransferCallback::Submitted { hash } => {
                let hash = decode_hash(backend, hash)?;
                self.advance_transfer(wallet, path, hash, TransferState::Submitted)?;
            }
            TransferCallback::Included {
                block_number,
                transaction_index,
                timestamp,
                fee,
            } => {
                let fee = Amount::parse_base_units(&fee, wallet.fee_currency())?;
                let confirmation = TransferConfirmation {
                    block_number,
                    transaction_index,
                    timestamp,
                    fee,
                };
                self.advance_transfer(wallet, path, None, TransferState::Included { confirmation })?;
            }
            TransferCallback::Errored { error } => {
                let reason = TransferFailureReason::from_engine_code(&error.code);
                let failure = match error.message {
                    Some(message) => TransferFailure::new(reason).with_message(message),
                    None => TransferFailure::new(reason),
                };
                self.advance_transfer(wallet, path, None, TransferState::Failed { failure })?;
            }
            TransferCallback::Deleted => {
                self.delete_transfer(wallet, path)?;
            }
        }
        Ok(())
    }

    /// Admit a transfer under `wallet`; a no-op for a handle already registered
    fn admit_transfer(
        &mut self,
        wallet: &mut WalletRecord,
        handle: TransferHandle,
        attributes: &RawTransfer,
    ) -> WalletSystemResult<TransferPath> {
        let path = wallet.path().transfer(handle);
        let record = wallet.decode_transfer(handle, attributes)?;
        let (_, created) = wallet.transfers_mut().find_or_create(handle, || record);
        if !created {
            trace!(transfer = %path, "Transfer already registered");
            return Ok(path);
        }

        self.emit_transfer(path, TransferEvent::Created);
        self.emit_wallet(path.wallet_path(), WalletEvent::TransferAdded { transfer: path });
        self.refresh_balance(wallet);
        Ok(path)
    }

    fn advance_transfer(
        &mut self,
        wallet: &mut WalletRecord,
        path: TransferPath,
        hash: Option<TransferHash>,
        new_state: TransferState,
    ) -> WalletSystemResult<()> {
        let transfer = wallet
            .transfers_mut()
            .find_mut(&path.transfer)
            .ok_or(ResolutionError::UnknownTransfer { transfer: path })?;
        if let Some(hash) = hash {
            transfer.set_hash(hash);
        }
        let Some((old_state, new_state)) = transfer.transition(new_state)? else {
            return Ok(());
        };

        let submitted = matches!(new_state, TransferState::Submitted);
        let settled = matches!(
            new_state,
            TransferState::Included { .. } | TransferState::Failed { .. }
        );
        if let TransferState::Failed { failure } = &new_state {
            info!(transfer = %path, reason = %failure.reason, "Transfer failed");
        }

        self.emit_transfer(
            path,
            TransferEvent::Changed {
                old_state,
                new_state,
            },
        );
        let wallet_event = if submitted {
            WalletEvent::TransferSubmitted { transfer: path }
        } else {
            WalletEvent::TransferChanged { transfer: path }
        };
        self.emit_wallet(path.wallet_path(), wallet_event);

        if settled {
            self.refresh_balance(wallet);
        }
        Ok(())
    }

    fn delete_transfer(&mut self, wallet: &mut WalletRecord, path: TransferPath) -> WalletSystemResult<()> {
        let mut transfer = wallet
            .transfers_mut()
            .remove(&path.transfer)
            .ok_or(ResolutionError::UnknownTransfer { transfer: path })?;
        self.retire_transfer(&mut transfer);
        self.refresh_balance(wallet);
        Ok(())
    }

    /// Emit the deletion events for a transfer already taken out of its wallet
    fn retire_transfer(&mut self, transfer: &mut TransferRecord) {
        let path = *transfer.path();
        match transfer.transition(TransferState::Deleted) {
            Ok(Some((old_state, new_state))) => self.emit_transfer(
                path,
                TransferEvent::Changed {
                    old_state,
                    new_state,
                },
            ),
            Ok(None) => {}
            Err(e) => debug!(transfer = %path, error = %e, "Transfer already deleted"),
        }
        self.emit_transfer(path, TransferEvent::Deleted);
        self.emit_wallet(path.wallet_path(), WalletEvent::TransferDeleted { transfer: path });
    }

    // ---- assisted queries ----

    fn on_query_requested(
        &mut self,
        state: &SystemState,
        backend: Backend,
        manager: EngineHandle,
        request_id: RequestId,
        request: QueryRequest,
    ) {
        let handle = ManagerHandle::from_engine(backend, manager);
        let Some(engine) = self.engines.get(backend).cloned() else {
            self.stats.record_drop("missing_engine");
            warn!(%backend, request = %request_id, "Query requested by a detached engine");
            return;
        };

        let network = match state.manager(&handle) {
            Some(record) => record.network().clone(),
            None => {
                let error = ResolutionError::UnknownManager { manager: handle };
                self.stats.record_drop(error.kind());
                warn!(request = %request_id, error = %error, "Query requested for an unknown manager");
                self.announce(
                    &engine,
                    manager,
                    request_id,
                    &request,
                    Err(QueryError::Rejected(error.to_string())),
                );
                return;
            }
        };

        let Some(client) = self.query_client.clone() else {
            self.announce(
                &engine,
                manager,
                request_id,
                &request,
                Err(QueryError::NetworkUnavailable(
                    "no query client configured".to_string(),
                )),
            );
            return;
        };

        self.stats.queries_issued += 1;
        debug!(manager = %handle, request = %request_id, kind = request.kind(), "Issuing assisted query");
        let requeue = self.requeue.clone();
        tokio::spawn(async move {
            let result = query::execute(client.as_ref(), &network, &request).await;
            match requeue.upgrade() {
                Some(sender) => {
                    let completed = DispatchCommand::QueryCompleted {
                        backend,
                        manager,
                        request_id,
                        request,
                        result,
                    };
                    if sender.send(completed).await.is_err() {
                        debug!(request = %request_id, "System stopped before the query completed");
                    }
                }
                None => debug!(request = %request_id, "System stopped before the query completed"),
            }
        });
    }

    /// Hand a query result to the engine; every request is answered exactly once
    fn announce(
        &mut self,
        engine: &EngineBackend,
        manager: EngineHandle,
        request_id: RequestId,
        request: &QueryRequest,
        result: Result<QueryResponse, QueryError>,
    ) {
        if let Err(e) = &result {
            self.stats.queries_failed += 1;
            debug!(request = %request_id, kind = request.kind(), error = %e, "Assisted query failed");
        }
        if let Err(e) = engine.announce(manager, request_id, request, result) {
            warn!(request = %request_id, error = %e, "Engine did not accept the query result");
        }
    }

    // ---- application commands ----

    /// Run `apply` with the record tree locked for writing
    ///
    /// Engine commands are issued between these sections, never inside one,
    /// so readers only wait on record updates.
    fn with_state<T>(&mut self, apply: impl FnOnce(&mut Self, &mut SystemState) -> T) -> T {
        let state = Arc::clone(&self.state);
        let mut guard = write_state(&state);
        apply(self, &mut guard)
    }

    fn handle_app(&mut self, command: AppCommand) {
        let operation = command.name();
        match command {
            AppCommand::CreateManager {
                account,
                network,
                mode,
                storage_path,
                reply,
            } => {
                let result = self.create_manager(account, network, mode, storage_path);
                respond(operation, reply, result);
            }
            AppCommand::CreateWallet {
                manager,
                currency,
                reply,
            } => {
                let result = self.create_wallet(manager, &currency);
                respond(operation, reply, result);
            }
            AppCommand::Connect { manager, reply } => {
                let result = self.connect(manager);
                respond(operation, reply, result);
            }
            AppCommand::Disconnect { manager, reply } => {
                let result = self.disconnect(manager);
                respond(operation, reply, result);
            }
            AppCommand::Sync { manager, reply } => {
                let result = self.sync(manager);
                respond(operation, reply, result);
            }
            AppCommand::SetMode {
                manager,
                mode,
                reply,
            } => {
                let result = self.set_mode(manager, mode);
                respond(operation, reply, result);
            }
            AppCommand::CreateTransfer {
                wallet,
                target,
                amount,
                fee_basis,
                reply,
            } => {
                let result = self.create_transfer(wallet, target, amount, fee_basis);
                respond(operation, reply, result);
            }
            AppCommand::SubmitTransfer {
                transfer,
                auth,
                reply,
            } => {
                let result = self.submit_transfer(transfer, auth);
                respond(operation, reply, result);
            }
        }
    }

    fn create_manager(
        &mut self,
        account: Account,
        network: Network,
        mode: ManagerMode,
        storage_path: PathBuf,
    ) -> WalletSystemResult<ManagerHandle> {
        let existing = self.with_state(|_, state| state.manager_for(&account.id, &network.name));
        if let Some(existing) = existing {
            debug!(manager = %existing, network = %network.name, "Manager already exists");
            return Ok(existing);
        }

        let native = network
            .native()
            .map(|currency| currency.code.clone())
            .ok_or_else(|| ResolutionError::UnknownCurrency {
                network: network.name.clone(),
                currency: network.native_currency.clone(),
            })?;
        let engine = self.engine(network.backend)?;
        let params = ManagerParams {
            account,
            network,
            mode,
            storage_path,
        };
        let setup = engine.create_manager(&params)?;

        let backend = engine.backend();
        let handle = ManagerHandle::from_engine(backend, setup.manager);
        let account_id = params.account.id.clone();
        let network_name = params.network.name.clone();
        let ManagerParams {
            account,
            network,
            mode,
            storage_path,
        } = params;

        self.with_state(|this, state| -> WalletSystemResult<ManagerHandle> {
            let (record, created) = state
                .managers_mut()
                .find_or_create(handle, || ManagerRecord::new(handle, account, network, mode, storage_path));
            if created {
                info!(manager = %handle, network = %network_name, %mode, "Wallet manager created");
                this.emit_manager(handle, ManagerEvent::Created);
                this.emit_system(SystemEvent::ManagerAdded { manager: handle });
            }
            this.admit_wallet(
                record,
                WalletHandle::from_engine(backend, setup.primary_wallet),
                &native,
            )?;
            state.index_manager(&account_id, &network_name, handle);
            Ok(handle)
        })
    }

    fn create_wallet(&mut self, manager: ManagerHandle, currency_code: &str) -> WalletSystemResult<WalletPath> {
        const OPERATION: &str = "create wallet";
        let engine = self.engine(manager.backend())?;
        let (currency, existing) = self.with_state(|this, state| -> WalletSystemResult<(Currency, Option<WalletPath>)> {
            let record = this.live_manager(state, manager, OPERATION)?;
            let currency = record
                .network()
                .currency(currency_code)
                .cloned()
                .ok_or_else(|| ResolutionError::UnknownCurrency {
                    network: record.network().name.clone(),
                    currency: currency_code.to_string(),
                })?;
            let existing = record.wallet_for_currency(&currency.code).map(|wallet| *wallet.path());
            Ok((currency, existing))
        })?;
        if let Some(existing) = existing {
            return Ok(existing);
        }

        let wallet = engine.create_wallet(manager.engine_handle(), &currency)?;
        self.with_state(|this, state| -> WalletSystemResult<WalletPath> {
            let record = this.live_manager(state, manager, OPERATION)?;
            this.admit_wallet(
                record,
                WalletHandle::from_engine(manager.backend(), wallet),
                &currency.code,
            )
        })
    }

    fn connect(&mut self, manager: ManagerHandle) -> WalletSystemResult<()> {
        let engine = self.engine(manager.backend())?;
        let active = self.with_state(|this, state| {
            this.live_manager(state, manager, "connect")
                .map(|record| record.state().is_active())
        })?;
        if active {
            trace!(manager = %manager, "Already connected");
            return Ok(());
        }
        engine.connect(manager.engine_handle())?;
        Ok(())
    }

    fn disconnect(&mut self, manager: ManagerHandle) -> WalletSystemResult<()> {
        let engine = self.engine(manager.backend())?;
        self.with_state(|this, state| this.live_manager(state, manager, "disconnect").map(|_| ()))?;
        engine.disconnect(manager.engine_handle())?;
        self.with_state(|this, state| -> WalletSystemResult<()> {
            let record = this.live_manager(state, manager, "disconnect")?;
            this.transition_manager(
                record,
                ManagerState::Disconnected {
                    reason: DisconnectReason::Requested,
                },
            )?;
            Ok(())
        })
    }

    fn sync(&mut self, manager: ManagerHandle) -> WalletSystemResult<()> {
        let engine = self.engine(manager.backend())?;
        self.with_state(|this, state| this.live_manager(state, manager, "sync").map(|_| ()))?;
        engine.sync(manager.engine_handle())?;
        Ok(())
    }

    fn set_mode(&mut self, manager: ManagerHandle, mode: ManagerMode) -> WalletSystemResult<()> {
        let engine = self.engine(manager.backend())?;
        let previous = self.with_state(|_, state| -> WalletSystemResult<Option<ManagerMode>> {
            state.resolve_manager_mut(&manager)?.set_mode(mode)
        })?;
        let Some(previous) = previous else {
            return Ok(());
        };

        if let Err(e) = engine.set_mode(manager.engine_handle(), mode) {
            self.with_state(|_, state| {
                if let Ok(record) = state.resolve_manager_mut(&manager) {
                    let _ = record.set_mode(previous);
                }
            });
            return Err(e.into());
        }
        info!(manager = %manager, from = %previous, to = %mode, "Manager mode changed");
        Ok(())
    }

    fn create_transfer(
        &mut self,
        wallet_path: WalletPath,
        target: Address,
        amount: Amount,
        fee_basis: Option<FeeBasis>,
    ) -> WalletSystemResult<TransferPath> {
        const OPERATION: &str = "create transfer";
        let backend = wallet_path.manager.backend();
        let engine = self.engine(backend)?;
        if target.backend() != backend {
            return Err(self.precondition(PreconditionError::BackendMismatch {
                operation: OPERATION.to_string(),
                expected: backend,
                actual: target.backend(),
            }));
        }

        let fee_basis = self.with_state(|this, state| -> WalletSystemResult<FeeBasis> {
            let manager = this.live_manager(state, wallet_path.manager, OPERATION)?;
            let wallet = manager
                .wallets()
                .find(&wallet_path.wallet)
                .ok_or(ResolutionError::UnknownWallet { wallet: wallet_path })?;

            if !amount.currency_code().eq_ignore_ascii_case(&wallet.currency().code) {
                return Err(WalletSystemError::invalid_request(
                    OPERATION,
                    format!(
                        "amount is in {} but the wallet holds {}",
                        amount.currency_code(),
                        wallet.currency().code
                    ),
                ));
            }
            fee_basis
                .or_else(|| wallet.default_fee_basis().cloned())
                .ok_or_else(|| {
                    WalletSystemError::invalid_request(OPERATION, "no fee basis given and the wallet has no default")
                })
        })?;
        if fee_basis.backend() != backend {
            return Err(self.precondition(PreconditionError::BackendMismatch {
                operation: OPERATION.to_string(),
                expected: backend,
                actual: fee_basis.backend(),
            }));
        }

        let request = TransferRequest {
            target,
            amount,
            fee_basis,
        };
        let created = engine.create_transfer(
            wallet_path.manager.engine_handle(),
            wallet_path.wallet.engine_handle(),
            &request,
        )?;
        self.with_state(|this, state| -> WalletSystemResult<TransferPath> {
            let wallet = state.resolve_wallet_mut(&wallet_path)?;
            this.admit_transfer(
                wallet,
                TransferHandle::from_engine(backend, created.transfer),
                &created.attributes,
            )
        })
    }

    fn submit_transfer(&mut self, path: TransferPath, auth: SubmitAuth) -> WalletSystemResult<()> {
        const OPERATION: &str = "submit transfer";
        let engine = self.engine(path.manager.backend())?;
        self.with_state(|this, state| -> WalletSystemResult<()> {
            this.live_manager(state, path.manager, OPERATION)?;
            let transfer = state
                .transfer(&path)
                .ok_or(ResolutionError::UnknownTransfer { transfer: path })?;
            match transfer.state() {
                TransferState::Created | TransferState::Signed => Ok(()),
                other => Err(WalletSystemError::invalid_request(
                    OPERATION,
                    format!("transfer {path} is already {other}"),
                )),
            }
        })?;

        engine.submit(
            path.manager.engine_handle(),
            path.wallet.engine_handle(),
            path.transfer.engine_handle(),
            &auth,
        )?;
        debug!(transfer = %path, auth = auth.kind(), "Transfer handed to engine for submission");
        Ok(())
    }

    // ---- teardown ----

    fn teardown(&mut self, state: &mut SystemState) {
        let managers = state.drain_managers();
        info!(managers = managers.len(), "Tearing down wallet system");

        for (handle, mut record) in managers {
            if let Some(engine) = self.engines.get(handle.backend()).cloned() {
                engine.release_manager(handle.engine_handle());
            }
            if matches!(record.state(), ManagerState::Deleted) {
                continue;
            }

            self.delete_wallets(&mut record);
            if let Ok(Some((old_state, new_state))) = record.transition(ManagerState::Deleted) {
                self.emit_manager(
                    handle,
                    ManagerEvent::Changed {
                        old_state,
                        new_state,
                    },
                );
            }
            self.emit_manager(handle, ManagerEvent::Deleted);
            self.emit_system(SystemEvent::ManagerDeleted { manager: handle });
        }

        self.emit_system(SystemEvent::Deleted);
    }
}

fn respond<T>(operation: &str, reply: Reply<T>, result: WalletSystemResult<T>) {
    if let Err(e) = &result {
        debug!(operation, error = %e, category = e.category(), "Application command failed");
    }
    if reply.send(result).is_err() {
        trace!(operation, "Caller went away before the reply");
    }
}

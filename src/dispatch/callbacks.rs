//! Engine-facing callback intake
//!
//! Engines raise callbacks from arbitrary threads. [`EngineCallbacks`] is the
//! only thing they hold: it tags each callback with its backend and enqueues it
//! on the bounded dispatch queue. Nothing here touches system state.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::command::DispatchCommand;
use crate::data_structures::{Backend, EngineHandle};
use crate::engine::{RawBalance, RawFeeBasis, RawTransfer, RawTransferError};
use crate::query::{QueryRequest, RequestId};
use crate::records::{DisconnectReason, SyncStoppedReason};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ManagerCallback {
    Created,
    Connected,
    Disconnected { reason: DisconnectReason },
    SyncStarted,
    SyncProgress {
        percent_complete: f32,
        timestamp: Option<u64>,
    },
    SyncStopped { reason: SyncStoppedReason },
    BlockHeightUpdated { height: u64 },
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalletCallback {
    /// `currency` is the currency code on the manager's network
    Created { currency: String },
    BalanceUpdated { balance: RawBalance },
    DefaultFeeBasisUpdated { fee_basis: RawFeeBasis },
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferCallback {
    Created { attributes: RawTransfer },
    Signed { hash: Option<Vec<u8>> },
    Submitted { hash: Option<Vec<u8>> },
    Included {
        block_number: u64,
        transaction_index: u64,
        timestamp: u64,
        /// Fee paid, in base units of the wallet's fee currency
        fee: String,
    },
    Errored { error: RawTransferError },
    Deleted,
}

/// A callback as delivered by an engine, addressed by raw handles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineCallback {
    Manager {
        manager: EngineHandle,
        event: ManagerCallback,
    },
    Wallet {
        manager: EngineHandle,
        wallet: EngineHandle,
        event: WalletCallback,
    },
    Transfer {
        manager: EngineHandle,
        wallet: EngineHandle,
        transfer: EngineHandle,
        event: TransferCallback,
    },
    /// The engine needs data from the assisted-query service
    QueryRequested {
        manager: EngineHandle,
        request_id: RequestId,
        request: QueryRequest,
    },
}

impl EngineCallback {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineCallback::Manager { .. } => "manager",
            EngineCallback::Wallet { .. } => "wallet",
            EngineCallback::Transfer { .. } => "transfer",
            EngineCallback::QueryRequested { .. } => "query",
        }
    }
}

tokio::task_local! {
    /// Callbacks raised synchronously by an engine while the dispatch task is
    /// inside one of its commands
    pub(crate) static REENTRANT_CALLBACKS: RefCell<Vec<DispatchCommand>>;
}

/// Queue `command` behind the command currently being dispatched, if called
/// from the dispatch task; hands it back otherwise
fn defer_if_reentrant(command: DispatchCommand) -> Result<(), DispatchCommand> {
    let mut slot = Some(command);
    let _ = REENTRANT_CALLBACKS.try_with(|queue| {
        if let Some(command) = slot.take() {
            queue.borrow_mut().push(command);
        }
    });
    match slot {
        None => Ok(()),
        Some(command) => Err(command),
    }
}

/// Commands that found the queue full on a current-thread runtime, in the
/// order they were raised
#[derive(Default)]
struct Overflow {
    queue: VecDeque<DispatchCommand>,
    draining: bool,
}

/// Write side of the dispatch queue shared by every engine and the `System`
///
/// While the overflow FIFO is draining, every later command joins its tail,
/// so nothing sent afterwards can take a freed slot ahead of it.
#[derive(Clone)]
pub(crate) struct Intake {
    sender: mpsc::Sender<DispatchCommand>,
    overflow: Arc<Mutex<Overflow>>,
}

impl Intake {
    pub(crate) fn new(sender: mpsc::Sender<DispatchCommand>) -> Self {
        Self {
            sender,
            overflow: Arc::new(Mutex::new(Overflow::default())),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    pub(crate) fn downgrade(&self) -> mpsc::WeakSender<DispatchCommand> {
        self.sender.downgrade()
    }

    fn lock_overflow(&self) -> MutexGuard<'_, Overflow> {
        self.overflow.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Join the overflow tail if it is draining; hands the command back otherwise
    fn join_overflow(&self, overflow: &mut Overflow, command: DispatchCommand) -> Result<bool, DispatchCommand> {
        if !overflow.draining {
            return Err(command);
        }
        if self.sender.is_closed() {
            return Ok(false);
        }
        overflow.queue.push_back(command);
        Ok(true)
    }

    /// Enqueue from synchronous code
    ///
    /// Blocks while the queue is full, except on a current-thread runtime
    /// where blocking would deadlock the dispatcher; there the command is
    /// parked in the overflow FIFO and a task feeds it to the queue.
    pub(crate) fn send(&self, command: DispatchCommand) -> bool {
        let mut overflow = self.lock_overflow();
        let command = match self.join_overflow(&mut overflow, command) {
            Ok(sent) => return sent,
            Err(command) => command,
        };

        let command = match self.sender.try_send(command) {
            Ok(()) => return true,
            Err(TrySendError::Closed(command)) => {
                debug!(command = command.kind(), "Dispatch queue closed; dropping command");
                return false;
            }
            Err(TrySendError::Full(command)) => command,
        };

        match Handle::try_current() {
            Err(_) => {
                drop(overflow);
                self.sender.blocking_send(command).is_ok()
            }
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                drop(overflow);
                tokio::task::block_in_place(|| handle.block_on(self.sender.send(command))).is_ok()
            }
            Ok(handle) => {
                warn!(
                    command = command.kind(),
                    "Dispatch queue full on a current-thread runtime; parking command in overflow"
                );
                overflow.queue.push_back(command);
                overflow.draining = true;
                drop(overflow);
                handle.spawn(drain_overflow(self.sender.clone(), Arc::clone(&self.overflow)));
                true
            }
        }
    }

    /// Enqueue without ever waiting; `false` if the queue is full or closed
    pub(crate) fn try_send(&self, command: DispatchCommand) -> bool {
        let mut overflow = self.lock_overflow();
        match self.join_overflow(&mut overflow, command) {
            Ok(sent) => sent,
            Err(command) => self.sender.try_send(command).is_ok(),
        }
    }

    /// Enqueue from async code, waiting for queue capacity
    pub(crate) async fn send_async(&self, command: DispatchCommand) -> bool {
        let command = {
            let mut overflow = self.lock_overflow();
            match self.join_overflow(&mut overflow, command) {
                Ok(sent) => return sent,
                Err(command) => command,
            }
        };
        self.sender.send(command).await.is_ok()
    }
}

/// Feed parked commands to the queue in order, then hand the fast path back
async fn drain_overflow(sender: mpsc::Sender<DispatchCommand>, overflow: Arc<Mutex<Overflow>>) {
    loop {
        let next = {
            let mut overflow = overflow.lock().unwrap_or_else(|e| e.into_inner());
            match overflow.queue.pop_front() {
                Some(command) => command,
                None => {
                    overflow.draining = false;
                    return;
                }
            }
        };
        if sender.send(next).await.is_err() {
            let mut overflow = overflow.lock().unwrap_or_else(|e| e.into_inner());
            debug!(dropped = overflow.queue.len() + 1, "Dispatch queue closed while draining overflow");
            overflow.queue.clear();
            overflow.draining = false;
            return;
        }
    }
}

/// Sender half given to one engine
///
/// Cheap to clone and safe to use from any thread. Delivery never fails
/// loudly: once the system has shut down, callbacks are dropped and the
/// delivery methods return `false`.
#[derive(Clone)]
pub struct EngineCallbacks {
    backend: Backend,
    intake: Intake,
}

impl fmt::Debug for EngineCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineCallbacks")
            .field("backend", &self.backend)
            .field("closed", &self.intake.is_closed())
            .finish()
    }
}

impl EngineCallbacks {
    pub(crate) fn new(backend: Backend, intake: Intake) -> Self {
        Self { backend, intake }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn manager(&self, manager: EngineHandle, event: ManagerCallback) -> bool {
        self.deliver(EngineCallback::Manager { manager, event })
    }

    pub fn wallet(&self, manager: EngineHandle, wallet: EngineHandle, event: WalletCallback) -> bool {
        self.deliver(EngineCallback::Wallet {
            manager,
            wallet,
            event,
        })
    }

    pub fn transfer(
        &self,
        manager: EngineHandle,
        wallet: EngineHandle,
        transfer: EngineHandle,
        event: TransferCallback,
    ) -> bool {
        self.deliver(EngineCallback::Transfer {
            manager,
            wallet,
            transfer,
            event,
        })
    }

    /// Ask the system to run `request` against the query service; the result
    /// comes back through the engine's `announce_*` method for its kind
    pub fn query(&self, manager: EngineHandle, request_id: RequestId, request: QueryRequest) -> bool {
        self.deliver(EngineCallback::QueryRequested {
            manager,
            request_id,
            request,
        })
    }

    /// Enqueue a callback from synchronous engine code
    ///
    /// Callbacks are applied in the order they were delivered, even when the
    /// queue is full.
    pub fn deliver(&self, callback: EngineCallback) -> bool {
        let command = DispatchCommand::Engine {
            backend: self.backend,
            callback,
        };
        match defer_if_reentrant(command) {
            Ok(()) => true,
            Err(command) => self.intake.send(command),
        }
    }

    /// Enqueue a callback from async engine code, waiting for queue capacity
    pub async fn deliver_async(&self, callback: EngineCallback) -> bool {
        let command = DispatchCommand::Engine {
            backend: self.backend,
            callback,
        };
        match defer_if_reentrant(command) {
            Ok(()) => true,
            Err(command) => self.intake.send_async(command).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_callbacks_are_tagged_with_backend() {
        let (sender, mut receiver) = mpsc::channel(4);
        let callbacks = EngineCallbacks::new(Backend::Account, Intake::new(sender));
        assert!(callbacks.manager(EngineHandle::new(1), ManagerCallback::Connected));

        match receiver.recv().await {
            Some(DispatchCommand::Engine { backend, callback }) => {
                assert_eq!(backend, Backend::Account);
                assert_eq!(
                    callback,
                    EngineCallback::Manager {
                        manager: EngineHandle::new(1),
                        event: ManagerCallback::Connected,
                    }
                );
            }
            _ => panic!("expected an engine callback"),
        }
    }

    #[tokio::test]
    async fn test_delivery_after_close_reports_false() {
        let (sender, receiver) = mpsc::channel(1);
        let callbacks = EngineCallbacks::new(Backend::Utxo, Intake::new(sender));
        drop(receiver);
        assert!(!callbacks.wallet(EngineHandle::new(1), EngineHandle::new(2), WalletCallback::Deleted));
        assert!(!callbacks.deliver_async(EngineCallback::Manager {
            manager: EngineHandle::new(1),
            event: ManagerCallback::Deleted,
        })
        .await);
    }

    #[tokio::test]
    async fn test_callbacks_inside_dispatch_scope_are_deferred() {
        let (sender, mut receiver) = mpsc::channel(1);
        let callbacks = EngineCallbacks::new(Backend::Utxo, Intake::new(sender));

        let deferred = REENTRANT_CALLBACKS
            .scope(RefCell::new(Vec::new()), async {
                callbacks.manager(EngineHandle::new(7), ManagerCallback::SyncStarted);
                REENTRANT_CALLBACKS.with(|queue| queue.borrow().len())
            })
            .await;

        assert_eq!(deferred, 1);
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_blocks_outside_runtime() {
        let (sender, mut receiver) = mpsc::channel(1);
        let callbacks = EngineCallbacks::new(Backend::Utxo, Intake::new(sender));
        assert!(callbacks.manager(EngineHandle::new(1), ManagerCallback::Connected));

        let drainer = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            let first = receiver.blocking_recv().is_some();
            let second = receiver.blocking_recv().is_some();
            first && second
        });

        assert!(callbacks.manager(EngineHandle::new(1), ManagerCallback::SyncStarted));
        drop(callbacks);
        assert!(drainer.join().unwrap());
    }

    fn manager_event(command: Option<DispatchCommand>) -> Option<ManagerCallback> {
        match command {
            Some(DispatchCommand::Engine {
                callback: EngineCallback::Manager { event, .. },
                ..
            }) => Some(event),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_full_queue_on_current_thread_keeps_delivery_order() {
        let (sender, mut receiver) = mpsc::channel(1);
        let callbacks = EngineCallbacks::new(Backend::Utxo, Intake::new(sender));
        let manager = EngineHandle::new(3);

        assert!(callbacks.manager(manager, ManagerCallback::Connected));
        assert!(callbacks.manager(manager, ManagerCallback::SyncStarted));
        assert_eq!(manager_event(receiver.recv().await), Some(ManagerCallback::Connected));

        // A slot is free now, but the parked callback must still go first
        let stopped = ManagerCallback::SyncStopped {
            reason: SyncStoppedReason::Complete,
        };
        assert!(callbacks.manager(manager, stopped.clone()));

        assert_eq!(manager_event(receiver.recv().await), Some(ManagerCallback::SyncStarted));
        assert_eq!(manager_event(receiver.recv().await), Some(stopped));
    }

    #[tokio::test]
    async fn test_async_delivery_joins_a_draining_overflow() {
        let (sender, mut receiver) = mpsc::channel(1);
        let callbacks = EngineCallbacks::new(Backend::Account, Intake::new(sender));
        let manager = EngineHandle::new(4);

        callbacks.manager(manager, ManagerCallback::Connected);
        callbacks.manager(manager, ManagerCallback::SyncStarted);
        let deliver_late = callbacks.deliver_async(EngineCallback::Manager {
            manager,
            event: ManagerCallback::BlockHeightUpdated { height: 9 },
        });
        assert!(deliver_late.await);

        let mut order = Vec::new();
        for _ in 0..3 {
            order.push(manager_event(receiver.recv().await));
        }
        assert_eq!(
            order,
            vec![
                Some(ManagerCallback::Connected),
                Some(ManagerCallback::SyncStarted),
                Some(ManagerCallback::BlockHeightUpdated { height: 9 }),
            ]
        );
    }

    #[tokio::test]
    async fn test_overflow_is_dropped_when_queue_closes() {
        let (sender, receiver) = mpsc::channel(1);
        let callbacks = EngineCallbacks::new(Backend::Utxo, Intake::new(sender));
        callbacks.manager(EngineHandle::new(1), ManagerCallback::Connected);
        callbacks.manager(EngineHandle::new(1), ManagerCallback::SyncStarted);
        drop(receiver);

        tokio::task::yield_now().await;
        assert!(!callbacks.manager(EngineHandle::new(1), ManagerCallback::Deleted));
    }
}

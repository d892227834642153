//! Record tree and state machines
//!
//! The system owns managers, managers own wallets, wallets own transfers.
//! Children refer to their parents by key ([`WalletPath`], [`TransferPath`]),
//! never by pointer, so the tree has a single owner at every level.
//!
//! [`SystemState`] is the root. The dispatch task is its only writer; the
//! application reads it through a shared lock.

pub mod manager;
pub mod transfer;
pub mod wallet;

pub use manager::{DisconnectReason, ManagerMode, ManagerRecord, ManagerState, SyncStoppedReason};
pub use transfer::{
    TransferConfirmation, TransferDirection, TransferFailure, TransferFailureReason,
    TransferRecord, TransferState,
};
pub use wallet::{WalletRecord, WalletState};

use std::collections::HashMap;

use crate::data_structures::{ManagerHandle, TransferPath, WalletPath};
use crate::errors::ResolutionError;
use crate::registry::HandleRegistry;

/// Every record the system currently knows about
#[derive(Debug, Default)]
pub struct SystemState {
    managers: HandleRegistry<ManagerHandle, ManagerRecord>,
    /// (account id, network name) -> manager
    index: HashMap<(String, String), ManagerHandle>,
}

impl SystemState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn managers(&self) -> &HandleRegistry<ManagerHandle, ManagerRecord> {
        &self.managers
    }

    pub(crate) fn managers_mut(&mut self) -> &mut HandleRegistry<ManagerHandle, ManagerRecord> {
        &mut self.managers
    }

    pub fn manager(&self, handle: &ManagerHandle) -> Option<&ManagerRecord> {
        self.managers.find(handle)
    }

    /// The manager already serving `account_id` on `network_name`
    pub fn manager_for(&self, account_id: &str, network_name: &str) -> Option<ManagerHandle> {
        self.index
            .get(&(account_id.to_string(), network_name.to_string()))
            .copied()
    }

    pub(crate) fn index_manager(&mut self, account_id: &str, network_name: &str, handle: ManagerHandle) {
        self.index
            .insert((account_id.to_string(), network_name.to_string()), handle);
    }

    pub fn wallet(&self, path: &WalletPath) -> Option<&WalletRecord> {
        self.managers
            .find(&path.manager)
            .and_then(|manager| manager.wallet(&path.wallet))
    }

    pub fn transfer(&self, path: &TransferPath) -> Option<&TransferRecord> {
        self.wallet(&path.wallet_path())
            .and_then(|wallet| wallet.transfer(&path.transfer))
    }

    pub(crate) fn resolve_manager_mut(
        &mut self,
        handle: &ManagerHandle,
    ) -> Result<&mut ManagerRecord, ResolutionError> {
        self.managers
            .find_mut(handle)
            .ok_or(ResolutionError::UnknownManager { manager: *handle })
    }

    pub(crate) fn resolve_wallet_mut(
        &mut self,
        path: &WalletPath,
    ) -> Result<&mut WalletRecord, ResolutionError> {
        self.resolve_manager_mut(&path.manager)?
            .wallets_mut()
            .find_mut(&path.wallet)
            .ok_or(ResolutionError::UnknownWallet { wallet: *path })
    }

    pub(crate) fn resolve_transfer_mut(
        &mut self,
        path: &TransferPath,
    ) -> Result<&mut TransferRecord, ResolutionError> {
        self.resolve_wallet_mut(&path.wallet_path())?
            .transfers_mut()
            .find_mut(&path.transfer)
            .ok_or(ResolutionError::UnknownTransfer { transfer: *path })
    }

    /// Confirmations for an included transfer at its manager's current height
    pub fn confirmations(&self, path: &TransferPath) -> Option<u64> {
        let height = self.manager(&path.manager)?.height();
        self.transfer(path)?.confirmations(height)
    }

    /// Remove every manager, in creation order
    pub(crate) fn drain_managers(&mut self) -> Vec<(ManagerHandle, ManagerRecord)> {
        self.index.clear();
        self.managers.drain()
    }
}

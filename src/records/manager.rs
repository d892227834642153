//! Manager records
//!
//! A manager is one connection to one backend for one (account, network)
//! pair. Its lifecycle:
//!
//! ```text
//! created -> { connected <-> disconnected <-> syncing } -> deleted
//! ```
//!
//! The three middle states form a cycle; `deleted` is terminal and reachable
//! from anywhere.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use super::wallet::WalletRecord;
use crate::data_structures::{Account, Backend, Currency, ManagerHandle, Network, WalletHandle};
use crate::errors::{StateTransitionError, WalletSystemError};
use crate::registry::HandleRegistry;

/// How a manager splits work between the P2P network and the query service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ManagerMode {
    ApiOnly,
    ApiWithP2pSubmit,
    P2pWithApiSync,
    P2pOnly,
}

impl ManagerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ManagerMode::ApiOnly => "api_only",
            ManagerMode::ApiWithP2pSubmit => "api_with_p2p_submit",
            ManagerMode::P2pWithApiSync => "p2p_with_api_sync",
            ManagerMode::P2pOnly => "p2p_only",
        }
    }
}

impl fmt::Display for ManagerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisconnectReason {
    /// The application asked for it
    Requested,
    Unknown,
    /// Socket-level failure
    Posix { errnum: i32, message: Option<String> },
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Requested => f.write_str("requested"),
            DisconnectReason::Unknown => f.write_str("unknown"),
            DisconnectReason::Posix { errnum, message } => match message {
                Some(message) => write!(f, "posix({errnum}: {message})"),
                None => write!(f, "posix({errnum})"),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStoppedReason {
    Complete,
    Requested,
    Unknown,
    Posix { errnum: i32, message: Option<String> },
}

impl SyncStoppedReason {
    /// A sync that finished or was stopped on purpose
    pub fn is_success(&self) -> bool {
        matches!(self, SyncStoppedReason::Complete | SyncStoppedReason::Requested)
    }
}

impl fmt::Display for SyncStoppedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStoppedReason::Complete => f.write_str("complete"),
            SyncStoppedReason::Requested => f.write_str("requested"),
            SyncStoppedReason::Unknown => f.write_str("unknown"),
            SyncStoppedReason::Posix { errnum, message } => match message {
                Some(message) => write!(f, "posix({errnum}: {message})"),
                None => write!(f, "posix({errnum})"),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ManagerState {
    Created,
    Connected,
    Disconnected { reason: DisconnectReason },
    Syncing,
    Deleted,
}

impl ManagerState {
    pub fn name(&self) -> &'static str {
        match self {
            ManagerState::Created => "created",
            ManagerState::Connected => "connected",
            ManagerState::Disconnected { .. } => "disconnected",
            ManagerState::Syncing => "syncing",
            ManagerState::Deleted => "deleted",
        }
    }

    /// Connected or syncing; the engine is doing network work
    pub fn is_active(&self) -> bool {
        matches!(self, ManagerState::Connected | ManagerState::Syncing)
    }
}

impl fmt::Display for ManagerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManagerState::Disconnected { reason } => write!(f, "disconnected({reason})"),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManagerRecord {
    handle: ManagerHandle,
    account: Account,
    network: Network,
    mode: ManagerMode,
    storage_path: PathBuf,
    state: ManagerState,
    height: u64,
    wallets: HandleRegistry<WalletHandle, WalletRecord>,
    primary_wallet: Option<WalletHandle>,
}

impl ManagerRecord {
    pub fn new(
        handle: ManagerHandle,
        account: Account,
        network: Network,
        mode: ManagerMode,
        storage_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            handle,
            account,
            network,
            mode,
            storage_path: storage_path.into(),
            state: ManagerState::Created,
            height: 0,
            wallets: HandleRegistry::new(),
            primary_wallet: None,
        }
    }

    pub fn handle(&self) -> ManagerHandle {
        self.handle
    }

    pub fn backend(&self) -> Backend {
        self.handle.backend()
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn mode(&self) -> ManagerMode {
        self.mode
    }

    pub fn storage_path(&self) -> &Path {
        &self.storage_path
    }

    pub fn state(&self) -> &ManagerState {
        &self.state
    }

    /// Last chain height the engine reported
    pub fn height(&self) -> u64 {
        self.height
    }

    pub fn wallets(&self) -> &HandleRegistry<WalletHandle, WalletRecord> {
        &self.wallets
    }

    pub(crate) fn wallets_mut(&mut self) -> &mut HandleRegistry<WalletHandle, WalletRecord> {
        &mut self.wallets
    }

    pub fn wallet(&self, handle: &WalletHandle) -> Option<&WalletRecord> {
        self.wallets.find(handle)
    }

    /// The wallet holding the network's native currency, once it exists
    pub fn primary_wallet(&self) -> Option<&WalletRecord> {
        self.primary_wallet
            .as_ref()
            .and_then(|handle| self.wallets.find(handle))
    }

    pub fn primary_wallet_handle(&self) -> Option<WalletHandle> {
        self.primary_wallet
    }

    pub(crate) fn set_primary_wallet(&mut self, handle: WalletHandle) {
        self.primary_wallet = Some(handle);
    }

    /// Find the wallet holding `currency_code`
    pub fn wallet_for_currency(&self, currency_code: &str) -> Option<&WalletRecord> {
        self.wallets
            .iter()
            .map(|(_, wallet)| wallet)
            .find(|wallet| wallet.currency().code.eq_ignore_ascii_case(currency_code))
    }

    /// Currency fees are paid in, falling back to `currency` itself
    pub fn fee_currency_for(&self, currency: &Currency) -> Currency {
        self.network
            .native()
            .cloned()
            .unwrap_or_else(|| currency.clone())
    }

    pub fn transition(
        &mut self,
        new_state: ManagerState,
    ) -> Result<Option<(ManagerState, ManagerState)>, StateTransitionError> {
        if self.state == new_state {
            return Ok(None);
        }

        let allowed = match (&self.state, &new_state) {
            (ManagerState::Deleted, _) => false,
            (_, ManagerState::Deleted) => true,
            (_, ManagerState::Created) => false,
            _ => true,
        };

        if !allowed {
            return Err(StateTransitionError {
                record: format!("manager {}", self.handle),
                from: self.state.to_string(),
                to: new_state.to_string(),
            });
        }

        let old = std::mem::replace(&mut self.state, new_state.clone());
        Ok(Some((old, new_state)))
    }

    /// Record a new chain height; returns `true` if it changed
    pub fn set_height(&mut self, height: u64) -> bool {
        if self.height == height {
            return false;
        }
        self.height = height;
        true
    }

    /// Change the operating mode while the engine is idle
    pub fn set_mode(&mut self, mode: ManagerMode) -> Result<Option<ManagerMode>, WalletSystemError> {
        match self.state {
            ManagerState::Connected | ManagerState::Syncing | ManagerState::Deleted => {
                Err(WalletSystemError::InvalidManagerState {
                    manager: self.handle,
                    operation: "set mode".to_string(),
                    state: self.state.to_string(),
                })
            }
            _ if self.mode == mode => Ok(None),
            _ => Ok(Some(std::mem::replace(&mut self.mode, mode))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ManagerRecord {
        ManagerRecord::new(
            ManagerHandle::new(Backend::Utxo, 0x10),
            Account::new("account-1", 1_500_000_000),
            Network::bitcoin(false),
            ManagerMode::P2pOnly,
            "/tmp/wallet",
        )
    }

    #[test]
    fn test_cycle_between_active_states() {
        let mut manager = manager();
        assert!(manager.transition(ManagerState::Connected).unwrap().is_some());
        assert!(manager.transition(ManagerState::Syncing).unwrap().is_some());
        assert!(manager.transition(ManagerState::Connected).unwrap().is_some());
        assert!(manager
            .transition(ManagerState::Disconnected {
                reason: DisconnectReason::Requested
            })
            .unwrap()
            .is_some());
        assert!(manager.transition(ManagerState::Syncing).unwrap().is_some());
        assert_eq!(manager.transition(ManagerState::Syncing).unwrap(), None);
    }

    #[test]
    fn test_deleted_is_terminal_and_created_unreachable() {
        let mut manager = manager();
        manager.transition(ManagerState::Connected).unwrap();
        assert!(manager.transition(ManagerState::Created).is_err());

        manager.transition(ManagerState::Deleted).unwrap();
        let err = manager.transition(ManagerState::Connected).unwrap_err();
        assert_eq!(err.from, "deleted");
        assert_eq!(err.to, "connected");
    }

    #[test]
    fn test_disconnect_reason_change_is_a_transition() {
        let mut manager = manager();
        manager
            .transition(ManagerState::Disconnected {
                reason: DisconnectReason::Requested,
            })
            .unwrap();
        let change = manager
            .transition(ManagerState::Disconnected {
                reason: DisconnectReason::Posix {
                    errnum: 104,
                    message: Some("connection reset".to_string()),
                },
            })
            .unwrap();
        assert!(change.is_some());
        assert_eq!(
            manager.state().to_string(),
            "disconnected(posix(104: connection reset))"
        );
    }

    #[test]
    fn test_set_mode_only_while_idle() {
        let mut manager = manager();
        assert_eq!(
            manager.set_mode(ManagerMode::ApiOnly).unwrap(),
            Some(ManagerMode::P2pOnly)
        );
        assert_eq!(manager.set_mode(ManagerMode::ApiOnly).unwrap(), None);

        manager.transition(ManagerState::Connected).unwrap();
        assert!(matches!(
            manager.set_mode(ManagerMode::P2pOnly),
            Err(WalletSystemError::InvalidManagerState { .. })
        ));
        assert_eq!(manager.mode(), ManagerMode::ApiOnly);
    }

    #[test]
    fn test_height_and_sync_reason() {
        let mut manager = manager();
        assert!(manager.set_height(100));
        assert!(!manager.set_height(100));
        assert_eq!(manager.height(), 100);

        assert!(SyncStoppedReason::Complete.is_success());
        assert!(!SyncStoppedReason::Posix {
            errnum: 61,
            message: None
        }
        .is_success());
    }
}

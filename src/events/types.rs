//! Event type definitions
//!
//! Every state change the dispatch context applies produces one or more
//! events. Events are created once and shared between listeners as
//! [`SharedEvent`] (`Arc<Event>`).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

use crate::data_structures::{Amount, FeeBasis, ManagerHandle, TransferPath, WalletHandle, WalletPath};
use crate::records::{ManagerState, SyncStoppedReason, TransferState, WalletState};

/// Shared event metadata present in all events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Position in the system's single event stream, starting at 1
    pub sequence: u64,
    /// Timestamp when the event was created
    pub timestamp: SystemTime,
    /// Component that emitted this event
    pub source: String,
}

impl EventMetadata {
    pub fn new(sequence: u64, source: &str) -> Self {
        Self {
            sequence,
            timestamp: SystemTime::now(),
            source: source.to_string(),
        }
    }
}

/// Trait for events that can provide their type name
pub trait EventType {
    /// Get the string name of this event type
    fn event_type(&self) -> &'static str;

    /// Get metadata associated with this event
    fn metadata(&self) -> &EventMetadata;
}

/// Trait for events that can be serialized for debugging/logging
pub trait SerializableEvent {
    /// Serialize event to JSON string for debugging (pretty-printed)
    fn to_debug_json(&self) -> Result<String, String>;

    /// Serialize event to compact JSON string
    fn to_compact_json(&self) -> Result<String, String>;

    /// Get human-readable summary of the event
    fn summary(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SystemEvent {
    /// The dispatch context started
    Created,
    ManagerAdded { manager: ManagerHandle },
    ManagerDeleted { manager: ManagerHandle },
    /// Teardown finished; nothing follows
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ManagerEvent {
    Created,
    Changed {
        old_state: ManagerState,
        new_state: ManagerState,
    },
    SyncStarted,
    SyncProgress {
        percent_complete: f32,
        /// Timestamp of the last block synced, if known
        timestamp: Option<u64>,
    },
    SyncEnded {
        reason: SyncStoppedReason,
    },
    BlockUpdated {
        height: u64,
    },
    WalletAdded {
        wallet: WalletHandle,
    },
    WalletChanged {
        wallet: WalletHandle,
    },
    WalletDeleted {
        wallet: WalletHandle,
    },
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WalletEvent {
    Created,
    Changed {
        old_state: WalletState,
        new_state: WalletState,
    },
    BalanceUpdated {
        balance: Amount,
    },
    FeeBasisUpdated {
        fee_basis: FeeBasis,
    },
    TransferAdded {
        transfer: TransferPath,
    },
    TransferChanged {
        transfer: TransferPath,
    },
    TransferSubmitted {
        transfer: TransferPath,
    },
    TransferDeleted {
        transfer: TransferPath,
    },
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TransferEvent {
    Created,
    Changed {
        old_state: TransferState,
        new_state: TransferState,
    },
    ConfirmationsUpdated {
        confirmations: u64,
    },
    Deleted,
}

/// One entry in the system's event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    System {
        metadata: EventMetadata,
        event: SystemEvent,
    },
    Manager {
        metadata: EventMetadata,
        manager: ManagerHandle,
        event: ManagerEvent,
    },
    Wallet {
        metadata: EventMetadata,
        wallet: WalletPath,
        event: WalletEvent,
    },
    Transfer {
        metadata: EventMetadata,
        transfer: TransferPath,
        event: TransferEvent,
    },
}

/// Events are shared between listeners without copying
pub type SharedEvent = Arc<Event>;

impl Event {
    /// The manager this event belongs to, if any
    pub fn manager(&self) -> Option<ManagerHandle> {
        match self {
            Event::System { .. } => None,
            Event::Manager { manager, .. } => Some(*manager),
            Event::Wallet { wallet, .. } => Some(wallet.manager),
            Event::Transfer { transfer, .. } => Some(transfer.manager),
        }
    }

    /// `"system"`, `"manager"`, `"wallet"` or `"transfer"`
    pub fn scope(&self) -> &'static str {
        match self {
            Event::System { .. } => "system",
            Event::Manager { .. } => "manager",
            Event::Wallet { .. } => "wallet",
            Event::Transfer { .. } => "transfer",
        }
    }

    pub fn from_json(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("Failed to deserialize event: {e}"))
    }
}

impl EventType for Event {
    fn event_type(&self) -> &'static str {
        match self {
            Event::System { event, .. } => match event {
                SystemEvent::Created => "SystemCreated",
                SystemEvent::ManagerAdded { .. } => "SystemManagerAdded",
                SystemEvent::ManagerDeleted { .. } => "SystemManagerDeleted",
                SystemEvent::Deleted => "SystemDeleted",
            },
            Event::Manager { event, .. } => match event {
                ManagerEvent::Created => "ManagerCreated",
                ManagerEvent::Changed { .. } => "ManagerChanged",
                ManagerEvent::SyncStarted => "ManagerSyncStarted",
                ManagerEvent::SyncProgress { .. } => "ManagerSyncProgress",
                ManagerEvent::SyncEnded { .. } => "ManagerSyncEnded",
                ManagerEvent::BlockUpdated { .. } => "ManagerBlockUpdated",
                ManagerEvent::WalletAdded { .. } => "ManagerWalletAdded",
                ManagerEvent::WalletChanged { .. } => "ManagerWalletChanged",
                ManagerEvent::WalletDeleted { .. } => "ManagerWalletDeleted",
                ManagerEvent::Deleted => "ManagerDeleted",
            },
            Event::Wallet { event, .. } => match event {
                WalletEvent::Created => "WalletCreated",
                WalletEvent::Changed { .. } => "WalletChanged",
                WalletEvent::BalanceUpdated { .. } => "WalletBalanceUpdated",
                WalletEvent::FeeBasisUpdated { .. } => "WalletFeeBasisUpdated",
                WalletEvent::TransferAdded { .. } => "WalletTransferAdded",
                WalletEvent::TransferChanged { .. } => "WalletTransferChanged",
                WalletEvent::TransferSubmitted { .. } => "WalletTransferSubmitted",
                WalletEvent::TransferDeleted { .. } => "WalletTransferDeleted",
                WalletEvent::Deleted => "WalletDeleted",
            },
            Event::Transfer { event, .. } => match event {
                TransferEvent::Created => "TransferCreated",
                TransferEvent::Changed { .. } => "TransferChanged",
                TransferEvent::ConfirmationsUpdated { .. } => "TransferConfirmationsUpdated",
                TransferEvent::Deleted => "TransferDeleted",
            },
        }
    }

    fn metadata(&self) -> &EventMetadata {
        match self {
            Event::System { metadata, .. }
            | Event::Manager { metadata, .. }
            | Event::Wallet { metadata, .. }
            | Event::Transfer { metadata, .. } => metadata,
        }
    }
}

impl SerializableEvent for Event {
    fn to_debug_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| format!("Failed to serialize event: {e}"))
    }

    fn to_compact_json(&self) -> Result<String, String> {
        serde_json::to_string(self).map_err(|e| format!("Failed to serialize event: {e}"))
    }

    fn summary(&self) -> String {
        let sequence = self.metadata().sequence;
        match self {
            Event::System { event, .. } => match event {
                SystemEvent::ManagerAdded { manager } | SystemEvent::ManagerDeleted { manager } => {
                    format!("#{sequence} {} {manager}", self.event_type())
                }
                _ => format!("#{sequence} {}", self.event_type()),
            },
            Event::Manager { manager, event, .. } => match event {
                ManagerEvent::Changed {
                    old_state,
                    new_state,
                } => format!("#{sequence} manager {manager}: {old_state} -> {new_state}"),
                ManagerEvent::SyncProgress {
                    percent_complete, ..
                } => format!("#{sequence} manager {manager}: sync {percent_complete:.1}%"),
                ManagerEvent::SyncEnded { reason } => {
                    format!("#{sequence} manager {manager}: sync ended ({reason})")
                }
                ManagerEvent::BlockUpdated { height } => {
                    format!("#{sequence} manager {manager}: height {height}")
                }
                _ => format!("#{sequence} {} {manager}", self.event_type()),
            },
            Event::Wallet { wallet, event, .. } => match event {
                WalletEvent::BalanceUpdated { balance } => {
                    format!("#{sequence} wallet {wallet}: balance {balance}")
                }
                _ => format!("#{sequence} {} {wallet}", self.event_type()),
            },
            Event::Transfer {
                transfer, event, ..
            } => match event {
                TransferEvent::Changed {
                    old_state,
                    new_state,
                } => format!("#{sequence} transfer {transfer}: {old_state} -> {new_state}"),
                TransferEvent::ConfirmationsUpdated { confirmations } => {
                    format!("#{sequence} transfer {transfer}: {confirmations} confirmations")
                }
                _ => format!("#{sequence} {} {transfer}", self.event_type()),
            },
        }
    }
}

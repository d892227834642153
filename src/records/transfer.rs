//! Transfer records and their state machine
//!
//! A transfer moves forward only:
//!
//! ```text
//! created -> signed -> submitted -> included | failed
//!                  (any state) -> deleted
//! ```
//!
//! UTXO engines usually skip `signed`; received transfers may jump straight to
//! `included`. Skipping is fine, going back is not.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data_structures::{Address, Amount, Currency, FeeBasis, TransferHash, TransferPath};
use crate::errors::StateTransitionError;

/// Why a transfer failed; every variant is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferFailureReason {
    InvalidSignature,
    NonceTooLow,
    BalanceTooLow,
    GasPriceTooLow,
    GasTooLow,
    ReplacementUnderpriced,
    Dropped,
    Unknown,
}

impl TransferFailureReason {
    /// Map an engine or node error code/message onto the closed taxonomy
    pub fn from_engine_code(code: &str) -> Self {
        let normalized = code.to_ascii_lowercase().replace(['_', '-'], " ");
        let has = |needle: &str| normalized.contains(needle);

        if has("invalid signature") || has("invalid sender") {
            Self::InvalidSignature
        } else if has("nonce too low") {
            Self::NonceTooLow
        } else if has("insufficient funds") || has("balance too low") {
            Self::BalanceTooLow
        } else if has("replacement") && has("underpriced") {
            Self::ReplacementUnderpriced
        } else if has("underpriced") || has("gas price too low") {
            Self::GasPriceTooLow
        } else if has("gas too low") {
            Self::GasTooLow
        } else if has("dropped") {
            Self::Dropped
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidSignature => "invalid_signature",
            Self::NonceTooLow => "nonce_too_low",
            Self::BalanceTooLow => "balance_too_low",
            Self::GasPriceTooLow => "gas_price_too_low",
            Self::GasTooLow => "gas_too_low",
            Self::ReplacementUnderpriced => "replacement_underpriced",
            Self::Dropped => "dropped",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TransferFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed failure plus the engine's human-readable message, if any
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferFailure {
    pub reason: TransferFailureReason,
    pub message: Option<String>,
}

impl TransferFailure {
    pub fn new(reason: TransferFailureReason) -> Self {
        Self {
            reason,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Proof that a transfer is in a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfirmation {
    pub block_number: u64,
    pub transaction_index: u64,
    /// Block timestamp, seconds since the Unix epoch
    pub timestamp: u64,
    /// Fee actually paid
    pub fee: Amount,
}

impl TransferConfirmation {
    /// Confirmation count at chain height `height`; `None` while `height` is
    /// below the inclusion block (pending reorg)
    pub fn confirmations_at(&self, height: u64) -> Option<u64> {
        if height >= self.block_number {
            Some(height - self.block_number + 1)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    Created,
    Signed,
    Submitted,
    Included { confirmation: TransferConfirmation },
    Failed { failure: TransferFailure },
    Deleted,
}

impl TransferState {
    pub fn name(&self) -> &'static str {
        match self {
            TransferState::Created => "created",
            TransferState::Signed => "signed",
            TransferState::Submitted => "submitted",
            TransferState::Included { .. } => "included",
            TransferState::Failed { .. } => "failed",
            TransferState::Deleted => "deleted",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            TransferState::Created => 0,
            TransferState::Signed => 1,
            TransferState::Submitted => 2,
            TransferState::Included { .. } | TransferState::Failed { .. } => 3,
            TransferState::Deleted => 4,
        }
    }

    /// `failed` and `deleted` accept nothing further
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::Failed { .. } | TransferState::Deleted)
    }
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferState::Included { confirmation } => {
                write!(f, "included(block {})", confirmation.block_number)
            }
            TransferState::Failed { failure } => write!(f, "failed({})", failure.reason),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferDirection {
    Sent,
    Received,
    /// Sent from the wallet to itself
    Recovered,
}

/// One transfer owned by a wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    path: TransferPath,
    source: Option<Address>,
    target: Option<Address>,
    amount: Amount,
    direction: TransferDirection,
    fee_basis: Option<FeeBasis>,
    estimated_fee: Option<Amount>,
    hash: Option<TransferHash>,
    state: TransferState,
}

impl TransferRecord {
    pub fn new(path: TransferPath, amount: Amount, direction: TransferDirection) -> Self {
        Self {
            path,
            source: None,
            target: None,
            amount,
            direction,
            fee_basis: None,
            estimated_fee: None,
            hash: None,
            state: TransferState::Created,
        }
    }

    pub fn with_source(mut self, source: Option<Address>) -> Self {
        self.source = source;
        self
    }

    pub fn with_target(mut self, target: Option<Address>) -> Self {
        self.target = target;
        self
    }

    /// Attach the fee basis; the fee estimate is priced in `fee_currency`
    pub fn with_fee_basis(mut self, fee_basis: Option<FeeBasis>, fee_currency: &Currency) -> Self {
        self.estimated_fee = fee_basis
            .as_ref()
            .map(|basis| Amount::from_base_units(basis.fee(), fee_currency));
        self.fee_basis = fee_basis;
        self
    }

    pub fn with_hash(mut self, hash: Option<TransferHash>) -> Self {
        self.hash = hash;
        self
    }

    pub fn path(&self) -> &TransferPath {
        &self.path
    }

    pub fn source(&self) -> Option<&Address> {
        self.source.as_ref()
    }

    pub fn target(&self) -> Option<&Address> {
        self.target.as_ref()
    }

    pub fn amount(&self) -> &Amount {
        &self.amount
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    pub fn fee_basis(&self) -> Option<&FeeBasis> {
        self.fee_basis.as_ref()
    }

    pub fn hash(&self) -> Option<&TransferHash> {
        self.hash.as_ref()
    }

    pub fn state(&self) -> &TransferState {
        &self.state
    }

    pub fn confirmation(&self) -> Option<&TransferConfirmation> {
        match &self.state {
            TransferState::Included { confirmation } => Some(confirmation),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&TransferFailure> {
        match &self.state {
            TransferState::Failed { failure } => Some(failure),
            _ => None,
        }
    }

    /// Confirmations at `height`, derived on every call and never stored
    pub fn confirmations(&self, height: u64) -> Option<u64> {
        self.confirmation()
            .and_then(|confirmation| confirmation.confirmations_at(height))
    }

    /// Realized fee once included, the estimate before that
    pub fn fee(&self) -> Option<Amount> {
        match self.confirmation() {
            Some(confirmation) => Some(confirmation.fee.clone()),
            None => self.estimated_fee.clone(),
        }
    }

    /// Record the network hash; returns `true` if it changed
    pub fn set_hash(&mut self, hash: TransferHash) -> bool {
        if self.hash.as_ref() == Some(&hash) {
            return false;
        }
        self.hash = Some(hash);
        true
    }

    /// Apply a state transition
    ///
    /// Returns `Ok(Some((old, new)))` when the state changed, `Ok(None)` when
    /// the new state is a re-delivery of the current one, and an error when
    /// the transition would move the transfer backwards or out of a terminal
    /// state.
    pub fn transition(
        &mut self,
        new_state: TransferState,
    ) -> Result<Option<(TransferState, TransferState)>, StateTransitionError> {
        let current = &self.state;
        let reject = || StateTransitionError {
            record: format!("transfer {}", self.path),
            from: current.to_string(),
            to: new_state.to_string(),
        };

        if *current == new_state {
            return Ok(None);
        }

        let allowed = match (current, &new_state) {
            (TransferState::Deleted, _) => false,
            (_, TransferState::Deleted) => true,
            (TransferState::Failed { .. }, _) => false,
            // A reorg can move an included transfer into another block
            (TransferState::Included { .. }, TransferState::Included { .. }) => true,
            (TransferState::Included { .. }, _) => false,
            (current, new_state) => new_state.rank() > current.rank(),
        };

        if !allowed {
            return Err(reject());
        }

        let old = std::mem::replace(&mut self.state, new_state.clone());
        Ok(Some((old, new_state)))
    }
}

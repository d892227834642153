//! Raw, backend-native values carried by engine callbacks
//!
//! These are what engines hand over before normalization: big integers as
//! strings, addresses and hashes as byte buffers. Decoding happens in the
//! dispatch context before anything is stored.

use serde::{Deserialize, Serialize};

use crate::data_structures::{Backend, FeeBasis};
use crate::errors::DecodeError;
use crate::records::TransferDirection;

/// Wallet balance as an engine reports it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawBalance {
    /// Totals over wallet-owned outputs received and inputs spent
    Utxo { received: u64, sent: u64 },
    /// Big-integer balance in base units
    Account { balance: String },
}

impl RawBalance {
    pub fn backend(&self) -> Backend {
        match self {
            RawBalance::Utxo { .. } => Backend::Utxo,
            RawBalance::Account { .. } => Backend::Account,
        }
    }
}

/// Fee parameters as an engine reports them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RawFeeBasis {
    Utxo { fee_per_kb: u64, size_in_bytes: u32 },
    Account { gas_price: String, gas_limit: u64 },
}

impl RawFeeBasis {
    pub fn backend(&self) -> Backend {
        match self {
            RawFeeBasis::Utxo { .. } => Backend::Utxo,
            RawFeeBasis::Account { .. } => Backend::Account,
        }
    }

    /// Normalize, checking that the basis belongs to the `expected` backend
    pub fn decode(&self, expected: Backend) -> Result<FeeBasis, DecodeError> {
        if self.backend() != expected {
            return Err(DecodeError::BackendMismatch {
                payload: "fee basis",
                expected,
                actual: self.backend(),
            });
        }
        match self {
            RawFeeBasis::Utxo {
                fee_per_kb,
                size_in_bytes,
            } => Ok(FeeBasis::Utxo {
                fee_per_kb: *fee_per_kb,
                size_in_bytes: *size_in_bytes,
            }),
            RawFeeBasis::Account {
                gas_price,
                gas_limit,
            } => Ok(FeeBasis::Account {
                gas_price: crate::data_structures::amount::parse_u256(gas_price)?,
                gas_limit: *gas_limit,
            }),
        }
    }
}

impl From<&FeeBasis> for RawFeeBasis {
    fn from(basis: &FeeBasis) -> Self {
        match basis {
            FeeBasis::Utxo {
                fee_per_kb,
                size_in_bytes,
            } => RawFeeBasis::Utxo {
                fee_per_kb: *fee_per_kb,
                size_in_bytes: *size_in_bytes,
            },
            FeeBasis::Account {
                gas_price,
                gas_limit,
            } => RawFeeBasis::Account {
                gas_price: gas_price.to_string(),
                gas_limit: *gas_limit,
            },
        }
    }
}

/// Transfer attributes carried by a "transfer created" callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransfer {
    /// Unknown before confirmation for some received transfers
    pub source: Option<Vec<u8>>,
    pub target: Option<Vec<u8>>,
    /// Big integer in the wallet currency's base unit
    pub amount: String,
    pub direction: TransferDirection,
    pub fee_basis: Option<RawFeeBasis>,
    pub hash: Option<Vec<u8>>,
}

impl RawTransfer {
    pub fn new(amount: impl Into<String>, direction: TransferDirection) -> Self {
        Self {
            source: None,
            target: None,
            amount: amount.into(),
            direction,
            fee_basis: None,
            hash: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<Vec<u8>>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_target(mut self, target: impl Into<Vec<u8>>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_fee_basis(mut self, fee_basis: RawFeeBasis) -> Self {
        self.fee_basis = Some(fee_basis);
        self
    }

    pub fn with_hash(mut self, hash: impl Into<Vec<u8>>) -> Self {
        self.hash = Some(hash.into());
        self
    }
}

/// Error reported by an "errored" transfer callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransferError {
    /// Engine or node error code/message, mapped onto the failure taxonomy
    pub code: String,
    pub message: Option<String>,
}

impl RawTransferError {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

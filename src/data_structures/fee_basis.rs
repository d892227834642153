//! Backend-specific fee parameters

use primitive_types::U256;
use serde::{Deserialize, Serialize};

use super::handle::Backend;

/// Parameters used to estimate or realize a transfer's fee
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeeBasis {
    /// Fee rate in base units per 1000 bytes, and the transaction size
    Utxo { fee_per_kb: u64, size_in_bytes: u32 },
    /// Gas price in base units and gas limit
    Account { gas_price: U256, gas_limit: u64 },
}

impl FeeBasis {
    pub fn backend(&self) -> Backend {
        match self {
            FeeBasis::Utxo { .. } => Backend::Utxo,
            FeeBasis::Account { .. } => Backend::Account,
        }
    }

    /// Fee in base units of the network's native currency
    ///
    /// UTXO fees round up to the next whole base unit.
    pub fn fee(&self) -> U256 {
        match self {
            FeeBasis::Utxo {
                fee_per_kb,
                size_in_bytes,
            } => {
                let product = U256::from(*fee_per_kb) * U256::from(*size_in_bytes);
                let thousand = U256::from(1000u64);
                (product + thousand - U256::one()) / thousand
            }
            FeeBasis::Account {
                gas_price,
                gas_limit,
            } => gas_price.saturating_mul(U256::from(*gas_limit)),
        }
    }

    /// Same basis applied to a different transaction size
    pub fn with_size(&self, size_in_bytes: u32) -> FeeBasis {
        match self {
            FeeBasis::Utxo { fee_per_kb, .. } => FeeBasis::Utxo {
                fee_per_kb: *fee_per_kb,
                size_in_bytes,
            },
            other => other.clone(),
        }
    }
}

//! Wallet records
//!
//! A wallet has a two-state lifecycle (`created -> deleted`). Everything else
//! it carries (balance, default fee basis, transfers) is mutable sub-state that
//! changes without a lifecycle transition. The wallet is also where raw,
//! backend-specific values are normalized, so listeners only ever see
//! [`Amount`] and [`FeeBasis`].

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

use super::transfer::TransferRecord;
use crate::data_structures::{
    Address, Amount, Backend, Currency, FeeBasis, TransferHandle, TransferHash, Unit,
    WalletHandle, WalletPath,
};
use crate::engine::{RawBalance, RawFeeBasis, RawTransfer};
use crate::errors::{DecodeError, StateTransitionError};
use crate::registry::HandleRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalletState {
    Created,
    Deleted,
}

impl WalletState {
    pub fn name(&self) -> &'static str {
        match self {
            WalletState::Created => "created",
            WalletState::Deleted => "deleted",
        }
    }
}

impl fmt::Display for WalletState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One wallet, holding one currency, owned by a manager
#[derive(Debug, Clone)]
pub struct WalletRecord {
    path: WalletPath,
    currency: Currency,
    /// Currency fees are paid in; differs from `currency` for tokens
    fee_currency: Currency,
    state: WalletState,
    balance: Amount,
    default_fee_basis: Option<FeeBasis>,
    transfers: HandleRegistry<TransferHandle, TransferRecord>,
}

impl WalletRecord {
    pub fn new(path: WalletPath, currency: Currency, fee_currency: Currency) -> Self {
        Self {
            path,
            balance: Amount::zero(&currency),
            currency,
            fee_currency,
            state: WalletState::Created,
            default_fee_basis: None,
            transfers: HandleRegistry::new(),
        }
    }

    pub fn path(&self) -> &WalletPath {
        &self.path
    }

    pub fn handle(&self) -> WalletHandle {
        self.path.wallet
    }

    pub fn backend(&self) -> Backend {
        self.path.wallet.backend()
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }

    pub fn fee_currency(&self) -> &Currency {
        &self.fee_currency
    }

    /// Unit amounts are displayed in
    pub fn unit(&self) -> &Unit {
        &self.currency.default_unit
    }

    pub fn state(&self) -> WalletState {
        self.state
    }

    pub fn balance(&self) -> &Amount {
        &self.balance
    }

    pub fn default_fee_basis(&self) -> Option<&FeeBasis> {
        self.default_fee_basis.as_ref()
    }

    pub fn transfers(&self) -> &HandleRegistry<TransferHandle, TransferRecord> {
        &self.transfers
    }

    pub(crate) fn transfers_mut(&mut self) -> &mut HandleRegistry<TransferHandle, TransferRecord> {
        &mut self.transfers
    }

    pub fn transfer(&self, handle: &TransferHandle) -> Option<&TransferRecord> {
        self.transfers.find(handle)
    }

    pub fn transition(
        &mut self,
        new_state: WalletState,
    ) -> Result<Option<(WalletState, WalletState)>, StateTransitionError> {
        match (self.state, new_state) {
            (old, new) if old == new => Ok(None),
            (WalletState::Created, WalletState::Deleted) => {
                self.state = new_state;
                Ok(Some((WalletState::Created, WalletState::Deleted)))
            }
            (old, new) => Err(StateTransitionError {
                record: format!("wallet {}", self.path),
                from: old.to_string(),
                to: new.to_string(),
            }),
        }
    }

    /// Normalize an engine-reported balance into this wallet's currency
    ///
    /// UTXO balances are received minus sent. A negative difference means the
    /// engine is mid-update; it is clamped to zero and logged.
    pub fn normalize_balance(&self, raw: &RawBalance) -> Result<Amount, DecodeError> {
        match (self.backend(), raw) {
            (Backend::Utxo, RawBalance::Utxo { received, sent }) => {
                let value = received.checked_sub(*sent).unwrap_or_else(|| {
                    warn!(
                        wallet = %self.path,
                        received,
                        sent,
                        "UTXO wallet reported more sent than received; clamping balance to zero"
                    );
                    0
                });
                Ok(Amount::from_u64(value, &self.currency))
            }
            (Backend::Account, RawBalance::Account { balance }) => {
                Amount::parse_base_units(balance, &self.currency)
            }
            (expected, raw) => Err(DecodeError::BackendMismatch {
                payload: "balance",
                expected,
                actual: raw.backend(),
            }),
        }
    }

    /// Store a new balance; returns it if it differs from the cached one
    pub fn apply_balance(&mut self, balance: Amount) -> Option<Amount> {
        if balance == self.balance {
            return None;
        }
        self.balance = balance.clone();
        Some(balance)
    }

    pub fn normalize_fee_basis(&self, raw: &RawFeeBasis) -> Result<FeeBasis, DecodeError> {
        raw.decode(self.backend())
    }

    /// Store a new default fee basis; returns `true` if it changed
    pub fn apply_fee_basis(&mut self, basis: FeeBasis) -> bool {
        if self.default_fee_basis.as_ref() == Some(&basis) {
            return false;
        }
        self.default_fee_basis = Some(basis);
        true
    }

    /// Build a transfer record from a raw "transfer created" payload
    ///
    /// Nothing is registered here; the caller admits the record through the
    /// wallet's transfer registry.
    pub fn decode_transfer(
        &self,
        handle: TransferHandle,
        raw: &RawTransfer,
    ) -> Result<TransferRecord, DecodeError> {
        let backend = self.backend();
        let decode_address = |bytes: &Option<Vec<u8>>| {
            bytes
                .as_deref()
                .map(|bytes| Address::decode_raw(backend, bytes))
                .transpose()
        };

        let amount = Amount::parse_base_units(&raw.amount, &self.currency)?;
        let source = decode_address(&raw.source)?;
        let target = decode_address(&raw.target)?;
        let fee_basis = raw
            .fee_basis
            .as_ref()
            .map(|basis| basis.decode(backend))
            .transpose()?;
        let hash = raw
            .hash
            .as_deref()
            .map(|bytes| TransferHash::decode_raw(backend, bytes))
            .transpose()?;

        Ok(TransferRecord::new(self.path.transfer(handle), amount, raw.direction)
            .with_source(source)
            .with_target(target)
            .with_fee_basis(fee_basis, &self.fee_currency)
            .with_hash(hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::{ManagerHandle, Network};
    use crate::records::TransferDirection;

    fn wallet(backend: Backend) -> WalletRecord {
        let network = match backend {
            Backend::Utxo => Network::bitcoin(true),
            Backend::Account => Network::ethereum(true),
        };
        let currency = network.native().cloned().unwrap();
        WalletRecord::new(
            WalletPath::new(ManagerHandle::new(backend, 1), WalletHandle::new(backend, 2)),
            currency.clone(),
            currency,
        )
    }

    #[test]
    fn test_utxo_balance_is_received_minus_sent() {
        let wallet = wallet(Backend::Utxo);
        let balance = wallet
            .normalize_balance(&RawBalance::Utxo {
                received: 150_000,
                sent: 50_000,
            })
            .unwrap();
        assert_eq!(balance.value(), 100_000u64.into());
        assert_eq!(balance.currency_code(), "btc");

        let clamped = wallet
            .normalize_balance(&RawBalance::Utxo {
                received: 1,
                sent: 2,
            })
            .unwrap();
        assert!(clamped.is_zero());
    }

    #[test]
    fn test_account_balance_parses_big_integer() {
        let wallet = wallet(Backend::Account);
        let balance = wallet
            .normalize_balance(&RawBalance::Account {
                balance: "2500000000000000000".to_string(),
            })
            .unwrap();
        assert_eq!(balance.to_decimal_string(), "2.5");
    }

    #[test]
    fn test_balance_from_wrong_backend_rejected() {
        let wallet = wallet(Backend::Account);
        let err = wallet
            .normalize_balance(&RawBalance::Utxo {
                received: 1,
                sent: 0,
            })
            .unwrap_err();
        assert!(matches!(err, DecodeError::BackendMismatch { payload: "balance", .. }));
    }

    #[test]
    fn test_apply_reports_changes_only() {
        let mut wallet = wallet(Backend::Utxo);
        let currency = wallet.currency().clone();
        assert_eq!(wallet.apply_balance(Amount::zero(&currency)), None);
        assert!(wallet.apply_balance(Amount::from_u64(5, &currency)).is_some());
        assert_eq!(wallet.apply_balance(Amount::from_u64(5, &currency)), None);

        let basis = FeeBasis::Utxo {
            fee_per_kb: 1000,
            size_in_bytes: 200,
        };
        assert!(wallet.apply_fee_basis(basis.clone()));
        assert!(!wallet.apply_fee_basis(basis));
    }

    #[test]
    fn test_deleted_is_terminal() {
        let mut wallet = wallet(Backend::Utxo);
        assert!(wallet.transition(WalletState::Deleted).unwrap().is_some());
        assert_eq!(wallet.transition(WalletState::Deleted).unwrap(), None);
        assert!(wallet.transition(WalletState::Created).is_err());
    }

    #[test]
    fn test_decode_transfer() {
        let wallet = wallet(Backend::Account);
        let target = hex::decode("b0f225defec7625c6b5e43126bdde398bd90ef62").unwrap();
        let raw = RawTransfer::new("1000", TransferDirection::Sent)
            .with_target(target)
            .with_fee_basis(RawFeeBasis::Account {
                gas_price: "0x3b9aca00".to_string(),
                gas_limit: 21_000,
            })
            .with_hash(vec![7u8; 32]);

        let transfer = wallet
            .decode_transfer(TransferHandle::new(Backend::Account, 9), &raw)
            .unwrap();
        assert_eq!(transfer.amount().to_base_string(), "1000");
        assert_eq!(
            transfer.target().map(|a| a.to_string()),
            Some("0xb0f225defec7625c6b5e43126bdde398bd90ef62".to_string())
        );
        assert_eq!(transfer.fee().map(|f| f.to_base_string()), Some("21000000000000".to_string()));
        assert!(transfer.source().is_none());

        let bad = RawTransfer::new("1", TransferDirection::Received).with_hash(vec![1u8; 3]);
        assert_eq!(
            wallet
                .decode_transfer(TransferHandle::new(Backend::Account, 10), &bad)
                .unwrap_err(),
            DecodeError::InvalidHash { length: 3 }
        );
    }
}

//! Backend engine interface
//!
//! Engines are external: they own networking, validation, key handling and
//! persistence. This layer sees them through two surfaces:
//!
//! - commands and accessors, defined by the traits here and called only from
//!   the dispatch context;
//! - callbacks, which engines raise from their own threads through
//!   [`EngineCallbacks`](crate::dispatch::EngineCallbacks).
//!
//! The two backends are a closed set, so [`EngineBackend`] is an enum and
//! every backend-specific call site matches on it exhaustively.

pub mod mocks;
pub mod raw;

pub use raw::{RawBalance, RawFeeBasis, RawTransfer, RawTransferError};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::data_structures::{
    Account, Address, Amount, Backend, Currency, EngineHandle, FeeBasis, Network,
};
use crate::errors::{EngineError, QueryError};
use crate::query::{QueryLog, QueryRequest, QueryResponse, QueryTransaction, RequestId};
use crate::records::ManagerMode;

/// Everything an engine needs to create a manager
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerParams {
    pub account: Account,
    pub network: Network,
    pub mode: ManagerMode,
    pub storage_path: PathBuf,
}

/// Handles an engine returns for a newly created manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerSetup {
    pub manager: EngineHandle,
    /// Wallet for the network's native currency, created with the manager
    pub primary_wallet: EngineHandle,
}

/// Application request for a new outgoing transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub target: Address,
    pub amount: Amount,
    pub fee_basis: FeeBasis,
}

/// A transfer the engine created on request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedTransfer {
    pub transfer: EngineHandle,
    pub attributes: RawTransfer,
}

/// Paper key phrase, wiped from memory on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PaperKey(String);

impl PaperKey {
    pub fn new(phrase: impl Into<String>) -> Self {
        Self(phrase.into())
    }

    pub fn phrase(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for PaperKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PaperKey(..)")
    }
}

/// How a transfer gets authorized for submission
#[derive(Debug, Clone)]
pub enum SubmitAuth {
    /// The engine derives signing keys from the phrase
    PaperKey(PaperKey),
    /// A signature produced outside the engine
    Signature(Vec<u8>),
}

impl SubmitAuth {
    pub fn kind(&self) -> &'static str {
        match self {
            SubmitAuth::PaperKey(_) => "paper_key",
            SubmitAuth::Signature(_) => "signature",
        }
    }
}

/// Commands and announcements both backends understand
///
/// Announce methods complete a query the engine raised, keyed by its own
/// request id. An engine only ever receives announcements for request kinds it
/// raises; the defaults reject the rest.
///
/// Commands are issued with the record tree unlocked. Reads such as
/// `wallet_totals` or `default_gas` run while a callback is being applied and
/// must answer from memory.
pub trait WalletEngine: Send + Sync {
    fn create_manager(&self, params: &ManagerParams) -> Result<ManagerSetup, EngineError>;

    fn connect(&self, manager: EngineHandle) -> Result<(), EngineError>;

    fn disconnect(&self, manager: EngineHandle) -> Result<(), EngineError>;

    fn sync(&self, manager: EngineHandle) -> Result<(), EngineError>;

    fn set_mode(&self, manager: EngineHandle, mode: ManagerMode) -> Result<(), EngineError>;

    fn create_transfer(
        &self,
        manager: EngineHandle,
        wallet: EngineHandle,
        request: &TransferRequest,
    ) -> Result<CreatedTransfer, EngineError>;

    fn submit(
        &self,
        manager: EngineHandle,
        wallet: EngineHandle,
        transfer: EngineHandle,
        auth: &SubmitAuth,
    ) -> Result<(), EngineError>;

    /// Release engine resources for a manager during teardown
    fn release_manager(&self, manager: EngineHandle);

    fn announce_block_number(
        &self,
        _manager: EngineHandle,
        _request: RequestId,
        _result: Result<u64, QueryError>,
    ) -> Result<(), EngineError> {
        Err(unsupported("announce_block_number"))
    }

    fn announce_transactions(
        &self,
        _manager: EngineHandle,
        _request: RequestId,
        _result: Result<Vec<QueryTransaction>, QueryError>,
    ) -> Result<(), EngineError> {
        Err(unsupported("announce_transactions"))
    }

    fn announce_submit(
        &self,
        _manager: EngineHandle,
        _request: RequestId,
        _result: Result<String, QueryError>,
    ) -> Result<(), EngineError> {
        Err(unsupported("announce_submit"))
    }

    fn announce_blocks(
        &self,
        _manager: EngineHandle,
        _request: RequestId,
        _result: Result<Vec<u64>, QueryError>,
    ) -> Result<(), EngineError> {
        Err(unsupported("announce_blocks"))
    }
}

fn unsupported(operation: &str) -> EngineError {
    EngineError::new(operation, "not supported by this backend")
}

/// UTXO-model engine
pub trait UtxoEngine: WalletEngine {
    /// Totals over wallet-owned outputs received and inputs spent, in base units
    fn wallet_totals(&self, manager: EngineHandle, wallet: EngineHandle) -> Option<RawBalance>;

    /// Current fee rate, base units per 1000 bytes
    fn fee_per_kb(&self, manager: EngineHandle) -> Option<u64>;
}

/// Account-model engine
pub trait AccountEngine: WalletEngine {
    /// Create the wallet for a non-native currency (a token)
    fn create_wallet(
        &self,
        manager: EngineHandle,
        currency: &Currency,
    ) -> Result<EngineHandle, EngineError>;

    fn wallet_balance(&self, manager: EngineHandle, wallet: EngineHandle) -> Option<RawBalance>;

    /// Default gas price (base units, big integer) and gas limit
    fn default_gas(&self, manager: EngineHandle, wallet: EngineHandle) -> Option<RawFeeBasis>;

    fn announce_balance(
        &self,
        manager: EngineHandle,
        request: RequestId,
        result: Result<String, QueryError>,
    ) -> Result<(), EngineError>;

    fn announce_logs(
        &self,
        manager: EngineHandle,
        request: RequestId,
        result: Result<Vec<QueryLog>, QueryError>,
    ) -> Result<(), EngineError>;

    fn announce_nonce(
        &self,
        manager: EngineHandle,
        request: RequestId,
        result: Result<u64, QueryError>,
    ) -> Result<(), EngineError>;

    fn announce_gas_price(
        &self,
        manager: EngineHandle,
        request: RequestId,
        result: Result<String, QueryError>,
    ) -> Result<(), EngineError>;

    fn announce_gas_estimate(
        &self,
        manager: EngineHandle,
        request: RequestId,
        result: Result<u64, QueryError>,
    ) -> Result<(), EngineError>;
}

/// One attached engine, tagged by backend
#[derive(Clone)]
pub enum EngineBackend {
    Utxo(Arc<dyn UtxoEngine>),
    Account(Arc<dyn AccountEngine>),
}

impl fmt::Debug for EngineBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineBackend::{}", self.backend())
    }
}

impl EngineBackend {
    pub fn backend(&self) -> Backend {
        match self {
            EngineBackend::Utxo(_) => Backend::Utxo,
            EngineBackend::Account(_) => Backend::Account,
        }
    }

    pub fn create_manager(&self, params: &ManagerParams) -> Result<ManagerSetup, EngineError> {
        match self {
            EngineBackend::Utxo(engine) => engine.create_manager(params),
            EngineBackend::Account(engine) => engine.create_manager(params),
        }
    }

    pub fn connect(&self, manager: EngineHandle) -> Result<(), EngineError> {
        match self {
            EngineBackend::Utxo(engine) => engine.connect(manager),
            EngineBackend::Account(engine) => engine.connect(manager),
        }
    }

    pub fn disconnect(&self, manager: EngineHandle) -> Result<(), EngineError> {
        match self {
            EngineBackend::Utxo(engine) => engine.disconnect(manager),
            EngineBackend::Account(engine) => engine.disconnect(manager),
        }
    }

    pub fn sync(&self, manager: EngineHandle) -> Result<(), EngineError> {
        match self {
            EngineBackend::Utxo(engine) => engine.sync(manager),
            EngineBackend::Account(engine) => engine.sync(manager),
        }
    }

    pub fn set_mode(&self, manager: EngineHandle, mode: ManagerMode) -> Result<(), EngineError> {
        match self {
            EngineBackend::Utxo(engine) => engine.set_mode(manager, mode),
            EngineBackend::Account(engine) => engine.set_mode(manager, mode),
        }
    }

    pub fn release_manager(&self, manager: EngineHandle) {
        match self {
            EngineBackend::Utxo(engine) => engine.release_manager(manager),
            EngineBackend::Account(engine) => engine.release_manager(manager),
        }
    }

    /// Create a wallet for `currency`
    ///
    /// UTXO managers hold exactly one wallet, created with the manager, so the
    /// UTXO engine is never asked.
    pub fn create_wallet(
        &self,
        manager: EngineHandle,
        currency: &Currency,
    ) -> Result<EngineHandle, EngineError> {
        match self {
            EngineBackend::Utxo(_) => Err(EngineError::new(
                "create_wallet",
                format!("UTXO managers only hold their primary wallet, not '{}'", currency.code),
            )),
            EngineBackend::Account(engine) => engine.create_wallet(manager, currency),
        }
    }

    pub fn create_transfer(
        &self,
        manager: EngineHandle,
        wallet: EngineHandle,
        request: &TransferRequest,
    ) -> Result<CreatedTransfer, EngineError> {
        match self {
            EngineBackend::Utxo(engine) => engine.create_transfer(manager, wallet, request),
            EngineBackend::Account(engine) => engine.create_transfer(manager, wallet, request),
        }
    }

    pub fn submit(
        &self,
        manager: EngineHandle,
        wallet: EngineHandle,
        transfer: EngineHandle,
        auth: &SubmitAuth,
    ) -> Result<(), EngineError> {
        match self {
            EngineBackend::Utxo(engine) => engine.submit(manager, wallet, transfer, auth),
            EngineBackend::Account(engine) => engine.submit(manager, wallet, transfer, auth),
        }
    }

    /// Current wallet balance in the backend's native shape
    pub fn raw_balance(&self, manager: EngineHandle, wallet: EngineHandle) -> Option<RawBalance> {
        match self {
            EngineBackend::Utxo(engine) => engine.wallet_totals(manager, wallet),
            EngineBackend::Account(engine) => engine.wallet_balance(manager, wallet),
        }
    }

    /// Current default fee basis in the backend's native shape
    ///
    /// UTXO bases are reported for a typical 1-input/2-output transaction.
    pub fn raw_fee_basis(&self, manager: EngineHandle, wallet: EngineHandle) -> Option<RawFeeBasis> {
        match self {
            EngineBackend::Utxo(engine) => {
                engine
                    .fee_per_kb(manager)
                    .map(|fee_per_kb| RawFeeBasis::Utxo {
                        fee_per_kb,
                        size_in_bytes: TYPICAL_UTXO_TRANSACTION_SIZE,
                    })
            }
            EngineBackend::Account(engine) => engine.default_gas(manager, wallet),
        }
    }

    /// Feed a query result back into the engine that asked for it
    ///
    /// A response whose shape does not match the request is announced as
    /// [`QueryError::MalformedResponse`].
    pub fn announce(
        &self,
        manager: EngineHandle,
        request_id: RequestId,
        request: &QueryRequest,
        result: Result<QueryResponse, QueryError>,
    ) -> Result<(), EngineError> {
        fn shaped<T>(
            result: Result<QueryResponse, QueryError>,
            kind: &str,
            extract: impl FnOnce(QueryResponse) -> Option<T>,
        ) -> Result<T, QueryError> {
            result.and_then(|response| {
                extract(response).ok_or_else(|| {
                    QueryError::MalformedResponse(format!("unexpected response to {kind}"))
                })
            })
        }

        let kind = request.kind();
        match (self, request) {
            (_, QueryRequest::GetBlockNumber) => {
                let result = shaped(result, kind, |r| match r {
                    QueryResponse::BlockNumber(n) => Some(n),
                    _ => None,
                });
                match self {
                    EngineBackend::Utxo(engine) => engine.announce_block_number(manager, request_id, result),
                    EngineBackend::Account(engine) => engine.announce_block_number(manager, request_id, result),
                }
            }
            (_, QueryRequest::GetTransactions { .. }) => {
                let result = shaped(result, kind, |r| match r {
                    QueryResponse::Transactions(t) => Some(t),
                    _ => None,
                });
                match self {
                    EngineBackend::Utxo(engine) => engine.announce_transactions(manager, request_id, result),
                    EngineBackend::Account(engine) => engine.announce_transactions(manager, request_id, result),
                }
            }
            (_, QueryRequest::SubmitTransaction { .. }) => {
                let result = shaped(result, kind, |r| match r {
                    QueryResponse::Submitted(hash) => Some(hash),
                    _ => None,
                });
                match self {
                    EngineBackend::Utxo(engine) => engine.announce_submit(manager, request_id, result),
                    EngineBackend::Account(engine) => engine.announce_submit(manager, request_id, result),
                }
            }
            (_, QueryRequest::GetBlocks { .. }) => {
                let result = shaped(result, kind, |r| match r {
                    QueryResponse::Blocks(b) => Some(b),
                    _ => None,
                });
                match self {
                    EngineBackend::Utxo(engine) => engine.announce_blocks(manager, request_id, result),
                    EngineBackend::Account(engine) => engine.announce_blocks(manager, request_id, result),
                }
            }
            (EngineBackend::Account(engine), QueryRequest::GetBalance { .. }) => {
                let result = shaped(result, kind, |r| match r {
                    QueryResponse::Balance(b) => Some(b),
                    _ => None,
                });
                engine.announce_balance(manager, request_id, result)
            }
            (EngineBackend::Account(engine), QueryRequest::GetLogs { .. }) => {
                let result = shaped(result, kind, |r| match r {
                    QueryResponse::Logs(l) => Some(l),
                    _ => None,
                });
                engine.announce_logs(manager, request_id, result)
            }
            (EngineBackend::Account(engine), QueryRequest::GetNonce { .. }) => {
                let result = shaped(result, kind, |r| match r {
                    QueryResponse::Nonce(n) => Some(n),
                    _ => None,
                });
                engine.announce_nonce(manager, request_id, result)
            }
            (EngineBackend::Account(engine), QueryRequest::GetGasPrice) => {
                let result = shaped(result, kind, |r| match r {
                    QueryResponse::GasPrice(p) => Some(p),
                    _ => None,
                });
                engine.announce_gas_price(manager, request_id, result)
            }
            (EngineBackend::Account(engine), QueryRequest::EstimateGas { .. }) => {
                let result = shaped(result, kind, |r| match r {
                    QueryResponse::GasEstimate(g) => Some(g),
                    _ => None,
                });
                engine.announce_gas_estimate(manager, request_id, result)
            }
            (
                EngineBackend::Utxo(_),
                QueryRequest::GetBalance { .. }
                | QueryRequest::GetLogs { .. }
                | QueryRequest::GetNonce { .. }
                | QueryRequest::GetGasPrice
                | QueryRequest::EstimateGas { .. },
            ) => Err(EngineError::new(
                format!("announce {kind}"),
                "the UTXO backend has no such query",
            )),
        }
    }
}

/// Size used for the UTXO default fee basis: one input, two outputs
pub const TYPICAL_UTXO_TRANSACTION_SIZE: u32 = 226;

#[cfg(test)]
mod tests {
    use super::mocks::{MockAccountEngine, MockUtxoEngine};
    use super::*;

    #[test]
    fn test_paper_key_debug_is_redacted() {
        let key = PaperKey::new("ginger settle marine tissue robot crane night number ramp coast roast critic");
        assert_eq!(format!("{key:?}"), "PaperKey(..)");
        assert!(key.phrase().starts_with("ginger"));
        assert_eq!(SubmitAuth::PaperKey(key).kind(), "paper_key");
    }

    #[test]
    fn test_utxo_backend_never_creates_extra_wallets() {
        let engine = EngineBackend::Utxo(Arc::new(MockUtxoEngine::new()));
        let btc = Network::bitcoin(true).native().cloned().unwrap();
        let err = engine.create_wallet(EngineHandle::new(1), &btc).unwrap_err();
        assert_eq!(err.operation, "create_wallet");
    }

    #[test]
    fn test_utxo_fee_basis_uses_typical_size() {
        let mock = Arc::new(MockUtxoEngine::new());
        mock.set_fee_per_kb(2000);
        let engine = EngineBackend::Utxo(mock);
        assert_eq!(
            engine.raw_fee_basis(EngineHandle::new(1), EngineHandle::new(2)),
            Some(RawFeeBasis::Utxo {
                fee_per_kb: 2000,
                size_in_bytes: TYPICAL_UTXO_TRANSACTION_SIZE
            })
        );
    }

    #[test]
    fn test_announce_routes_to_matching_command() {
        let mock = Arc::new(MockAccountEngine::new());
        let engine = EngineBackend::Account(mock.clone());
        let manager = EngineHandle::new(7);

        engine
            .announce(
                manager,
                RequestId(1),
                &QueryRequest::GetGasPrice,
                Ok(QueryResponse::GasPrice("5".to_string())),
            )
            .unwrap();
        engine
            .announce(
                manager,
                RequestId(2),
                &QueryRequest::GetNonce {
                    address: "0x01".to_string(),
                },
                Ok(QueryResponse::BlockNumber(3)),
            )
            .unwrap();

        let announcements = mock.announcements();
        assert_eq!(announcements.len(), 2);
        assert_eq!(announcements[0], (RequestId(1), "gas_price".to_string(), true));
        // Wrong response shape is announced as a failure
        assert_eq!(announcements[1], (RequestId(2), "nonce".to_string(), false));
    }

    #[test]
    fn test_utxo_rejects_account_only_queries() {
        let engine = EngineBackend::Utxo(Arc::new(MockUtxoEngine::new()));
        assert!(engine
            .announce(
                EngineHandle::new(1),
                RequestId(1),
                &QueryRequest::GetGasPrice,
                Err(QueryError::NetworkUnavailable("down".to_string())),
            )
            .is_err());
        assert!(engine
            .announce(
                EngineHandle::new(1),
                RequestId(2),
                &QueryRequest::GetBlockNumber,
                Ok(QueryResponse::BlockNumber(10)),
            )
            .is_ok());
    }
}

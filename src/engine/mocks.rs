//! In-memory engines for deterministic testing
//!
//! The mocks hand out sequential handles, record every command they receive
//! and, when given an [`EngineCallbacks`], raise the callbacks a real engine
//! would raise for those commands: creation callbacks for the manager and its
//! primary wallet (duplicating what the application already asked for), a
//! connected callback on connect, sync started/stopped around a sync, and
//! submitted on submit.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{
    AccountEngine, CreatedTransfer, ManagerParams, ManagerSetup, RawBalance, RawFeeBasis,
    RawTransfer, SubmitAuth, TransferRequest, UtxoEngine, WalletEngine,
};
use crate::data_structures::{Address, Currency, EngineHandle};
use crate::dispatch::{EngineCallbacks, ManagerCallback, TransferCallback, WalletCallback};
use crate::errors::{EngineError, QueryError};
use crate::query::{QueryLog, QueryTransaction, RequestId};
use crate::records::{ManagerMode, SyncStoppedReason, TransferDirection};

#[derive(Debug, Default)]
struct MockEngineData {
    commands: Vec<String>,
    /// wallet -> (manager, currency code)
    wallets: HashMap<EngineHandle, (EngineHandle, String)>,
    primary_wallets: HashMap<EngineHandle, EngineHandle>,
    balances: HashMap<EngineHandle, RawBalance>,
    fee_per_kb: Option<u64>,
    default_gas: Option<RawFeeBasis>,
    announcements: Vec<(RequestId, String, bool)>,
    fail_next: Option<String>,
    /// How long each command blocks the calling thread
    command_latency: Option<Duration>,
}

/// State and behavior shared by both mock engines
#[derive(Debug, Clone)]
struct MockEngineCore {
    data: Arc<Mutex<MockEngineData>>,
    next_handle: Arc<AtomicU64>,
    callbacks: Option<EngineCallbacks>,
}

impl MockEngineCore {
    fn new(first_handle: u64) -> Self {
        Self {
            data: Arc::new(Mutex::new(MockEngineData::default())),
            next_handle: Arc::new(AtomicU64::new(first_handle)),
            callbacks: None,
        }
    }

    fn data(&self) -> MutexGuard<'_, MockEngineData> {
        self.data.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_handle(&self) -> EngineHandle {
        EngineHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed))
    }

    /// Record a command, failing it if a failure was armed
    fn command(&self, name: &str) -> Result<(), EngineError> {
        let (result, latency) = {
            let mut data = self.data();
            data.commands.push(name.to_string());
            let result = match data.fail_next.take() {
                Some(message) => Err(EngineError::new(name, message)),
                None => Ok(()),
            };
            (result, data.command_latency)
        };
        if let Some(latency) = latency {
            std::thread::sleep(latency);
        }
        result
    }

    fn create_manager(&self, params: &ManagerParams) -> Result<ManagerSetup, EngineError> {
        self.command("create_manager")?;
        let manager = self.next_handle();
        let primary_wallet = self.next_handle();
        {
            let mut data = self.data();
            data.wallets
                .insert(primary_wallet, (manager, params.network.native_currency.clone()));
            data.primary_wallets.insert(manager, primary_wallet);
        }
        if let Some(callbacks) = &self.callbacks {
            callbacks.manager(manager, ManagerCallback::Created);
            callbacks.wallet(
                manager,
                primary_wallet,
                WalletCallback::Created {
                    currency: params.network.native_currency.clone(),
                },
            );
        }
        Ok(ManagerSetup {
            manager,
            primary_wallet,
        })
    }

    fn connect(&self, manager: EngineHandle) -> Result<(), EngineError> {
        self.command("connect")?;
        if let Some(callbacks) = &self.callbacks {
            callbacks.manager(manager, ManagerCallback::Connected);
        }
        Ok(())
    }

    fn sync(&self, manager: EngineHandle) -> Result<(), EngineError> {
        self.command("sync")?;
        if let Some(callbacks) = &self.callbacks {
            callbacks.manager(manager, ManagerCallback::SyncStarted);
            callbacks.manager(
                manager,
                ManagerCallback::SyncStopped {
                    reason: SyncStoppedReason::Complete,
                },
            );
        }
        Ok(())
    }

    fn create_transfer(
        &self,
        request: &TransferRequest,
        direction: TransferDirection,
    ) -> Result<CreatedTransfer, EngineError> {
        self.command("create_transfer")?;
        let target = match &request.target {
            Address::Utxo(text) => text.as_bytes().to_vec(),
            Address::Account(bytes) => bytes.to_vec(),
        };
        let attributes = RawTransfer::new(request.amount.to_base_string(), direction)
            .with_target(target)
            .with_fee_basis(RawFeeBasis::from(&request.fee_basis));
        Ok(CreatedTransfer {
            transfer: self.next_handle(),
            attributes,
        })
    }

    fn submit(
        &self,
        manager: EngineHandle,
        wallet: EngineHandle,
        transfer: EngineHandle,
        auth: &SubmitAuth,
    ) -> Result<(), EngineError> {
        self.command(&format!("submit:{}", auth.kind()))?;
        if let Some(callbacks) = &self.callbacks {
            let mut hash = [0u8; 32];
            hash[..8].copy_from_slice(&transfer.raw().to_be_bytes());
            callbacks.transfer(
                manager,
                wallet,
                transfer,
                TransferCallback::Submitted {
                    hash: Some(hash.to_vec()),
                },
            );
        }
        Ok(())
    }

    fn announce<T>(&self, request: RequestId, kind: &str, result: &Result<T, QueryError>) {
        self.data()
            .announcements
            .push((request, kind.to_string(), result.is_ok()));
    }
}

macro_rules! mock_engine_common {
    ($engine:ident) => {
        impl $engine {
            /// Raise callbacks through `callbacks` for the commands that produce them
            pub fn with_callbacks(mut self, callbacks: EngineCallbacks) -> Self {
                self.core.callbacks = Some(callbacks);
                self
            }

            /// Commands received so far, in order
            pub fn commands(&self) -> Vec<String> {
                self.core.data().commands.clone()
            }

            /// Fail the next command with `message`
            pub fn fail_next_command(&self, message: &str) {
                self.core.data().fail_next = Some(message.to_string());
            }

            /// Make every later command block like a slow engine would
            pub fn set_command_latency(&self, latency: Duration) {
                self.core.data().command_latency = Some(latency);
            }

            /// (request id, announce kind, succeeded) for every announcement
            pub fn announcements(&self) -> Vec<(RequestId, String, bool)> {
                self.core.data().announcements.clone()
            }

            pub fn set_balance(&self, wallet: EngineHandle, balance: RawBalance) {
                self.core.data().balances.insert(wallet, balance);
            }

            pub fn primary_wallet(&self, manager: EngineHandle) -> Option<EngineHandle> {
                self.core.data().primary_wallets.get(&manager).copied()
            }
        }

        impl Default for $engine {
            fn default() -> Self {
                Self::new()
            }
        }

        impl WalletEngine for $engine {
            fn create_manager(&self, params: &ManagerParams) -> Result<ManagerSetup, EngineError> {
                self.core.create_manager(params)
            }

            fn connect(&self, manager: EngineHandle) -> Result<(), EngineError> {
                self.core.connect(manager)
            }

            fn disconnect(&self, _manager: EngineHandle) -> Result<(), EngineError> {
                self.core.command("disconnect")
            }

            fn sync(&self, manager: EngineHandle) -> Result<(), EngineError> {
                self.core.sync(manager)
            }

            fn set_mode(&self, _manager: EngineHandle, mode: ManagerMode) -> Result<(), EngineError> {
                self.core.command(&format!("set_mode:{mode}"))
            }

            fn create_transfer(
                &self,
                _manager: EngineHandle,
                _wallet: EngineHandle,
                request: &TransferRequest,
            ) -> Result<CreatedTransfer, EngineError> {
                self.core.create_transfer(request, TransferDirection::Sent)
            }

            fn submit(
                &self,
                manager: EngineHandle,
                wallet: EngineHandle,
                transfer: EngineHandle,
                auth: &SubmitAuth,
            ) -> Result<(), EngineError> {
                self.core.submit(manager, wallet, transfer, auth)
            }

            fn release_manager(&self, _manager: EngineHandle) {
                let _ = self.core.command("release_manager");
            }

            fn announce_block_number(
                &self,
                _manager: EngineHandle,
                request: RequestId,
                result: Result<u64, QueryError>,
            ) -> Result<(), EngineError> {
                self.core.announce(request, "block_number", &result);
                Ok(())
            }

            fn announce_transactions(
                &self,
                _manager: EngineHandle,
                request: RequestId,
                result: Result<Vec<QueryTransaction>, QueryError>,
            ) -> Result<(), EngineError> {
                self.core.announce(request, "transactions", &result);
                Ok(())
            }

            fn announce_submit(
                &self,
                _manager: EngineHandle,
                request: RequestId,
                result: Result<String, QueryError>,
            ) -> Result<(), EngineError> {
                self.core.announce(request, "submit", &result);
                Ok(())
            }

            fn announce_blocks(
                &self,
                _manager: EngineHandle,
                request: RequestId,
                result: Result<Vec<u64>, QueryError>,
            ) -> Result<(), EngineError> {
                self.core.announce(request, "blocks", &result);
                Ok(())
            }
        }
    };
}

/// Mock UTXO-model engine
#[derive(Debug, Clone)]
pub struct MockUtxoEngine {
    core: MockEngineCore,
}

impl MockUtxoEngine {
    pub fn new() -> Self {
        Self {
            core: MockEngineCore::new(0x1000),
        }
    }

    pub fn set_fee_per_kb(&self, fee_per_kb: u64) {
        self.core.data().fee_per_kb = Some(fee_per_kb);
    }
}

mock_engine_common!(MockUtxoEngine);

impl UtxoEngine for MockUtxoEngine {
    fn wallet_totals(&self, _manager: EngineHandle, wallet: EngineHandle) -> Option<RawBalance> {
        self.core.data().balances.get(&wallet).cloned()
    }

    fn fee_per_kb(&self, _manager: EngineHandle) -> Option<u64> {
        self.core.data().fee_per_kb
    }
}

/// Mock account-model engine
#[derive(Debug, Clone)]
pub struct MockAccountEngine {
    core: MockEngineCore,
}

impl MockAccountEngine {
    pub fn new() -> Self {
        Self {
            core: MockEngineCore::new(0x2000),
        }
    }

    pub fn set_default_gas(&self, gas_price: &str, gas_limit: u64) {
        self.core.data().default_gas = Some(RawFeeBasis::Account {
            gas_price: gas_price.to_string(),
            gas_limit,
        });
    }
}

mock_engine_common!(MockAccountEngine);

impl AccountEngine for MockAccountEngine {
    fn create_wallet(
        &self,
        manager: EngineHandle,
        currency: &Currency,
    ) -> Result<EngineHandle, EngineError> {
        self.core.command(&format!("create_wallet:{}", currency.code))?;
        let wallet = self.core.next_handle();
        self.core
            .data()
            .wallets
            .insert(wallet, (manager, currency.code.clone()));
        if let Some(callbacks) = &self.core.callbacks {
            callbacks.wallet(
                manager,
                wallet,
                WalletCallback::Created {
                    currency: currency.code.clone(),
                },
            );
        }
        Ok(wallet)
    }

    fn wallet_balance(&self, _manager: EngineHandle, wallet: EngineHandle) -> Option<RawBalance> {
        self.core.data().balances.get(&wallet).cloned()
    }

    fn default_gas(&self, _manager: EngineHandle, _wallet: EngineHandle) -> Option<RawFeeBasis> {
        self.core.data().default_gas.clone()
    }

    fn announce_balance(
        &self,
        _manager: EngineHandle,
        request: RequestId,
        result: Result<String, QueryError>,
    ) -> Result<(), EngineError> {
        self.core.announce(request, "balance", &result);
        Ok(())
    }

    fn announce_logs(
        &self,
        _manager: EngineHandle,
        request: RequestId,
        result: Result<Vec<QueryLog>, QueryError>,
    ) -> Result<(), EngineError> {
        self.core.announce(request, "logs", &result);
        Ok(())
    }

    fn announce_nonce(
        &self,
        _manager: EngineHandle,
        request: RequestId,
        result: Result<u64, QueryError>,
    ) -> Result<(), EngineError> {
        self.core.announce(request, "nonce", &result);
        Ok(())
    }

    fn announce_gas_price(
        &self,
        _manager: EngineHandle,
        request: RequestId,
        result: Result<String, QueryError>,
    ) -> Result<(), EngineError> {
        self.core.announce(request, "gas_price", &result);
        Ok(())
    }

    fn announce_gas_estimate(
        &self,
        _manager: EngineHandle,
        request: RequestId,
        result: Result<u64, QueryError>,
    ) -> Result<(), EngineError> {
        self.core.announce(request, "gas_estimate", &result);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_structures::{Account, Network};
    use std::path::PathBuf;

    fn params(network: Network) -> ManagerParams {
        ManagerParams {
            account: Account::new("acct", 0),
            network,
            mode: ManagerMode::P2pOnly,
            storage_path: PathBuf::from("/tmp/mock"),
        }
    }

    #[test]
    fn test_handles_are_sequential_and_distinct_per_engine() {
        let utxo = MockUtxoEngine::new();
        let account = MockAccountEngine::new();
        let a = utxo.create_manager(&params(Network::bitcoin(true))).unwrap();
        let b = account.create_manager(&params(Network::ethereum(true))).unwrap();
        assert_ne!(a.manager, a.primary_wallet);
        assert_ne!(a.manager, b.manager);
        assert_eq!(utxo.primary_wallet(a.manager), Some(a.primary_wallet));
    }

    #[test]
    fn test_armed_failure_applies_once() {
        let engine = MockUtxoEngine::new();
        engine.fail_next_command("peer unreachable");
        let err = engine.connect(EngineHandle::new(1)).unwrap_err();
        assert_eq!(err.message, "peer unreachable");
        assert!(engine.connect(EngineHandle::new(1)).is_ok());
        assert_eq!(engine.commands(), vec!["connect", "connect"]);
    }

    #[test]
    fn test_balances_are_reported_back() {
        let engine = MockAccountEngine::new();
        let wallet = EngineHandle::new(3);
        assert_eq!(engine.wallet_balance(EngineHandle::new(1), wallet), None);
        engine.set_balance(
            wallet,
            RawBalance::Account {
                balance: "10".to_string(),
            },
        );
        assert!(engine.wallet_balance(EngineHandle::new(1), wallet).is_some());
    }
}

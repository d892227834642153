//! Opaque engine handles
//!
//! Every manager, wallet and transfer known to a backend engine is identified by
//! a handle the engine owns. This layer never dereferences a handle; it only
//! compares them and uses them as keys. A [`Handle`] pairs the raw value with the
//! [`Backend`] that issued it so handles from different engines never collide.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Blockchain engine families supported by the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Backend {
    /// Bitcoin-style UTXO engine
    Utxo,
    /// Ethereum-style account engine
    Account,
}

impl Backend {
    /// Short lowercase name used in logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Utxo => "utxo",
            Backend::Account => "account",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw, pointer-sized identifier issued by an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EngineHandle(pub u64);

impl EngineHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Backend-tagged engine handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Handle {
    pub backend: Backend,
    pub raw: EngineHandle,
}

impl Handle {
    pub fn new(backend: Backend, raw: u64) -> Self {
        Self {
            backend,
            raw: EngineHandle(raw),
        }
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.backend, self.raw)
    }
}

macro_rules! typed_handle {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Handle);

        impl $name {
            pub fn new(backend: Backend, raw: u64) -> Self {
                Self(Handle::new(backend, raw))
            }

            /// Tag a raw engine handle with the backend that issued it
            pub fn from_engine(backend: Backend, raw: EngineHandle) -> Self {
                Self(Handle { backend, raw })
            }

            pub fn handle(&self) -> Handle {
                self.0
            }

            pub fn backend(&self) -> Backend {
                self.0.backend
            }

            pub fn engine_handle(&self) -> EngineHandle {
                self.0.raw
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

typed_handle!(
    /// Handle of a wallet manager (one backend connection)
    ManagerHandle
);
typed_handle!(
    /// Handle of a wallet, unique within its manager
    WalletHandle
);
typed_handle!(
    /// Handle of a transfer, unique within its wallet
    TransferHandle
);

/// Non-owning key of a wallet: its manager plus its own handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WalletPath {
    pub manager: ManagerHandle,
    pub wallet: WalletHandle,
}

impl WalletPath {
    pub fn new(manager: ManagerHandle, wallet: WalletHandle) -> Self {
        Self { manager, wallet }
    }

    /// Key of a transfer owned by this wallet
    pub fn transfer(&self, transfer: TransferHandle) -> TransferPath {
        TransferPath {
            manager: self.manager,
            wallet: self.wallet,
            transfer,
        }
    }
}

impl fmt::Display for WalletPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.manager, self.wallet)
    }
}

/// Non-owning key of a transfer: manager, wallet and its own handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferPath {
    pub manager: ManagerHandle,
    pub wallet: WalletHandle,
    pub transfer: TransferHandle,
}

impl TransferPath {
    pub fn wallet_path(&self) -> WalletPath {
        WalletPath::new(self.manager, self.wallet)
    }
}

impl fmt::Display for TransferPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.manager, self.wallet, self.transfer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_same_raw_value_on_different_backends_is_distinct() {
        let utxo = Handle::new(Backend::Utxo, 7);
        let account = Handle::new(Backend::Account, 7);
        assert_ne!(utxo, account);

        let set: HashSet<Handle> = [utxo, account, Handle::new(Backend::Utxo, 7)]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_paths_display() {
        let manager = ManagerHandle::new(Backend::Account, 1);
        let wallet = WalletHandle::new(Backend::Account, 0x20);
        let path = WalletPath::new(manager, wallet).transfer(TransferHandle::new(Backend::Account, 3));
        assert_eq!(path.to_string(), "account:0x1/account:0x20/account:0x3");
        assert_eq!(path.wallet_path(), WalletPath::new(manager, wallet));
    }
}

//! Normalized value types shared across the system
//!
//! Engine callbacks carry raw, backend-native values. Everything stored in a
//! record or carried by an event uses the types in this module instead.

pub mod address;
pub mod amount;
pub mod fee_basis;
pub mod handle;
pub mod hash;
pub mod network;

pub use address::Address;
pub use amount::Amount;
pub use fee_basis::FeeBasis;
pub use handle::{
    Backend, EngineHandle, Handle, ManagerHandle, TransferHandle, TransferPath, WalletHandle,
    WalletPath,
};
pub use hash::TransferHash;
pub use network::{Account, Currency, Network, Unit};

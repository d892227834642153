//! Client-side coordination layer for multi-blockchain wallets
//!
//! Backend engines (a UTXO engine for Bitcoin-style chains, an account engine
//! for Ethereum-style chains) own networking, validation and keys. This crate
//! sits between them and the application:
//!
//! - it keeps a tree of manager, wallet and transfer records keyed by the
//!   engines' opaque handles ([`registry`], [`records`]);
//! - it funnels every engine callback, from whatever thread raised it, onto
//!   one serialized dispatch task that alone mutates those records
//!   ([`dispatch`]);
//! - it turns each applied change into a typed event and delivers it, in
//!   order, to registered listeners ([`events`]);
//! - it relays engines' data requests to an assisted-query service and feeds
//!   the answers back ([`query`]).
//!
//! Start from [`system::System`].
//!
//! ## Features
//!
//! - `logging`: enables [`logging::init_logging`], a `tracing-subscriber`
//!   setup driven by `RUST_LOG`

pub mod data_structures;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod events;
#[cfg(feature = "logging")]
pub mod logging;
pub mod query;
pub mod records;
pub mod registry;
pub mod system;

pub use errors::*;
pub use system::{System, SystemBuilder, SystemConfig};

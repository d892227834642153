//! Serialized dispatch of engine callbacks and application commands
//!
//! ```text
//! engine threads ──EngineCallbacks──┐
//!                                   ├─► bounded queue ─► EventDispatcher ─► unbounded FIFO ─► Notifier ─► listeners
//! System (app) ──commands + reply───┘        (single writer of SystemState)
//! ```
//!
//! Engines never wait on listeners: the dispatcher only mutates records and
//! queues events, and the notifier delivers them on its own task.

pub mod callbacks;
pub(crate) mod command;
pub(crate) mod dispatcher;
pub(crate) mod notifier;
pub mod stats;

pub use callbacks::{EngineCallback, EngineCallbacks, ManagerCallback, TransferCallback, WalletCallback};
pub use stats::DispatchStats;

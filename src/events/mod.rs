//! Event system
//!
//! The dispatch context turns every applied state change into an [`Event`]
//! and hands it to the notifier task, which delivers it to each registered
//! [`EventListener`] in registration order. All events share one sequence,
//! so listeners see exactly the order in which changes were applied.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use multichain_wallet_libs::events::listeners::{LogLevel, RecordingListener, TracingLoggingListener};
//! use multichain_wallet_libs::system::{System, SystemConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let system = System::builder(SystemConfig::default()).build()?;
//!
//! let recorder = RecordingListener::new("recorder");
//! let events = recorder.events();
//! system.register_listener(Box::new(recorder)).await?;
//! system
//!     .register_listener(Box::new(TracingLoggingListener::new().with_log_level(LogLevel::Verbose)))
//!     .await?;
//!
//! system.flush().await?;
//! println!("{:?}", events.types());
//! # Ok(())
//! # }
//! ```

pub mod listener;
pub mod listeners;
pub mod types;

pub use listener::{EventListener, ListenerRegistry, ListenerResult, RegistryStats};
pub use types::{
    Event, EventMetadata, EventType, ManagerEvent, SerializableEvent, SharedEvent, SystemEvent,
    TransferEvent, WalletEvent,
};

//! Built-in event listeners
//!
//! - [`TracingLoggingListener`]: writes events to `tracing`
//! - [`RecordingListener`]: captures events for test assertions

pub mod recording;
pub mod tracing_logger;

pub use recording::{RecordedEvents, RecordingListener};
pub use tracing_logger::{LogLevel, TracingLoggingListener};

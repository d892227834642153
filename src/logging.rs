//! Subscriber setup for applications embedding the wallet system
//!
//! The filter comes from `RUST_LOG` (default `info`); set `WALLET_LOG_JSON=1`
//! for one JSON object per line.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a global subscriber; a no-op if one is already installed
pub fn init_logging() {
    init_logging_with_default("info");
}

/// Like [`init_logging`], with `default_directive` used when `RUST_LOG` is unset
pub fn init_logging_with_default(default_directive: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let use_json = std::env::var("WALLET_LOG_JSON")
        .map(|value| value == "1")
        .unwrap_or(false);

    if use_json {
        let _ = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .json()
            .with_writer(std::io::stderr)
            .try_init();
    } else {
        let _ = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .compact()
            .with_writer(std::io::stderr)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_twice_does_not_panic() {
        init_logging_with_default("debug");
        init_logging();
        tracing::info!("logging initialized");
    }
}

//! Error types for the wallet system
//!
//! Errors are grouped by where they originate: resolving engine handles,
//! decoding raw engine values, violated preconditions, engine command failures,
//! assisted-query failures and rejected state transitions. They all fold into
//! [`WalletSystemError`], which is what the public API returns.
//!
//! None of these ever cross back into an engine. Callback-side failures are
//! logged and dropped inside the dispatch context; only transfer failures and
//! manager sync failures reach the application, and they arrive as events.

use thiserror::Error;

use crate::data_structures::{Backend, ManagerHandle, TransferPath, WalletPath};

/// A callback referenced a handle whose parent (or itself) is not registered
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("Unknown manager {manager}")]
    UnknownManager { manager: ManagerHandle },

    #[error("Unknown wallet {wallet}")]
    UnknownWallet { wallet: WalletPath },

    #[error("Unknown transfer {transfer}")]
    UnknownTransfer { transfer: TransferPath },

    #[error("Unknown currency '{currency}' on network '{network}'")]
    UnknownCurrency { network: String, currency: String },

    #[error("Manager {manager} is deleted")]
    ManagerDeleted { manager: ManagerHandle },
}

impl ResolutionError {
    /// Statistics bucket for dropped callbacks
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownManager { .. } => "unknown_manager",
            Self::UnknownWallet { .. } => "unknown_wallet",
            Self::UnknownTransfer { .. } => "unknown_transfer",
            Self::UnknownCurrency { .. } => "unknown_currency",
            Self::ManagerDeleted { .. } => "deleted_manager",
        }
    }
}

/// Raw engine values that could not be normalized
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid amount '{value}': {reason}")]
    InvalidAmount { value: String, reason: String },

    #[error("Invalid {backend} address: {reason}")]
    InvalidAddress { backend: Backend, reason: String },

    #[error("Invalid transfer hash: expected 32 bytes, got {length}")]
    InvalidHash { length: usize },

    #[error("Raw {payload} payload belongs to the {actual} backend, expected {expected}")]
    BackendMismatch {
        payload: &'static str,
        expected: Backend,
        actual: Backend,
    },
}

/// Wiring errors that must never happen in a correctly assembled system
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    #[error("{operation} requires the {expected} backend, got {actual}")]
    BackendMismatch {
        operation: String,
        expected: Backend,
        actual: Backend,
    },

    #[error("No {backend} engine is attached to the system")]
    MissingEngine { backend: Backend },

    #[error("{record} is deleted; {operation} is not allowed")]
    RecordDeleted { record: String, operation: String },
}

/// An engine refused a command
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Engine rejected {operation}: {message}")]
pub struct EngineError {
    pub operation: String,
    pub message: String,
}

impl EngineError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            message: message.into(),
        }
    }
}

/// Failures reported by the assisted-query collaborator
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Query service unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Malformed query response: {0}")]
    MalformedResponse(String),

    #[error("Query service rejected the request: {0}")]
    Rejected(String),
}

/// A state transition that the record's state machine does not allow
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Invalid state transition for {record}: {from} -> {to}")]
pub struct StateTransitionError {
    pub record: String,
    pub from: String,
    pub to: String,
}

/// Top-level error returned by the public API
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WalletSystemError {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("Precondition violated: {0}")]
    Precondition(#[from] PreconditionError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Transition(#[from] StateTransitionError),

    #[error("Manager {manager} cannot {operation} while {state}")]
    InvalidManagerState {
        manager: ManagerHandle,
        operation: String,
        state: String,
    },

    #[error("Invalid {operation} request: {message}")]
    InvalidRequest { operation: String, message: String },

    #[error("Listener with name '{name}' is already registered")]
    DuplicateListener { name: String },

    #[error("Invalid listener name: '{name}'")]
    InvalidListenerName { name: String },

    #[error("Cannot register listener: maximum of {max} listeners allowed, currently have {current}")]
    TooManyListeners { current: usize, max: usize },

    #[error("Listener '{name}' initialization failed: {reason}")]
    ListenerInitialization { name: String, reason: String },

    #[error("Listener '{name}' is not registered")]
    ListenerNotFound { name: String },

    #[error("Configuration error: {parameter} - {message}")]
    Configuration { parameter: String, message: String },

    #[error("The dispatch context has shut down")]
    DispatcherClosed,
}

impl WalletSystemError {
    /// Create a configuration error
    pub fn configuration(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    pub fn invalid_request(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Check if retrying the same operation could succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Engine(_) | Self::Query(QueryError::NetworkUnavailable(_)) => true,
            Self::InvalidManagerState { .. } => true,

            Self::Resolution(_)
            | Self::Decode(_)
            | Self::Precondition(_)
            | Self::Query(_)
            | Self::Transition(_)
            | Self::InvalidRequest { .. }
            | Self::DuplicateListener { .. }
            | Self::InvalidListenerName { .. }
            | Self::TooManyListeners { .. }
            | Self::ListenerInitialization { .. }
            | Self::ListenerNotFound { .. }
            | Self::Configuration { .. }
            | Self::DispatcherClosed => false,
        }
    }

    /// Get the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Resolution(_) => "resolution",
            Self::Decode(_) => "decode",
            Self::Precondition(_) => "precondition",
            Self::Engine(_) => "engine",
            Self::Query(_) => "query",
            Self::Transition(_) | Self::InvalidManagerState { .. } => "state",
            Self::InvalidRequest { .. } => "request",
            Self::DuplicateListener { .. }
            | Self::InvalidListenerName { .. }
            | Self::TooManyListeners { .. }
            | Self::ListenerInitialization { .. }
            | Self::ListenerNotFound { .. } => "listener",
            Self::Configuration { .. } => "configuration",
            Self::DispatcherClosed => "internal",
        }
    }
}

pub type WalletSystemResult<T> = Result<T, WalletSystemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_and_category() {
        let err: WalletSystemError = ResolutionError::UnknownCurrency {
            network: "mainnet".to_string(),
            currency: "xyz".to_string(),
        }
        .into();
        assert_eq!(err.category(), "resolution");
        assert_eq!(err.to_string(), "Unknown currency 'xyz' on network 'mainnet'");
        assert!(!err.is_recoverable());

        let err: WalletSystemError = QueryError::NetworkUnavailable("timeout".to_string()).into();
        assert!(err.is_recoverable());
        assert_eq!(err.category(), "query");
    }

    #[test]
    fn test_precondition_message() {
        let err = WalletSystemError::from(PreconditionError::BackendMismatch {
            operation: "submit".to_string(),
            expected: Backend::Account,
            actual: Backend::Utxo,
        });
        assert_eq!(
            err.to_string(),
            "Precondition violated: submit requires the account backend, got utxo"
        );
    }
}

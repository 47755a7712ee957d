//! Error types for the SSH transport

use thiserror::Error;

/// Main error type for the SSH transport
///
/// Every variant carries the diagnostic text captured at the point of
/// failure, so callers can match on the kind without parsing messages.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Raised before any process is spawned (unsupported become method,
    /// missing local file, missing helper program, lock failure)
    #[error("Setup error: {0}")]
    Setup(String),

    /// I/O failure while talking to a spawned client process
    #[error("{0}")]
    TransientTransport(String),

    /// Privilege escalation password rejected or missing
    #[error("Authentication failed ({method}): {message}")]
    Authentication { method: String, message: String },

    /// The local client rejected an option it does not support
    #[error("Compatibility error: {0}")]
    Compatibility(String),

    /// The client gave up reaching the host (exit code 255)
    #[error("SSH Error: {0}")]
    Connectivity(String),

    /// scp/sftp exited non-zero
    #[error("Transfer failed: {0}")]
    Transfer(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using TransportError
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    pub fn setup(msg: impl Into<String>) -> Self {
        TransportError::Setup(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        TransportError::TransientTransport(msg.into())
    }

    pub fn auth(method: impl Into<String>, msg: impl Into<String>) -> Self {
        TransportError::Authentication {
            method: method.into(),
            message: msg.into(),
        }
    }

    pub fn compatibility(msg: impl Into<String>) -> Self {
        TransportError::Compatibility(msg.into())
    }

    pub fn connectivity(msg: impl Into<String>) -> Self {
        TransportError::Connectivity(msg.into())
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        TransportError::Transfer(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        TransportError::Config(msg.into())
    }

    /// Whether the retry policy should try the operation again
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransportError::TransientTransport(_)
                | TransportError::Connectivity(_)
                | TransportError::Transfer(_)
        )
    }
}

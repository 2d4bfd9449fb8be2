//! Application-wide error types.
//!
//! [`AppError`] is what the binary shell reports on exit. [`BootstrapError`]
//! is the taxonomy every bootstrap step fails with; it is `Clone` so the
//! orchestrator can publish it inside its terminal `Failed` state.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single bootstrap step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BootstrapError {
    /// Wallet key or trust bundle could not be persisted.
    #[error("storage error: {0}")]
    Storage(String),

    /// Bundled asset missing or unreadable.
    #[error("resource error: {0}")]
    Resource(String),

    /// Bootstrap endpoint unreachable, timed out, or answered with an error status.
    #[error("network error: {0}")]
    Network(String),

    /// Malformed bootstrap response or malformed invitation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Wallet or agent runtime failed to start.
    #[error("agent init error: {0}")]
    AgentInit(String),

    /// Invitation could not be turned into a connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// The hosting process tore the sequence down before it finished.
    #[error("bootstrap cancelled")]
    Cancelled,
}

/// Discriminant of [`BootstrapError`], handy for assertions and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Storage,
    Resource,
    Network,
    Protocol,
    AgentInit,
    Connection,
    Cancelled,
}

impl BootstrapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BootstrapError::Storage(_) => ErrorKind::Storage,
            BootstrapError::Resource(_) => ErrorKind::Resource,
            BootstrapError::Network(_) => ErrorKind::Network,
            BootstrapError::Protocol(_) => ErrorKind::Protocol,
            BootstrapError::AgentInit(_) => ErrorKind::AgentInit,
            BootstrapError::Connection(_) => ErrorKind::Connection,
            BootstrapError::Cancelled => ErrorKind::Cancelled,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Storage => "storage",
            ErrorKind::Resource => "resource",
            ErrorKind::Network => "network",
            ErrorKind::Protocol => "protocol",
            ErrorKind::AgentInit => "agent_init",
            ErrorKind::Connection => "connection",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

//! Error types for the bus and the command registry protocol.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BusError>;

#[derive(Debug, Error)]
pub enum BusError {
    /// A command with this name is already registered in this process.
    #[error("command already registered: {0}")]
    CommandAlreadyRegistered(String),

    /// No command with this name is registered in this process.
    #[error("command not registered: {0}")]
    CommandNotRegistered(String),

    /// A subscriber or command handler failed.
    #[error("handler failed: {0}")]
    Handler(String),

    /// A payload did not match the expected shape.
    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

impl BusError {
    /// Create a handler error.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler(message.into())
    }
}

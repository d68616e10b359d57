//! Supervisor errors

use std::path::PathBuf;

use thiserror::Error;

use peek_host::HostError;

pub type Result<T> = std::result::Result<T, SupervisorError>;

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// No known installation path for the id. No process was created.
    #[error("extension not found: {0}")]
    ExtensionNotFound(String),

    /// Content failed to load. The record was deleted.
    #[error("extension {id} failed to load: {reason}")]
    ExtensionLoadFailed { id: String, reason: String },

    /// The process faulted. The record is kept with status `crashed`.
    #[error("extension crashed: {0}")]
    ExtensionCrashed(String),

    /// A consolidated frame never acknowledged readiness. The record was deleted.
    #[error("extension {id} not ready after {timeout_ms}ms")]
    ReadyTimeout { id: String, timeout_ms: u64 },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Host(#[from] HostError),
}

impl SupervisorError {
    pub fn load_failed(id: &str, reason: impl ToString) -> Self {
        Self::ExtensionLoadFailed {
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }
}

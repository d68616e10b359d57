//! Orchestrator error types

use std::path::PathBuf;

use thiserror::Error;

use peek_bus::BusError;
use peek_desktop::LifecycleError;
use peek_host::HostError;
use peek_supervisor::SupervisorError;

use crate::datastore::DatastoreError;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Orchestrator errors
///
/// Only `Config` and `Bootstrap` are fatal; everything else is local to one
/// window or one extension.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be read
    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid JSON for [`HostConfig`](crate::HostConfig)
    #[error("failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Application start could not complete
    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("orchestrator already started")]
    AlreadyStarted,

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Datastore(#[from] DatastoreError),
}

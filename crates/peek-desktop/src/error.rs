//! Lifecycle errors

use thiserror::Error;

use peek_host::HostError;
use peek_ipc::WindowHandle;

pub type Result<T> = std::result::Result<T, LifecycleError>;

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The handle has no registry entry. Close paths treat this as
    /// already closed and never return it.
    #[error("window not registered: {0}")]
    WindowNotRegistered(WindowHandle),

    /// The root window cannot be closed or hidden through the lifecycle.
    #[error("refusing to close the root window {0}")]
    RootWindow(WindowHandle),

    #[error(transparent)]
    Host(#[from] HostError),
}

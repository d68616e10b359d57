//! Peek Orchestrator
//!
//! Composes the extension host at application start and stop:
//!
//! - **Configuration**: [`HostConfig`], file plus environment
//! - **Datastore collaborator**: [`Datastore`], degraded mode on failure
//! - **Router**: cross-process fan-out with echo suppression, owner notices
//! - **Orchestrator**: root window, host event loop, phased extension
//!   startup and the content primitives
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── Orchestrator ────────────────────────────┐
//! │  system bus ◄──────── Router ────────► content buses (via Host)      │
//! │      │                  │                                            │
//! │  CommandDirectory   Supervisor ── records, readiness, startup        │
//! │                     Lifecycle  ── registry, cascade, escape          │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let orchestrator = Orchestrator::new(config, host, Arc::new(MemoryDatastore::new()))?;
//! let report = orchestrator.start().await?;
//! println!("{} extensions running", report.count());
//! orchestrator.shutdown().await;
//! ```

mod config;
pub mod datastore;
mod error;
mod orchestrator;
mod router;

pub use config::HostConfig;
pub use datastore::{Datastore, DatastoreError, MemoryDatastore};
pub use error::{OrchestratorError, Result};
pub use orchestrator::{Orchestrator, WindowInfo, WindowTarget, ENABLED_SETTING};
pub use router::Router;

pub use peek_desktop::CloseOutcome;
pub use peek_supervisor::StartupReport;

//! Extension Process Supervisor for Peek
//!
//! Creates one isolated execution context per extension, tracks its status
//! and runs the phased startup of the whole batch.
//!
//! # Placement
//!
//! | Kind | Representation | Loaded when |
//! |------|----------------|-------------|
//! | Consolidated | sub-frame of the shared host window | frame acknowledges `ext:ready` |
//! | Dedicated | own window | content load settles |
//!
//! Built-in ids on the consolidated allow-list are consolidated; every other
//! extension, external ones included, is dedicated.
//!
//! # Status
//!
//! ```text
//! loading ──► running ──► crashed
//!    │                       │
//!    └─► (deleted)           └─► reload_process ──► loading
//! ```

mod error;
pub mod manifest;
mod record;
mod startup;
mod supervisor;

pub use error::{Result, SupervisorError};
pub use manifest::{discover_extensions, is_enabled, ExtensionManifest, ExtensionSource};
pub use record::{ExtensionRecord, ExtensionStatus, ExtensionTable, Placement};
pub use startup::StartupReport;
pub use supervisor::{Supervisor, SupervisorConfig, DEFAULT_CONSOLIDATED_IDS};

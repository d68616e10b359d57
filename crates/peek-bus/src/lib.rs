//! Scoped Message Bus for Peek
//!
//! Every process (the orchestrator and each content process) owns one
//! [`MessageBus`]. Subscriptions are process-local; anything that has to
//! leave the process goes through a [`Broadcaster`] uplink.
//!
//! # Scope Routing
//!
//! ```text
//! publish(SELF)    → local subscribers in the same context
//! publish(SYSTEM)  → local system subscribers (system bus) | uplink (content bus)
//! publish(GLOBAL)  → local subscribers in *other* contexts + uplink
//! deliver(env)     → inbound from another process, same rules minus the uplink
//! ```
//!
//! Echo suppression compares typed [`Origin`](peek_ipc::Origin)s by
//! execution context, never address prefixes.
//!
//! # Command Registry Protocol
//!
//! [`CommandRegistry`] keeps handlers in a process-local table and listens on
//! `cmd:execute:<name>`; [`CommandDirectory`] lists the descriptors announced
//! on `cmd:register`.

mod bus;
mod command;
mod directory;
mod error;
mod subscription;

pub use bus::{BusRole, MessageBus};
pub use command::{CommandHandler, CommandRegistry};
pub use directory::CommandDirectory;
pub use error::{BusError, Result};
pub use subscription::{Listener, Subscription};

use peek_ipc::Envelope;

/// Cross-process fan-out seam.
///
/// A content process's bus forwards GLOBAL and SYSTEM envelopes to the
/// orchestrator through this trait; the orchestrator implements it to fan
/// envelopes out to running extension processes.
pub trait Broadcaster: Send + Sync {
    /// Route an envelope that has left its publishing process.
    ///
    /// Must not block. Failures are logged by the implementation.
    fn forward(&self, envelope: Envelope);
}

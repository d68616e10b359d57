//! Message Bus Protocol & Topic Constants for Peek
//!
//! This crate defines:
//! - **Addresses and origins** (who sent a message, typed)
//! - **Scopes** (how far a message travels)
//! - **Envelopes** (what crosses a process boundary)
//! - **Topic names and payloads** for every lifecycle event the core publishes
//!
//! It is the **single source of truth** for the wire protocol shared by the
//! orchestrator, the supervisor and content processes.
//!
//! # Topic Allocation
//!
//! | Prefix | Owner |
//! |--------|-------|
//! | `ext:` | Extension supervisor (startup phases, readiness, shutdown) |
//! | `cmd:` | Command registry protocol |
//! | `window:` | Window lifecycle controller |
//! | `app:` | Orchestrator (application-wide events) |
//!
//! # Usage
//!
//! ```rust
//! use peek_ipc::{topic, Address, Envelope, Scope};
//!
//! let source = Address::extension("cmd", "background.html");
//! let env = Envelope::new(topic::CMD_REGISTER, serde_json::json!({}), Scope::Global, source);
//! assert_eq!(env.origin.extension_id(), Some("cmd"));
//! ```

mod envelope;
mod origin;

pub use envelope::{Envelope, Scope, WindowHandle};
pub use origin::{Address, ContextKey, Origin, ParseAddressError};

use serde::{Deserialize, Serialize};

// =============================================================================
// Well-known Addresses
// =============================================================================

/// URL scheme for every address served by the host.
pub const SCHEME: &str = "peek://";

/// The single system/background context. `SYSTEM` scope resolves here.
pub const SYSTEM_ADDRESS: &str = "peek://system/";

/// Address of the shared window that hosts consolidated extensions as sub-frames.
pub const EXTENSION_HOST_ADDRESS: &str = "peek://app/extension-host.html";

/// Parent identifier carried by every consolidated sub-frame origin.
pub const EXTENSION_HOST_ID: &str = "extension-host";

/// Default content resource loaded for an extension.
pub const DEFAULT_BACKGROUND: &str = "background.html";

// =============================================================================
// Topics
// =============================================================================

/// Topic names published or consumed by the core.
pub mod topic {
    /// Startup phase transition. Payload: [`PhasePayload`](crate::PhasePayload). GLOBAL.
    pub const STARTUP_PHASE: &str = "ext:startup:phase";
    /// Startup batch finished. Payload: [`AllLoadedPayload`](crate::AllLoadedPayload). GLOBAL.
    pub const ALL_LOADED: &str = "ext:all-loaded";
    /// Consolidated frame finished loading. Payload: [`ReadyPayload`](crate::ReadyPayload). SYSTEM.
    pub const EXT_READY: &str = "ext:ready";
    /// Sent directly to an extension before it is destroyed. Payload: [`ExtensionShutdownPayload`](crate::ExtensionShutdownPayload).
    pub const EXT_SHUTDOWN: &str = "ext:shutdown";

    /// Command descriptor announcement. Payload: [`CommandDescriptor`](crate::CommandDescriptor). GLOBAL.
    pub const CMD_REGISTER: &str = "cmd:register";
    /// Command withdrawal. Payload: [`CommandUnregister`](crate::CommandUnregister). GLOBAL.
    pub const CMD_UNREGISTER: &str = "cmd:unregister";
    /// Prefix of the per-command execution topic.
    pub const CMD_EXECUTE_PREFIX: &str = "cmd:execute:";

    /// Window closed. Payload: [`WindowClosedPayload`](crate::WindowClosedPayload). Sent to the owner.
    pub const WINDOW_CLOSED: &str = "window:closed";

    /// Application shutting down. Payload: [`ShutdownPayload`](crate::ShutdownPayload). GLOBAL.
    pub const APP_SHUTDOWN: &str = "app:shutdown";

    /// Execution topic for one command (`cmd:execute:<name>`).
    pub fn command_execute(name: &str) -> String {
        format!("{}{}", CMD_EXECUTE_PREFIX, name)
    }
}

// =============================================================================
// Startup Phases
// =============================================================================

/// One of the four ordered startup stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartupPhase {
    /// Command registry extension loads alone.
    Early,
    /// Every other extension loads and registers its commands.
    Commands,
    /// Extensions may initialize visual state.
    Ui,
    /// The batch is done.
    Complete,
}

impl StartupPhase {
    /// All phases in order.
    pub const ALL: [StartupPhase; 4] = [
        StartupPhase::Early,
        StartupPhase::Commands,
        StartupPhase::Ui,
        StartupPhase::Complete,
    ];

    /// Wire name of the phase.
    pub fn name(&self) -> &'static str {
        match self {
            StartupPhase::Early => "early",
            StartupPhase::Commands => "commands",
            StartupPhase::Ui => "ui",
            StartupPhase::Complete => "complete",
        }
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// `ext:startup:phase`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhasePayload {
    pub phase: StartupPhase,
}

/// `ext:all-loaded`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllLoadedPayload {
    pub count: usize,
}

/// `ext:ready`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyPayload {
    pub id: String,
}

/// `ext:shutdown`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionShutdownPayload {
    pub id: String,
}

/// `window:closed`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowClosedPayload {
    pub id: WindowHandle,
    pub source: Address,
}

/// `app:shutdown`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownPayload {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// Command metadata announced on `cmd:register`.
///
/// The handler itself never crosses the bus; only this descriptor does.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub source_address: Address,
}

/// `cmd:unregister`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandUnregister {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_execute_topic() {
        assert_eq!(topic::command_execute("hello"), "cmd:execute:hello");
        assert!(topic::command_execute("x").starts_with(topic::CMD_EXECUTE_PREFIX));
    }

    #[test]
    fn test_phase_order_and_names() {
        assert!(StartupPhase::Early < StartupPhase::Commands);
        assert!(StartupPhase::Commands < StartupPhase::Ui);
        assert!(StartupPhase::Ui < StartupPhase::Complete);

        let json = serde_json::to_value(PhasePayload { phase: StartupPhase::Commands }).unwrap();
        assert_eq!(json, serde_json::json!({ "phase": "commands" }));
        for phase in StartupPhase::ALL {
            let json = serde_json::to_value(phase).unwrap();
            assert_eq!(json, serde_json::Value::String(phase.name().to_string()));
        }
    }

    #[test]
    fn test_command_descriptor_wire_shape() {
        let desc = CommandDescriptor {
            name: "hello".into(),
            description: "Say hello".into(),
            source_address: Address::extension("a", DEFAULT_BACKGROUND),
        };
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["sourceAddress"], "peek://ext/a/background.html");
        assert_eq!(json["name"], "hello");
    }
}

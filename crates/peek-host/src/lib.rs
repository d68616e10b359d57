//! Host Abstraction for Peek
//!
//! This crate defines the [`Host`] trait that lets the orchestrator run on
//! top of different window/process layers (a desktop webview runtime, or the
//! in-memory mock used by tests and headless runs) by abstracting window and
//! content-process operations.
//!
//! # Representations
//!
//! - **Dedicated window**: one isolated content process per window
//!   ([`Host::create_window`] + [`Host::load_content`]).
//! - **Consolidated frame**: an isolated sub-frame inside the shared
//!   extension host window ([`Host::create_frame`]). A frame reports its own
//!   readiness by publishing `ext:ready` at SYSTEM scope.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;

use peek_bus::Broadcaster;
use peek_ipc::{Address, Envelope, WindowHandle};

pub type Result<T> = std::result::Result<T, HostError>;

// =============================================================================
// Window Options
// =============================================================================

/// Escape-key policy of a window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscapeMode {
    /// Close or hide immediately.
    #[default]
    Close,
    /// Ask the content first; close or hide only if it did not handle it.
    Navigate,
    /// `Close` for transient windows, `Navigate` otherwise.
    Auto,
}

/// Options recognized by `open(url, options)`.
///
/// Unrecognized keys are preserved in [`OpenOptions::extra`] and handed to
/// the host untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OpenOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<i32>,
    /// Show the window once created (default `true`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show: Option<bool>,
    pub modal: bool,
    /// Hide instead of destroying on close.
    pub keep_live: bool,
    /// Reuse key: opening the same key again focuses the existing window.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub transparent: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub escape_mode: Option<EscapeMode>,
    pub open_dev_tools: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OpenOptions {
    /// Options for a hidden background window.
    pub fn hidden() -> Self {
        Self {
            show: Some(false),
            ..Self::default()
        }
    }

    pub fn shows(&self) -> bool {
        self.show.unwrap_or(true)
    }
}

// =============================================================================
// Delivery & Events
// =============================================================================

/// Where an envelope is handed to content.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DeliveryTarget {
    /// A dedicated window's content process.
    Window(WindowHandle),
    /// A consolidated sub-frame inside a host window.
    Frame { host: WindowHandle, id: String },
}

impl DeliveryTarget {
    pub fn window(&self) -> WindowHandle {
        match self {
            DeliveryTarget::Window(handle) => *handle,
            DeliveryTarget::Frame { host, .. } => *host,
        }
    }
}

/// Events raised by the host and consumed by the orchestrator's event loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostEvent {
    /// A window was destroyed (by the user, the host, or a `close` call).
    Closed { handle: WindowHandle },
    /// A content process faulted. `frame` is set for consolidated frames.
    Crashed {
        handle: WindowHandle,
        frame: Option<String>,
    },
    Focused { handle: WindowHandle },
    FocusLost { handle: WindowHandle },
    /// The escape key was pressed in a window.
    EscapePressed { handle: WindowHandle },
}

// =============================================================================
// Errors
// =============================================================================

/// Host errors
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum HostError {
    /// Window does not exist (never created or already destroyed)
    #[error("window not found: {0}")]
    WindowNotFound(WindowHandle),

    /// Sub-frame does not exist in the given host window
    #[error("frame {frame} not found in {host}")]
    FrameNotFound { host: WindowHandle, frame: String },

    /// Content failed to load
    #[error("failed to load {address}: {reason}")]
    LoadFailed { address: Address, reason: String },

    /// Content process faulted
    #[error("content process crashed: {0}")]
    Crashed(WindowHandle),

    /// The window layer itself is not usable
    #[error("host unavailable: {0}")]
    Unavailable(String),
}

// =============================================================================
// Host Trait
// =============================================================================

/// Window/process layer used by the orchestrator.
///
/// Implementations provide:
/// - Window creation and content loading
/// - Consolidated sub-frames inside the shared host window
/// - Visibility and focus control
/// - Envelope delivery into content processes
/// - The escape round trip
/// - An event stream of closes, crashes and focus changes
///
/// Synchronous methods must not block; anything that waits on content is
/// `async`.
#[async_trait]
pub trait Host: Send + Sync + 'static {
    // === Windows ===

    /// Create a window for `address`. Content is not loaded yet.
    ///
    /// # Returns
    /// * `Ok(WindowHandle)` - Handle of the new window
    /// * `Err(HostError::Unavailable)` - The window layer refused
    fn create_window(&self, address: &Address, options: &OpenOptions) -> Result<WindowHandle>;

    /// Load the window's content and wait until it settles.
    ///
    /// # Returns
    /// * `Ok(())` - Content loaded
    /// * `Err(HostError::LoadFailed)` - Content failed to load
    /// * `Err(HostError::WindowNotFound)` - Window vanished meanwhile
    async fn load_content(&self, handle: WindowHandle) -> Result<()>;

    /// Destroy a window. A `Closed` event follows.
    fn close(&self, handle: WindowHandle) -> Result<()>;

    fn hide(&self, handle: WindowHandle) -> Result<()>;

    fn show(&self, handle: WindowHandle) -> Result<()>;

    fn focus(&self, handle: WindowHandle) -> Result<()>;

    /// Whether the window still exists.
    fn exists(&self, handle: WindowHandle) -> bool;

    fn is_visible(&self, handle: WindowHandle) -> bool;

    fn is_focused(&self, handle: WindowHandle) -> bool;

    /// Currently focused window, if any.
    fn focused_window(&self) -> Option<WindowHandle>;

    /// Address loaded in a window.
    fn address_of(&self, handle: WindowHandle) -> Option<Address>;

    // === Consolidated Frames ===

    /// Insert an isolated sub-frame into `host` and start loading it.
    ///
    /// Completion is signalled by the frame itself (`ext:ready`), not by
    /// this call returning.
    fn create_frame(&self, host: WindowHandle, id: &str, address: &Address) -> Result<()>;

    /// Remove a sub-frame and tear down its context.
    fn remove_frame(&self, host: WindowHandle, id: &str) -> Result<()>;

    // === Messaging ===

    /// Hand an envelope to a content process. Must not block.
    fn deliver(&self, target: &DeliveryTarget, envelope: &Envelope) -> Result<()>;

    /// Install the uplink content processes publish through.
    fn attach_uplink(&self, _uplink: Arc<dyn Broadcaster>) {}

    /// Drop the uplink. Content publishes stay in their own context.
    fn detach_uplink(&self) {}

    /// Ask a window's content whether it handled an escape press.
    ///
    /// Implementations may never resolve; callers bound this with a timeout.
    async fn query_escape(&self, handle: WindowHandle) -> Result<bool>;

    // === Events ===

    /// Take the event stream. Returns `None` once taken.
    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<HostEvent>>;
}

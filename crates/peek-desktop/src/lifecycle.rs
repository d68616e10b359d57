//! Window lifecycle controller
//!
//! Owns the close cascade, the escape policy, hide-vs-close and the modal
//! lost-focus close. Registry mutation and host calls never overlap: the
//! registry lock is always released before the host or the owner notifier
//! is called.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use peek_host::{Host, HostError};
use peek_ipc::{topic, Address, Envelope, Scope, WindowClosedPayload, WindowHandle};

use crate::window::{WindowParams, WindowRecord, WindowRegistry};
use crate::{LifecycleError, Result};

/// Default bound on the escape round trip.
pub const DEFAULT_ESCAPE_TIMEOUT: Duration = Duration::from_millis(100);

/// Default delay before a modal that lost focus is dismissed.
pub const DEFAULT_MODAL_BLUR_DELAY: Duration = Duration::from_millis(100);

/// Hands an envelope to the context at an owner address.
///
/// `window:closed` is addressed to the owner of the closed window, which may
/// be the system context or any content process.
pub trait OwnerNotifier: Send + Sync {
    fn notify(&self, owner: &Address, envelope: Envelope);
}

#[derive(Clone, Debug)]
pub struct LifecycleConfig {
    pub escape_timeout: Duration,
    pub modal_blur_delay: Duration,
    /// Key of the window that always fully closes.
    pub settings_key: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            escape_timeout: DEFAULT_ESCAPE_TIMEOUT,
            modal_blur_delay: DEFAULT_MODAL_BLUR_DELAY,
            settings_key: "settings".to_string(),
        }
    }
}

/// Result of a close or hide request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseOutcome {
    Closed,
    Hidden,
    /// No registry entry: the window is already gone.
    AlreadyClosed,
}

/// Reply of a window's content to an escape query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EscapeResponse {
    Handled,
    NotHandled,
    TimedOut,
}

/// What an escape press ended up doing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EscapeOutcome {
    /// The content handled it internally.
    Handled,
    Closed,
    Hidden,
    /// Root window or unknown window.
    Ignored,
}

/// Handles closed during one cascade, in close order.
#[derive(Default)]
struct Cascade {
    visited: HashSet<WindowHandle>,
    closed: Vec<WindowHandle>,
}

/// Window lifecycle controller
#[derive(Clone)]
pub struct LifecycleController {
    host: Arc<dyn Host>,
    registry: Arc<Mutex<WindowRegistry>>,
    notifier: Arc<dyn OwnerNotifier>,
    config: LifecycleConfig,
}

impl LifecycleController {
    pub fn new(
        host: Arc<dyn Host>,
        registry: Arc<Mutex<WindowRegistry>>,
        notifier: Arc<dyn OwnerNotifier>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            host,
            registry,
            notifier,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<Mutex<WindowRegistry>> {
        &self.registry
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Record a newly opened window.
    pub fn register(&self, handle: WindowHandle, owner: Address, params: WindowParams) {
        debug!(handle = %handle, owner = %owner, address = %params.address, "[lifecycle] window registered");
        self.registry.lock().register(handle, owner, params);
    }

    /// Registered record of a window.
    pub fn record(&self, handle: WindowHandle) -> Result<WindowRecord> {
        self.registry
            .lock()
            .get(handle)
            .cloned()
            .ok_or(LifecycleError::WindowNotRegistered(handle))
    }

    // =========================================================================
    // Close Cascade
    // =========================================================================

    /// Close a window, its descendants first.
    pub fn close_window(&self, handle: WindowHandle) -> Result<CloseOutcome> {
        self.refuse_root(handle)?;
        let mut cascade = Cascade::default();
        Ok(self.close_tree(handle, &mut cascade))
    }

    /// Close every window whose owner chain leads to `address`, depth-first.
    ///
    /// Returns the closed handles in close order. The root window is never
    /// closed this way.
    pub fn close_children(&self, address: &Address) -> Vec<WindowHandle> {
        let mut cascade = Cascade::default();
        self.close_children_into(address, &mut cascade);
        cascade.closed
    }

    fn close_children_into(&self, address: &Address, cascade: &mut Cascade) {
        let children = self.registry.lock().children_of(address);
        for child in children {
            self.close_tree(child, cascade);
        }
    }

    fn close_tree(&self, handle: WindowHandle, cascade: &mut Cascade) -> CloseOutcome {
        if !cascade.visited.insert(handle) {
            return CloseOutcome::AlreadyClosed;
        }

        let address = {
            let registry = self.registry.lock();
            if registry.is_root(handle) {
                return CloseOutcome::AlreadyClosed;
            }
            match registry.get(handle) {
                Some(record) => record.params.address.clone(),
                None => return CloseOutcome::AlreadyClosed,
            }
        };

        self.close_children_into(&address, cascade);

        // Removed before the host call so the host's own close event finds
        // nothing left to do.
        let Some(record) = self.registry.lock().remove(handle) else {
            return CloseOutcome::AlreadyClosed;
        };
        match self.host.close(handle) {
            Ok(()) | Err(HostError::WindowNotFound(_)) => {}
            Err(e) => warn!(handle = %handle, error = %e, "[lifecycle] host close failed"),
        }
        debug!(handle = %handle, address = %record.params.address, "[lifecycle] window closed");

        self.notify_closed(&record);
        cascade.closed.push(handle);
        CloseOutcome::Closed
    }

    /// Hide a window after closing its descendants.
    pub fn hide_window(&self, handle: WindowHandle) -> Result<CloseOutcome> {
        self.refuse_root(handle)?;
        let Some(address) = self.address_of(handle) else {
            return Ok(CloseOutcome::AlreadyClosed);
        };
        self.close_children(&address);

        match self.host.hide(handle) {
            Ok(()) => Ok(CloseOutcome::Hidden),
            Err(HostError::WindowNotFound(_)) => Ok(CloseOutcome::AlreadyClosed),
            Err(e) => Err(e.into()),
        }
    }

    /// Host reported a window as gone (user close, crash teardown).
    ///
    /// Returns `false` if the window had already been closed through the
    /// lifecycle; in that case nothing is published again.
    pub fn on_window_closed(&self, handle: WindowHandle) -> bool {
        let Some(record) = self.registry.lock().remove(handle) else {
            return false;
        };
        if record.owner == record.params.address {
            warn!(handle = %handle, "[lifecycle] root window destroyed by the host");
        }
        self.close_children(&record.params.address);
        self.notify_closed(&record);
        true
    }

    fn notify_closed(&self, record: &WindowRecord) {
        let payload = WindowClosedPayload {
            id: record.handle,
            source: record.params.address.clone(),
        };
        match Envelope::typed(topic::WINDOW_CLOSED, &payload, Scope::Global, Address::system()) {
            Ok(envelope) => self.notifier.notify(&record.owner, envelope),
            Err(e) => warn!(handle = %record.handle, error = %e, "[lifecycle] window:closed not encodable"),
        }
    }

    // =========================================================================
    // Visibility & Focus
    // =========================================================================

    /// Show a registered window. Unknown windows are a no-op.
    pub fn show_window(&self, handle: WindowHandle) -> Result<bool> {
        if !self.registry.lock().contains(handle) {
            return Ok(false);
        }
        self.host.show(handle)?;
        Ok(true)
    }

    /// Focus a registered window. Unknown windows are a no-op.
    pub fn focus_window(&self, handle: WindowHandle) -> Result<bool> {
        if !self.registry.lock().contains(handle) {
            return Ok(false);
        }
        self.host.focus(handle)?;
        Ok(true)
    }

    // =========================================================================
    // Escape
    // =========================================================================

    /// Ask a window's content whether it handled an escape press.
    pub async fn query_escape(&self, handle: WindowHandle) -> EscapeResponse {
        match tokio::time::timeout(self.config.escape_timeout, self.host.query_escape(handle)).await {
            Ok(Ok(true)) => EscapeResponse::Handled,
            Ok(Ok(false)) => EscapeResponse::NotHandled,
            Ok(Err(e)) => {
                debug!(handle = %handle, error = %e, "[lifecycle] escape query failed");
                EscapeResponse::NotHandled
            }
            Err(_) => {
                warn!(
                    handle = %handle,
                    timeout_ms = self.config.escape_timeout.as_millis() as u64,
                    "[lifecycle] EscapeTimeout, treating as not handled"
                );
                EscapeResponse::TimedOut
            }
        }
    }

    /// Apply the escape policy of a window.
    pub async fn handle_escape(&self, handle: WindowHandle) -> Result<EscapeOutcome> {
        let params = {
            let registry = self.registry.lock();
            if registry.is_root(handle) {
                return Ok(EscapeOutcome::Ignored);
            }
            match registry.get(handle) {
                Some(record) => record.params.clone(),
                None => return Ok(EscapeOutcome::Ignored),
            }
        };

        if params.asks_on_escape() && self.query_escape(handle).await == EscapeResponse::Handled {
            debug!(handle = %handle, "[lifecycle] escape handled by content");
            return Ok(EscapeOutcome::Handled);
        }

        let outcome = if params.key.as_deref() == Some(self.config.settings_key.as_str())
            || !(params.keep_live || params.modal)
        {
            self.close_window(handle)?
        } else {
            self.hide_window(handle)?
        };
        info!(handle = %handle, outcome = ?outcome, "[lifecycle] escape");

        Ok(match outcome {
            CloseOutcome::Closed => EscapeOutcome::Closed,
            CloseOutcome::Hidden => EscapeOutcome::Hidden,
            CloseOutcome::AlreadyClosed => EscapeOutcome::Ignored,
        })
    }

    // =========================================================================
    // Modal Lost Focus
    // =========================================================================

    /// A window lost focus. Modal windows are dismissed after a short delay
    /// unless focus came back in the meantime.
    pub fn on_focus_lost(&self, handle: WindowHandle) -> Option<JoinHandle<()>> {
        let modal = self
            .registry
            .lock()
            .get(handle)
            .is_some_and(|record| record.params.modal);
        if !modal {
            return None;
        }

        let this = self.clone();
        Some(tokio::spawn(async move {
            tokio::time::sleep(this.config.modal_blur_delay).await;
            if this.host.is_focused(handle) || !this.host.is_visible(handle) {
                return;
            }
            let keep_live = match this.registry.lock().get(handle) {
                Some(record) => record.params.keep_live,
                None => return,
            };
            let result = if keep_live {
                this.hide_window(handle)
            } else {
                this.close_window(handle)
            };
            match result {
                Ok(outcome) => debug!(handle = %handle, outcome = ?outcome, "[lifecycle] modal dismissed on blur"),
                Err(e) => warn!(handle = %handle, error = %e, "[lifecycle] modal blur dismiss failed"),
            }
        }))
    }

    fn refuse_root(&self, handle: WindowHandle) -> Result<()> {
        if self.registry.lock().is_root(handle) {
            return Err(LifecycleError::RootWindow(handle));
        }
        Ok(())
    }

    fn address_of(&self, handle: WindowHandle) -> Option<Address> {
        self.registry
            .lock()
            .get(handle)
            .map(|record| record.params.address.clone())
    }
}

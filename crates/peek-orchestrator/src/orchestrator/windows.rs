//! Content primitives: open, close/hide/show/focus, window listing.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use peek_desktop::{sanitize_key, CloseOutcome, WindowParams};
use peek_host::OpenOptions;
use peek_ipc::{Address, WindowHandle};

use super::Orchestrator;
use crate::Result;

/// Which window a visibility/close call applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WindowTarget {
    Handle(WindowHandle),
    /// The focused window, if any.
    Current,
}

impl From<WindowHandle> for WindowTarget {
    fn from(handle: WindowHandle) -> Self {
        WindowTarget::Handle(handle)
    }
}

/// One row of [`Orchestrator::list_windows`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowInfo {
    pub id: WindowHandle,
    pub url: Address,
    /// Owner address (the context that opened it).
    pub source: Address,
    pub visible: bool,
    pub focused: bool,
}

impl Orchestrator {
    /// Open a window at `url` on behalf of `source`.
    ///
    /// A `key` that is already open shows and focuses the existing window
    /// instead of creating one.
    pub async fn open(&self, url: &str, mut options: OpenOptions, source: &Address) -> Result<WindowHandle> {
        let host = &self.inner.host;
        let headless = self.inner.config.headless;
        let address = Address::resolve(url);

        if let Some(key) = options.key.as_deref().map(sanitize_key) {
            let existing = self.inner.lifecycle.registry().lock().find_by_key(&key);
            if let Some(handle) = existing.filter(|handle| host.exists(*handle)) {
                if !headless {
                    host.show(handle)?;
                    host.focus(handle)?;
                }
                debug!(handle = %handle, key = %key, "[orchestrator] reusing keyed window");
                return Ok(handle);
            }
            options.key = Some(key);
        }

        let transient = host.focused_window().is_none();
        if headless {
            options.show = Some(false);
        }

        let handle = host.create_window(&address, &options)?;
        let params = WindowParams::from_options(address.clone(), &options, transient);
        self.inner.lifecycle.register(handle, source.clone(), params);

        if let Err(e) = host.load_content(handle).await {
            warn!(handle = %handle, address = %address, error = %e, "[orchestrator] window content failed to load");
            let _ = self.inner.lifecycle.close_window(handle);
            return Err(e.into());
        }
        if options.shows() {
            self.inner.lifecycle.focus_window(handle)?;
        }

        info!(handle = %handle, address = %address, source = %source, transient, "[orchestrator] window opened");
        Ok(handle)
    }

    /// Close a window and everything it owns.
    pub fn close(&self, target: impl Into<WindowTarget>) -> Result<CloseOutcome> {
        match self.resolve(target.into()) {
            Some(handle) => Ok(self.inner.lifecycle.close_window(handle)?),
            None => Ok(CloseOutcome::AlreadyClosed),
        }
    }

    /// Hide a window after closing everything it owns.
    pub fn hide(&self, target: impl Into<WindowTarget>) -> Result<CloseOutcome> {
        match self.resolve(target.into()) {
            Some(handle) => Ok(self.inner.lifecycle.hide_window(handle)?),
            None => Ok(CloseOutcome::AlreadyClosed),
        }
    }

    /// Returns `false` for unknown windows.
    pub fn show(&self, target: impl Into<WindowTarget>) -> Result<bool> {
        match self.resolve(target.into()) {
            Some(handle) => Ok(self.inner.lifecycle.show_window(handle)?),
            None => Ok(false),
        }
    }

    /// Returns `false` for unknown windows.
    pub fn focus(&self, target: impl Into<WindowTarget>) -> Result<bool> {
        match self.resolve(target.into()) {
            Some(handle) => Ok(self.inner.lifecycle.focus_window(handle)?),
            None => Ok(false),
        }
    }

    /// Every registered window the host still knows, by handle.
    pub fn list_windows(&self) -> Vec<WindowInfo> {
        let records: Vec<_> = self.inner.lifecycle.registry().lock().iter().cloned().collect();
        let host = &self.inner.host;
        records
            .into_iter()
            .filter(|record| host.exists(record.handle))
            .map(|record| WindowInfo {
                id: record.handle,
                url: record.params.address,
                source: record.owner,
                visible: host.is_visible(record.handle),
                focused: host.is_focused(record.handle),
            })
            .collect()
    }

    fn resolve(&self, target: WindowTarget) -> Option<WindowHandle> {
        match target {
            WindowTarget::Handle(handle) => Some(handle),
            WindowTarget::Current => self.inner.host.focused_window(),
        }
    }
}

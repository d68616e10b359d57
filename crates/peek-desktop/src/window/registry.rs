//! Window registry: handle → owner and parameters

use std::collections::BTreeMap;

use peek_ipc::{Address, WindowHandle};

use super::WindowParams;

/// A registered window
#[derive(Clone, Debug, PartialEq)]
pub struct WindowRecord {
    pub handle: WindowHandle,
    /// Address of the context that opened the window.
    pub owner: Address,
    pub params: WindowParams,
}

/// Registry of open windows and who owns them.
///
/// Purely in-memory and synchronous. An owner that has vanished simply has
/// no children.
#[derive(Debug, Default)]
pub struct WindowRegistry {
    /// All windows by handle
    windows: BTreeMap<WindowHandle, WindowRecord>,
    /// The background/system window, never closed by cascade or escape
    root: Option<WindowHandle>,
}

impl WindowRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a window. Re-registering a handle replaces its record.
    pub fn register(&mut self, handle: WindowHandle, owner: Address, params: WindowParams) {
        self.windows.insert(handle, WindowRecord { handle, owner, params });
    }

    /// Register the root window, owned by itself.
    pub fn register_root(&mut self, handle: WindowHandle, address: Address) {
        self.register(handle, address.clone(), WindowParams::new(address));
        self.root = Some(handle);
    }

    pub fn root(&self) -> Option<WindowHandle> {
        self.root
    }

    pub fn is_root(&self, handle: WindowHandle) -> bool {
        self.root == Some(handle)
    }

    /// Get a window by handle
    pub fn get(&self, handle: WindowHandle) -> Option<&WindowRecord> {
        self.windows.get(&handle)
    }

    /// Remove a window. Removing an unknown handle is a no-op.
    pub fn remove(&mut self, handle: WindowHandle) -> Option<WindowRecord> {
        if self.root == Some(handle) {
            self.root = None;
        }
        self.windows.remove(&handle)
    }

    /// Windows owned by `owner`, in handle order. Never includes the root.
    pub fn children_of(&self, owner: &Address) -> Vec<WindowHandle> {
        self.windows
            .values()
            .filter(|record| record.owner == *owner && !self.is_root(record.handle))
            .map(|record| record.handle)
            .collect()
    }

    /// Window opened with a reuse key.
    pub fn find_by_key(&self, key: &str) -> Option<WindowHandle> {
        self.windows
            .values()
            .find(|record| record.params.key.as_deref() == Some(key))
            .map(|record| record.handle)
    }

    /// First window showing `address`.
    pub fn find_by_address(&self, address: &Address) -> Option<WindowHandle> {
        self.windows
            .values()
            .find(|record| record.params.address == *address)
            .map(|record| record.handle)
    }

    pub fn contains(&self, handle: WindowHandle) -> bool {
        self.windows.contains_key(&handle)
    }

    /// All records in handle order
    pub fn iter(&self) -> impl Iterator<Item = &WindowRecord> {
        self.windows.values()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

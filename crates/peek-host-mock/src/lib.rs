//! Mock host implementation for testing Peek
//!
//! This provides an in-memory implementation of the [`Host`] trait that can
//! be used for testing the orchestrator without a real window layer. It is
//! also the host behind headless runs of the CLI.
//!
//! Every window and every consolidated sub-frame is simulated as its own
//! content context with a separate [`MessageBus`](peek_bus::MessageBus), so
//! cross-process routing is exercised for real.

mod context;

pub use context::ContentContext;

use std::collections::{BTreeMap, HashMap};
use std::future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::debug;

use peek_bus::Broadcaster;
use peek_host::{DeliveryTarget, Host, HostError, HostEvent, OpenOptions, Result};
use peek_ipc::{topic, Address, Envelope, Origin, Scope, WindowHandle};

/// Scripted outcome of loading content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadBehavior {
    /// Load succeeds (frames acknowledge readiness right away).
    Succeed,
    /// Load succeeds after a delay.
    Delay(Duration),
    /// Load fails (frames crash).
    Fail(String),
    /// Load never settles (frames never acknowledge).
    Hang,
}

/// Scripted reply to an escape query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EscapeBehavior {
    Handled,
    NotHandled,
    NoReply,
}

/// A recorded host call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostCall {
    CreateWindow { handle: WindowHandle, address: Address },
    LoadContent(WindowHandle),
    CreateFrame { host: WindowHandle, id: String },
    RemoveFrame { host: WindowHandle, id: String },
    Close(WindowHandle),
    Hide(WindowHandle),
    Show(WindowHandle),
    Focus(WindowHandle),
    Deliver { target: DeliveryTarget, topic: String },
    QueryEscape(WindowHandle),
}

/// Hook run inside a content context once its content has loaded.
pub type LoadHook = Arc<dyn Fn(&ContentContext) + Send + Sync>;

/// Simulated window state
struct MockWindow {
    options: OpenOptions,
    visible: bool,
    crashed: bool,
    context: ContentContext,
    frames: BTreeMap<String, MockFrame>,
}

struct MockFrame {
    crashed: bool,
    context: ContentContext,
}

#[derive(Default)]
struct State {
    windows: BTreeMap<WindowHandle, MockWindow>,
    focused: Option<WindowHandle>,
    calls: Vec<HostCall>,
    /// keyed by extension id or full address
    loads: HashMap<String, LoadBehavior>,
    escapes: HashMap<WindowHandle, EscapeBehavior>,
    hooks: HashMap<String, LoadHook>,
}

/// In-memory host
pub struct MockHost {
    state: Mutex<State>,
    next_handle: AtomicU64,
    uplink: RwLock<Option<Arc<dyn Broadcaster>>>,
    events_tx: mpsc::UnboundedSender<HostEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<HostEvent>>>,
    default_escape: Mutex<EscapeBehavior>,
}

impl MockHost {
    /// Create a new mock host
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(State::default()),
            next_handle: AtomicU64::new(1),
            uplink: RwLock::new(None),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            default_escape: Mutex::new(EscapeBehavior::NotHandled),
        }
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    /// Script the load outcome for an extension id or a full address.
    pub fn set_load_behavior(&self, key: &str, behavior: LoadBehavior) {
        self.state.lock().loads.insert(key.to_string(), behavior);
    }

    /// Script the escape reply of one window.
    pub fn set_escape_behavior(&self, handle: WindowHandle, behavior: EscapeBehavior) {
        self.state.lock().escapes.insert(handle, behavior);
    }

    /// Escape reply for windows without a scripted one.
    pub fn set_default_escape(&self, behavior: EscapeBehavior) {
        *self.default_escape.lock() = behavior;
    }

    /// Run `hook` inside every context loaded for an extension id or address.
    pub fn on_load<F>(&self, key: &str, hook: F)
    where
        F: Fn(&ContentContext) + Send + Sync + 'static,
    {
        self.state.lock().hooks.insert(key.to_string(), Arc::new(hook));
    }

    // =========================================================================
    // Simulation
    // =========================================================================

    /// The user closed a window.
    pub fn simulate_close(&self, handle: WindowHandle) -> bool {
        self.destroy(handle)
    }

    /// A window's content process faulted.
    pub fn simulate_crash(&self, handle: WindowHandle) {
        if let Some(window) = self.state.lock().windows.get_mut(&handle) {
            window.crashed = true;
        }
        self.emit(HostEvent::Crashed { handle, frame: None });
    }

    /// A consolidated sub-frame faulted.
    pub fn simulate_frame_crash(&self, host: WindowHandle, id: &str) {
        let mut state = self.state.lock();
        if let Some(frame) = state
            .windows
            .get_mut(&host)
            .and_then(|window| window.frames.get_mut(id))
        {
            frame.crashed = true;
        }
        drop(state);
        self.emit(HostEvent::Crashed {
            handle: host,
            frame: Some(id.to_string()),
        });
    }

    pub fn simulate_escape(&self, handle: WindowHandle) {
        self.emit(HostEvent::EscapePressed { handle });
    }

    /// Focus moves away from a window to nowhere.
    pub fn simulate_blur(&self, handle: WindowHandle) {
        let mut state = self.state.lock();
        if state.focused != Some(handle) {
            return;
        }
        state.focused = None;
        drop(state);
        self.emit(HostEvent::FocusLost { handle });
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<HostCall> {
        self.state.lock().calls.clone()
    }

    pub fn has_call(&self, call: &HostCall) -> bool {
        self.state.lock().calls.contains(call)
    }

    /// How many times `close` was called for a window.
    pub fn close_count(&self, handle: WindowHandle) -> usize {
        self.count_calls(|call| *call == HostCall::Close(handle))
    }

    pub fn count_calls(&self, matches: impl Fn(&HostCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|call| matches(call)).count()
    }

    /// Topics delivered to a target, in order.
    pub fn delivered_topics(&self, target: &DeliveryTarget) -> Vec<String> {
        self.state
            .lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                HostCall::Deliver { target: t, topic } if t == target => Some(topic.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn window_count(&self) -> usize {
        self.state.lock().windows.len()
    }

    /// Options a window was created with.
    pub fn options_of(&self, handle: WindowHandle) -> Option<OpenOptions> {
        self.state.lock().windows.get(&handle).map(|w| w.options.clone())
    }

    /// Content context of a window.
    pub fn context(&self, handle: WindowHandle) -> Option<ContentContext> {
        self.state.lock().windows.get(&handle).map(|w| w.context.clone())
    }

    /// Content context of a consolidated sub-frame.
    pub fn frame_context(&self, host: WindowHandle, id: &str) -> Option<ContentContext> {
        self.state
            .lock()
            .windows
            .get(&host)
            .and_then(|w| w.frames.get(id))
            .map(|f| f.context.clone())
    }

    /// Whether content publishes currently leave their context.
    pub fn has_uplink(&self) -> bool {
        self.uplink.read().is_some()
    }

    /// Handle of the first live window showing `address`.
    pub fn find_window(&self, address: &Address) -> Option<WindowHandle> {
        self.state
            .lock()
            .windows
            .iter()
            .find(|(_, w)| w.context.address() == address)
            .map(|(handle, _)| *handle)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn emit(&self, event: HostEvent) {
        // The receiver may be gone once the orchestrator stopped.
        let _ = self.events_tx.send(event);
    }

    fn record(&self, call: HostCall) {
        self.state.lock().calls.push(call);
    }

    fn script_for(&self, address: &Address) -> (LoadBehavior, Option<LoadHook>) {
        let state = self.state.lock();
        let keys = [address.origin().extension_id().map(str::to_string), Some(address.to_string())];
        let behavior = keys
            .iter()
            .flatten()
            .find_map(|key| state.loads.get(key).cloned())
            .unwrap_or(LoadBehavior::Succeed);
        let hook = keys
            .iter()
            .flatten()
            .find_map(|key| state.hooks.get(key).cloned());
        (behavior, hook)
    }

    fn new_context(&self, address: Address, origin: Origin, target: DeliveryTarget) -> ContentContext {
        let context = ContentContext::new(address, origin, target);
        if let Some(uplink) = self.uplink.read().clone() {
            context.bus().set_uplink(uplink);
        }
        context
    }

    fn destroy(&self, handle: WindowHandle) -> bool {
        let mut state = self.state.lock();
        let Some(window) = state.windows.remove(&handle) else {
            return false;
        };
        if state.focused == Some(handle) {
            state.focused = None;
        }
        drop(state);

        for frame in window.frames.values() {
            frame.context.release();
        }
        window.context.release();
        self.emit(HostEvent::Closed { handle });
        true
    }

    fn with_window<T>(&self, handle: WindowHandle, f: impl FnOnce(&mut MockWindow) -> T) -> Result<T> {
        self.state
            .lock()
            .windows
            .get_mut(&handle)
            .map(f)
            .ok_or(HostError::WindowNotFound(handle))
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Host for MockHost {
    fn create_window(&self, address: &Address, options: &OpenOptions) -> Result<WindowHandle> {
        let handle = WindowHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let context = self.new_context(address.clone(), address.origin(), DeliveryTarget::Window(handle));
        let window = MockWindow {
            options: options.clone(),
            visible: options.shows(),
            crashed: false,
            context,
            frames: BTreeMap::new(),
        };

        let mut state = self.state.lock();
        state.windows.insert(handle, window);
        state.calls.push(HostCall::CreateWindow {
            handle,
            address: address.clone(),
        });
        debug!(handle = %handle, address = %address, "[mock-host] window created");
        Ok(handle)
    }

    async fn load_content(&self, handle: WindowHandle) -> Result<()> {
        self.record(HostCall::LoadContent(handle));
        let context = self.with_window(handle, |w| w.context.clone())?;
        let (behavior, hook) = self.script_for(context.address());

        match behavior {
            LoadBehavior::Succeed => {}
            LoadBehavior::Delay(delay) => tokio::time::sleep(delay).await,
            LoadBehavior::Fail(reason) => {
                return Err(HostError::LoadFailed {
                    address: context.address().clone(),
                    reason,
                })
            }
            LoadBehavior::Hang => future::pending::<()>().await,
        }

        if !self.exists(handle) {
            return Err(HostError::WindowNotFound(handle));
        }
        if let Some(hook) = hook {
            hook(&context);
        }
        Ok(())
    }

    fn close(&self, handle: WindowHandle) -> Result<()> {
        self.record(HostCall::Close(handle));
        if self.destroy(handle) {
            Ok(())
        } else {
            Err(HostError::WindowNotFound(handle))
        }
    }

    fn hide(&self, handle: WindowHandle) -> Result<()> {
        self.record(HostCall::Hide(handle));
        let mut state = self.state.lock();
        let window = state
            .windows
            .get_mut(&handle)
            .ok_or(HostError::WindowNotFound(handle))?;
        window.visible = false;
        if state.focused == Some(handle) {
            state.focused = None;
        }
        Ok(())
    }

    fn show(&self, handle: WindowHandle) -> Result<()> {
        self.record(HostCall::Show(handle));
        self.with_window(handle, |w| w.visible = true)
    }

    fn focus(&self, handle: WindowHandle) -> Result<()> {
        self.record(HostCall::Focus(handle));
        let mut state = self.state.lock();
        if !state.windows.contains_key(&handle) {
            return Err(HostError::WindowNotFound(handle));
        }
        let previous = state.focused.replace(handle);
        drop(state);

        if let Some(previous) = previous.filter(|p| *p != handle) {
            self.emit(HostEvent::FocusLost { handle: previous });
        }
        self.emit(HostEvent::Focused { handle });
        Ok(())
    }

    fn exists(&self, handle: WindowHandle) -> bool {
        self.state.lock().windows.contains_key(&handle)
    }

    fn is_visible(&self, handle: WindowHandle) -> bool {
        self.state.lock().windows.get(&handle).is_some_and(|w| w.visible)
    }

    fn is_focused(&self, handle: WindowHandle) -> bool {
        self.state.lock().focused == Some(handle)
    }

    fn focused_window(&self) -> Option<WindowHandle> {
        self.state.lock().focused
    }

    fn address_of(&self, handle: WindowHandle) -> Option<Address> {
        self.state
            .lock()
            .windows
            .get(&handle)
            .map(|w| w.context.address().clone())
    }

    fn create_frame(&self, host: WindowHandle, id: &str, address: &Address) -> Result<()> {
        self.record(HostCall::CreateFrame {
            host,
            id: id.to_string(),
        });
        let context = self.new_context(
            address.clone(),
            Origin::subframe(id),
            DeliveryTarget::Frame {
                host,
                id: id.to_string(),
            },
        );
        self.with_window(host, |w| {
            w.frames.insert(
                id.to_string(),
                MockFrame {
                    crashed: false,
                    context: context.clone(),
                },
            );
        })?;

        let (behavior, hook) = self.script_for(address);
        let events = self.events_tx.clone();
        let frame_id = id.to_string();
        tokio::spawn(async move {
            match behavior {
                LoadBehavior::Succeed => tokio::task::yield_now().await,
                LoadBehavior::Delay(delay) => tokio::time::sleep(delay).await,
                LoadBehavior::Fail(reason) => {
                    debug!(frame = %frame_id, reason = %reason, "[mock-host] frame failed to load");
                    let _ = events.send(HostEvent::Crashed {
                        handle: host,
                        frame: Some(frame_id),
                    });
                    return;
                }
                LoadBehavior::Hang => return,
            }
            if let Some(hook) = hook {
                hook(&context);
            }
            context.publish(topic::EXT_READY, json!({ "id": frame_id }), Scope::System);
        });
        Ok(())
    }

    fn remove_frame(&self, host: WindowHandle, id: &str) -> Result<()> {
        self.record(HostCall::RemoveFrame {
            host,
            id: id.to_string(),
        });
        let frame = self
            .with_window(host, |w| w.frames.remove(id))?
            .ok_or_else(|| HostError::FrameNotFound {
                host,
                frame: id.to_string(),
            })?;
        frame.context.release();
        Ok(())
    }

    fn deliver(&self, target: &DeliveryTarget, envelope: &Envelope) -> Result<()> {
        let bus = {
            let mut state = self.state.lock();
            state.calls.push(HostCall::Deliver {
                target: target.clone(),
                topic: envelope.topic.clone(),
            });
            let handle = target.window();
            let window = state
                .windows
                .get(&handle)
                .ok_or(HostError::WindowNotFound(handle))?;
            match target {
                DeliveryTarget::Window(_) if window.crashed => return Err(HostError::Crashed(handle)),
                DeliveryTarget::Window(_) => window.context.bus().clone(),
                DeliveryTarget::Frame { id, .. } => {
                    let frame = window.frames.get(id).ok_or_else(|| HostError::FrameNotFound {
                        host: handle,
                        frame: id.clone(),
                    })?;
                    if frame.crashed {
                        return Err(HostError::Crashed(handle));
                    }
                    frame.context.bus().clone()
                }
            }
        };
        bus.deliver(envelope.clone());
        Ok(())
    }

    fn attach_uplink(&self, uplink: Arc<dyn Broadcaster>) {
        *self.uplink.write() = Some(uplink.clone());
        let state = self.state.lock();
        for window in state.windows.values() {
            window.context.bus().set_uplink(uplink.clone());
            for frame in window.frames.values() {
                frame.context.bus().set_uplink(uplink.clone());
            }
        }
    }

    fn detach_uplink(&self) {
        if self.uplink.write().take().is_none() {
            return;
        }
        let state = self.state.lock();
        for window in state.windows.values() {
            window.context.bus().clear_uplink();
            for frame in window.frames.values() {
                frame.context.bus().clear_uplink();
            }
        }
        debug!("[mock-host] uplink detached");
    }

    async fn query_escape(&self, handle: WindowHandle) -> Result<bool> {
        self.record(HostCall::QueryEscape(handle));
        let behavior = {
            let state = self.state.lock();
            if !state.windows.contains_key(&handle) {
                return Err(HostError::WindowNotFound(handle));
            }
            state
                .escapes
                .get(&handle)
                .copied()
                .unwrap_or(*self.default_escape.lock())
        };
        match behavior {
            EscapeBehavior::Handled => Ok(true),
            EscapeBehavior::NotHandled => Ok(false),
            EscapeBehavior::NoReply => future::pending().await,
        }
    }

    fn take_events(&self) -> Option<mpsc::UnboundedReceiver<HostEvent>> {
        self.events_rx.lock().take()
    }
}

//! Extension process supervisor.
//!
//! # Process Creation
//!
//! ```text
//! create_process(id)
//!   ├─ record exists           → its window handle
//!   ├─ creation in flight      → wait for it, same outcome
//!   ├─ no installation path    → ExtensionNotFound, nothing created
//!   ├─ consolidated            → frame in the shared host window,
//!   │                            running on `ext:ready` from Subframe{id}
//!   └─ dedicated               → own window, running once content loads
//! ```
//!
//! A failed load deletes the record and releases the window or frame.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use peek_bus::{Listener, MessageBus};
use peek_host::{DeliveryTarget, Host, OpenOptions};
use peek_ipc::{
    topic, Address, Envelope, ExtensionShutdownPayload, Origin, ReadyPayload, Scope, WindowHandle,
    EXTENSION_HOST_ADDRESS,
};

use crate::manifest::ExtensionSource;
use crate::record::{ExtensionRecord, ExtensionStatus, ExtensionTable, Placement};
use crate::{Result, SupervisorError};

/// Built-in ids hosted as sub-frames of the shared extension host window.
pub const DEFAULT_CONSOLIDATED_IDS: [&str; 5] = ["cmd", "groups", "peeks", "slides", "windows"];

/// Supervisor configuration
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Extension loaded alone in the `early` phase.
    pub command_registry_id: String,
    pub consolidated_ids: BTreeSet<String>,
    /// Bound on a consolidated frame's readiness acknowledgement.
    pub ready_timeout: Duration,
    /// Delay between `ext:shutdown` and forced release.
    pub destroy_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            command_registry_id: "cmd".to_string(),
            consolidated_ids: DEFAULT_CONSOLIDATED_IDS.iter().map(|id| id.to_string()).collect(),
            ready_timeout: Duration::from_millis(5000),
            destroy_grace: Duration::from_millis(100),
        }
    }
}

/// `None` while in flight; `Some(None)` failed; `Some(Some(handle))` loaded.
type Settled = Option<Option<WindowHandle>>;

type ReadyReply = std::result::Result<(), String>;

/// Settles the in-flight entry of a fresh creation. Dropped unsettled
/// (the caller's future was cancelled), it abandons the creation instead.
struct PendingCreate<'a> {
    supervisor: &'a Supervisor,
    id: &'a str,
    settled: bool,
}

impl PendingCreate<'_> {
    fn settle(mut self, outcome: Option<WindowHandle>) {
        if let Some(settled) = self.supervisor.inner.state.lock().pending.remove(self.id) {
            settled.send_replace(Some(outcome));
        }
        self.settled = true;
    }
}

impl Drop for PendingCreate<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.supervisor.abandon(self.id);
        }
    }
}

#[derive(Default)]
struct State {
    table: ExtensionTable,
    pending: HashMap<String, watch::Sender<Settled>>,
}

struct Inner {
    host: Arc<dyn Host>,
    bus: MessageBus,
    config: SupervisorConfig,
    catalog: Mutex<BTreeMap<String, ExtensionSource>>,
    state: Mutex<State>,
    ready: Arc<Mutex<HashMap<String, oneshot::Sender<ReadyReply>>>>,
    host_window: Mutex<Option<WindowHandle>>,
    host_window_init: tokio::sync::Mutex<()>,
    _ready_listener: Listener,
}

/// Extension process supervisor
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Create a supervisor publishing on the system bus.
    ///
    /// Must be called from within a Tokio runtime: readiness
    /// acknowledgements are consumed by a listener task.
    pub fn new(host: Arc<dyn Host>, bus: MessageBus, config: SupervisorConfig) -> Self {
        let ready: Arc<Mutex<HashMap<String, oneshot::Sender<ReadyReply>>>> = Arc::default();

        let waiters = ready.clone();
        let ready_listener = bus.listen(topic::EXT_READY, Scope::System, &Address::system(), move |envelope| {
            let ReadyPayload { id } = envelope.payload_as()?;
            if envelope.origin != Origin::subframe(id.as_str()) {
                debug!(ext_id = %id, origin = ?envelope.origin, "[supervisor] ready ack from another origin ignored");
                return Ok(());
            }
            match waiters.lock().remove(&id) {
                Some(waiter) => {
                    let _ = waiter.send(Ok(()));
                }
                None => debug!(ext_id = %id, "[supervisor] unexpected ready ack"),
            }
            Ok(())
        });

        Self {
            inner: Arc::new(Inner {
                host,
                bus,
                config,
                catalog: Mutex::new(BTreeMap::new()),
                state: Mutex::new(State::default()),
                ready,
                host_window: Mutex::new(None),
                host_window_init: tokio::sync::Mutex::new(()),
                _ready_listener: ready_listener,
            }),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    pub fn bus(&self) -> &MessageBus {
        &self.inner.bus
    }

    // =========================================================================
    // Catalog
    // =========================================================================

    /// Make an installed extension known. Replaces a source with the same id.
    pub fn register_source(&self, source: ExtensionSource) {
        debug!(ext_id = %source.id, path = %source.path.display(), builtin = source.builtin, "[supervisor] source registered");
        self.inner.catalog.lock().insert(source.id.clone(), source);
    }

    pub fn register_sources(&self, sources: impl IntoIterator<Item = ExtensionSource>) {
        for source in sources {
            self.register_source(source);
        }
    }

    pub fn source(&self, id: &str) -> Option<ExtensionSource> {
        self.inner.catalog.lock().get(id).cloned()
    }

    /// All known sources, by id.
    pub fn sources(&self) -> Vec<ExtensionSource> {
        self.inner.catalog.lock().values().cloned().collect()
    }

    pub(crate) fn is_builtin(&self, id: &str) -> bool {
        self.inner.catalog.lock().get(id).is_some_and(|source| source.builtin)
    }

    fn is_consolidated(&self, source: &ExtensionSource) -> bool {
        source.builtin && self.inner.config.consolidated_ids.contains(&source.id)
    }

    fn resolve_source(&self, id: &str) -> Result<ExtensionSource> {
        match self.source(id) {
            Some(source) if source.path.is_dir() => Ok(source),
            Some(source) => {
                warn!(ext_id = %id, path = %source.path.display(), "[supervisor] ExtensionNotFound: installation path missing");
                Err(SupervisorError::ExtensionNotFound(id.to_string()))
            }
            None => {
                warn!(ext_id = %id, "[supervisor] ExtensionNotFound: unknown id");
                Err(SupervisorError::ExtensionNotFound(id.to_string()))
            }
        }
    }

    // =========================================================================
    // Creation
    // =========================================================================

    /// Create the process of an extension, or return the existing one.
    ///
    /// Concurrent calls for one id create a single record and resolve to
    /// the same handle.
    pub async fn create_process(&self, id: &str) -> Result<WindowHandle> {
        enum Entry {
            Existing(WindowHandle),
            Joined(watch::Receiver<Settled>),
            Fresh,
        }

        let entry = {
            let mut state = self.inner.state.lock();
            if let Some(in_flight) = state.pending.get(id) {
                Entry::Joined(in_flight.subscribe())
            } else if let Some(record) = state.table.get(id) {
                Entry::Existing(record.window)
            } else {
                let (settled, _) = watch::channel(None);
                state.pending.insert(id.to_string(), settled);
                Entry::Fresh
            }
        };

        match entry {
            Entry::Existing(handle) => {
                debug!(ext_id = %id, handle = %handle, "[supervisor] process already exists");
                Ok(handle)
            }
            Entry::Joined(mut settled) => {
                let handle = settled
                    .wait_for(Option::is_some)
                    .await
                    .map(|outcome| *outcome)
                    .ok()
                    .flatten()
                    .flatten();
                handle.ok_or_else(|| SupervisorError::load_failed(id, "concurrent creation failed"))
            }
            Entry::Fresh => {
                let guard = PendingCreate {
                    supervisor: self,
                    id,
                    settled: false,
                };
                let outcome = self.load(id).await;
                guard.settle(outcome.as_ref().ok().copied());
                outcome
            }
        }
    }

    async fn load(&self, id: &str) -> Result<WindowHandle> {
        let source = self.resolve_source(id)?;
        if self.is_consolidated(&source) {
            self.load_consolidated(&source).await
        } else {
            self.load_dedicated(&source).await
        }
    }

    async fn load_dedicated(&self, source: &ExtensionSource) -> Result<WindowHandle> {
        let id = source.id.as_str();
        let address = source.address();
        let handle = self
            .inner
            .host
            .create_window(&address, &OpenOptions::hidden())
            .map_err(|e| SupervisorError::load_failed(id, e))?;

        self.insert_loading(source, handle, Placement::Dedicated);
        debug!(ext_id = %id, handle = %handle, address = %address, "[supervisor] loading dedicated extension");

        let loaded = match self.inner.host.load_content(handle).await {
            Ok(()) => self.settle_loaded(id, handle),
            Err(e) => Err(SupervisorError::load_failed(id, e)),
        };
        if let Err(e) = &loaded {
            self.discard(id, handle, Placement::Dedicated);
            warn!(ext_id = %id, error = %e, "[supervisor] ExtensionLoadFailed");
        }
        loaded
    }

    async fn load_consolidated(&self, source: &ExtensionSource) -> Result<WindowHandle> {
        let id = source.id.as_str();
        let host_window = self
            .ensure_extension_host()
            .await
            .map_err(|e| SupervisorError::load_failed(id, e))?;

        // Registered before the frame exists so an early ack is not lost.
        let (ready_tx, ready_rx) = oneshot::channel();
        self.inner.ready.lock().insert(id.to_string(), ready_tx);
        self.insert_loading(source, host_window, Placement::Consolidated);
        debug!(ext_id = %id, host = %host_window, "[supervisor] loading consolidated extension");

        if let Err(e) = self.inner.host.create_frame(host_window, id, &source.address()) {
            self.discard(id, host_window, Placement::Consolidated);
            warn!(ext_id = %id, error = %e, "[supervisor] ExtensionLoadFailed");
            return Err(SupervisorError::load_failed(id, e));
        }

        let timeout = self.inner.config.ready_timeout;
        let failure = match tokio::time::timeout(timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => match self.settle_loaded(id, host_window) {
                Ok(handle) => return Ok(handle),
                Err(e) => e,
            },
            Ok(Ok(Err(reason))) => SupervisorError::load_failed(id, reason),
            Ok(Err(_)) => SupervisorError::load_failed(id, "readiness channel closed"),
            Err(_) => SupervisorError::ReadyTimeout {
                id: id.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            },
        };
        self.discard(id, host_window, Placement::Consolidated);
        warn!(ext_id = %id, error = %failure, "[supervisor] ExtensionLoadFailed");
        Err(failure)
    }

    /// The shared window consolidated extensions live in, created on demand.
    async fn ensure_extension_host(&self) -> Result<WindowHandle> {
        let _init = self.inner.host_window_init.lock().await;
        let existing = *self.inner.host_window.lock();
        if let Some(handle) = existing.filter(|handle| self.inner.host.exists(*handle)) {
            return Ok(handle);
        }

        let address = Address::new(EXTENSION_HOST_ADDRESS);
        let handle = self.inner.host.create_window(&address, &OpenOptions::hidden())?;
        if let Err(e) = self.inner.host.load_content(handle).await {
            let _ = self.inner.host.close(handle);
            return Err(e.into());
        }
        *self.inner.host_window.lock() = Some(handle);
        info!(handle = %handle, "[supervisor] extension host window ready");
        Ok(handle)
    }

    fn insert_loading(&self, source: &ExtensionSource, window: WindowHandle, placement: Placement) {
        self.inner.state.lock().table.insert(ExtensionRecord {
            id: source.id.clone(),
            window,
            placement,
            address: source.address(),
            status: ExtensionStatus::Loading,
            builtin: source.builtin,
        });
    }

    fn settle_loaded(&self, id: &str, handle: WindowHandle) -> Result<WindowHandle> {
        let mut state = self.inner.state.lock();
        match state.table.get(id).map(|record| record.status) {
            Some(ExtensionStatus::Loading) => {
                state
                    .table
                    .transition(id, ExtensionStatus::Loading, ExtensionStatus::Running);
                drop(state);
                info!(ext_id = %id, handle = %handle, "[supervisor] extension running");
                Ok(handle)
            }
            Some(ExtensionStatus::Running) => Ok(handle),
            Some(ExtensionStatus::Crashed) => Err(SupervisorError::load_failed(id, "crashed while loading")),
            None => Err(SupervisorError::load_failed(id, "destroyed while loading")),
        }
    }

    /// A creation whose future was dropped before it settled. Releases the
    /// half-loaded record and fails the callers that joined it.
    fn abandon(&self, id: &str) {
        let loading = {
            let mut state = self.inner.state.lock();
            if let Some(settled) = state.pending.remove(id) {
                settled.send_replace(Some(None));
            }
            state
                .table
                .get(id)
                .filter(|record| record.status != ExtensionStatus::Running)
                .map(|record| (record.window, record.placement))
        };
        match loading {
            Some((window, placement)) => {
                self.discard(id, window, placement);
                warn!(ext_id = %id, "[supervisor] creation cancelled, partial process released");
            }
            None => {
                self.inner.ready.lock().remove(id);
            }
        }
    }

    /// Drop a failed record and release what it held.
    fn discard(&self, id: &str, window: WindowHandle, placement: Placement) {
        {
            let mut state = self.inner.state.lock();
            if state.table.get(id).is_some_and(|record| record.window == window) {
                state.table.remove(id);
            }
        }
        self.inner.ready.lock().remove(id);

        let released = match placement {
            Placement::Consolidated => self.inner.host.remove_frame(window, id),
            Placement::Dedicated => self.inner.host.close(window),
        };
        if let Err(e) = released {
            debug!(ext_id = %id, error = %e, "[supervisor] nothing to release");
        }
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Remove an extension's record now, notify it, and release its window
    /// or frame after the grace delay.
    ///
    /// Returns the release task, or `None` if there was no record.
    pub fn destroy_process(&self, id: &str) -> Option<JoinHandle<()>> {
        let record = self.inner.state.lock().table.remove(id)?;
        if let Some(waiter) = self.inner.ready.lock().remove(id) {
            let _ = waiter.send(Err("destroyed while loading".to_string()));
        }

        let payload = ExtensionShutdownPayload { id: id.to_string() };
        match Envelope::typed(topic::EXT_SHUTDOWN, &payload, Scope::Global, Address::system()) {
            Ok(envelope) => {
                if let Err(e) = self.inner.host.deliver(&record.target(), &envelope) {
                    debug!(ext_id = %id, error = %e, "[supervisor] shutdown notification not delivered");
                }
            }
            Err(e) => warn!(ext_id = %id, error = %e, "[supervisor] shutdown notification not encodable"),
        }
        info!(ext_id = %id, status = record.status.name(), "[supervisor] extension destroyed");

        let host = self.inner.host.clone();
        let grace = self.inner.config.destroy_grace;
        Some(tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let released = match record.placement {
                Placement::Consolidated => host.remove_frame(record.window, &record.id),
                Placement::Dedicated => host.close(record.window),
            };
            if let Err(e) = released {
                debug!(ext_id = %record.id, error = %e, "[supervisor] already released");
            }
        }))
    }

    /// Destroy and recreate an extension. The only way back from `crashed`.
    pub async fn reload_process(&self, id: &str) -> Result<WindowHandle> {
        if let Some(release) = self.destroy_process(id) {
            let _ = release.await;
        }
        info!(ext_id = %id, "[supervisor] reloading extension");
        self.create_process(id).await
    }

    /// Destroy every extension, wait out the grace delay, close the shared
    /// host window.
    pub async fn shutdown(&self) {
        let ids = self.inner.state.lock().table.ids();
        let releases: Vec<_> = ids.iter().filter_map(|id| self.destroy_process(id)).collect();
        for release in futures::future::join_all(releases).await {
            if let Err(e) = release {
                warn!(error = %e, "[supervisor] release task failed");
            }
        }

        let host_window = self.inner.host_window.lock().take();
        if let Some(handle) = host_window {
            let _ = self.inner.host.close(handle);
        }
        info!(count = ids.len(), "[supervisor] all extensions destroyed");
    }

    // =========================================================================
    // Host Events
    // =========================================================================

    /// A window or frame faulted. Returns the affected extension ids.
    pub fn on_crashed(&self, handle: WindowHandle, frame: Option<&str>) -> Vec<String> {
        let host_window = *self.inner.host_window.lock();
        let ids = {
            let state = self.inner.state.lock();
            match frame {
                Some(id) => state
                    .table
                    .get(id)
                    .filter(|r| r.window == handle && r.placement == Placement::Consolidated)
                    .map(|r| vec![r.id.clone()])
                    .unwrap_or_default(),
                None if host_window == Some(handle) => state.table.consolidated_in(handle),
                None => state
                    .table
                    .dedicated_in(handle)
                    .map(|r| vec![r.id.clone()])
                    .unwrap_or_default(),
            }
        };
        for id in &ids {
            self.mark_crashed(id);
        }
        ids
    }

    /// Mark an extension crashed. A crash while loading fails the load.
    pub fn mark_crashed(&self, id: &str) -> bool {
        let previous = self
            .inner
            .state
            .lock()
            .table
            .set_status(id, ExtensionStatus::Crashed);
        match previous {
            Some(ExtensionStatus::Loading) => {
                if let Some(waiter) = self.inner.ready.lock().remove(id) {
                    let _ = waiter.send(Err("crashed while loading".to_string()));
                }
                warn!(ext_id = %id, "[supervisor] ExtensionCrashed while loading");
            }
            Some(ExtensionStatus::Running) => {
                warn!(ext_id = %id, "[supervisor] ExtensionCrashed, excluded from fan-out until reloaded");
            }
            Some(ExtensionStatus::Crashed) => {}
            None => return false,
        }
        true
    }

    /// A window went away. Drops the records that lived in it.
    pub fn on_window_closed(&self, handle: WindowHandle) -> Vec<String> {
        let is_host_window = {
            let mut host_window = self.inner.host_window.lock();
            if *host_window == Some(handle) {
                *host_window = None;
                true
            } else {
                false
            }
        };

        let removed = {
            let mut state = self.inner.state.lock();
            let ids = if is_host_window {
                state.table.consolidated_in(handle)
            } else {
                state
                    .table
                    .dedicated_in(handle)
                    .map(|r| vec![r.id.clone()])
                    .unwrap_or_default()
            };
            for id in &ids {
                state.table.remove(id);
            }
            ids
        };

        for id in &removed {
            if let Some(waiter) = self.inner.ready.lock().remove(id) {
                let _ = waiter.send(Err("window closed while loading".to_string()));
            }
            info!(ext_id = %id, handle = %handle, "[supervisor] extension window closed");
        }
        removed
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn record(&self, id: &str) -> Option<ExtensionRecord> {
        self.inner.state.lock().table.get(id).cloned()
    }

    pub fn status(&self, id: &str) -> Option<ExtensionStatus> {
        self.inner.state.lock().table.get(id).map(|record| record.status)
    }

    /// Extensions with status `running`, by id.
    pub fn running_extensions(&self) -> Vec<ExtensionRecord> {
        self.inner.state.lock().table.running().cloned().collect()
    }

    /// Every record, crashed ones included, by id.
    pub fn extensions(&self) -> Vec<ExtensionRecord> {
        self.inner.state.lock().table.iter().cloned().collect()
    }

    /// Running extension with a given content address.
    pub fn running_at(&self, address: &Address) -> Option<ExtensionRecord> {
        self.inner
            .state
            .lock()
            .table
            .running()
            .find(|record| record.address == *address)
            .cloned()
    }

    /// Delivery targets of a GLOBAL fan-out: every running extension except
    /// the one in the publishing context.
    pub fn fanout_targets(&self, origin: &Origin) -> Vec<DeliveryTarget> {
        self.inner
            .state
            .lock()
            .table
            .running()
            .filter(|record| !record.address.origin().same_context(origin))
            .map(ExtensionRecord::target)
            .collect()
    }

    /// The shared extension host window, if created.
    pub fn extension_host_window(&self) -> Option<WindowHandle> {
        *self.inner.host_window.lock()
    }
}

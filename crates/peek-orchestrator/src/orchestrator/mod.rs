//! The orchestrator
//!
//! Owns the system bus, the window registry and lifecycle controller, the
//! extension supervisor and the router, and wires them to one host.
//!
//! | File | Concern |
//! |------|---------|
//! | `boot.rs` | start: root window, discovery, enabled filter, phased startup |
//! | `events.rs` | host event loop |
//! | `windows.rs` | open, close/hide/show/focus, window listing |

mod boot;
mod events;
mod windows;

pub use boot::ENABLED_SETTING;
pub use windows::{WindowInfo, WindowTarget};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use peek_bus::{CommandDirectory, CommandRegistry, MessageBus, Subscription};
use peek_desktop::{LifecycleController, WindowRegistry};
use peek_host::Host;
use peek_ipc::{topic, Address, CommandDescriptor, Scope, ShutdownPayload, WindowHandle};
use peek_supervisor::{ExtensionRecord, Supervisor};

use crate::datastore::Datastore;
use crate::router::Router;
use crate::{HostConfig, Result};

pub(crate) struct Inner {
    config: HostConfig,
    host: Arc<dyn Host>,
    bus: MessageBus,
    datastore: Arc<dyn Datastore>,
    lifecycle: LifecycleController,
    supervisor: Supervisor,
    router: Router,
    directory: CommandDirectory,
    commands: CommandRegistry,
    root: Mutex<Option<WindowHandle>>,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

/// Top-level application host.
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Compose the orchestrator around a host.
    ///
    /// Must be called from within a Tokio runtime. Fails only on invalid
    /// configuration.
    pub fn new(config: HostConfig, host: Arc<dyn Host>, datastore: Arc<dyn Datastore>) -> Result<Self> {
        config.validate()?;

        let bus = MessageBus::system();
        let registry = Arc::new(Mutex::new(WindowRegistry::new()));
        let supervisor = Supervisor::new(host.clone(), bus.clone(), config.supervisor_config());
        let router = Router::new(host.clone(), bus.clone(), supervisor.clone(), registry.clone());
        let lifecycle = LifecycleController::new(
            host.clone(),
            registry,
            Arc::new(router.clone()),
            config.lifecycle_config(),
        );

        host.attach_uplink(router.inbound());
        bus.set_uplink(router.outbound());
        let directory = CommandDirectory::attach(&bus, &Address::system());
        let commands = CommandRegistry::new(bus.clone(), Address::system());

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                host,
                bus,
                datastore,
                lifecycle,
                supervisor,
                router,
                directory,
                commands,
                root: Mutex::new(None),
                event_loop: Mutex::new(None),
                started: AtomicBool::new(false),
            }),
        })
    }

    pub fn config(&self) -> &HostConfig {
        &self.inner.config
    }

    /// The system bus.
    pub fn bus(&self) -> &MessageBus {
        &self.inner.bus
    }

    pub fn host(&self) -> &Arc<dyn Host> {
        &self.inner.host
    }

    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.inner.datastore
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.inner.lifecycle
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.inner.supervisor
    }

    pub fn router(&self) -> &Router {
        &self.inner.router
    }

    /// The root (system) window, once started.
    pub fn root_window(&self) -> Option<WindowHandle> {
        *self.inner.root.lock()
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Listings
    // =========================================================================

    /// Every command announced on the bus, sorted by name.
    pub fn commands(&self) -> Vec<CommandDescriptor> {
        self.inner.directory.list()
    }

    /// Register a command handled in the system context.
    ///
    /// The announcement never comes back to the system bus, so the listing
    /// is updated here.
    pub fn register_command<F>(&self, name: &str, description: &str, handler: F) -> Result<()>
    where
        F: Fn(Value) -> peek_bus::Result<()> + Send + Sync + 'static,
    {
        self.inner.commands.register(name, description, handler)?;
        self.inner.directory.record_local(CommandDescriptor {
            name: name.to_string(),
            description: description.to_string(),
            source_address: Address::system(),
        });
        Ok(())
    }

    /// Withdraw a system command. Returns `false` if it was not registered.
    pub fn unregister_command(&self, name: &str) -> Result<bool> {
        let removed = self.inner.commands.unregister(name)?;
        if removed {
            self.inner.directory.remove_local(name);
        }
        Ok(removed)
    }

    /// Trigger a command by name from the system context.
    pub fn execute_command(&self, name: &str, args: Value) -> Result<()> {
        Ok(self.inner.commands.execute(name, args)?)
    }

    /// Extensions with status `running`.
    pub fn running_extensions(&self) -> Vec<ExtensionRecord> {
        self.inner.supervisor.running_extensions()
    }

    /// Every extension record, crashed ones included.
    pub fn extensions(&self) -> Vec<ExtensionRecord> {
        self.inner.supervisor.extensions()
    }

    /// Destroy and recreate one extension.
    pub async fn reload_extension(&self, id: &str) -> Result<WindowHandle> {
        Ok(self.inner.supervisor.reload_process(id).await?)
    }

    // =========================================================================
    // System Context Messaging
    // =========================================================================

    /// Publish from the system context.
    pub fn publish(&self, topic: &str, payload: Value, scope: Scope) {
        self.inner.bus.publish(topic, payload, scope, &Address::system());
    }

    /// Subscribe the system context.
    pub fn subscribe(&self, topic: &str, scope: Scope) -> Subscription {
        self.inner.bus.subscribe(topic, scope, &Address::system())
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Announce shutdown, destroy every extension, close every window the
    /// system owns and stop the event loop.
    pub async fn shutdown(&self) {
        if !self.inner.started.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("[orchestrator] shutting down");

        let payload = ShutdownPayload {
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        if let Err(e) =
            self.inner
                .bus
                .publish_typed(topic::APP_SHUTDOWN, &payload, Scope::Global, &Address::system())
        {
            warn!(error = %e, "[orchestrator] app:shutdown not published");
        }

        self.inner.supervisor.shutdown().await;
        let closed = self.inner.lifecycle.close_children(&Address::system());

        if let Some(event_loop) = self.inner.event_loop.lock().take() {
            event_loop.abort();
        }
        self.inner.host.detach_uplink();
        self.inner.bus.clear_uplink();
        info!(windows = closed.len(), "[orchestrator] shutdown complete");
    }
}

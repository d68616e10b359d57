//! Process-wide message router.
//!
//! Two directions cross a process boundary:
//!
//! ```text
//! content bus ──(inbound)──► system bus (SYSTEM, GLOBAL)
//!                        └─► fan-out to running extensions (GLOBAL)
//!
//! system bus ──(outbound)──► fan-out to running extensions (GLOBAL)
//! ```
//!
//! Fan-out skips extensions that are not `running` and the extension the
//! envelope originated from, compared by typed origin. Owner notifications
//! (`window:closed`) bypass scope and go straight to the owner's context.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use peek_bus::{Broadcaster, MessageBus};
use peek_desktop::{OwnerNotifier, WindowRegistry};
use peek_host::{DeliveryTarget, Host};
use peek_ipc::{Address, Envelope, Scope};
use peek_supervisor::Supervisor;

struct RouterInner {
    host: Arc<dyn Host>,
    system: MessageBus,
    supervisor: Supervisor,
    registry: Arc<Mutex<WindowRegistry>>,
}

/// Routes envelopes between the system bus and content processes.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    pub fn new(
        host: Arc<dyn Host>,
        system: MessageBus,
        supervisor: Supervisor,
        registry: Arc<Mutex<WindowRegistry>>,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                host,
                system,
                supervisor,
                registry,
            }),
        }
    }

    /// Uplink for content buses.
    pub fn inbound(&self) -> Arc<dyn Broadcaster> {
        Arc::new(Inbound(self.clone()))
    }

    /// Uplink for the system bus. Fan-out only: the system bus has already
    /// dispatched to its own subscribers.
    pub fn outbound(&self) -> Arc<dyn Broadcaster> {
        Arc::new(Outbound(self.clone()))
    }

    /// Hand a GLOBAL envelope to every running extension except its origin.
    ///
    /// Returns the number of successful deliveries.
    pub fn fan_out(&self, envelope: &Envelope) -> usize {
        let targets = self.inner.supervisor.fanout_targets(&envelope.origin);
        let mut delivered = 0;
        for target in &targets {
            match self.inner.host.deliver(target, envelope) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(topic = %envelope.topic, target = ?target, error = %e, "[router] delivery skipped"),
            }
        }
        trace!(topic = %envelope.topic, targets = targets.len(), delivered, "[router] fan-out");
        delivered
    }

    fn route_inbound(&self, envelope: Envelope) {
        match envelope.scope {
            Scope::Local => {
                debug!(topic = %envelope.topic, "[router] SELF envelope never leaves its process");
            }
            Scope::System => {
                self.inner.system.deliver(envelope);
            }
            Scope::Global => {
                self.inner.system.deliver(envelope.clone());
                self.fan_out(&envelope);
            }
        }
    }

    fn route_outbound(&self, envelope: Envelope) {
        if envelope.scope == Scope::Global {
            self.fan_out(&envelope);
        }
    }
}

impl OwnerNotifier for Router {
    fn notify(&self, owner: &Address, envelope: Envelope) {
        if owner.is_system() {
            self.inner.system.deliver_to(envelope, owner);
            return;
        }

        let target = match self.inner.supervisor.running_at(owner) {
            Some(record) => Some(record.target()),
            None => self
                .inner
                .registry
                .lock()
                .find_by_address(owner)
                .map(DeliveryTarget::Window),
        };
        match target {
            Some(target) => {
                if let Err(e) = self.inner.host.deliver(&target, &envelope) {
                    debug!(owner = %owner, topic = %envelope.topic, error = %e, "[router] owner unreachable");
                }
            }
            None => debug!(owner = %owner, topic = %envelope.topic, "[router] owner gone, notification dropped"),
        }
    }
}

struct Inbound(Router);

impl Broadcaster for Inbound {
    fn forward(&self, envelope: Envelope) {
        self.0.route_inbound(envelope);
    }
}

struct Outbound(Router);

impl Broadcaster for Outbound {
    fn forward(&self, envelope: Envelope) {
        self.0.route_outbound(envelope);
    }
}

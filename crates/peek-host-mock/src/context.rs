//! Simulated content contexts.

use serde_json::Value;

use peek_bus::{CommandRegistry, MessageBus, Subscription};
use peek_host::DeliveryTarget;
use peek_ipc::{Address, Envelope, Origin, Scope};

/// One simulated content process: a window or a consolidated sub-frame.
///
/// Each context owns its own [`MessageBus`], uplinked to whatever the
/// orchestrator attached to the host.
#[derive(Clone)]
pub struct ContentContext {
    bus: MessageBus,
    address: Address,
    origin: Origin,
    target: DeliveryTarget,
}

impl ContentContext {
    pub(crate) fn new(address: Address, origin: Origin, target: DeliveryTarget) -> Self {
        Self {
            bus: MessageBus::content(),
            address,
            origin,
            target,
        }
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn target(&self) -> &DeliveryTarget {
        &self.target
    }

    /// Extension id of the content, if it is an extension.
    pub fn extension_id(&self) -> Option<&str> {
        self.origin.extension_id()
    }

    /// Publish under this context's typed origin.
    pub fn publish(&self, topic: &str, payload: Value, scope: Scope) {
        let envelope =
            Envelope::new(topic, payload, scope, self.address.clone()).with_origin(self.origin.clone());
        self.bus.publish_envelope(envelope);
    }

    pub fn subscribe(&self, topic: &str, scope: Scope) -> Subscription {
        self.bus.subscribe(topic, scope, &self.address)
    }

    /// A command registry bound to this context.
    pub fn commands(&self) -> CommandRegistry {
        CommandRegistry::new(self.bus.clone(), self.address.clone())
    }

    pub(crate) fn release(&self) {
        self.bus.release_context(&self.address);
        self.bus.clear_uplink();
    }
}

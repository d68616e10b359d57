//! Per-process scoped publish/subscribe.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use peek_ipc::{Address, Envelope, Origin, Scope};

use crate::subscription::{Listener, Subscription};
use crate::{Broadcaster, Result};

/// Which kind of process a bus lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusRole {
    /// The orchestrator process; hosts the singleton system context.
    System,
    /// A content process (extension window, sub-frame, app window).
    Content,
}

pub(crate) struct SubscriberEntry {
    id: u64,
    context: Address,
    origin: Origin,
    scope: Scope,
    sender: mpsc::UnboundedSender<Envelope>,
}

impl SubscriberEntry {
    fn is_system(&self) -> bool {
        self.scope == Scope::System && self.context.is_system()
    }

    fn wants_global_from(&self, origin: &Origin) -> bool {
        self.scope == Scope::Global && !self.origin.same_context(origin)
    }
}

pub(crate) struct BusInner {
    role: BusRole,
    /// topic → subscribers, in subscription order
    topics: Mutex<HashMap<String, Vec<SubscriberEntry>>>,
    uplink: RwLock<Option<Arc<dyn Broadcaster>>>,
    next_id: AtomicU64,
}

impl BusInner {
    pub(crate) fn unsubscribe(&self, topic: &str, id: u64) {
        let mut topics = self.topics.lock();
        if let Some(entries) = topics.get_mut(topic) {
            entries.retain(|entry| entry.id != id);
            if entries.is_empty() {
                topics.remove(topic);
            }
        }
    }
}

/// Scoped message bus of one process.
///
/// Cloning is cheap; clones share the same subscriber table.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    pub fn new(role: BusRole) -> Self {
        Self {
            inner: Arc::new(BusInner {
                role,
                topics: Mutex::new(HashMap::new()),
                uplink: RwLock::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Bus of the orchestrator process.
    pub fn system() -> Self {
        Self::new(BusRole::System)
    }

    /// Bus of a content process.
    pub fn content() -> Self {
        Self::new(BusRole::Content)
    }

    pub fn role(&self) -> BusRole {
        self.inner.role
    }

    /// Install the cross-process uplink.
    pub fn set_uplink(&self, uplink: Arc<dyn Broadcaster>) {
        *self.inner.uplink.write() = Some(uplink);
    }

    /// Detach the uplink; cross-process publishes are dropped afterwards.
    pub fn clear_uplink(&self) {
        *self.inner.uplink.write() = None;
    }

    // =========================================================================
    // Publishing
    // =========================================================================

    /// Fire-and-forget publish from the context at `source`.
    pub fn publish(&self, topic: &str, payload: Value, scope: Scope, source: &Address) {
        self.publish_envelope(Envelope::new(topic, payload, scope, source.clone()));
    }

    /// Publish a typed payload.
    pub fn publish_typed<T: Serialize>(
        &self,
        topic: &str,
        payload: &T,
        scope: Scope,
        source: &Address,
    ) -> Result<()> {
        let envelope = Envelope::typed(topic, payload, scope, source.clone())?;
        self.publish_envelope(envelope);
        Ok(())
    }

    /// Publish a fully built envelope (used when the origin is a sub-frame).
    pub fn publish_envelope(&self, envelope: Envelope) {
        trace!(
            topic = %envelope.topic,
            scope = %envelope.scope,
            source = %envelope.source,
            "[bus] publish"
        );

        match envelope.scope {
            Scope::Local => {
                let source = envelope.source.clone();
                self.dispatch(&envelope, |entry| {
                    entry.scope == Scope::Local && entry.context == source
                });
            }
            Scope::System => {
                if self.inner.role == BusRole::System {
                    self.dispatch(&envelope, SubscriberEntry::is_system);
                } else {
                    self.forward(envelope);
                }
            }
            Scope::Global => {
                let origin = envelope.origin.clone();
                self.dispatch(&envelope, |entry| entry.wants_global_from(&origin));
                self.forward(envelope);
            }
        }
    }

    fn forward(&self, envelope: Envelope) {
        let uplink = self.inner.uplink.read().clone();
        match uplink {
            Some(uplink) => uplink.forward(envelope),
            None => debug!(topic = %envelope.topic, "[bus] no uplink, cross-process delivery dropped"),
        }
    }

    // =========================================================================
    // Inbound delivery
    // =========================================================================

    /// Deliver an envelope that arrived from another process.
    ///
    /// Returns the number of subscribers that received it.
    pub fn deliver(&self, envelope: Envelope) -> usize {
        match envelope.scope {
            Scope::Local => {
                debug!(topic = %envelope.topic, "[bus] SELF envelope crossed a process boundary, ignored");
                0
            }
            Scope::System if self.inner.role == BusRole::System => {
                self.dispatch(&envelope, SubscriberEntry::is_system)
            }
            Scope::System => 0,
            Scope::Global => {
                let origin = envelope.origin.clone();
                self.dispatch(&envelope, |entry| entry.wants_global_from(&origin))
            }
        }
    }

    /// Deliver an envelope to every subscriber of one context, whatever scope
    /// they subscribed with. Used for messages addressed to a specific owner.
    pub fn deliver_to(&self, envelope: Envelope, context: &Address) -> usize {
        self.dispatch(&envelope, |entry| entry.context == *context)
    }

    fn dispatch(&self, envelope: &Envelope, wants: impl Fn(&SubscriberEntry) -> bool) -> usize {
        let mut topics = self.inner.topics.lock();
        let Some(entries) = topics.get_mut(&envelope.topic) else {
            return 0;
        };

        let mut delivered = 0;
        entries.retain(|entry| {
            if !wants(entry) {
                return true;
            }
            match entry.sender.send(envelope.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    debug!(topic = %envelope.topic, context = %entry.context, "[bus] subscriber gone, pruned");
                    false
                }
            }
        });
        if entries.is_empty() {
            topics.remove(&envelope.topic);
        }
        delivered
    }

    // =========================================================================
    // Subscribing
    // =========================================================================

    /// Subscribe the context at `context` to `topic` at `scope`.
    ///
    /// The returned stream is unbounded and lazy; dropping it unsubscribes.
    pub fn subscribe(&self, topic: &str, scope: Scope, context: &Address) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        self.inner
            .topics
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(SubscriberEntry {
                id,
                context: context.clone(),
                origin: context.origin(),
                scope,
                sender,
            });

        Subscription::new(id, topic, context.clone(), receiver, Arc::downgrade(&self.inner))
    }

    /// Subscribe with a callback run on a spawned task.
    ///
    /// Callback errors and panics are caught and logged per message; they
    /// never reach the publisher or other subscribers. Must be called from
    /// within a Tokio runtime.
    pub fn listen<F>(&self, topic: &str, scope: Scope, context: &Address, handler: F) -> Listener
    where
        F: FnMut(Envelope) -> Result<()> + Send + 'static,
    {
        Listener::spawn(self.subscribe(topic, scope, context), handler)
    }

    /// Drop every subscription of a context (context teardown).
    ///
    /// Streams of the released context end. Returns how many were removed.
    pub fn release_context(&self, context: &Address) -> usize {
        let mut topics = self.inner.topics.lock();
        let mut removed = 0;
        topics.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|entry| entry.context != *context);
            removed += before - entries.len();
            !entries.is_empty()
        });
        if removed > 0 {
            debug!(context = %context, removed, "[bus] context released");
        }
        removed
    }

    /// Number of live subscriptions on a topic.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.topics.lock().get(topic).map_or(0, Vec::len)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::content()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Capture(Mutex<Vec<Envelope>>);

    impl Broadcaster for Capture {
        fn forward(&self, envelope: Envelope) {
            self.0.lock().push(envelope);
        }
    }

    fn ext(id: &str) -> Address {
        Address::extension(id, "background.html")
    }

    #[tokio::test]
    async fn test_self_scope_stays_in_context() {
        let bus = MessageBus::content();
        let uplink = Arc::new(Capture(Mutex::new(Vec::new())));
        bus.set_uplink(uplink.clone());

        let a = ext("a");
        let mut mine = bus.subscribe("t", Scope::Local, &a);
        let mut other = bus.subscribe("t", Scope::Local, &Address::new("peek://app/other.html"));

        bus.publish("t", json!(1), Scope::Local, &a);

        assert_eq!(mine.try_recv().unwrap().payload, json!(1));
        assert!(other.try_recv().is_none());
        assert!(uplink.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_global_skips_own_context_and_forwards() {
        let bus = MessageBus::content();
        let uplink = Arc::new(Capture(Mutex::new(Vec::new())));
        bus.set_uplink(uplink.clone());

        let a = ext("a");
        let mut own = bus.subscribe("t", Scope::Global, &a);
        let mut popup = bus.subscribe("t", Scope::Global, &Address::extension("a", "popup.html"));
        let mut b = bus.subscribe("t", Scope::Global, &ext("b"));

        bus.publish("t", json!("x"), Scope::Global, &a);

        assert!(own.try_recv().is_none());
        assert!(popup.try_recv().is_none());
        assert_eq!(b.try_recv().unwrap().payload, json!("x"));
        assert_eq!(uplink.0.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_system_scope_routing() {
        let content = MessageBus::content();
        let uplink = Arc::new(Capture(Mutex::new(Vec::new())));
        content.set_uplink(uplink.clone());
        content.publish("s", json!({}), Scope::System, &ext("a"));
        assert_eq!(uplink.0.lock().len(), 1);

        let system = MessageBus::system();
        let mut sys = system.subscribe("s", Scope::System, &Address::system());
        let mut not_sys = system.subscribe("s", Scope::System, &Address::new("peek://app/x.html"));
        let envelope = uplink.0.lock().remove(0);
        assert_eq!(system.deliver(envelope), 1);
        assert!(sys.try_recv().is_some());
        assert!(not_sys.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_inbound_self_is_ignored() {
        let bus = MessageBus::content();
        let _sub = bus.subscribe("t", Scope::Local, &ext("a"));
        let envelope = Envelope::new("t", json!(null), Scope::Local, ext("a"));
        assert_eq!(bus.deliver(envelope), 0);
    }

    #[tokio::test]
    async fn test_per_publisher_order_is_preserved() {
        let bus = MessageBus::content();
        let mut sub = bus.subscribe("t", Scope::Global, &ext("b"));
        for i in 0..50 {
            bus.publish("t", json!(i), Scope::Global, &ext("a"));
        }
        for i in 0..50 {
            assert_eq!(sub.recv().await.unwrap().payload, json!(i));
        }
    }

    #[tokio::test]
    async fn test_drop_and_release_unsubscribe() {
        let bus = MessageBus::content();
        let a = ext("a");
        let sub = bus.subscribe("t", Scope::Global, &a);
        assert_eq!(bus.subscriber_count("t"), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count("t"), 0);

        let mut s1 = bus.subscribe("t", Scope::Global, &a);
        let _s2 = bus.subscribe("u", Scope::Local, &a);
        let _s3 = bus.subscribe("t", Scope::Global, &ext("b"));
        assert_eq!(bus.release_context(&a), 2);
        assert_eq!(bus.subscriber_count("t"), 1);
        assert!(s1.recv().await.is_none());
    }
}

//! Subscription streams and callback listeners.

use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use peek_ipc::{Address, Envelope};

use crate::bus::BusInner;
use crate::Result;

/// A lazy, unbounded stream of envelopes for one (topic, context) pair.
///
/// Dropping the subscription unsubscribes. The stream ends when the owning
/// context is released from the bus.
pub struct Subscription {
    id: u64,
    topic: String,
    context: Address,
    receiver: mpsc::UnboundedReceiver<Envelope>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub(crate) fn new(
        id: u64,
        topic: &str,
        context: Address,
        receiver: mpsc::UnboundedReceiver<Envelope>,
        bus: Weak<BusInner>,
    ) -> Self {
        Self {
            id,
            topic: topic.to_string(),
            context,
            receiver,
            bus,
        }
    }

    /// Wait for the next envelope.
    pub async fn recv(&mut self) -> Option<Envelope> {
        self.receiver.recv().await
    }

    /// Take an already-delivered envelope, if any.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.receiver.try_recv().ok()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn context(&self) -> &Address {
        &self.context
    }

    fn detach(&self) -> Detach {
        Detach {
            id: self.id,
            topic: self.topic.clone(),
            bus: self.bus.clone(),
        }
    }
}

impl Stream for Subscription {
    type Item = Envelope;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Envelope>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach().run();
    }
}

/// Removes one subscriber entry from its bus, if the bus is still alive.
struct Detach {
    id: u64,
    topic: String,
    bus: Weak<BusInner>,
}

impl Detach {
    fn run(&self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(&self.topic, self.id);
        }
    }
}

/// A subscription driven by a callback on its own task.
///
/// [`Listener::stop`] removes the subscription immediately; dropping the
/// listener does the same.
pub struct Listener {
    task: JoinHandle<()>,
    detach: Detach,
}

impl Listener {
    pub(crate) fn spawn<F>(mut subscription: Subscription, mut handler: F) -> Self
    where
        F: FnMut(Envelope) -> Result<()> + Send + 'static,
    {
        let detach = subscription.detach();
        let task = tokio::spawn(async move {
            while let Some(envelope) = subscription.recv().await {
                let topic = envelope.topic.clone();
                let source = envelope.source.clone();
                match std::panic::catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(
                        topic = %topic,
                        source = %source,
                        context = %subscription.context(),
                        error = %e,
                        "[bus] subscriber callback failed"
                    ),
                    Err(_) => warn!(
                        topic = %topic,
                        source = %source,
                        context = %subscription.context(),
                        "[bus] subscriber callback panicked"
                    ),
                }
            }
        });
        Self { task, detach }
    }

    pub fn topic(&self) -> &str {
        &self.detach.topic
    }

    /// Unsubscribe and stop the callback task.
    pub fn stop(&self) {
        self.detach.run();
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures::StreamExt;
    use parking_lot::Mutex;
    use serde_json::json;

    use peek_ipc::Scope;

    use crate::{BusError, MessageBus};

    use super::*;

    fn ext(id: &str) -> Address {
        Address::extension(id, "background.html")
    }

    #[tokio::test]
    async fn test_subscription_is_a_stream() {
        let bus = MessageBus::content();
        let sub = bus.subscribe("t", Scope::Global, &ext("b"));
        bus.publish("t", json!(1), Scope::Global, &ext("a"));
        bus.publish("t", json!(2), Scope::Global, &ext("a"));
        bus.release_context(&ext("b"));

        let payloads: Vec<_> = sub.map(|e| e.payload).collect().await;
        assert_eq!(payloads, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn test_listener_isolates_failing_callbacks() {
        let bus = MessageBus::content();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let _bad = bus.listen("t", Scope::Global, &ext("b"), |_| Err(BusError::handler("boom")));
        let _panics = bus.listen("t", Scope::Global, &ext("c"), |_| panic!("callback panic"));
        let sink = seen.clone();
        let _good = bus.listen("t", Scope::Global, &ext("d"), move |env| {
            sink.lock().push(env.payload);
            Ok(())
        });

        bus.publish("t", json!("first"), Scope::Global, &ext("a"));
        bus.publish("t", json!("second"), Scope::Global, &ext("a"));

        for _ in 0..20 {
            if seen.lock().len() == 2 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(*seen.lock(), vec![json!("first"), json!("second")]);
    }

    #[tokio::test]
    async fn test_listener_stop_unsubscribes_immediately() {
        let bus = MessageBus::content();
        let listener = bus.listen("t", Scope::Global, &ext("b"), |_| Ok(()));
        assert_eq!(bus.subscriber_count("t"), 1);
        listener.stop();
        assert_eq!(bus.subscriber_count("t"), 0);
        drop(listener);
        assert_eq!(bus.subscriber_count("t"), 0);
    }
}

//! Registering side of the command registry protocol.
//!
//! Handlers never leave the process that registered them. The only things
//! that travel over the bus are the `cmd:register`/`cmd:unregister`
//! descriptors and the `cmd:execute:<name>` trigger.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, info};

use peek_ipc::{topic, Address, CommandDescriptor, CommandUnregister, Scope};

use crate::{BusError, Listener, MessageBus, Result};

/// A locally stored command handler. Receives the execute payload.
pub type CommandHandler = Arc<dyn Fn(Value) -> Result<()> + Send + Sync>;

struct Registered {
    handler: CommandHandler,
    listener: Listener,
}

/// Per-context command table.
pub struct CommandRegistry {
    bus: MessageBus,
    context: Address,
    commands: Mutex<HashMap<String, Registered>>,
}

impl CommandRegistry {
    pub fn new(bus: MessageBus, context: Address) -> Self {
        Self {
            bus,
            context,
            commands: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &Address {
        &self.context
    }

    /// Register a command: store the handler, listen on its execute topic,
    /// announce it to the command directory.
    pub fn register<F>(&self, name: &str, description: &str, handler: F) -> Result<()>
    where
        F: Fn(Value) -> Result<()> + Send + Sync + 'static,
    {
        let handler: CommandHandler = Arc::new(handler);
        {
            let mut commands = self.commands.lock();
            if commands.contains_key(name) {
                return Err(BusError::CommandAlreadyRegistered(name.to_string()));
            }

            let invoke = handler.clone();
            let listener = self.bus.listen(
                &topic::command_execute(name),
                Scope::Global,
                &self.context,
                move |envelope| invoke(envelope.payload),
            );
            commands.insert(name.to_string(), Registered { handler, listener });
        }

        let descriptor = CommandDescriptor {
            name: name.to_string(),
            description: description.to_string(),
            source_address: self.context.clone(),
        };
        self.bus
            .publish_typed(topic::CMD_REGISTER, &descriptor, Scope::Global, &self.context)?;

        info!(command = name, context = %self.context, "[command] registered");
        Ok(())
    }

    /// Unregister a command. Returns `false` if it was not registered here.
    pub fn unregister(&self, name: &str) -> Result<bool> {
        let Some(registered) = self.commands.lock().remove(name) else {
            debug!(command = name, "[command] unregister of unknown command ignored");
            return Ok(false);
        };
        registered.listener.stop();

        let payload = CommandUnregister { name: name.to_string() };
        self.bus
            .publish_typed(topic::CMD_UNREGISTER, &payload, Scope::Global, &self.context)?;

        info!(command = name, context = %self.context, "[command] unregistered");
        Ok(true)
    }

    /// Run a handler registered in this context.
    pub fn invoke(&self, name: &str, args: Value) -> Result<()> {
        let handler = self
            .commands
            .lock()
            .get(name)
            .map(|registered| registered.handler.clone())
            .ok_or_else(|| BusError::CommandNotRegistered(name.to_string()))?;
        handler(args)
    }

    /// Trigger a command by name.
    ///
    /// A command registered in this context runs in place (GLOBAL delivery
    /// never returns to the publisher). Anything else is published on the
    /// execute topic for the owning context to pick up.
    pub fn execute(&self, name: &str, args: Value) -> Result<()> {
        if self.is_registered(name) {
            return self.invoke(name, args);
        }
        self.bus
            .publish(&topic::command_execute(name), args, Scope::Global, &self.context);
        Ok(())
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.commands.lock().contains_key(name)
    }

    /// Names registered in this context, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.commands.lock().keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    fn ext(id: &str) -> Address {
        Address::extension(id, "background.html")
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_register_announces_descriptor() {
        let bus = MessageBus::content();
        let mut announcements = bus.subscribe(topic::CMD_REGISTER, Scope::Global, &ext("cmd"));
        let registry = CommandRegistry::new(bus.clone(), ext("a"));

        registry.register("hello", "Say hello", |_| Ok(())).unwrap();

        let descriptor: CommandDescriptor =
            announcements.recv().await.unwrap().payload_as().unwrap();
        assert_eq!(descriptor.name, "hello");
        assert_eq!(descriptor.description, "Say hello");
        assert_eq!(descriptor.source_address, ext("a"));
    }

    #[tokio::test]
    async fn test_duplicate_register_rejected() {
        let registry = CommandRegistry::new(MessageBus::content(), ext("a"));
        registry.register("hello", "", |_| Ok(())).unwrap();
        assert!(matches!(
            registry.register("hello", "", |_| Ok(())),
            Err(BusError::CommandAlreadyRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_from_other_context_runs_handler_once() {
        let bus = MessageBus::content();
        let calls = Arc::new(AtomicUsize::new(0));
        let a = CommandRegistry::new(bus.clone(), ext("a"));
        let counter = calls.clone();
        a.register("hello", "", move |args| {
            assert_eq!(args, json!({"who": "b"}));
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();

        let b = CommandRegistry::new(bus.clone(), ext("b"));
        b.execute("hello", json!({"who": "b"})).unwrap();
        settle().await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregister_leaves_no_handler() {
        let bus = MessageBus::content();
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = CommandRegistry::new(bus.clone(), ext("a"));
        let counter = calls.clone();
        registry
            .register("hello", "", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        assert!(registry.unregister("hello").unwrap());
        assert_eq!(bus.subscriber_count(&topic::command_execute("hello")), 0);

        bus.publish(&topic::command_execute("hello"), Value::Null, Scope::Global, &ext("b"));
        settle().await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert!(!registry.unregister("hello").unwrap());
        assert!(matches!(
            registry.invoke("hello", Value::Null),
            Err(BusError::CommandNotRegistered(_))
        ));
    }

    #[tokio::test]
    async fn test_own_command_runs_in_place() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = CommandRegistry::new(MessageBus::content(), ext("cmd"));
        let counter = calls.clone();
        registry
            .register("open", "", move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        registry.execute("open", Value::Null).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.names(), vec!["open".to_string()]);
    }
}

//! Listing side of the command registry protocol.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use peek_ipc::{topic, Address, CommandDescriptor, CommandUnregister, Envelope, Scope};

use crate::{Listener, MessageBus, Result};

/// Directory of every command announced on the bus, keyed by name.
///
/// A directory is a listing, not a dispatcher: it never holds handlers.
#[derive(Default)]
pub struct CommandDirectory {
    entries: Arc<Mutex<BTreeMap<String, CommandDescriptor>>>,
    listeners: Vec<Listener>,
}

impl CommandDirectory {
    /// A detached directory, fed through [`CommandDirectory::apply`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A directory kept current by listening on `cmd:register` and
    /// `cmd:unregister` from the context at `context`.
    ///
    /// GLOBAL delivery never returns to the publisher, so commands the
    /// listening context registers itself go through
    /// [`CommandDirectory::record_local`].
    pub fn attach(bus: &MessageBus, context: &Address) -> Self {
        let mut directory = Self::new();
        for name in [topic::CMD_REGISTER, topic::CMD_UNREGISTER] {
            let entries = directory.entries.clone();
            let listener = bus.listen(name, Scope::Global, context, move |envelope| {
                apply_to(&entries, &envelope)
            });
            directory.listeners.push(listener);
        }
        directory
    }

    /// Apply one `cmd:register`/`cmd:unregister` envelope.
    pub fn apply(&self, envelope: &Envelope) -> Result<()> {
        apply_to(&self.entries, envelope)
    }

    /// Record a command registered by the listening context itself.
    pub fn record_local(&self, descriptor: CommandDescriptor) {
        self.entries.lock().insert(descriptor.name.clone(), descriptor);
    }

    /// Forget a command the listening context withdrew itself.
    pub fn remove_local(&self, name: &str) -> bool {
        self.entries.lock().remove(name).is_some()
    }

    /// Every known command, sorted by name.
    pub fn list(&self) -> Vec<CommandDescriptor> {
        self.entries.lock().values().cloned().collect()
    }

    pub fn get(&self, name: &str) -> Option<CommandDescriptor> {
        self.entries.lock().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn apply_to(entries: &Mutex<BTreeMap<String, CommandDescriptor>>, envelope: &Envelope) -> Result<()> {
    match envelope.topic.as_str() {
        topic::CMD_REGISTER => {
            let descriptor: CommandDescriptor = envelope.payload_as()?;
            debug!(command = %descriptor.name, source = %descriptor.source_address, "[directory] command added");
            entries.lock().insert(descriptor.name.clone(), descriptor);
        }
        topic::CMD_UNREGISTER => {
            let CommandUnregister { name } = envelope.payload_as()?;
            if entries.lock().remove(&name).is_some() {
                debug!(command = %name, "[directory] command removed");
            }
        }
        other => debug!(topic = other, "[directory] ignoring unrelated topic"),
    }
    Ok(())
}

//! Integration tests for cross-process routing
//!
//! These tests verify:
//! - GLOBAL fan-out never echoes to the publishing context
//! - SELF never crosses a process boundary
//! - SYSTEM from content reaches the system context only
//! - The command registry protocol end to end, system commands included
//! - Startup phase ordering as seen from inside an extension

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc;

use peek_bus::{CommandRegistry, Subscription};
use peek_host::DeliveryTarget;
use peek_host_mock::{ContentContext, HostCall, MockHost};
use peek_ipc::{topic, Address, AllLoadedPayload, PhasePayload, Scope, StartupPhase, WindowHandle};
use peek_orchestrator::{HostConfig, MemoryDatastore, Orchestrator};

fn install(root: &Path, id: &str) -> PathBuf {
    let dir = root.join(id);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("manifest.json"), json!({ "id": id }).to_string()).unwrap();
    dir
}

/// `cmd` and `groups` consolidated, `x` dedicated.
fn setup() -> (TempDir, Arc<MockHost>, Orchestrator) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = HostConfig {
        extensions_dir: dir.path().join("extensions"),
        data_dir: dir.path().join("data"),
        ..HostConfig::default()
    };
    install(&config.extensions_dir, "cmd");
    install(&config.extensions_dir, "groups");
    config.load_extension(install(&dir.path().join("external"), "x"));

    let host = Arc::new(MockHost::new());
    let store = Arc::new(MemoryDatastore::new());
    let orchestrator = Orchestrator::new(config, host.clone(), store).unwrap();
    (dir, host, orchestrator)
}

async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

fn extension_host(orchestrator: &Orchestrator) -> WindowHandle {
    orchestrator.supervisor().extension_host_window().unwrap()
}

fn frame(orchestrator: &Orchestrator, id: &str) -> DeliveryTarget {
    DeliveryTarget::Frame {
        host: extension_host(orchestrator),
        id: id.to_string(),
    }
}

fn x_window(orchestrator: &Orchestrator) -> DeliveryTarget {
    DeliveryTarget::Window(orchestrator.supervisor().record("x").unwrap().window)
}

fn deliveries_of(host: &MockHost, name: &str) -> usize {
    host.count_calls(|call| matches!(call, HostCall::Deliver { topic, .. } if topic == name))
}

// =============================================================================
// Scopes
// =============================================================================

#[tokio::test]
async fn test_global_from_frame_skips_publisher() {
    let (_dir, host, orchestrator) = setup();
    orchestrator.start().await.unwrap();
    let mut at_system = orchestrator.subscribe("demo:ping", Scope::Global);

    let cmd = host.frame_context(extension_host(&orchestrator), "cmd").unwrap();
    cmd.publish("demo:ping", json!({ "n": 1 }), Scope::Global);

    assert!(host.delivered_topics(&frame(&orchestrator, "groups")).contains(&"demo:ping".to_string()));
    assert!(host.delivered_topics(&x_window(&orchestrator)).contains(&"demo:ping".to_string()));
    assert!(!host.delivered_topics(&frame(&orchestrator, "cmd")).contains(&"demo:ping".to_string()));
    assert_eq!(deliveries_of(&host, "demo:ping"), 2);

    let envelope = at_system.recv().await.unwrap();
    assert_eq!(envelope.payload, json!({ "n": 1 }));
    assert_eq!(envelope.origin.extension_id(), Some("cmd"));
}

#[tokio::test]
async fn test_global_from_system_reaches_every_extension() {
    let (_dir, host, orchestrator) = setup();
    orchestrator.start().await.unwrap();
    let x = host.context(orchestrator.supervisor().record("x").unwrap().window).unwrap();
    let mut at_x = x.subscribe("demo:tick", Scope::Global);
    let mut at_system = orchestrator.subscribe("demo:tick", Scope::Global);

    orchestrator.publish("demo:tick", json!(1), Scope::Global);

    assert_eq!(at_x.recv().await.unwrap().payload, json!(1));
    assert_eq!(deliveries_of(&host, "demo:tick"), 3);
    settle().await;
    assert!(at_system.try_recv().is_none());
}

#[tokio::test]
async fn test_self_scope_stays_in_context() {
    let (_dir, host, orchestrator) = setup();
    orchestrator.start().await.unwrap();
    let x = host.context(orchestrator.supervisor().record("x").unwrap().window).unwrap();
    let mut own = x.subscribe("demo:local", Scope::Local);
    let mut at_system = orchestrator.subscribe("demo:local", Scope::Global);

    x.publish("demo:local", json!("mine"), Scope::Local);

    assert_eq!(own.recv().await.unwrap().payload, json!("mine"));
    settle().await;
    assert!(at_system.try_recv().is_none());
    assert_eq!(deliveries_of(&host, "demo:local"), 0);
}

#[tokio::test]
async fn test_system_scope_reaches_system_only() {
    let (_dir, host, orchestrator) = setup();
    orchestrator.start().await.unwrap();
    let x = host.context(orchestrator.supervisor().record("x").unwrap().window).unwrap();
    let mut at_system = orchestrator.subscribe("demo:report", Scope::System);

    x.publish("demo:report", json!({ "ok": true }), Scope::System);

    let envelope = at_system.recv().await.unwrap();
    assert_eq!(envelope.payload, json!({ "ok": true }));
    assert_eq!(deliveries_of(&host, "demo:report"), 0);
}

// =============================================================================
// Command Registry
// =============================================================================

/// Registers `hello` from inside `x` while it loads. Handler calls are sent
/// on the returned channel.
fn register_hello(
    host: &MockHost,
) -> (Arc<Mutex<Option<CommandRegistry>>>, mpsc::UnboundedReceiver<Value>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let slot = Arc::new(Mutex::new(None));
    let registry_slot = slot.clone();
    host.on_load("x", move |context: &ContentContext| {
        let commands = context.commands();
        let tx = tx.clone();
        commands
            .register("hello", "Say hello", move |args| {
                let _ = tx.send(args);
                Ok(())
            })
            .unwrap();
        *registry_slot.lock() = Some(commands);
    });
    (slot, rx)
}

#[tokio::test]
async fn test_command_runs_in_registering_context() {
    let (_dir, host, orchestrator) = setup();
    let (_registry, mut calls) = register_hello(&host);
    orchestrator.start().await.unwrap();
    settle().await;

    let listed = orchestrator.commands();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "hello");
    assert_eq!(listed[0].source_address.as_str(), "peek://ext/x/background.html");

    let groups = host.frame_context(extension_host(&orchestrator), "groups").unwrap();
    groups.commands().execute("hello", json!({ "who": "groups" })).unwrap();

    let args = tokio::time::timeout(Duration::from_secs(1), calls.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(args, json!({ "who": "groups" }));
    settle().await;
    assert!(calls.try_recv().is_err());
    assert!(!host
        .delivered_topics(&frame(&orchestrator, "groups"))
        .contains(&topic::command_execute("hello")));
}

#[tokio::test]
async fn test_unregistered_command_is_gone() {
    let (_dir, host, orchestrator) = setup();
    let (registry, mut calls) = register_hello(&host);
    orchestrator.start().await.unwrap();
    settle().await;

    let removed = registry.lock().as_ref().unwrap().unregister("hello").unwrap();
    assert!(removed);
    settle().await;
    assert!(orchestrator.commands().is_empty());

    let groups = host.frame_context(extension_host(&orchestrator), "groups").unwrap();
    groups.commands().execute("hello", Value::Null).unwrap();
    settle().await;
    assert!(calls.try_recv().is_err());
}

#[tokio::test]
async fn test_system_command_is_listed_and_runs_from_extension() {
    let (_dir, host, orchestrator) = setup();
    orchestrator.start().await.unwrap();
    let (tx, mut calls) = mpsc::unbounded_channel();
    orchestrator
        .register_command("quit", "Quit the app", move |args| {
            let _ = tx.send(args);
            Ok(())
        })
        .unwrap();

    let listed = orchestrator.commands();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "quit");
    assert_eq!(listed[0].source_address, Address::system());

    let groups = host.frame_context(extension_host(&orchestrator), "groups").unwrap();
    groups.commands().execute("quit", json!({ "force": true })).unwrap();
    let args = tokio::time::timeout(Duration::from_secs(1), calls.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(args, json!({ "force": true }));
    orchestrator.execute_command("quit", json!(2)).unwrap();
    assert_eq!(calls.try_recv().unwrap(), json!(2));

    assert!(orchestrator.unregister_command("quit").unwrap());
    assert!(orchestrator.commands().is_empty());
    assert!(!orchestrator.unregister_command("quit").unwrap());
}

// =============================================================================
// Startup Ordering
// =============================================================================

#[tokio::test]
async fn test_registry_sees_phases_after_it_runs() {
    let (_dir, host, orchestrator) = setup();
    let slot: Arc<Mutex<Option<(Subscription, Subscription)>>> = Arc::new(Mutex::new(None));
    let hook_slot = slot.clone();
    host.on_load("cmd", move |context: &ContentContext| {
        let phases = context.subscribe(topic::STARTUP_PHASE, Scope::Global);
        let loaded = context.subscribe(topic::ALL_LOADED, Scope::Global);
        *hook_slot.lock() = Some((phases, loaded));
    });

    orchestrator.start().await.unwrap();

    let (mut phases, mut loaded) = slot.lock().take().unwrap();
    let mut seen = Vec::new();
    while let Some(envelope) = phases.try_recv() {
        let payload: PhasePayload = envelope.payload_as().unwrap();
        seen.push(payload.phase);
    }
    // `early` goes out before the registry is running.
    assert_eq!(
        seen,
        vec![StartupPhase::Commands, StartupPhase::Ui, StartupPhase::Complete]
    );
    let count: AllLoadedPayload = loaded.try_recv().unwrap().payload_as().unwrap();
    assert_eq!(count.count, 3);
}

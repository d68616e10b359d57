//! Integration tests for the window lifecycle
//!
//! These tests verify:
//! - Depth-first close cascade and owner notification
//! - The root window surviving every close path
//! - Escape `navigate` timing out into exactly one close

use std::sync::Arc;

use parking_lot::Mutex;

use peek_desktop::{
    CloseOutcome, EscapeMode, EscapeOutcome, LifecycleConfig, LifecycleController, OwnerNotifier,
    WindowParams, WindowRegistry,
};
use peek_host::{Host, HostEvent, OpenOptions};
use peek_host_mock::{EscapeBehavior, HostCall, MockHost};
use peek_ipc::{Address, Envelope, WindowClosedPayload, WindowHandle};

#[derive(Default)]
struct Recorder(Mutex<Vec<(Address, WindowClosedPayload)>>);

impl OwnerNotifier for Recorder {
    fn notify(&self, owner: &Address, envelope: Envelope) {
        let payload = envelope.payload_as().unwrap();
        self.0.lock().push((owner.clone(), payload));
    }
}

struct Desk {
    host: Arc<MockHost>,
    notices: Arc<Recorder>,
    lifecycle: LifecycleController,
    root: WindowHandle,
}

fn desk() -> Desk {
    let host = Arc::new(MockHost::new());
    let notices = Arc::new(Recorder::default());
    let registry = Arc::new(Mutex::new(WindowRegistry::new()));
    let root = host.create_window(&Address::system(), &OpenOptions::hidden()).unwrap();
    registry.lock().register_root(root, Address::system());
    let lifecycle = LifecycleController::new(
        host.clone(),
        registry,
        notices.clone(),
        LifecycleConfig::default(),
    );
    Desk {
        host,
        notices,
        lifecycle,
        root,
    }
}

impl Desk {
    fn open(&self, page: &str, owner: &Address) -> WindowHandle {
        self.open_with(page, owner, WindowParams::new(Address::resolve(page)))
    }

    fn open_with(&self, page: &str, owner: &Address, params: WindowParams) -> WindowHandle {
        let handle = self
            .host
            .create_window(&Address::resolve(page), &OpenOptions::default())
            .unwrap();
        self.lifecycle.register(handle, owner.clone(), params);
        handle
    }

    fn closes(&self) -> Vec<WindowHandle> {
        self.host
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                HostCall::Close(handle) => Some(handle),
                _ => None,
            })
            .collect()
    }
}

// =============================================================================
// Close Cascade
// =============================================================================

#[tokio::test]
async fn test_w1_cascade_closes_children_first() {
    let d = desk();
    let w1 = d.open("w1.html", &Address::system());
    let w1_address = Address::resolve("w1.html");
    let w2 = d.open("w2.html", &w1_address);
    let w3 = d.open("w3.html", &w1_address);

    assert_eq!(d.lifecycle.close_window(w1).unwrap(), CloseOutcome::Closed);

    let closes = d.closes();
    assert_eq!(closes.len(), 3);
    assert_eq!(closes[2], w1);
    assert!(closes[..2].contains(&w2));
    assert!(closes[..2].contains(&w3));

    let registry = d.lifecycle.registry().lock();
    for handle in [w1, w2, w3] {
        assert!(!registry.contains(handle));
    }
    assert!(registry.is_root(d.root));
}

#[tokio::test]
async fn test_close_children_is_transitive_and_spares_root() {
    let d = desk();
    let a = d.open("a.html", &Address::system());
    let b = d.open("b.html", &Address::resolve("a.html"));
    let c = d.open("c.html", &Address::resolve("b.html"));
    let unrelated = d.open("z.html", &Address::resolve("elsewhere.html"));

    let closed = d.lifecycle.close_children(&Address::system());
    assert_eq!(closed, vec![c, b, a]);
    assert!(d.host.exists(d.root));
    assert!(d.host.exists(unrelated));
}

#[tokio::test]
async fn test_owner_cycle_terminates() {
    let d = desk();
    let a = d.open("a.html", &Address::resolve("b.html"));
    let b = d.open("b.html", &Address::resolve("a.html"));

    let closed = d.lifecycle.close_children(&Address::resolve("a.html"));
    assert_eq!(closed.len(), 2);
    assert!(closed.contains(&a) && closed.contains(&b));
}

#[tokio::test]
async fn test_owners_are_notified() {
    let d = desk();
    let w1 = d.open("w1.html", &Address::system());
    let w2 = d.open("w2.html", &Address::resolve("w1.html"));

    d.lifecycle.close_window(w1).unwrap();

    let notices = d.notices.0.lock();
    assert_eq!(notices.len(), 2);
    assert_eq!(notices[0].0, Address::resolve("w1.html"));
    assert_eq!(notices[0].1.id, w2);
    assert_eq!(notices[1].0, Address::system());
    assert_eq!(notices[1].1.id, w1);
}

#[tokio::test]
async fn test_user_close_event_cascades_once() {
    let d = desk();
    let mut events = d.host.take_events().unwrap();
    let w1 = d.open("w1.html", &Address::system());
    let w2 = d.open("w2.html", &Address::resolve("w1.html"));

    d.host.simulate_close(w1);
    assert_eq!(events.recv().await, Some(HostEvent::Closed { handle: w1 }));
    assert!(d.lifecycle.on_window_closed(w1));
    assert!(!d.host.exists(w2));

    // The cascade's own close of w2 comes back as an event too.
    assert_eq!(events.recv().await, Some(HostEvent::Closed { handle: w2 }));
    assert!(!d.lifecycle.on_window_closed(w2));
    assert_eq!(d.notices.0.lock().len(), 2);
}

#[tokio::test]
async fn test_unknown_handle_is_already_closed() {
    let d = desk();
    let ghost = WindowHandle(999);
    assert_eq!(d.lifecycle.close_window(ghost).unwrap(), CloseOutcome::AlreadyClosed);
    assert_eq!(d.lifecycle.hide_window(ghost).unwrap(), CloseOutcome::AlreadyClosed);
    assert!(!d.lifecycle.show_window(ghost).unwrap());
}

// =============================================================================
// Escape
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_navigate_timeout_closes_exactly_once() {
    let d = desk();
    let mut params = WindowParams::new(Address::resolve("nav.html"));
    params.escape_mode = EscapeMode::Navigate;
    let w = d.open_with("nav.html", &Address::system(), params);
    d.host.set_escape_behavior(w, EscapeBehavior::NoReply);

    let outcome = d.lifecycle.handle_escape(w).await.unwrap();

    assert_eq!(outcome, EscapeOutcome::Closed);
    assert_eq!(d.host.close_count(w), 1);
    assert!(!d.lifecycle.on_window_closed(w));
    assert_eq!(d.notices.0.lock().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_navigate_not_handled_hides_modal() {
    let d = desk();
    let mut params = WindowParams::new(Address::resolve("modal.html"));
    params.escape_mode = EscapeMode::Navigate;
    params.modal = true;
    let w = d.open_with("modal.html", &Address::system(), params);
    d.host.set_escape_behavior(w, EscapeBehavior::NotHandled);

    assert_eq!(d.lifecycle.handle_escape(w).await.unwrap(), EscapeOutcome::Hidden);
    assert_eq!(d.host.close_count(w), 0);
    assert!(!d.host.is_visible(w));
}

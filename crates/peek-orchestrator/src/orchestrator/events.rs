//! Host event loop
//!
//! | Event | Handled by |
//! |-------|------------|
//! | `Closed` | lifecycle (cascade + owner notice), supervisor (records) |
//! | `Crashed` | supervisor (status) |
//! | `FocusLost` | lifecycle (modal dismiss) |
//! | `EscapePressed` | lifecycle (escape policy), off the loop |

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use peek_desktop::LifecycleController;
use peek_host::HostEvent;
use peek_supervisor::Supervisor;

use super::Orchestrator;

struct EventLoop {
    lifecycle: LifecycleController,
    supervisor: Supervisor,
}

impl EventLoop {
    fn handle(&self, event: HostEvent) {
        match event {
            HostEvent::Closed { handle } => {
                let was_registered = self.lifecycle.on_window_closed(handle);
                let extensions = self.supervisor.on_window_closed(handle);
                debug!(handle = %handle, was_registered, extensions = extensions.len(), "[orchestrator] window closed");
            }
            HostEvent::Crashed { handle, frame } => {
                let crashed = self.supervisor.on_crashed(handle, frame.as_deref());
                if crashed.is_empty() {
                    debug!(handle = %handle, frame = ?frame, "[orchestrator] crash outside any extension");
                }
            }
            HostEvent::FocusLost { handle } => {
                self.lifecycle.on_focus_lost(handle);
            }
            HostEvent::Focused { handle } => {
                trace!(handle = %handle, "[orchestrator] focused");
            }
            HostEvent::EscapePressed { handle } => {
                // The escape round trip may take up to its timeout.
                let lifecycle = self.lifecycle.clone();
                tokio::spawn(async move {
                    if let Err(e) = lifecycle.handle_escape(handle).await {
                        warn!(handle = %handle, error = %e, "[orchestrator] escape handling failed");
                    }
                });
            }
        }
    }
}

impl Orchestrator {
    pub(super) fn spawn_event_loop(&self, mut events: UnboundedReceiver<HostEvent>) -> JoinHandle<()> {
        let event_loop = EventLoop {
            lifecycle: self.inner.lifecycle.clone(),
            supervisor: self.inner.supervisor.clone(),
        };
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                event_loop.handle(event);
            }
            info!("[orchestrator] host event stream ended");
        })
    }
}

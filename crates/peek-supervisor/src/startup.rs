//! Phased startup of a batch of extensions.
//!
//! ```text
//! early     → command registry extension, alone, awaited
//! commands  → built-in and external extensions, two parallel batches
//! ui        → extensions may build visual state
//! complete  → batch done, then ext:all-loaded {count}
//! ```
//!
//! Phase messages are a convention extensions may follow; nothing here
//! gates an extension that ignores them.

use futures::future::join_all;
use tracing::{info, warn};

use peek_ipc::{topic, Address, AllLoadedPayload, PhasePayload, Scope, StartupPhase, WindowHandle};

use crate::{Result, Supervisor};

/// Outcome of a startup batch.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StartupReport {
    /// Ids that reached `running`, in completion order per batch.
    pub loaded: Vec<String>,
    /// Ids that failed, with the reason.
    pub failed: Vec<(String, String)>,
}

impl StartupReport {
    /// Successfully loaded extensions.
    pub fn count(&self) -> usize {
        self.loaded.len()
    }

    fn record<T>(&mut self, id: &str, outcome: Result<T>) {
        match outcome {
            Ok(_) => self.loaded.push(id.to_string()),
            Err(e) => self.failed.push((id.to_string(), e.to_string())),
        }
    }
}

impl Supervisor {
    /// Start a batch of enabled extensions in phases.
    ///
    /// Failures of individual extensions are recorded and never abort the
    /// batch.
    pub async fn run_startup(&self, ids: &[String]) -> StartupReport {
        let mut report = StartupReport::default();
        let registry_id = self.config().command_registry_id.clone();

        let mut batch: Vec<&String> = Vec::new();
        for id in ids {
            if *id != registry_id && !batch.contains(&id) {
                batch.push(id);
            }
        }

        self.publish_phase(StartupPhase::Early);
        if ids.contains(&registry_id) {
            let outcome = self.create_process(&registry_id).await;
            report.record(&registry_id, outcome);
        } else {
            warn!(ext_id = %registry_id, "[supervisor] command registry extension not in the batch");
        }

        self.publish_phase(StartupPhase::Commands);
        let (builtin, external): (Vec<&String>, Vec<&String>) =
            batch.into_iter().partition(|id| self.is_builtin(id));
        let (builtin, external) = tokio::join!(self.load_batch(builtin), self.load_batch(external));
        for (id, outcome) in builtin.into_iter().chain(external) {
            report.record(&id, outcome);
        }

        self.publish_phase(StartupPhase::Ui);
        self.publish_phase(StartupPhase::Complete);

        let loaded = AllLoadedPayload { count: report.count() };
        if let Err(e) = self
            .bus()
            .publish_typed(topic::ALL_LOADED, &loaded, Scope::Global, &Address::system())
        {
            warn!(error = %e, "[supervisor] all-loaded not published");
        }

        info!(
            loaded = report.count(),
            failed = report.failed.len(),
            "[supervisor] startup complete"
        );
        report
    }

    /// Create every process of a batch concurrently.
    async fn load_batch(&self, ids: Vec<&String>) -> Vec<(String, Result<WindowHandle>)> {
        join_all(ids.into_iter().map(|id| async move {
            let outcome = self.create_process(id).await;
            (id.clone(), outcome)
        }))
        .await
    }

    fn publish_phase(&self, phase: StartupPhase) {
        info!(phase = phase.name(), "[supervisor] startup phase");
        let payload = PhasePayload { phase };
        if let Err(e) = self
            .bus()
            .publish_typed(topic::STARTUP_PHASE, &payload, Scope::Global, &Address::system())
        {
            warn!(phase = phase.name(), error = %e, "[supervisor] phase not published");
        }
    }
}

//! Orchestrator start
//!
//! ```text
//! start()
//!   1. root window for peek://system/ (hidden, never closed by cascade)
//!   2. host event loop
//!   3. discover built-ins + --load-extension directories
//!   4. keep the enabled ones
//!   5. phased startup (early → commands → ui → complete)
//! ```
//!
//! Only steps 1 to 3 can fail the start. Extensions that fail to load are
//! reported, never fatal.

use std::sync::atomic::Ordering;

use tracing::{debug, info, warn};

use peek_host::OpenOptions;
use peek_ipc::Address;
use peek_supervisor::{discover_extensions, is_enabled, ExtensionSource, StartupReport};

use super::Orchestrator;
use crate::{OrchestratorError, Result};

/// Setting consulted before starting an extension.
pub const ENABLED_SETTING: &str = "enabled";

impl Orchestrator {
    /// Start the application: root window, event loop, extensions.
    pub async fn start(&self) -> Result<StartupReport> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(OrchestratorError::AlreadyStarted);
        }
        info!(profile = %self.inner.config.profile, headless = self.inner.config.headless, "[orchestrator] starting");

        match self.bootstrap().await {
            Ok(ids) => {
                let report = self.inner.supervisor.run_startup(&ids).await;
                info!(
                    loaded = report.count(),
                    failed = report.failed.len(),
                    "[orchestrator] extensions started"
                );
                Ok(report)
            }
            Err(e) => {
                self.inner.started.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    /// Everything before the extension batch. Returns the ids to start.
    async fn bootstrap(&self) -> Result<Vec<String>> {
        let events = self
            .inner
            .host
            .take_events()
            .ok_or_else(|| OrchestratorError::Bootstrap("host event stream already taken".into()))?;

        let system = Address::system();
        let root = self.inner.host.create_window(&system, &OpenOptions::hidden())?;
        self.inner.host.load_content(root).await?;
        self.inner.lifecycle.registry().lock().register_root(root, system);
        *self.inner.root.lock() = Some(root);
        debug!(handle = %root, "[orchestrator] root window ready");

        *self.inner.event_loop.lock() = Some(self.spawn_event_loop(events));

        let sources = self.collect_sources();
        let registry_id = &self.inner.config.command_registry_id;
        if !sources.iter().any(|source| source.id == *registry_id) {
            return Err(OrchestratorError::Bootstrap(format!(
                "command registry extension '{}' is not installed",
                registry_id
            )));
        }

        let ids = sources
            .iter()
            .filter(|source| self.should_start(source))
            .map(|source| source.id.clone())
            .collect();
        self.inner.supervisor.register_sources(sources);
        Ok(ids)
    }

    /// Built-ins first, then `--load-extension` directories. A later source
    /// with the same id replaces an earlier one.
    fn collect_sources(&self) -> Vec<ExtensionSource> {
        let config = &self.inner.config;
        let mut sources = discover_extensions(&config.extensions_dir, true);
        info!(count = sources.len(), dir = %config.extensions_dir.display(), "[orchestrator] built-in extensions found");

        for path in &config.extra_extensions {
            match ExtensionSource::from_dir(path, false) {
                Ok(source) => {
                    info!(ext_id = %source.id, path = %path.display(), "[orchestrator] extension loaded for this run");
                    sources.retain(|existing| existing.id != source.id);
                    sources.push(source);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "[orchestrator] --load-extension skipped"),
            }
        }
        sources
    }

    /// Stored `enabled` setting, defaulted per origin. Extensions passed on
    /// the command line always start.
    fn should_start(&self, source: &ExtensionSource) -> bool {
        if self.inner.config.extra_extensions.contains(&source.path) {
            return true;
        }
        let enabled = match self.inner.datastore.get_setting(&source.id, ENABLED_SETTING) {
            Ok(setting) => is_enabled(setting.as_ref(), source.builtin),
            Err(e) => {
                debug!(ext_id = %source.id, error = %e, "[orchestrator] datastore degraded, using default");
                is_enabled(None, source.builtin)
            }
        };
        if !enabled {
            info!(ext_id = %source.id, "[orchestrator] extension disabled");
        }
        enabled
    }
}

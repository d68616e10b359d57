//! Host configuration.
//!
//! Read from an optional camelCase JSON file, then overridden by the
//! environment:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `PROFILE` | profile name (storage under `<dataDir>/<profile>`) |
//! | `DEBUG` | verbose logging |
//! | `HEADLESS` | every window is created hidden |
//!
//! A non-empty value turns `DEBUG` and `HEADLESS` on, except `0` and `false`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use peek_desktop::LifecycleConfig;
use peek_supervisor::{SupervisorConfig, DEFAULT_CONSOLIDATED_IDS};

use crate::{OrchestratorError, Result};

/// Configuration of one application run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HostConfig {
    pub profile: String,
    pub data_dir: PathBuf,
    /// Built-in extension discovery root.
    pub extensions_dir: PathBuf,
    /// Extension loaded alone in the `early` phase.
    pub command_registry_id: String,
    /// Built-ins hosted as sub-frames of the shared host window.
    pub consolidated_ids: Vec<String>,
    /// Key of the window that always fully closes.
    pub settings_key: String,
    pub escape_timeout_ms: u64,
    pub destroy_grace_ms: u64,
    pub ready_timeout_ms: u64,
    pub modal_blur_delay_ms: u64,
    pub headless: bool,
    pub debug: bool,
    /// `--load-extension` paths. Current run only, never persisted.
    #[serde(skip)]
    pub extra_extensions: Vec<PathBuf>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            profile: default_profile().to_string(),
            data_dir: PathBuf::from("./data"),
            extensions_dir: PathBuf::from("./extensions"),
            command_registry_id: "cmd".to_string(),
            consolidated_ids: DEFAULT_CONSOLIDATED_IDS.iter().map(|id| id.to_string()).collect(),
            settings_key: "settings".to_string(),
            escape_timeout_ms: 100,
            destroy_grace_ms: 100,
            ready_timeout_ms: 5000,
            modal_blur_delay_ms: 100,
            headless: false,
            debug: false,
            extra_extensions: Vec::new(),
        }
    }
}

fn default_profile() -> &'static str {
    if cfg!(debug_assertions) {
        "dev"
    } else {
        "default"
    }
}

impl HostConfig {
    /// Read a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "[orchestrator] no config file, using defaults");
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| OrchestratorError::ConfigIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| OrchestratorError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `PROFILE`, `DEBUG` and `HEADLESS` from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(profile) = lookup("PROFILE").filter(|p| !p.trim().is_empty()) {
            self.profile = profile.trim().to_string();
        }
        if let Some(debug) = lookup("DEBUG") {
            self.debug = is_truthy(&debug);
        }
        if let Some(headless) = lookup("HEADLESS") {
            self.headless = is_truthy(&headless);
        }
    }

    /// Register an extra extension directory for this run.
    pub fn load_extension(&mut self, path: impl Into<PathBuf>) {
        self.extra_extensions.push(path.into());
    }

    /// Reject configurations the orchestrator cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.command_registry_id.trim().is_empty() {
            return Err(OrchestratorError::Config("commandRegistryId is empty".into()));
        }
        if self.profile.trim().is_empty() {
            return Err(OrchestratorError::Config("profile is empty".into()));
        }
        if self.ready_timeout_ms == 0 {
            return Err(OrchestratorError::Config("readyTimeoutMs must be positive".into()));
        }
        Ok(())
    }

    /// Storage directory of the selected profile.
    pub fn profile_dir(&self) -> PathBuf {
        self.data_dir.join(&self.profile)
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            escape_timeout: Duration::from_millis(self.escape_timeout_ms),
            modal_blur_delay: Duration::from_millis(self.modal_blur_delay_ms),
            settings_key: self.settings_key.clone(),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            command_registry_id: self.command_registry_id.clone(),
            consolidated_ids: self.consolidated_ids.iter().cloned().collect(),
            ready_timeout: Duration::from_millis(self.ready_timeout_ms),
            destroy_grace: Duration::from_millis(self.destroy_grace_ms),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    !(value.is_empty() || value == "0" || value.eq_ignore_ascii_case("false"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = HostConfig::default();
        assert_eq!(config.command_registry_id, "cmd");
        assert_eq!(config.consolidated_ids.len(), 5);
        assert_eq!(config.escape_timeout_ms, 100);
        assert_eq!(config.ready_timeout_ms, 5000);
        assert!(!config.headless);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("peek.json");
        fs::write(&path, r#"{"profile": "work", "readyTimeoutMs": 250, "headless": true}"#).unwrap();

        let config = HostConfig::load(&path).unwrap();
        assert_eq!(config.profile, "work");
        assert_eq!(config.ready_timeout_ms, 250);
        assert!(config.headless);
        assert_eq!(config.destroy_grace_ms, 100);
        assert_eq!(config.profile_dir(), PathBuf::from("./data/work"));
    }

    #[test]
    fn test_missing_file_is_default_and_bad_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            HostConfig::load(&dir.path().join("absent.json")).unwrap(),
            HostConfig::default()
        );

        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            HostConfig::load(&path),
            Err(OrchestratorError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [("PROFILE", "alt"), ("DEBUG", "1"), ("HEADLESS", "false")].into();
        let mut config = HostConfig {
            headless: true,
            ..HostConfig::default()
        };
        config.apply_env_from(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.profile, "alt");
        assert!(config.debug);
        assert!(!config.headless);
    }

    #[test]
    fn test_validation() {
        let config = HostConfig {
            command_registry_id: " ".into(),
            ..HostConfig::default()
        };
        assert!(matches!(config.validate(), Err(OrchestratorError::Config(_))));
    }

    #[test]
    fn test_extra_extensions_are_not_persisted() {
        let mut config = HostConfig::default();
        config.load_extension("/tmp/my-ext");
        let json = serde_json::to_value(&config).unwrap();
        assert!(json.get("extraExtensions").is_none());
        assert_eq!(config.supervisor_config().consolidated_ids.len(), 5);
    }
}

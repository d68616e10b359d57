//! Extension manifests and discovery.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use peek_ipc::{Address, DEFAULT_BACKGROUND};

use crate::{Result, SupervisorError};

pub const MANIFEST_FILE: &str = "manifest.json";

/// `manifest.json` of an extension
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionManifest {
    pub id: Option<String>,
    pub shortname: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    /// Content resource, relative to the extension directory.
    pub background: Option<String>,
    /// Path of a settings schema file, relative to the extension directory.
    pub settings_schema: Option<String>,
    #[serde(default)]
    pub builtin: bool,
    /// `prefs`/`item` folded in from the settings schema.
    #[serde(default)]
    pub schemas: Option<Value>,
    #[serde(default)]
    pub storage_keys: Option<Value>,
    #[serde(default)]
    pub defaults: Option<Value>,
}

impl ExtensionManifest {
    /// Read a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| SupervisorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| SupervisorError::Manifest {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Fold a settings schema into the manifest.
    pub fn apply_settings_schema(&mut self, schema: &Value) {
        self.schemas = schema.get("prefs").cloned().map(|prefs| {
            let mut schemas = Map::new();
            schemas.insert("prefs".to_string(), prefs);
            if let Some(item) = schema.get("item") {
                schemas.insert("item".to_string(), item.clone());
            }
            Value::Object(schemas)
        });
        self.storage_keys = schema.get("storageKeys").cloned();
        self.defaults = schema.get("defaults").cloned();
    }
}

/// An installed extension the supervisor knows how to start.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtensionSource {
    pub id: String,
    /// Installation directory.
    pub path: PathBuf,
    pub manifest: ExtensionManifest,
    /// Shipped with the application (as opposed to installed by the user).
    pub builtin: bool,
}

impl ExtensionSource {
    /// Content address: `peek://ext/<id>/<background>`.
    pub fn address(&self) -> Address {
        let background = self.manifest.background.as_deref().unwrap_or(DEFAULT_BACKGROUND);
        Address::extension(&self.id, background)
    }

    /// Read one extension directory.
    ///
    /// The id is the manifest `id`, else its `shortname`, else the
    /// directory name.
    pub fn from_dir(path: &Path, builtin: bool) -> Result<Self> {
        let mut manifest = ExtensionManifest::load(&path.join(MANIFEST_FILE))?;

        let id = manifest
            .id
            .clone()
            .or_else(|| manifest.shortname.clone())
            .unwrap_or_else(|| {
                path.file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .unwrap_or_default()
            });

        if let Some(schema_path) = manifest.settings_schema.clone() {
            let schema_file = path.join(schema_path.trim_start_matches("./"));
            match read_json(&schema_file) {
                Ok(schema) => manifest.apply_settings_schema(&schema),
                Err(e) => warn!(ext_id = %id, error = %e, "[supervisor] settings schema unreadable"),
            }
        }

        Ok(Self {
            id,
            path: path.to_path_buf(),
            builtin: builtin || manifest.builtin,
            manifest,
        })
    }
}

fn read_json(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path).map_err(|source| SupervisorError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| SupervisorError::Manifest {
        path: path.to_path_buf(),
        source,
    })
}

/// Scan `dir` for subdirectories containing a manifest.
///
/// Malformed manifests are logged and skipped. A missing directory yields
/// nothing. Results are sorted by id.
pub fn discover_extensions(dir: &Path, builtin: bool) -> Vec<ExtensionSource> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "[supervisor] no extensions directory");
            return Vec::new();
        }
    };

    let mut found: Vec<_> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_dir() && path.join(MANIFEST_FILE).is_file())
        .filter_map(|path| match ExtensionSource::from_dir(&path, builtin) {
            Ok(source) => Some(source),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "[supervisor] skipping extension");
                None
            }
        })
        .collect();
    found.sort_by(|a, b| a.id.cmp(&b.id));
    found
}

/// Whether an extension should start.
///
/// `setting` is the stored `enabled` value, if any could be read. Without
/// one, built-ins are enabled and everything else is disabled.
pub fn is_enabled(setting: Option<&Value>, builtin: bool) -> bool {
    match setting {
        Some(Value::Bool(enabled)) => *enabled,
        Some(Value::String(raw)) => raw.trim() != "false",
        Some(Value::Null) | None => builtin,
        Some(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::create_dir_all(dir).unwrap();
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_discover_id_fallbacks() {
        let root = tempfile::tempdir().unwrap();
        write(&root.path().join("one"), MANIFEST_FILE, r#"{"id": "first"}"#);
        write(&root.path().join("two"), MANIFEST_FILE, r#"{"shortname": "second"}"#);
        write(&root.path().join("third"), MANIFEST_FILE, r#"{"name": "Third"}"#);
        write(&root.path().join("broken"), MANIFEST_FILE, "{not json");
        fs::create_dir_all(root.path().join("empty")).unwrap();

        let ids: Vec<_> = discover_extensions(root.path(), true)
            .into_iter()
            .map(|source| source.id)
            .collect();
        assert_eq!(ids, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let root = tempfile::tempdir().unwrap();
        assert!(discover_extensions(&root.path().join("nope"), false).is_empty());
    }

    #[test]
    fn test_settings_schema_folded_in() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("groups");
        write(
            &dir,
            MANIFEST_FILE,
            r#"{"id": "groups", "background": "./bg.html", "settingsSchema": "./settings-schema.json"}"#,
        );
        write(
            &dir,
            "settings-schema.json",
            r#"{"prefs": {"a": 1}, "item": {"b": 2}, "storageKeys": ["k"], "defaults": {"a": 0}}"#,
        );

        let source = ExtensionSource::from_dir(&dir, false).unwrap();
        assert_eq!(source.manifest.schemas, Some(json!({"prefs": {"a": 1}, "item": {"b": 2}})));
        assert_eq!(source.manifest.storage_keys, Some(json!(["k"])));
        assert_eq!(source.address().as_str(), "peek://ext/groups/bg.html");
        assert!(!source.builtin);
    }

    #[test]
    fn test_enabled_defaults() {
        assert!(is_enabled(None, true));
        assert!(!is_enabled(None, false));
        assert!(!is_enabled(Some(&json!(false)), true));
        assert!(is_enabled(Some(&json!(true)), false));
        assert!(!is_enabled(Some(&json!("false")), true));
        assert!(is_enabled(Some(&json!("true")), false));
    }
}

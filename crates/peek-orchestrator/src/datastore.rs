//! Datastore collaborator.
//!
//! Storage lives outside the core. The orchestrator only needs a handful of
//! request/response calls, and treats every failure as degraded mode: the
//! caller falls back to a default instead of aborting.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DatastoreError {
    #[error("datastore unavailable: {0}")]
    Unavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type DatastoreResult<T> = std::result::Result<T, DatastoreError>;

/// A stored item (note, url, text, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    pub item_type: String,
    pub content: Value,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: String,
    pub name: String,
    pub frequency: i64,
    pub last_used_at: i64,
}

/// Item query. Empty filter matches everything.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ItemFilter {
    pub item_type: Option<String>,
    pub tag_id: Option<String>,
    pub limit: Option<usize>,
}

/// Calls the core makes into storage.
pub trait Datastore: Send + Sync {
    /// Per-extension setting (`extension_settings`).
    fn get_setting(&self, ext_id: &str, key: &str) -> DatastoreResult<Option<Value>>;
    fn set_setting(&self, ext_id: &str, key: &str, value: Value) -> DatastoreResult<()>;

    /// Every row of a generic table, by row id.
    fn get_table(&self, table: &str) -> DatastoreResult<BTreeMap<String, Value>>;
    fn set_row(&self, table: &str, id: &str, row: Value) -> DatastoreResult<()>;

    /// Store an item, returning its id.
    fn add_item(&self, item_type: &str, content: Value) -> DatastoreResult<String>;
    fn get_item(&self, id: &str) -> DatastoreResult<Option<Item>>;
    fn query_items(&self, filter: &ItemFilter) -> DatastoreResult<Vec<Item>>;

    /// Tag by name, created on first use. The flag is `true` if created.
    fn get_or_create_tag(&self, name: &str) -> DatastoreResult<(Tag, bool)>;
    /// Returns `false` if the item already had the tag.
    fn tag_item(&self, item_id: &str, tag_id: &str) -> DatastoreResult<bool>;
    fn untag_item(&self, item_id: &str, tag_id: &str) -> DatastoreResult<bool>;
    fn item_tags(&self, item_id: &str) -> DatastoreResult<Vec<Tag>>;
}

/// Prefixed unique id, e.g. `item_3f2a...`.
pub fn generate_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

fn now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// =============================================================================
// In-memory implementation
// =============================================================================

#[derive(Default)]
struct Tables {
    settings: HashMap<(String, String), Value>,
    tables: HashMap<String, BTreeMap<String, Value>>,
    /// Insertion order is query order.
    items: Vec<Item>,
    tags: BTreeMap<String, Tag>,
    item_tags: Vec<(String, String)>,
}

/// Datastore kept in memory. Used by headless runs and tests.
pub struct MemoryDatastore {
    tables: Mutex<Tables>,
    available: AtomicBool,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the storage process going away (or coming back).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn tables(&self) -> DatastoreResult<parking_lot::MutexGuard<'_, Tables>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(DatastoreError::Unavailable("memory datastore offline".into()));
        }
        Ok(self.tables.lock())
    }
}

impl Default for MemoryDatastore {
    fn default() -> Self {
        Self::new()
    }
}

impl Datastore for MemoryDatastore {
    fn get_setting(&self, ext_id: &str, key: &str) -> DatastoreResult<Option<Value>> {
        let tables = self.tables()?;
        Ok(tables.settings.get(&(ext_id.to_string(), key.to_string())).cloned())
    }

    fn set_setting(&self, ext_id: &str, key: &str, value: Value) -> DatastoreResult<()> {
        self.tables()?
            .settings
            .insert((ext_id.to_string(), key.to_string()), value);
        Ok(())
    }

    fn get_table(&self, table: &str) -> DatastoreResult<BTreeMap<String, Value>> {
        Ok(self.tables()?.tables.get(table).cloned().unwrap_or_default())
    }

    fn set_row(&self, table: &str, id: &str, row: Value) -> DatastoreResult<()> {
        self.tables()?
            .tables
            .entry(table.to_string())
            .or_default()
            .insert(id.to_string(), row);
        Ok(())
    }

    fn add_item(&self, item_type: &str, content: Value) -> DatastoreResult<String> {
        let mut tables = self.tables()?;
        let timestamp = now();
        let id = generate_id("item");
        tables.items.push(Item {
            id: id.clone(),
            item_type: item_type.to_string(),
            content,
            created_at: timestamp,
            updated_at: timestamp,
        });
        Ok(id)
    }

    fn get_item(&self, id: &str) -> DatastoreResult<Option<Item>> {
        Ok(self.tables()?.items.iter().find(|item| item.id == id).cloned())
    }

    fn query_items(&self, filter: &ItemFilter) -> DatastoreResult<Vec<Item>> {
        let tables = self.tables()?;
        let matches = tables
            .items
            .iter()
            .filter(|item| filter.item_type.as_ref().map_or(true, |t| item.item_type == *t))
            .filter(|item| {
                filter.tag_id.as_ref().map_or(true, |tag| {
                    tables.item_tags.iter().any(|(i, t)| *i == item.id && t == tag)
                })
            })
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(matches)
    }

    fn get_or_create_tag(&self, name: &str) -> DatastoreResult<(Tag, bool)> {
        let mut tables = self.tables()?;
        let normalized = name.trim().to_lowercase();
        if let Some(tag) = tables.tags.values().find(|tag| tag.name == normalized) {
            return Ok((tag.clone(), false));
        }
        let tag = Tag {
            id: generate_id("tag"),
            name: normalized,
            frequency: 0,
            last_used_at: now(),
        };
        tables.tags.insert(tag.id.clone(), tag.clone());
        Ok((tag, true))
    }

    fn tag_item(&self, item_id: &str, tag_id: &str) -> DatastoreResult<bool> {
        let mut tables = self.tables()?;
        if !tables.items.iter().any(|item| item.id == item_id) {
            return Err(DatastoreError::NotFound(item_id.to_string()));
        }
        let link = (item_id.to_string(), tag_id.to_string());
        if tables.item_tags.contains(&link) {
            return Ok(false);
        }
        let tag = tables
            .tags
            .get_mut(tag_id)
            .ok_or_else(|| DatastoreError::NotFound(tag_id.to_string()))?;
        tag.frequency += 1;
        tag.last_used_at = now();
        tables.item_tags.push(link);
        Ok(true)
    }

    fn untag_item(&self, item_id: &str, tag_id: &str) -> DatastoreResult<bool> {
        let mut tables = self.tables()?;
        let before = tables.item_tags.len();
        tables.item_tags.retain(|(i, t)| !(i == item_id && t == tag_id));
        Ok(tables.item_tags.len() != before)
    }

    fn item_tags(&self, item_id: &str) -> DatastoreResult<Vec<Tag>> {
        let tables = self.tables()?;
        Ok(tables
            .item_tags
            .iter()
            .filter(|(i, _)| i == item_id)
            .filter_map(|(_, t)| tables.tags.get(t).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_settings_and_tables() {
        let store = MemoryDatastore::new();
        assert_eq!(store.get_setting("a", "enabled").unwrap(), None);

        store.set_setting("a", "enabled", json!(false)).unwrap();
        assert_eq!(store.get_setting("a", "enabled").unwrap(), Some(json!(false)));

        store.set_row("feeds", "f1", json!({"url": "https://example.com"})).unwrap();
        let table = store.get_table("feeds").unwrap();
        assert_eq!(table.len(), 1);
        assert!(store.get_table("nothing").unwrap().is_empty());
    }

    #[test]
    fn test_items_and_tags() {
        let store = MemoryDatastore::new();
        let note = store.add_item("note", json!("hello")).unwrap();
        let url = store.add_item("url", json!("https://example.com")).unwrap();
        assert!(note.starts_with("item_"));

        let (tag, created) = store.get_or_create_tag(" Work ").unwrap();
        assert!(created);
        assert_eq!(tag.name, "work");
        assert!(!store.get_or_create_tag("work").unwrap().1);

        assert!(store.tag_item(&url, &tag.id).unwrap());
        assert!(!store.tag_item(&url, &tag.id).unwrap());

        let tagged = store
            .query_items(&ItemFilter {
                tag_id: Some(tag.id.clone()),
                ..ItemFilter::default()
            })
            .unwrap();
        assert_eq!(tagged.len(), 1);
        assert_eq!(tagged[0].id, url);
        assert_eq!(store.item_tags(&url).unwrap()[0].frequency, 1);

        let notes = store
            .query_items(&ItemFilter {
                item_type: Some("note".into()),
                ..ItemFilter::default()
            })
            .unwrap();
        assert_eq!(notes[0].id, note);

        assert!(store.untag_item(&url, &tag.id).unwrap());
        assert!(store.item_tags(&url).unwrap().is_empty());
        assert!(matches!(
            store.tag_item("item_missing", &tag.id),
            Err(DatastoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_unavailable_store_errors() {
        let store = MemoryDatastore::new();
        store.set_available(false);
        assert!(matches!(
            store.get_setting("a", "enabled"),
            Err(DatastoreError::Unavailable(_))
        ));
        store.set_available(true);
        assert!(store.get_setting("a", "enabled").is_ok());
    }
}

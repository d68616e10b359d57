//! Extension records and the record table.

use std::collections::{BTreeMap, BTreeSet};

use peek_host::DeliveryTarget;
use peek_ipc::{Address, WindowHandle};

/// Status of an extension process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExtensionStatus {
    /// Window/frame created, content not settled yet.
    Loading,
    /// Content loaded; receives GLOBAL fan-out.
    Running,
    /// Faulted after loading. Kept for diagnostics, excluded from fan-out.
    Crashed,
}

impl ExtensionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            ExtensionStatus::Loading => "loading",
            ExtensionStatus::Running => "running",
            ExtensionStatus::Crashed => "crashed",
        }
    }
}

/// How an extension is hosted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Placement {
    /// Isolated sub-frame of the shared extension host window.
    Consolidated,
    /// Its own window.
    Dedicated,
}

/// A supervised extension process.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionRecord {
    pub id: String,
    /// Dedicated window, or the shared host window for consolidated ones.
    pub window: WindowHandle,
    pub placement: Placement,
    pub address: Address,
    pub status: ExtensionStatus,
    pub builtin: bool,
}

impl ExtensionRecord {
    /// Where envelopes for this extension are delivered.
    pub fn target(&self) -> DeliveryTarget {
        match self.placement {
            Placement::Consolidated => DeliveryTarget::Frame {
                host: self.window,
                id: self.id.clone(),
            },
            Placement::Dedicated => DeliveryTarget::Window(self.window),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ExtensionStatus::Running
    }
}

/// Record table with disjoint consolidated and dedicated id sets.
#[derive(Debug, Default)]
pub struct ExtensionTable {
    records: BTreeMap<String, ExtensionRecord>,
    consolidated: BTreeSet<String>,
    dedicated: BTreeSet<String>,
}

impl ExtensionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record, moving its id into the right set.
    pub fn insert(&mut self, record: ExtensionRecord) {
        let id = record.id.clone();
        match record.placement {
            Placement::Consolidated => {
                self.dedicated.remove(&id);
                self.consolidated.insert(id.clone());
            }
            Placement::Dedicated => {
                self.consolidated.remove(&id);
                self.dedicated.insert(id.clone());
            }
        }
        self.records.insert(id, record);
    }

    pub fn remove(&mut self, id: &str) -> Option<ExtensionRecord> {
        self.consolidated.remove(id);
        self.dedicated.remove(id);
        self.records.remove(id)
    }

    pub fn get(&self, id: &str) -> Option<&ExtensionRecord> {
        self.records.get(id)
    }

    /// Update a record's status only if it is currently `from`.
    pub fn transition(&mut self, id: &str, from: ExtensionStatus, to: ExtensionStatus) -> bool {
        match self.records.get_mut(id) {
            Some(record) if record.status == from => {
                record.status = to;
                true
            }
            _ => false,
        }
    }

    pub fn set_status(&mut self, id: &str, status: ExtensionStatus) -> Option<ExtensionStatus> {
        self.records.get_mut(id).map(|record| std::mem::replace(&mut record.status, status))
    }

    /// Dedicated extension shown in a window.
    pub fn dedicated_in(&self, window: WindowHandle) -> Option<&ExtensionRecord> {
        self.dedicated
            .iter()
            .filter_map(|id| self.records.get(id))
            .find(|record| record.window == window)
    }

    /// Consolidated extensions living in a host window.
    pub fn consolidated_in(&self, window: WindowHandle) -> Vec<String> {
        self.consolidated
            .iter()
            .filter(|id| self.records.get(*id).is_some_and(|r| r.window == window))
            .cloned()
            .collect()
    }

    pub fn consolidated_ids(&self) -> &BTreeSet<String> {
        &self.consolidated
    }

    pub fn dedicated_ids(&self) -> &BTreeSet<String> {
        &self.dedicated
    }

    /// Running records, by id.
    pub fn running(&self) -> impl Iterator<Item = &ExtensionRecord> {
        self.records.values().filter(|record| record.is_running())
    }

    /// All records, by id.
    pub fn iter(&self) -> impl Iterator<Item = &ExtensionRecord> {
        self.records.values()
    }

    pub fn ids(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, window: u64, placement: Placement) -> ExtensionRecord {
        ExtensionRecord {
            id: id.to_string(),
            window: WindowHandle(window),
            placement,
            address: Address::extension(id, "background.html"),
            status: ExtensionStatus::Loading,
            builtin: true,
        }
    }

    #[test]
    fn test_sets_stay_disjoint() {
        let mut table = ExtensionTable::new();
        table.insert(record("a", 1, Placement::Consolidated));
        table.insert(record("a", 2, Placement::Dedicated));

        assert!(!table.consolidated_ids().contains("a"));
        assert!(table.dedicated_ids().contains("a"));
        assert_eq!(table.len(), 1);

        table.remove("a");
        assert!(table.dedicated_ids().is_empty());
        assert!(table.is_empty());
    }

    #[test]
    fn test_transition_only_from_expected() {
        let mut table = ExtensionTable::new();
        table.insert(record("a", 1, Placement::Dedicated));

        assert!(table.transition("a", ExtensionStatus::Loading, ExtensionStatus::Running));
        assert!(!table.transition("a", ExtensionStatus::Loading, ExtensionStatus::Running));
        assert_eq!(table.running().count(), 1);

        table.set_status("a", ExtensionStatus::Crashed);
        assert_eq!(table.running().count(), 0);
        assert_eq!(table.iter().count(), 1);
    }

    #[test]
    fn test_lookup_by_window() {
        let mut table = ExtensionTable::new();
        table.insert(record("cmd", 1, Placement::Consolidated));
        table.insert(record("groups", 1, Placement::Consolidated));
        table.insert(record("ext", 2, Placement::Dedicated));

        assert_eq!(table.dedicated_in(WindowHandle(2)).unwrap().id, "ext");
        assert!(table.dedicated_in(WindowHandle(1)).is_none());
        assert_eq!(table.consolidated_in(WindowHandle(1)), vec!["cmd", "groups"]);
        assert_eq!(
            table.get("cmd").unwrap().target(),
            DeliveryTarget::Frame {
                host: WindowHandle(1),
                id: "cmd".into()
            }
        );
    }
}

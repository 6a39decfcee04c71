use std::collections::HashMap;

use casemig_core::CorrelationEntry;
use tokio::sync::Mutex;
use tracing::warn;

/// Source record key -> created target record, shared by every stage after the primary import.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: Mutex<HashMap<String, CorrelationEntry>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the entry for `source_key`. A key is only ever recorded once.
    pub async fn insert(&self, source_key: &str, entry: CorrelationEntry) -> bool {
        let mut entries = self.entries.lock().await;
        if entries.contains_key(source_key) {
            warn!(source_key, "duplicate source key; keeping the first imported record");
            return false;
        }
        entries.insert(source_key.to_string(), entry);
        true
    }

    pub async fn get(&self, source_key: &str) -> Option<CorrelationEntry> {
        self.entries.lock().await.get(source_key).cloned()
    }

    pub async fn target_ref(&self, source_key: &str) -> Option<String> {
        self.get(source_key)
            .await
            .filter(CorrelationEntry::has_target)
            .map(|entry| entry.target_ref)
    }

    pub async fn snapshot(&self) -> Vec<(String, CorrelationEntry)> {
        let mut entries: Vec<_> = self
            .entries
            .lock()
            .await
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(target: &str, parent: &str) -> CorrelationEntry {
        CorrelationEntry {
            target_ref: target.into(),
            parent_key: parent.into(),
            source_guid: String::new(),
        }
    }

    #[tokio::test]
    async fn first_entry_for_a_key_is_kept() {
        let table = CorrelationTable::new();
        assert!(table.insert("INC1", entry("IN001", "")).await);
        assert!(!table.insert("INC1", entry("IN999", "")).await);
        assert_eq!(table.target_ref("INC1").await.as_deref(), Some("IN001"));
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn empty_targets_do_not_resolve() {
        let table = CorrelationTable::new();
        table.insert("INC2", entry("", "")).await;
        assert!(table.target_ref("INC2").await.is_none());
        assert!(table.target_ref("missing").await.is_none());
    }

    #[tokio::test]
    async fn snapshot_is_sorted() {
        let table = CorrelationTable::new();
        table.insert("b", entry("2", "a")).await;
        table.insert("a", entry("1", "")).await;
        let keys: Vec<String> = table.snapshot().await.into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }
}

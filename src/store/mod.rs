use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub mod sqlite;

pub use sqlite::SqliteStore;

/// Key -> JSON storage shared by every component that touches aggregates.
///
/// The store itself provides no multi-key atomicity and no transactions;
/// callers serialize their read-modify-write cycles through the
/// [`StoreGuard`](crate::guard::StoreGuard) instead. `get` returns only the
/// keys that exist.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, keys: &[String]) -> Result<HashMap<String, Value>>;
    async fn set(&self, entries: HashMap<String, Value>) -> Result<()>;
    async fn remove(&self, keys: &[String]) -> Result<()>;
    async fn list_keys(&self) -> Result<Vec<String>>;
}

/// Decodes one entry from a `get` result, treating a missing key as `None`.
pub fn decode_entry<T: DeserializeOwned>(
    entries: &HashMap<String, Value>,
    key: &str,
) -> Result<Option<T>> {
    match entries.get(key) {
        Some(value) => {
            let decoded = serde_json::from_value(value.clone())
                .with_context(|| format!("failed to decode store entry '{key}'"))?;
            Ok(Some(decoded))
        }
        None => Ok(None),
    }
}

/// In-process store backing the ephemeral session slot; also the test
/// double for the durable store.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[String]) -> Result<HashMap<String, Value>> {
        let entries = self.entries.lock().unwrap();
        let mut found = HashMap::new();
        for key in keys {
            if let Some(value) = entries.get(key) {
                found.insert(key.clone(), value.clone());
            }
        }
        Ok(found)
    }

    async fn set(&self, new_entries: HashMap<String, Value>) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.extend(new_entries);
        Ok(())
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    async fn list_keys(&self) -> Result<Vec<String>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        let mut entries = HashMap::new();
        entries.insert("a".to_string(), json!({"x": 1}));
        entries.insert("b".to_string(), json!(true));
        store.set(entries).await.unwrap();

        let fetched = store
            .get(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched["a"], json!({"x": 1}));

        store.remove(&["a".to_string()]).await.unwrap();
        assert_eq!(store.list_keys().await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_decode_entry_missing_key_is_none() {
        let store = MemoryStore::new();
        let fetched = store.get(&["nope".to_string()]).await.unwrap();
        let decoded: Option<HashMap<String, u64>> = decode_entry(&fetched, "nope").unwrap();
        assert!(decoded.is_none());
    }
}

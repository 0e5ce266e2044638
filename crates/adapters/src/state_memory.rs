//! In-memory state store for dry runs and testing

use async_trait::async_trait;
use post_relay_domain::{Cursor, DedupKey, SeenRecord, StateError, StateStore};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use time::OffsetDateTime;

/// In-memory state store implementation
pub struct InMemoryStateStore {
    cursors: RwLock<BTreeMap<String, String>>,
    seen: RwLock<HashMap<String, OffsetDateTime>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self {
            cursors: RwLock::new(BTreeMap::new()),
            seen: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get_cursor(&self, source_id: &str) -> Result<Option<Cursor>, StateError> {
        let cursors = self
            .cursors
            .read()
            .map_err(|e| StateError::Database(e.to_string()))?;
        Ok(cursors.get(source_id).map(|value| Cursor {
            source_id: source_id.to_string(),
            value: value.clone(),
        }))
    }

    async fn set_cursor(&self, cursor: &Cursor) -> Result<(), StateError> {
        let mut cursors = self
            .cursors
            .write()
            .map_err(|e| StateError::Database(e.to_string()))?;
        cursors.insert(cursor.source_id.clone(), cursor.value.clone());
        Ok(())
    }

    async fn delete_cursor(&self, source_id: &str) -> Result<bool, StateError> {
        let mut cursors = self
            .cursors
            .write()
            .map_err(|e| StateError::Database(e.to_string()))?;
        Ok(cursors.remove(source_id).is_some())
    }

    async fn list_cursors(&self) -> Result<Vec<Cursor>, StateError> {
        let cursors = self
            .cursors
            .read()
            .map_err(|e| StateError::Database(e.to_string()))?;
        Ok(cursors
            .iter()
            .map(|(source_id, value)| Cursor {
                source_id: source_id.clone(),
                value: value.clone(),
            })
            .collect())
    }

    async fn is_seen(&self, key: &DedupKey) -> Result<bool, StateError> {
        let seen = self
            .seen
            .read()
            .map_err(|e| StateError::Database(e.to_string()))?;
        Ok(seen.contains_key(&key.storage_key()))
    }

    async fn mark_seen(&self, record: &SeenRecord) -> Result<(), StateError> {
        let mut seen = self
            .seen
            .write()
            .map_err(|e| StateError::Database(e.to_string()))?;
        seen.entry(record.key.storage_key())
            .or_insert(record.delivered_at);
        Ok(())
    }

    async fn seen_count(&self) -> Result<u64, StateError> {
        let seen = self
            .seen
            .read()
            .map_err(|e| StateError::Database(e.to_string()))?;
        Ok(seen.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cursor_roundtrip() {
        let store = InMemoryStateStore::new();

        store
            .set_cursor(&Cursor {
                source_id: "microblog:wire".to_string(),
                value: "12345".to_string(),
            })
            .await
            .unwrap();

        let retrieved = store.get_cursor("microblog:wire").await.unwrap();
        assert_eq!(retrieved.map(|c| c.value), Some("12345".to_string()));
    }

    #[tokio::test]
    async fn test_get_nonexistent_cursor() {
        let store = InMemoryStateStore::new();
        let result = store.get_cursor("nonexistent").await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_mark_seen_keeps_first_delivery_time() {
        let store = InMemoryStateStore::new();
        let key = DedupKey::new("feed:a", "1");
        let first = OffsetDateTime::UNIX_EPOCH;

        for delivered_at in [first, OffsetDateTime::now_utc()] {
            store
                .mark_seen(&SeenRecord {
                    key: key.clone(),
                    delivered_at,
                })
                .await
                .unwrap();
        }

        assert!(store.is_seen(&key).await.unwrap());
        assert_eq!(store.seen_count().await.unwrap(), 1);
        assert_eq!(
            store.seen.read().unwrap().get(&key.storage_key()),
            Some(&first)
        );
    }
}

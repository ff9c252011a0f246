//! In-memory document store used by the test suite.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Result, WeaverError};

use super::{fields_match, merge_patch, DocumentStore};

/// HashMap-backed store with the same semantics as the SQLite backend,
/// including single-step guarded updates.
#[derive(Default)]
pub struct MemoryStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn insert(&self, collection: &str, id: &str, document: Value) -> Result<String> {
        let mut collections = self.collections.lock().unwrap();
        let documents = collections.entry(collection.to_string()).or_default();
        if documents.contains_key(id) {
            return Err(WeaverError::Duplicated(format!("{collection}/{id}")));
        }
        documents.insert(id.to_string(), document);
        Ok(id.to_string())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(collection)
            .and_then(|documents| documents.get(id))
            .cloned())
    }

    async fn get_many(&self, collection: &str, filter: &Value) -> Result<Vec<Value>> {
        let collections = self.collections.lock().unwrap();
        Ok(collections
            .get(collection)
            .map(|documents| {
                documents
                    .values()
                    .filter(|doc| fields_match(doc, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn update(&self, collection: &str, id: &str, patch: &Value) -> Result<Option<Value>> {
        let mut collections = self.collections.lock().unwrap();
        let Some(document) = collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(id))
        else {
            return Ok(None);
        };
        merge_patch(document, patch);
        Ok(Some(document.clone()))
    }

    async fn update_guarded(
        &self,
        collection: &str,
        id: &str,
        guard: &Value,
        patch: &Value,
    ) -> Result<Option<Value>> {
        let mut collections = self.collections.lock().unwrap();
        let Some(document) = collections
            .get_mut(collection)
            .and_then(|documents| documents.get_mut(id))
        else {
            return Ok(None);
        };
        if !fields_match(document, guard) {
            return Ok(None);
        }
        merge_patch(document, patch);
        Ok(Some(document.clone()))
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<bool> {
        let mut collections = self.collections.lock().unwrap();
        Ok(collections
            .get_mut(collection)
            .and_then(|documents| documents.remove(id))
            .is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn insert_rejects_duplicate_id() {
        let store = MemoryStore::new();
        store.insert("users", "fb/1", json!({"id": "fb/1"})).await.unwrap();
        let err = store.insert("users", "fb/1", json!({"id": "fb/1"})).await;
        assert!(matches!(err, Err(WeaverError::Duplicated(_))));
    }

    #[tokio::test]
    async fn update_merges_into_existing_document() {
        let store = MemoryStore::new();
        store
            .insert("users", "fb/1", json!({"id": "fb/1", "first_name": "Bee"}))
            .await
            .unwrap();
        let updated = store
            .update("users", "fb/1", &json!({"last_name": "Honey"}))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated["first_name"], "Bee");
        assert_eq!(updated["last_name"], "Honey");
        assert!(store.update("users", "fb/2", &json!({})).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn guarded_update_refuses_stale_guard() {
        let store = MemoryStore::new();
        store
            .insert("prompt_manager", "manager", json!({"next_index": 3}))
            .await
            .unwrap();

        let stale = store
            .update_guarded(
                "prompt_manager",
                "manager",
                &json!({"next_index": 2}),
                &json!({"next_index": 3}),
            )
            .await
            .unwrap();
        assert!(stale.is_none());

        let fresh = store
            .update_guarded(
                "prompt_manager",
                "manager",
                &json!({"next_index": 3}),
                &json!({"next_index": 4}),
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fresh["next_index"], 4);
    }

    #[tokio::test]
    async fn get_many_applies_field_filter() {
        let store = MemoryStore::new();
        store
            .insert("metadatas", "a", json!({"id": "a", "username": "fb/1"}))
            .await
            .unwrap();
        store
            .insert("metadatas", "b", json!({"id": "b", "username": "fb/2"}))
            .await
            .unwrap();

        let all = store.get_many("metadatas", &json!({})).await.unwrap();
        assert_eq!(all.len(), 2);
        let one = store
            .get_many("metadatas", &json!({"username": "fb/2"}))
            .await
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0]["id"], "b");
    }
}

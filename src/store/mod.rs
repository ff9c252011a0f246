//! Generic document store over named collections of JSON documents.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Collection names used by the archive.
pub mod collections {
    pub const METADATAS: &str = "metadatas";
    pub const USERS: &str = "users";
    pub const PROMPTS: &str = "prompts";
    pub const USERNAME_TO_ID: &str = "username_to_id";
    pub const PROMPT_MANAGER: &str = "prompt_manager";
}

/// Key-value document operations every backend provides.
///
/// Documents are JSON objects keyed by a caller-supplied id. All writes are
/// durable when the call returns.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts a new document. Fails `Duplicated` when the id already exists.
    async fn insert(&self, collection: &str, id: &str, document: Value) -> Result<String>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>>;

    /// Returns documents whose fields equal every field of `filter`.
    /// An empty filter returns the whole collection.
    async fn get_many(&self, collection: &str, filter: &Value) -> Result<Vec<Value>>;

    /// Shallow-merges `patch` into the stored document. `None` on a missing id.
    async fn update(&self, collection: &str, id: &str, patch: &Value) -> Result<Option<Value>>;

    /// Guarded update: applies `patch` only while every field of `guard`
    /// still equals the stored value, as one serialized step. `None` when
    /// the document is missing or the guard is stale.
    async fn update_guarded(
        &self,
        collection: &str,
        id: &str,
        guard: &Value,
        patch: &Value,
    ) -> Result<Option<Value>>;

    /// Removes a document, reporting whether it existed.
    async fn remove(&self, collection: &str, id: &str) -> Result<bool>;
}

pub(crate) fn merge_patch(document: &mut Value, patch: &Value) {
    if let (Some(fields), Some(changes)) = (document.as_object_mut(), patch.as_object()) {
        for (key, value) in changes {
            fields.insert(key.clone(), value.clone());
        }
    }
}

pub(crate) fn fields_match(document: &Value, constraint: &Value) -> bool {
    match constraint.as_object() {
        Some(fields) => fields.iter().all(|(key, value)| document.get(key) == Some(value)),
        None => true,
    }
}

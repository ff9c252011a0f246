//! Storage façade tying the document store and the blob store together.
//!
//! The multi-document operations here (voice + blob, user + username index)
//! are written as explicit two-phase steps with an undo, so a failed second
//! write never leaves partial state behind.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::blobstore::BlobStore;
use crate::error::{Result, WeaverError};
use crate::models::weaver::{
    Prompt, User, UserUpdate, UsernameToId, VoiceMetadata, VoiceMetadataUpdate,
};
use crate::store::{collections, DocumentStore};

pub struct Datastore {
    docs: Arc<dyn DocumentStore>,
    blobs: BlobStore,
}

impl Datastore {
    pub fn new(docs: Arc<dyn DocumentStore>, blobs: BlobStore) -> Self {
        Self { docs, blobs }
    }

    pub fn docs(&self) -> Arc<dyn DocumentStore> {
        self.docs.clone()
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Saves the audio bytes and the metadata row as one unit.
    ///
    /// The blob lands first; if the metadata insert then fails, the blob
    /// write is undone. A blob that already existed before this call (a
    /// webhook redelivery of a stored message) is left untouched by the undo.
    pub async fn insert_voice(
        &self,
        metadata: &VoiceMetadata,
        audio_content: &[u8],
    ) -> Result<String> {
        metadata.validate()?;
        let created = self
            .blobs
            .write(&metadata.id, &metadata.audio_extension, audio_content)?;

        let document = serde_json::to_value(metadata)?;
        if let Err(e) = self
            .docs
            .insert(collections::METADATAS, &metadata.id, document)
            .await
        {
            if created {
                if let Err(undo) = self.blobs.remove(&metadata.id, &metadata.audio_extension) {
                    warn!(id = %metadata.id, error = %undo, "failed to undo blob write");
                }
            }
            return Err(e);
        }
        debug!(id = %metadata.id, owner = %metadata.username, "archived voice submission");
        Ok(metadata.id.clone())
    }

    pub async fn get_metadata(&self, id: &str) -> Result<Option<VoiceMetadata>> {
        match self.docs.get(collections::METADATAS, id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Returns the voice bytes and metadata together, `None` when either
    /// half is missing.
    pub async fn get_voice(&self, id: &str) -> Result<Option<(VoiceMetadata, Vec<u8>)>> {
        let Some(metadata) = self.get_metadata(id).await? else {
            return Ok(None);
        };
        match self.blobs.read(&metadata.id, &metadata.audio_extension)? {
            Some(bytes) => Ok(Some((metadata, bytes))),
            None => Ok(None),
        }
    }

    pub async fn update_metadata(
        &self,
        id: &str,
        update: &VoiceMetadataUpdate,
    ) -> Result<Option<VoiceMetadata>> {
        let patch = serde_json::to_value(update)?;
        match self.docs.update(collections::METADATAS, id, &patch).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Administrative removal of a voice submission and its blob.
    pub async fn delete_voice(&self, id: &str) -> Result<bool> {
        let Some(metadata) = self.get_metadata(id).await? else {
            return Ok(false);
        };
        self.docs.remove(collections::METADATAS, id).await?;
        self.blobs.remove(&metadata.id, &metadata.audio_extension)?;
        Ok(true)
    }

    pub async fn get_voices_by_user(&self, user_id: &str) -> Result<Vec<VoiceMetadata>> {
        let docs = self
            .docs
            .get_many(collections::METADATAS, &json!({"username": user_id}))
            .await?;
        docs.into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(WeaverError::from))
            .collect()
    }

    pub async fn get_voices_by_prompt(&self, prompt_id: i64) -> Result<Vec<VoiceMetadata>> {
        let docs = self
            .docs
            .get_many(collections::METADATAS, &json!({"prompt_id": prompt_id}))
            .await?;
        docs.into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(WeaverError::from))
            .collect()
    }

    /// Registers a user and its username index entry together.
    ///
    /// The index entry is claimed first so a username collision surfaces
    /// before the user document lands; a failed user insert removes the
    /// claim again.
    pub async fn insert_user(&self, user: &User) -> Result<String> {
        user.validate()?;
        let mapping = UsernameToId {
            username: user.username.clone(),
            id: user.id.clone(),
        };
        self.docs
            .insert(
                collections::USERNAME_TO_ID,
                &user.username,
                serde_json::to_value(&mapping)?,
            )
            .await?;

        if let Err(e) = self
            .docs
            .insert(collections::USERS, &user.id, serde_json::to_value(user)?)
            .await
        {
            if let Err(undo) = self
                .docs
                .remove(collections::USERNAME_TO_ID, &user.username)
                .await
            {
                warn!(username = %user.username, error = %undo, "failed to undo username claim");
            }
            return Err(e);
        }
        debug!(id = %user.id, username = %user.username, "registered user");
        Ok(user.id.clone())
    }

    pub async fn get_user_by_id(&self, id: &str) -> Result<Option<User>> {
        match self.docs.get(collections::USERS, id).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    pub async fn get_user_id_by_username(&self, username: &str) -> Result<Option<String>> {
        match self.docs.get(collections::USERNAME_TO_ID, username).await? {
            Some(doc) => {
                let mapping: UsernameToId = serde_json::from_value(doc)?;
                Ok(Some(mapping.id))
            }
            None => Ok(None),
        }
    }

    pub async fn get_user_by_username(&self, username: &str) -> Result<Option<User>> {
        match self.get_user_id_by_username(username).await? {
            Some(id) => self.get_user_by_id(&id).await,
            None => Ok(None),
        }
    }

    pub async fn get_users(&self) -> Result<Vec<User>> {
        let docs = self.docs.get_many(collections::USERS, &json!({})).await?;
        docs.into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(WeaverError::from))
            .collect()
    }

    /// Applies a partial user update, keeping the username index in step
    /// when the username changes.
    pub async fn update_user(&self, id: &str, update: &UserUpdate) -> Result<Option<User>> {
        let Some(current) = self.get_user_by_id(id).await? else {
            return Ok(None);
        };

        if let Some(new_username) = update
            .username
            .as_deref()
            .filter(|name| *name != current.username)
        {
            let mapping = UsernameToId {
                username: new_username.to_string(),
                id: id.to_string(),
            };
            self.docs
                .insert(
                    collections::USERNAME_TO_ID,
                    new_username,
                    serde_json::to_value(&mapping)?,
                )
                .await?;
            self.docs
                .remove(collections::USERNAME_TO_ID, &current.username)
                .await?;
        }

        let patch = serde_json::to_value(update)?;
        match self.docs.update(collections::USERS, id, &patch).await? {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    /// Adds a stored voice id to its owner's `voice_set`.
    pub async fn record_voice_owner(&self, user_id: &str, voice_id: &str) -> Result<()> {
        let Some(mut user) = self.get_user_by_id(user_id).await? else {
            return Err(WeaverError::NotFound(format!("user {user_id}")));
        };
        user.voice_set.insert(voice_id.to_string());
        self.docs
            .update(
                collections::USERS,
                user_id,
                &json!({"voice_set": user.voice_set}),
            )
            .await?;
        Ok(())
    }

    /// Records a submission against an active prompt: the prompt learns the
    /// voice and user, the user learns the prompt.
    pub async fn record_prompt_participation(
        &self,
        prompt_id: i64,
        user_id: &str,
        voice_id: &str,
    ) -> Result<()> {
        let key = prompt_id.to_string();
        let Some(doc) = self.docs.get(collections::PROMPTS, &key).await? else {
            return Err(WeaverError::NotFound(format!("prompt {prompt_id}")));
        };
        let mut prompt: Prompt = serde_json::from_value(doc)?;
        prompt.voice_set.insert(voice_id.to_string());
        prompt.user_set.insert(user_id.to_string());
        self.docs
            .update(
                collections::PROMPTS,
                &key,
                &json!({"voice_set": prompt.voice_set, "user_set": prompt.user_set}),
            )
            .await?;

        if let Some(mut user) = self.get_user_by_id(user_id).await? {
            user.prompt_set.insert(prompt_id);
            self.docs
                .update(
                    collections::USERS,
                    user_id,
                    &json!({"prompt_set": user.prompt_set}),
                )
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use serde_json::Value;
    use std::collections::BTreeSet;

    fn datastore() -> (tempfile::TempDir, Datastore) {
        let dir = tempfile::tempdir().unwrap();
        let store = Datastore::new(Arc::new(MemoryStore::new()), BlobStore::new(dir.path()));
        (dir, store)
    }

    fn metadata(id: &str) -> VoiceMetadata {
        VoiceMetadata {
            id: id.to_string(),
            datetime: Utc.with_ymd_and_hms(2024, 1, 3, 19, 30, 0).unwrap(),
            audio_extension: "wav".to_string(),
            username: "fb/12345".to_string(),
            prompt_id: 2,
            title: None,
        }
    }

    fn user(id: &str, username: &str) -> User {
        User {
            id: id.to_string(),
            username: username.to_string(),
            first_name: "Bee".to_string(),
            last_name: Some("Honey".to_string()),
            voice_set: BTreeSet::new(),
            prompt_set: BTreeSet::new(),
        }
    }

    /// Document store whose metadata inserts fail, for exercising the undo
    /// path after the blob has landed.
    struct MetadataInsertFails(MemoryStore);

    #[async_trait]
    impl DocumentStore for MetadataInsertFails {
        async fn insert(&self, collection: &str, id: &str, document: Value) -> Result<String> {
            if collection == collections::METADATAS {
                return Err(WeaverError::Validation("schema rejected".into()));
            }
            self.0.insert(collection, id, document).await
        }
        async fn get(&self, collection: &str, id: &str) -> Result<Option<Value>> {
            self.0.get(collection, id).await
        }
        async fn get_many(&self, collection: &str, filter: &Value) -> Result<Vec<Value>> {
            self.0.get_many(collection, filter).await
        }
        async fn update(&self, collection: &str, id: &str, patch: &Value) -> Result<Option<Value>> {
            self.0.update(collection, id, patch).await
        }
        async fn update_guarded(
            &self,
            collection: &str,
            id: &str,
            guard: &Value,
            patch: &Value,
        ) -> Result<Option<Value>> {
            self.0.update_guarded(collection, id, guard, patch).await
        }
        async fn remove(&self, collection: &str, id: &str) -> Result<bool> {
            self.0.remove(collection, id).await
        }
    }

    #[tokio::test]
    async fn insert_voice_stores_blob_and_metadata_together() {
        let (_dir, store) = datastore();
        let stored = store
            .insert_voice(&metadata("honeybee"), b"Buzz buzzzzz bizz zzzz ~")
            .await
            .unwrap();
        assert_eq!(stored, "honeybee");

        let (meta, bytes) = store.get_voice("honeybee").await.unwrap().unwrap();
        assert_eq!(meta, metadata("honeybee"));
        assert_eq!(bytes, b"Buzz buzzzzz bizz zzzz ~");
    }

    #[tokio::test]
    async fn insert_voice_rejects_invalid_metadata_before_writing() {
        let (_dir, store) = datastore();
        let mut bad = metadata("honeybee");
        bad.audio_extension = ".wav".to_string();

        assert!(matches!(
            store.insert_voice(&bad, b"buzz").await,
            Err(WeaverError::Validation(_))
        ));
        assert!(store.blobs().read("honeybee", "wav").unwrap().is_none());
        assert!(store.get_metadata("honeybee").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_metadata_insert_rolls_the_blob_back() {
        let dir = tempfile::tempdir().unwrap();
        let store = Datastore::new(
            Arc::new(MetadataInsertFails(MemoryStore::new())),
            BlobStore::new(dir.path()),
        );

        assert!(matches!(
            store.insert_voice(&metadata("honeybee"), b"buzz").await,
            Err(WeaverError::Validation(_))
        ));
        // No orphaned blob without metadata.
        assert!(store.blobs().read("honeybee", "wav").unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_voice_keeps_the_original_blob() {
        let (_dir, store) = datastore();
        store
            .insert_voice(&metadata("honeybee"), b"original")
            .await
            .unwrap();

        assert!(matches!(
            store.insert_voice(&metadata("honeybee"), b"original").await,
            Err(WeaverError::Duplicated(_))
        ));
        // The undo must not delete the blob the first insert created.
        assert_eq!(
            store.blobs().read("honeybee", "wav").unwrap().unwrap(),
            b"original"
        );
        assert!(store.get_metadata("honeybee").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn metadata_can_be_amended_and_voices_deleted() {
        let (_dir, store) = datastore();
        store.insert_voice(&metadata("honeybee"), b"buzz").await.unwrap();

        let update = VoiceMetadataUpdate {
            prompt_id: Some(7),
            ..VoiceMetadataUpdate::default()
        };
        let amended = store
            .update_metadata("honeybee", &update)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(amended.prompt_id, 7);

        assert_eq!(store.get_voices_by_user("fb/12345").await.unwrap().len(), 1);

        assert!(store.delete_voice("honeybee").await.unwrap());
        assert!(store.get_voice("honeybee").await.unwrap().is_none());
        assert!(store.blobs().read("honeybee", "wav").unwrap().is_none());
        assert!(!store.delete_voice("honeybee").await.unwrap());
    }

    #[tokio::test]
    async fn insert_user_writes_user_and_username_index() {
        let (_dir, store) = datastore();
        store
            .insert_user(&user("fb/12345", "queen_bee_is_da_best"))
            .await
            .unwrap();

        let stored = store.get_user_by_id("fb/12345").await.unwrap().unwrap();
        assert_eq!(stored.username, "queen_bee_is_da_best");
        assert_eq!(
            store
                .get_user_id_by_username("queen_bee_is_da_best")
                .await
                .unwrap()
                .as_deref(),
            Some("fb/12345")
        );
    }

    #[tokio::test]
    async fn username_collision_leaves_no_partial_user() {
        let (_dir, store) = datastore();
        store.insert_user(&user("fb/1", "queen_bee")).await.unwrap();

        assert!(matches!(
            store.insert_user(&user("fb/2", "queen_bee")).await,
            Err(WeaverError::Duplicated(_))
        ));
        assert!(store.get_user_by_id("fb/2").await.unwrap().is_none());
        // The original claim still resolves to the first user.
        assert_eq!(
            store
                .get_user_id_by_username("queen_bee")
                .await
                .unwrap()
                .as_deref(),
            Some("fb/1")
        );
    }

    #[tokio::test]
    async fn username_change_moves_the_index_entry() {
        let (_dir, store) = datastore();
        store.insert_user(&user("fb/1", "bee")).await.unwrap();

        let update = UserUpdate {
            username: Some("queen_bee".to_string()),
            ..UserUpdate::default()
        };
        let updated = store.update_user("fb/1", &update).await.unwrap().unwrap();
        assert_eq!(updated.username, "queen_bee");
        assert!(store.get_user_id_by_username("bee").await.unwrap().is_none());
        assert_eq!(
            store
                .get_user_id_by_username("queen_bee")
                .await
                .unwrap()
                .as_deref(),
            Some("fb/1")
        );
    }

    #[tokio::test]
    async fn record_voice_owner_grows_the_voice_set() {
        let (_dir, store) = datastore();
        store.insert_user(&user("fb/12345", "bee")).await.unwrap();
        store
            .insert_voice(&metadata("honeybee"), b"buzz")
            .await
            .unwrap();

        store.record_voice_owner("fb/12345", "honeybee").await.unwrap();
        let stored = store.get_user_by_id("fb/12345").await.unwrap().unwrap();
        assert!(stored.voice_set.contains("honeybee"));
    }
}

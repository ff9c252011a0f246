//! Counter-backed prompt creation.
//!
//! Prompt ids come from the singleton manager document. A prompt insert and
//! the counter advance are chained so that a failed insert never consumes an
//! id, and the advance is a guarded compare-and-increment rather than a
//! read-then-write pair. `reconcile` repairs a crash between the two steps.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{Result, WeaverError};
use crate::models::weaver::{
    Prompt, PromptManager, PromptManagerUpdate, PromptUpdate, MANAGER_ID,
};
use crate::store::{collections, DocumentStore};

// Bound on id-collision retries under concurrent creation.
const MAX_SLOT_RETRIES: usize = 8;

pub struct PromptCounter {
    docs: Arc<dyn DocumentStore>,
}

impl PromptCounter {
    pub fn new(docs: Arc<dyn DocumentStore>) -> Self {
        Self { docs }
    }

    /// Creates a prompt under the next free id and advances the counter.
    pub async fn create_prompt(
        &self,
        text: &str,
        begins: DateTime<Utc>,
        ends: DateTime<Utc>,
    ) -> Result<i64> {
        let mut attempts = 0;
        loop {
            let manager = self.load_or_init_manager().await?;
            let id = manager.next_index;
            let prompt = Prompt {
                id,
                begins,
                ends,
                text: text.to_string(),
                voice_set: BTreeSet::new(),
                user_set: BTreeSet::new(),
            };
            prompt.validate()?;

            match self
                .docs
                .insert(
                    collections::PROMPTS,
                    &id.to_string(),
                    serde_json::to_value(&prompt)?,
                )
                .await
            {
                Ok(_) => {
                    let advanced = self
                        .docs
                        .update_guarded(
                            collections::PROMPT_MANAGER,
                            MANAGER_ID,
                            &json!({"next_index": id}),
                            &json!({"next_index": id + 1}),
                        )
                        .await?;
                    if advanced.is_none() {
                        // Counter moved underneath us; reconcile lifts it
                        // past every stored prompt, this one included.
                        warn!(id, "prompt counter advanced concurrently");
                        self.reconcile().await?;
                    }
                    info!(id, "created prompt");
                    return Ok(id);
                }
                Err(WeaverError::Duplicated(_)) => {
                    // Lost the slot to a concurrent writer. Catch the
                    // counter up and take the next id.
                    attempts += 1;
                    if attempts >= MAX_SLOT_RETRIES {
                        return Err(WeaverError::Duplicated(format!(
                            "prompt id {id} contended {attempts} times"
                        )));
                    }
                    self.reconcile().await?;
                }
                // A failed insert must not advance the counter.
                Err(e) => return Err(e),
            }
        }
    }

    /// Lifts `next_index` past the largest stored prompt id. Run at startup
    /// to recover from a crash between a prompt insert and the counter
    /// advance; also used to resolve id contention.
    pub async fn reconcile(&self) -> Result<i64> {
        let manager = self.load_or_init_manager().await?;
        let prompts = self.docs.get_many(collections::PROMPTS, &json!({})).await?;
        let max_id = prompts
            .iter()
            .filter_map(|doc| doc.get("id").and_then(Value::as_i64))
            .max();

        let Some(max_id) = max_id else {
            return Ok(manager.next_index);
        };
        if manager.next_index > max_id {
            return Ok(manager.next_index);
        }

        let lifted = max_id + 1;
        let applied = self
            .docs
            .update_guarded(
                collections::PROMPT_MANAGER,
                MANAGER_ID,
                &json!({"next_index": manager.next_index}),
                &json!({"next_index": lifted}),
            )
            .await?;
        match applied {
            Some(_) => {
                info!(
                    previous = manager.next_index,
                    next = lifted,
                    "reconciled prompt counter"
                );
                Ok(lifted)
            }
            // Another writer moved the counter first; its value stands.
            None => Ok(self.load_or_init_manager().await?.next_index),
        }
    }

    /// Id of the currently active prompt, when one is set.
    pub async fn active_prompt(&self) -> Result<Option<i64>> {
        match self
            .docs
            .get(collections::PROMPT_MANAGER, MANAGER_ID)
            .await?
        {
            Some(doc) => {
                let manager: PromptManager = serde_json::from_value(doc)?;
                Ok(manager.active_prompt)
            }
            None => Ok(None),
        }
    }

    /// Marks the prompt new submissions are recorded against; `None` clears it.
    pub async fn set_active_prompt(&self, id: Option<i64>) -> Result<()> {
        self.load_or_init_manager().await?;
        let patch = match id {
            Some(id) => {
                if self.get_prompt(id).await?.is_none() {
                    return Err(WeaverError::NotFound(format!("prompt {id}")));
                }
                serde_json::to_value(&PromptManagerUpdate {
                    active_prompt: Some(id),
                    ..PromptManagerUpdate::default()
                })?
            }
            None => json!({"active_prompt": null}),
        };
        self.docs
            .update(collections::PROMPT_MANAGER, MANAGER_ID, &patch)
            .await?;
        info!(active = ?id, "updated active prompt");
        Ok(())
    }

    /// Administrative edit of a stored prompt.
    pub async fn update_prompt(&self, id: i64, update: &PromptUpdate) -> Result<Option<Prompt>> {
        let patch = serde_json::to_value(update)?;
        match self
            .docs
            .update(collections::PROMPTS, &id.to_string(), &patch)
            .await?
        {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    pub async fn get_prompt(&self, id: i64) -> Result<Option<Prompt>> {
        match self
            .docs
            .get(collections::PROMPTS, &id.to_string())
            .await?
        {
            Some(doc) => Ok(Some(serde_json::from_value(doc)?)),
            None => Ok(None),
        }
    }

    async fn load_or_init_manager(&self) -> Result<PromptManager> {
        if let Some(doc) = self
            .docs
            .get(collections::PROMPT_MANAGER, MANAGER_ID)
            .await?
        {
            return Ok(serde_json::from_value(doc)?);
        }
        let manager = PromptManager::default();
        match self
            .docs
            .insert(
                collections::PROMPT_MANAGER,
                MANAGER_ID,
                serde_json::to_value(&manager)?,
            )
            .await
        {
            Ok(_) => Ok(manager),
            // Two first-time writers raced; take the one that landed.
            Err(WeaverError::Duplicated(_)) => {
                let doc = self
                    .docs
                    .get(collections::PROMPT_MANAGER, MANAGER_ID)
                    .await?
                    .ok_or_else(|| WeaverError::NotFound("prompt manager".into()))?;
                Ok(serde_json::from_value(doc)?)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;

    fn counter() -> PromptCounter {
        PromptCounter::new(Arc::new(MemoryStore::new()))
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2024, 1, 4, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 11, 23, 59, 59).unwrap(),
        )
    }

    #[tokio::test]
    async fn sequential_prompts_get_dense_ids() {
        let prompts = counter();
        let (begins, ends) = window();

        for expected in 0..4 {
            let id = prompts
                .create_prompt("what is your favorite flower?", begins, ends)
                .await
                .unwrap();
            assert_eq!(id, expected);
        }
    }

    #[tokio::test]
    async fn failed_creation_does_not_consume_an_id() {
        let prompts = counter();
        let (begins, ends) = window();

        assert_eq!(
            prompts.create_prompt("first", begins, ends).await.unwrap(),
            0
        );
        // Empty window fails validation before anything is written.
        assert!(prompts.create_prompt("bad", ends, begins).await.is_err());
        assert_eq!(
            prompts.create_prompt("second", begins, ends).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn reconcile_lifts_a_stale_counter() {
        let prompts = counter();
        let (begins, ends) = window();
        prompts.create_prompt("first", begins, ends).await.unwrap();

        // Simulate a crash between prompt insert and counter advance: the
        // prompt for id 1 exists but next_index still says 1 was unused.
        let orphan = Prompt {
            id: 1,
            begins,
            ends,
            text: "orphan".to_string(),
            voice_set: BTreeSet::new(),
            user_set: BTreeSet::new(),
        };
        prompts
            .docs
            .insert(
                collections::PROMPTS,
                "1",
                serde_json::to_value(&orphan).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(prompts.reconcile().await.unwrap(), 2);
        assert_eq!(
            prompts.create_prompt("third", begins, ends).await.unwrap(),
            2
        );
    }

    #[tokio::test]
    async fn id_collision_retries_onto_the_next_slot() {
        let prompts = counter();
        let (begins, ends) = window();

        // A prompt landed under id 0 without the counter ever advancing,
        // as if written by a writer that died mid-operation.
        let squatter = Prompt {
            id: 0,
            begins,
            ends,
            text: "squatter".to_string(),
            voice_set: BTreeSet::new(),
            user_set: BTreeSet::new(),
        };
        prompts
            .docs
            .insert(
                collections::PROMPTS,
                "0",
                serde_json::to_value(&squatter).unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            prompts.create_prompt("next", begins, ends).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn active_prompt_can_be_set_and_cleared() {
        let prompts = counter();
        let (begins, ends) = window();
        let id = prompts.create_prompt("first", begins, ends).await.unwrap();

        assert!(matches!(
            prompts.set_active_prompt(Some(99)).await,
            Err(WeaverError::NotFound(_))
        ));

        prompts.set_active_prompt(Some(id)).await.unwrap();
        assert_eq!(prompts.active_prompt().await.unwrap(), Some(id));

        prompts.set_active_prompt(None).await.unwrap();
        assert_eq!(prompts.active_prompt().await.unwrap(), None);
    }

    #[tokio::test]
    async fn prompt_text_can_be_amended() {
        let prompts = counter();
        let (begins, ends) = window();
        let id = prompts.create_prompt("first", begins, ends).await.unwrap();

        let update = PromptUpdate {
            text: Some("what sound woke you up today?".to_string()),
            ..PromptUpdate::default()
        };
        let updated = prompts.update_prompt(id, &update).await.unwrap().unwrap();
        assert_eq!(updated.text, "what sound woke you up today?");
        assert_eq!(updated.begins, begins);

        assert!(prompts
            .update_prompt(42, &PromptUpdate::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn active_prompt_defaults_to_none() {
        let prompts = counter();
        assert_eq!(prompts.active_prompt().await.unwrap(), None);
        let (begins, ends) = window();
        prompts.create_prompt("first", begins, ends).await.unwrap();
        assert_eq!(prompts.active_prompt().await.unwrap(), None);
    }
}

//! Domain documents for the voice archive.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, WeaverError};

/// Sentinel `prompt_id` for submissions recorded while no prompt is active.
pub const NO_PROMPT: i64 = -1;

/// Fixed id of the singleton [`PromptManager`] document.
pub const MANAGER_ID: &str = "manager";

/// Metadata row describing one stored voice blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceMetadata {
    /// Unique index, derived from the platform message id. Also the blob key.
    pub id: String,
    /// Capture time, UTC-normalized.
    pub datetime: DateTime<Utc>,
    /// Audio file type, lowercase, no leading dot.
    pub audio_extension: String,
    /// Internal id of the owning user.
    pub username: String,
    /// Prompt this submission answers, or [`NO_PROMPT`].
    pub prompt_id: i64,
    /// Filename declared by the source, when it declared one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl VoiceMetadata {
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(WeaverError::Validation("voice metadata id is empty".into()));
        }
        if self.audio_extension.is_empty()
            || !self
                .audio_extension
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        {
            return Err(WeaverError::Validation(format!(
                "audio extension {:?} must be a lowercase file-type token",
                self.audio_extension
            )));
        }
        if self.username.is_empty() {
            return Err(WeaverError::Validation(
                "voice metadata has no owning user".into(),
            ));
        }
        Ok(())
    }
}

/// A person interacting with the archive through a messaging platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Internal id, `<platform>/<platform-native-id>`, e.g. `fb/123456`.
    pub id: String,
    /// Unique displayable name; defaults to `id` until the user picks one.
    pub username: String,
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    /// Ids of the voice submissions this user owns.
    #[serde(default)]
    pub voice_set: BTreeSet<String>,
    /// Ids of the prompts this user participated in.
    #[serde(default)]
    pub prompt_set: BTreeSet<i64>,
}

impl User {
    pub fn validate(&self) -> Result<()> {
        match self.id.split_once('/') {
            Some((platform, native)) if !platform.is_empty() && !native.is_empty() => {}
            _ => {
                return Err(WeaverError::Validation(format!(
                    "user id {:?} must look like <platform>/<platform-id>",
                    self.id
                )))
            }
        }
        if self.username.is_empty() {
            return Err(WeaverError::Validation("username is empty".into()));
        }
        Ok(())
    }
}

/// Secondary index entry mapping a username back to the internal user id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsernameToId {
    pub username: String,
    pub id: String,
}

/// A time-boxed question answered by voice submissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    /// Strictly increasing integer assigned by the prompt counter.
    pub id: i64,
    pub begins: DateTime<Utc>,
    pub ends: DateTime<Utc>,
    pub text: String,
    #[serde(default)]
    pub voice_set: BTreeSet<String>,
    #[serde(default)]
    pub user_set: BTreeSet<String>,
}

impl Prompt {
    pub fn validate(&self) -> Result<()> {
        if self.id < 0 {
            return Err(WeaverError::Validation(format!(
                "prompt id {} is negative",
                self.id
            )));
        }
        if self.begins >= self.ends {
            return Err(WeaverError::Validation(format!(
                "prompt window is empty: begins {} >= ends {}",
                self.begins, self.ends
            )));
        }
        if self.text.is_empty() {
            return Err(WeaverError::Validation("prompt text is empty".into()));
        }
        Ok(())
    }
}

/// Singleton counter document handing out prompt ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptManager {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_prompt: Option<i64>,
    /// Next unused prompt id.
    pub next_index: i64,
    #[serde(default)]
    pub deleted_prompts: BTreeSet<i64>,
}

impl Default for PromptManager {
    fn default() -> Self {
        Self {
            id: MANAGER_ID.to_string(),
            active_prompt: None,
            next_index: 0,
            deleted_prompts: BTreeSet::new(),
        }
    }
}

/// Partial update for a stored [`VoiceMetadata`] document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoiceMetadataUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_extension: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<i64>,
}

/// Partial update for a stored [`User`] document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_set: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_set: Option<BTreeSet<i64>>,
}

/// Partial update for a stored [`Prompt`] document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub begins: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_set: Option<BTreeSet<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_set: Option<BTreeSet<String>>,
}

/// Partial update for the [`PromptManager`] document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptManagerUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_prompt: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_prompts: Option<BTreeSet<i64>>,
}

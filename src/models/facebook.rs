//! Typed shapes for inbound Messenger webhook events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WeaverError};

/// Media kind declared by the platform for an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentType {
    Audio,
    Image,
    File,
    Video,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AttachmentPayload {
    pub url: Option<String>,
    pub is_reusable: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type")]
    pub kind: AttachmentType,
    pub payload: AttachmentPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Platform-unique message id; doubles as the stored blob key.
    pub mid: String,
    pub text: Option<String>,
    pub quick_reply: Option<Value>,
    pub reply_to: Option<Value>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Sender or recipient handle inside a messaging record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Messaging {
    pub sender: Party,
    pub recipient: Party,
    pub timestamp: i64,
    pub message: Message,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEvent {
    pub id: String,
    pub time: i64,
    pub messaging: Vec<Messaging>,
}

/// Top-level webhook event body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub object: String,
    #[serde(default)]
    pub entry: Vec<MessageEvent>,
}

impl Event {
    /// Page subscriptions are the only event source this bot serves.
    pub fn validate(&self) -> Result<()> {
        if self.object != "page" {
            return Err(WeaverError::Validation(format!(
                "event object must be \"page\", got {:?}",
                self.object
            )));
        }
        Ok(())
    }
}

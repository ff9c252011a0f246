//! Attachment ingestion: validate, download, classify, persist.

use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info};

use crate::datastore::Datastore;
use crate::error::{Result, WeaverError};
use crate::fetch::MediaFetcher;
use crate::models::facebook::{Attachment, AttachmentType, Message};
use crate::models::weaver::{VoiceMetadata, NO_PROMPT};
use crate::prompts::PromptCounter;
use crate::{headers, mime};

/// Archives the audio attachment of an inbound message.
///
/// Validates the message carries exactly one audio attachment, downloads it,
/// derives capture time and file type from the response, and persists blob
/// plus metadata as one unit. Returns the stored id, which is the platform
/// message id.
pub async fn ingest(
    datastore: &Datastore,
    prompts: &PromptCounter,
    fetcher: &dyn MediaFetcher,
    user_id: &str,
    message: &Message,
) -> Result<String> {
    let attachment = single_audio_attachment(message)?;
    let url = attachment
        .payload
        .url
        .as_deref()
        .filter(|url| !url.is_empty())
        .ok_or_else(|| WeaverError::Input("audio attachment has no source url".into()))?;

    let response = fetcher.fetch(url).await?;
    if !response.is_success() {
        return Err(WeaverError::Upstream(format!(
            "attachment download returned status {}",
            response.status
        )));
    }

    let datetime = headers::header_datetime(&response.headers);
    let title = headers::attachment_filename(&response.headers);
    let content_type = response
        .headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    // An unrecognized content type blocks ingestion rather than guessing.
    let extension = mime::audio_extension(content_type).ok_or_else(|| {
        WeaverError::Input(format!(
            "cannot infer an audio extension from content type {content_type:?}"
        ))
    })?;
    debug!(mid = %message.mid, extension, "classified attachment");

    let prompt_id = prompts.active_prompt().await?.unwrap_or(NO_PROMPT);
    let metadata = VoiceMetadata {
        id: message.mid.clone(),
        datetime,
        audio_extension: extension.to_string(),
        username: user_id.to_string(),
        prompt_id,
        title,
    };
    let stored = datastore.insert_voice(&metadata, &response.bytes).await?;
    datastore.record_voice_owner(user_id, &stored).await?;
    if prompt_id != NO_PROMPT {
        datastore
            .record_prompt_participation(prompt_id, user_id, &stored)
            .await?;
    }

    info!(id = %stored, owner = user_id, "ingested voice submission");
    Ok(stored)
}

/// The archive processes one attachment per message; anything else is the
/// caller's error.
fn single_audio_attachment(message: &Message) -> Result<&Attachment> {
    match message.attachments.as_slice() {
        [] => Err(WeaverError::Input("message carries no attachment".into())),
        [attachment] => {
            if attachment.kind != AttachmentType::Audio {
                return Err(WeaverError::Input(
                    "attachment is not an audio recording".into(),
                ));
            }
            Ok(attachment)
        }
        more => Err(WeaverError::Input(format!(
            "message carries {} attachments; send one voice note at a time",
            more.len()
        ))),
    }
}

//! Outbound Messenger platform operations used by the webhook flow.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::{Result, WeaverError};

/// Public profile fields the platform exposes for a user.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserProfile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Fetches the sender's public profile by platform user id.
    async fn fetch_profile(&self, platform_user_id: &str) -> Result<UserProfile>;

    /// Sends a text reply to a platform user.
    async fn send_text(&self, recipient_id: &str, text: &str) -> Result<()>;
}

/// Graph API adapter.
pub struct GraphApiClient {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl GraphApiClient {
    pub fn new(base_url: &str, access_token: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WeaverError::Upstream(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }
}

#[async_trait]
impl PlatformClient for GraphApiClient {
    async fn fetch_profile(&self, platform_user_id: &str) -> Result<UserProfile> {
        let url = format!("{}/{}", self.base_url, platform_user_id);
        let resp = self
            .client
            .get(url)
            .query(&[
                ("fields", "first_name,last_name"),
                ("access_token", self.access_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| WeaverError::Upstream(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(WeaverError::Upstream(format!(
                "profile lookup returned status {}",
                resp.status()
            )));
        }
        let profile = resp
            .json::<UserProfile>()
            .await
            .map_err(|e| WeaverError::Upstream(e.to_string()))?;
        debug!(user = platform_user_id, "fetched platform profile");
        Ok(profile)
    }

    async fn send_text(&self, recipient_id: &str, text: &str) -> Result<()> {
        let url = format!("{}/me/messages", self.base_url);
        let body = json!({
            "recipient": {"id": recipient_id},
            "message": {"text": text},
        });
        let resp = self
            .client
            .post(url)
            .query(&[("access_token", self.access_token.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|e| WeaverError::Upstream(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(WeaverError::Upstream(format!(
                "send message returned status {}",
                resp.status()
            )));
        }
        debug!(recipient = recipient_id, "sent platform reply");
        Ok(())
    }
}

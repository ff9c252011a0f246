//! Attachment download port and its reqwest adapter.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;

use crate::error::{Result, WeaverError};

/// Downloaded attachment content plus the response headers the ingestion
/// pipeline reads its metadata from.
#[derive(Debug, Clone)]
pub struct MediaResponse {
    pub status: u16,
    pub bytes: Vec<u8>,
    pub headers: HeaderMap,
}

impl MediaResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<MediaResponse>;
}

/// reqwest-backed fetcher with a bounded request timeout, so a stalled
/// download cannot hold the request indefinitely.
pub struct HttpMediaFetcher {
    client: reqwest::Client,
}

impl HttpMediaFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WeaverError::Upstream(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str) -> Result<MediaResponse> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| WeaverError::Upstream(e.to_string()))?;
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| WeaverError::Upstream(e.to_string()))?
            .to_vec();
        Ok(MediaResponse {
            status,
            bytes,
            headers,
        })
    }
}

//! Cloud upload target for finished artifacts.
//!
//! The artifact is streamed as a multipart form to a configured endpoint that
//! answers with a shareable link, either as plain text or as JSON carrying a
//! `url` or `link` field. One service credential (a bearer token) is used for
//! every upload.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::path::Path;
use std::time::Duration;
use url::Url;

use crate::core::retry::{retry, RetryConfig};
use crate::download::error::DeliveryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudSettings {
    pub upload_url: Url,
    /// Multipart field carrying the file.
    pub field_name: String,
    /// Bearer token sent with every upload.
    pub token: Option<String>,
    pub timeout: Duration,
}

/// Stores a file somewhere reachable and returns a link to it.
#[async_trait]
pub trait CloudUploader: Send + Sync {
    async fn upload(&self, path: &Path) -> Result<Url, DeliveryError>;
}

pub struct HttpCloudUploader {
    client: reqwest::Client,
    settings: CloudSettings,
    retry: RetryConfig,
}

impl HttpCloudUploader {
    pub fn new(settings: CloudSettings) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(settings.timeout).build()?;
        Ok(Self {
            client,
            settings,
            retry: RetryConfig::quick(),
        })
    }

    /// Policy applied when the target is unreachable or answers 5xx.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn upload_once(&self, path: &Path) -> Result<Url, DeliveryError> {
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video.mp4".to_string());

        let body = reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::new(file));
        let part = Part::stream_with_length(body, len).file_name(file_name.clone());
        let form = Form::new().part(self.settings.field_name.clone(), part);

        let mut req = self.client.post(self.settings.upload_url.clone()).multipart(form);
        if let Some(token) = &self.settings.token {
            req = req.bearer_auth(token);
        }

        log::info!("Uploading {} ({} bytes) to {}", file_name, len, self.settings.upload_url);
        let resp = req.send().await.map_err(|e| DeliveryError::Unreachable(e.to_string()))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| DeliveryError::Unreachable(e.to_string()))?;

        if status == StatusCode::PAYLOAD_TOO_LARGE {
            return Err(DeliveryError::PayloadTooLarge(format!("upload target refused {} bytes", len)));
        }
        if status.is_server_error() {
            return Err(DeliveryError::Unreachable(format!("upload target answered {}", status)));
        }
        if !status.is_success() {
            return Err(DeliveryError::Rejected(format!(
                "upload target answered {}: {}",
                status,
                text.chars().take(200).collect::<String>()
            )));
        }

        parse_link_response(&text)
            .ok_or_else(|| DeliveryError::Rejected("upload target returned no link".to_string()))
    }
}

#[async_trait]
impl CloudUploader for HttpCloudUploader {
    async fn upload(&self, path: &Path) -> Result<Url, DeliveryError> {
        let outcome = retry(&self.retry, "cloud_upload", || self.upload_once(path)).await;
        if outcome.attempts > 1 {
            log::info!(
                "Cloud upload finished after {} attempts in {:?}",
                outcome.attempts,
                outcome.total_duration
            );
        }
        outcome.into_result()
    }
}

/// Reads the link out of an upload response body.
fn parse_link_response(body: &str) -> Option<Url> {
    let body = body.trim();
    let candidate = match serde_json::from_str::<serde_json::Value>(body) {
        Ok(json) => ["url", "link"]
            .iter()
            .find_map(|key| {
                json.get(key)
                    .or_else(|| json.get("data").and_then(|d| d.get(key)))
                    .and_then(|v| v.as_str())
            })?
            .to_string(),
        Err(_) => body.to_string(),
    };

    Url::parse(&candidate)
        .ok()
        .filter(|u| u.scheme() == "https" || u.scheme() == "http")
}

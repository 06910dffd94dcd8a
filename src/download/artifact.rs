//! Request and artifact records passed between pipeline stages.

use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Opaque identity of whoever asked for the download (a Telegram chat id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequesterId(pub i64);

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A link that passed classification, bound to the requester.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    /// Short id used in logs and in temporary file names.
    pub id: String,
    pub source_url: Url,
    pub requester_id: RequesterId,
}

/// Fresh 12-character request id.
pub fn new_request_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..12].to_string()
}

impl DownloadRequest {
    pub fn new(source_url: Url, requester_id: RequesterId) -> Self {
        Self::with_id(new_request_id(), source_url, requester_id)
    }

    pub fn with_id(id: impl Into<String>, source_url: Url, requester_id: RequesterId) -> Self {
        Self {
            id: id.into(),
            source_url,
            requester_id,
        }
    }
}

/// A media file on local disk produced by the fetcher or the transcoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaArtifact {
    pub local_path: PathBuf,
    pub title: String,
    pub size_bytes: u64,
    pub extension: String,
}

impl MediaArtifact {
    /// Builds an artifact record from a file on disk, reading its real size.
    pub fn from_path(local_path: impl Into<PathBuf>, title: impl Into<String>) -> std::io::Result<Self> {
        let local_path = local_path.into();
        let size_bytes = std::fs::metadata(&local_path)?.len();
        let extension = local_path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        Ok(Self {
            local_path,
            title: title.into(),
            size_bytes,
            extension,
        })
    }

    pub fn path(&self) -> &Path {
        &self.local_path
    }
}

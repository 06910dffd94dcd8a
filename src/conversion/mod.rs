//! Media conversion: size-reducing transcode of fetched videos.

pub mod video;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::download::error::TranscodeError;
pub use video::{FfmpegTranscoder, TranscodeQuality, TranscodeSettings};

/// Re-encodes a media file into a smaller one.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Writes the re-encoded `input` to `output`.
    ///
    /// `output` must not already exist; implementations never overwrite.
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), TranscodeError>;
}

/// Successor path for a transcode: `<dir>/<stem>-<request id>.compressed.mp4`.
///
/// The request id keeps two requests for the same title from sharing an
/// output. Never equal to `input`, even when `input` is itself a compressed file.
pub fn transcoded_path(input: &Path, request_id: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "video".to_string());
    let suffix = format!("-{}", request_id);
    let stem = stem.strip_suffix(suffix.as_str()).unwrap_or(&stem);
    let dir = input.parent().unwrap_or_else(|| Path::new("."));
    dir.join(format!("{}{}.compressed.mp4", stem, suffix))
}

/// Check if ffmpeg is available
pub async fn check_ffmpeg(bin: &str) -> bool {
    tokio::process::Command::new(bin)
        .arg("-version")
        .output()
        .await
        .map(|o| o.status.success())
        .unwrap_or(false)
}

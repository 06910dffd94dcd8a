//! Video compression through ffmpeg.

use async_trait::async_trait;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::process::Command;

use super::Transcoder;
use crate::core::metrics;
use crate::core::process::{run_with_timeout, tail_lines, ProcessError};
use crate::download::error::TranscodeError;

/// Fixed quality target for size-reducing transcodes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeQuality {
    /// Constant Rate Factor (0-51, lower = better quality, 23 is default)
    pub crf: u8,
    /// x264 preset (ultrafast, superfast, veryfast, faster, fast, medium, slow, ...)
    pub preset: String,
    /// Audio bitrate (e.g., "128k")
    pub audio_bitrate: String,
}

impl Default for TranscodeQuality {
    fn default() -> Self {
        Self {
            crf: 28,
            preset: "veryfast".to_string(),
            audio_bitrate: "128k".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeSettings {
    pub ffmpeg_bin: String,
    pub quality: TranscodeQuality,
    pub timeout: Duration,
}

pub struct FfmpegTranscoder {
    settings: TranscodeSettings,
}

impl FfmpegTranscoder {
    pub fn new(settings: TranscodeSettings) -> Self {
        Self { settings }
    }

    fn build_args(&self, input: &Path, output: &Path) -> Vec<String> {
        let q = &self.settings.quality;
        let crf = q.crf.to_string();
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin", "-n", "-i"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        args.push(input.to_string_lossy().into_owned());
        args.extend(
            [
                "-c:v",
                "libx264",
                "-preset",
                q.preset.as_str(),
                "-crf",
                crf.as_str(),
                "-pix_fmt",
                "yuv420p",
                "-c:a",
                "aac",
                "-b:a",
                q.audio_bitrate.as_str(),
                "-movflags",
                "+faststart",
            ]
            .iter()
            .map(|s| s.to_string()),
        );
        args.push(output.to_string_lossy().into_owned());
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        if input == output {
            return Err(TranscodeError::Failed {
                status: "not started".to_string(),
                stderr: "output path equals input path".to_string(),
            });
        }

        let started = Instant::now();
        let mut cmd = Command::new(&self.settings.ffmpeg_bin);
        cmd.args(self.build_args(input, output));

        log::info!("Transcoding {} -> {}", input.display(), output.display());
        let result = run_with_timeout(&mut cmd, self.settings.timeout).await;
        metrics::STAGE_DURATION_SECONDS
            .with_label_values(&["transcode"])
            .observe(started.elapsed().as_secs_f64());

        let out = result.map_err(|e| match e {
            ProcessError::TimedOut { timeout, .. } => TranscodeError::Timeout(timeout),
            ProcessError::Spawn { program, source } => TranscodeError::Spawn(format!("{}: {}", program, source)),
        })?;

        if !out.status.success() {
            let stderr = tail_lines(&out.stderr, 5);
            log::error!("FFmpeg compression error: {}", stderr);
            return Err(TranscodeError::Failed {
                status: out.status.to_string(),
                stderr,
            });
        }

        match tokio::fs::metadata(output).await {
            Ok(meta) if meta.len() > 0 => Ok(()),
            _ => Err(TranscodeError::NoOutput(output.display().to_string())),
        }
    }
}

//! Media fetching through yt-dlp.
//!
//! yt-dlp writes into a request-scoped hidden name (`.<request id>.<ext>`),
//! reports the final path and title as JSON, and the file is then moved to
//! `<download dir>/<sanitized title>.<ext>`.

use async_trait::async_trait;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::process::Command;

use crate::core::metrics;
use crate::core::process::{run_with_timeout, tail_lines, ProcessError};
use crate::core::retry::{retry, RetryConfig};
use crate::core::validation::sanitize_title;
use crate::download::artifact::{DownloadRequest, MediaArtifact};
use crate::download::error::{FetchError, FetchErrorKind};
use crate::download::temp_files::TempFileSet;
use crate::download::ytdlp_errors::analyze_ytdlp_error;

#[derive(Debug, Clone, PartialEq)]
pub struct FetcherSettings {
    pub ytdl_bin: String,
    pub download_dir: PathBuf,
    /// yt-dlp format selector.
    pub format: String,
    /// Container to remux into after download, e.g. `mp4`.
    pub remux_format: Option<String>,
    pub max_filesize_bytes: Option<u64>,
    /// yt-dlp's own `--retries` / `--fragment-retries`.
    pub extractor_retries: u32,
    pub socket_timeout: Duration,
    /// Limit for a single yt-dlp run.
    pub extraction_timeout: Duration,
    /// Policy for re-running yt-dlp after a network failure.
    pub retry: RetryConfig,
}

/// Retrieves the media behind a classified link.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Fetches to local disk.
    ///
    /// Every file the fetch creates, including the returned artifact, is
    /// registered in `temp` before it can outlive the call.
    async fn fetch(&self, request: &DownloadRequest, temp: &mut TempFileSet) -> Result<MediaArtifact, FetchError>;
}

/// Fields printed by yt-dlp after the file reached its final location.
#[derive(Debug, Deserialize, Default, PartialEq)]
struct PrintedInfo {
    title: Option<String>,
    ext: Option<String>,
    filepath: Option<String>,
}

pub struct YtDlpFetcher {
    settings: FetcherSettings,
}

impl YtDlpFetcher {
    pub fn new(settings: FetcherSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &FetcherSettings {
        &self.settings
    }

    fn temp_prefix(request: &DownloadRequest) -> String {
        format!(".{}", request.id)
    }

    fn build_args(&self, request: &DownloadRequest) -> Vec<String> {
        let s = &self.settings;
        let template = s
            .download_dir
            .join(format!("{}.%(ext)s", Self::temp_prefix(request)));

        let mut args: Vec<String> = vec![
            "--no-playlist".into(),
            "--no-progress".into(),
            "--format".into(),
            s.format.clone(),
        ];
        if let Some(container) = &s.remux_format {
            args.extend(["--merge-output-format".into(), container.clone()]);
            args.extend(["--remux-video".into(), container.clone()]);
        }
        if let Some(max) = s.max_filesize_bytes {
            args.extend(["--max-filesize".into(), max.to_string()]);
        }
        args.extend([
            "--retries".into(),
            s.extractor_retries.to_string(),
            "--fragment-retries".into(),
            s.extractor_retries.to_string(),
            "--socket-timeout".into(),
            s.socket_timeout.as_secs().max(1).to_string(),
            "--no-simulate".into(),
            "--print".into(),
            "after_move:%(.{title,ext,filepath})j".into(),
            "-o".into(),
            template.to_string_lossy().into_owned(),
            "--".into(),
            request.source_url.to_string(),
        ]);
        args
    }

    async fn run_once(&self, request: &DownloadRequest) -> Result<PrintedInfo, FetchError> {
        let args = self.build_args(request);
        log::debug!("[{}] {} {}", request.id, self.settings.ytdl_bin, args.join(" "));

        let mut cmd = Command::new(&self.settings.ytdl_bin);
        cmd.args(&args);

        let output = run_with_timeout(&mut cmd, self.settings.extraction_timeout)
            .await
            .map_err(|e| match e {
                ProcessError::TimedOut { timeout, .. } => FetchError::new(
                    FetchErrorKind::ExtractionTimeout,
                    format!("extractor timed out after {}s", timeout.as_secs()),
                ),
                ProcessError::Spawn { program, source } => {
                    FetchError::unsupported(format!("cannot run extractor {}: {}", program, source))
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let kind = analyze_ytdlp_error(&stderr);
            return Err(FetchError::new(kind, tail_lines(&output.stderr, 3)));
        }

        Ok(parse_printed_info(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Moves the extractor output to its title-based name.
    async fn finalize(
        &self,
        request: &DownloadRequest,
        info: PrintedInfo,
        temp: &mut TempFileSet,
    ) -> Result<MediaArtifact, FetchError> {
        let dir = &self.settings.download_dir;
        let prefix = Self::temp_prefix(request);

        let printed = match info.filepath.map(PathBuf::from) {
            Some(path) if is_file(&path).await => Some(path),
            _ => None,
        };
        let source = match printed {
            Some(path) => path,
            None => find_output(dir, &prefix)
                .await
                .ok_or_else(|| FetchError::unsupported("extractor finished without producing a file"))?,
        };

        let title = info
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| "video".to_string());
        let ext = info
            .ext
            .or_else(|| source.extension().map(|e| e.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "mp4".to_string());

        let target = claim_target(dir, &sanitize_title(&title), &ext, &request.id, &source, temp)
            .await
            .map_err(|e| FetchError::unsupported(format!("could not store {}: {}", source.display(), e)))?;

        // Leftover fragments would make the request own more than one file.
        remove_leftovers(dir, &prefix).await;

        MediaArtifact::from_path(&target, title)
            .map_err(|e| FetchError::unsupported(format!("could not read {}: {}", target.display(), e)))
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(&self, request: &DownloadRequest, temp: &mut TempFileSet) -> Result<MediaArtifact, FetchError> {
        let started = Instant::now();
        temp.track_prefix(&self.settings.download_dir, Self::temp_prefix(request));

        tokio::fs::create_dir_all(&self.settings.download_dir)
            .await
            .map_err(|e| FetchError::unsupported(format!("cannot create download dir: {}", e)))?;

        log::info!("[{}] Fetching {}", request.id, request.source_url);
        let outcome = retry(&self.settings.retry, "fetch", || self.run_once(request)).await;
        let attempts = outcome.attempts;

        let result = match outcome.into_result() {
            Ok(info) => self.finalize(request, info, temp).await,
            Err(e) => Err(e),
        };

        metrics::STAGE_DURATION_SECONDS
            .with_label_values(&["fetch"])
            .observe(started.elapsed().as_secs_f64());

        match &result {
            Ok(artifact) => log::info!(
                "[{}] Fetched {:?} ({} bytes) in {:.1}s after {} attempt(s)",
                request.id,
                artifact.local_path,
                artifact.size_bytes,
                started.elapsed().as_secs_f64(),
                attempts
            ),
            Err(e) => {
                metrics::FETCH_FAILURES_TOTAL
                    .with_label_values(&[e.kind.subcategory()])
                    .inc();
                // Partials go now rather than at request end.
                temp.cleanup_async().await;
                log::warn!(
                    "[{}] Fetch of {} failed after {} attempt(s): {}",
                    request.id,
                    request.source_url,
                    attempts,
                    e
                );
            }
        }
        result
    }
}

fn parse_printed_info(stdout: &str) -> PrintedInfo {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .find_map(|l| serde_json::from_str(l).ok())
        .unwrap_or_default()
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

/// The extractor's finished output: the largest prefixed file that is not a fragment.
async fn find_output(dir: &Path, prefix: &str) -> Option<PathBuf> {
    let mut entries = tokio::fs::read_dir(dir).await.ok()?;
    let mut best: Option<(u64, PathBuf)> = None;

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(&format!("{}.", prefix))
            || name.ends_with(".part")
            || name.ends_with(".ytdl")
            || name.contains(".part-Frag")
        {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if meta.is_file() && best.as_ref().map_or(true, |(len, _)| meta.len() > *len) {
            best = Some((meta.len(), entry.path()));
        }
    }
    best.map(|(_, path)| path)
}

/// Deletes every file in `dir` starting with `prefix`.
async fn remove_leftovers(dir: &Path, prefix: &str) -> usize {
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return 0;
    };
    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if !entry.file_name().to_string_lossy().starts_with(prefix) {
            continue;
        }
        let regular = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if regular && tokio::fs::remove_file(entry.path()).await.is_ok() {
            removed += 1;
        }
    }
    removed
}

/// Moves `source` to `<dir>/<stem>.<ext>` without clobbering another request's
/// file; on a name clash the request id is appended to the stem.
async fn claim_target(
    dir: &Path,
    stem: &str,
    ext: &str,
    request_id: &str,
    source: &Path,
    temp: &mut TempFileSet,
) -> std::io::Result<PathBuf> {
    let candidates = [
        dir.join(format!("{}.{}", stem, ext)),
        dir.join(format!("{}-{}.{}", stem, request_id, ext)),
    ];

    for target in candidates {
        if target == source {
            temp.track(&target);
            return Ok(target);
        }
        // hard_link fails atomically if the name is taken.
        match tokio::fs::hard_link(source, &target).await {
            Ok(()) => {
                temp.track(&target);
                tokio::fs::remove_file(source).await?;
                return Ok(target);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(_) => {
                // Filesystems without hard links: fall back to a plain rename.
                if tokio::fs::try_exists(&target).await.unwrap_or(true) {
                    continue;
                }
                temp.track(&target);
                tokio::fs::rename(source, &target).await?;
                return Ok(target);
            }
        }
    }

    Err(std::io::Error::new(
        ErrorKind::AlreadyExists,
        format!("no free name for {}", stem),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::artifact::RequesterId;
    use pretty_assertions::assert_eq;
    use url::Url;

    fn settings(dir: &Path, bin: &str) -> FetcherSettings {
        FetcherSettings {
            ytdl_bin: bin.to_string(),
            download_dir: dir.to_path_buf(),
            format: "bestvideo*+bestaudio/best".to_string(),
            remux_format: Some("mp4".to_string()),
            max_filesize_bytes: None,
            extractor_retries: 3,
            socket_timeout: Duration::from_secs(30),
            extraction_timeout: Duration::from_secs(30),
            retry: RetryConfig::new().max_retries(0).no_jitter(),
        }
    }

    fn request() -> DownloadRequest {
        DownloadRequest::new(Url::parse("https://youtube.com/watch?v=abc").unwrap(), RequesterId(7))
    }

    #[test]
    fn test_build_args() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path(), "yt-dlp");
        s.max_filesize_bytes = Some(1024);
        let fetcher = YtDlpFetcher::new(s);
        let req = request();
        let args = fetcher.build_args(&req);

        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("--format") + 1], "bestvideo*+bestaudio/best");
        assert_eq!(args[pos("--remux-video") + 1], "mp4");
        assert_eq!(args[pos("--max-filesize") + 1], "1024");
        assert_eq!(args[pos("--retries") + 1], "3");
        assert_eq!(args[pos("--socket-timeout") + 1], "30");
        assert!(args[pos("-o") + 1].ends_with(&format!(".{}.%(ext)s", req.id)));
        assert_eq!(args.last().unwrap(), "https://youtube.com/watch?v=abc");
        assert_eq!(args[args.len() - 2], "--");
    }

    #[test]
    fn test_build_args_without_remux() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = settings(dir.path(), "yt-dlp");
        s.remux_format = None;
        let args = YtDlpFetcher::new(s).build_args(&request());
        assert!(!args.iter().any(|a| a == "--remux-video"));
        assert!(!args.iter().any(|a| a == "--max-filesize"));
    }

    #[test]
    fn test_parse_printed_info() {
        let out = "[info] something\n{\"title\": \"A Clip\", \"ext\": \"mp4\", \"filepath\": \"/d/.x.mp4\"}\n";
        assert_eq!(
            parse_printed_info(out),
            PrintedInfo {
                title: Some("A Clip".into()),
                ext: Some("mp4".into()),
                filepath: Some("/d/.x.mp4".into()),
            }
        );
        assert_eq!(parse_printed_info("garbage"), PrintedInfo::default());
    }

    #[tokio::test]
    async fn test_claim_target_avoids_clobbering() {
        let dir = tempfile::tempdir().unwrap();
        let taken = dir.path().join("My_Title.mp4");
        std::fs::write(&taken, b"other request").unwrap();
        let source = dir.path().join(".req1.mp4");
        std::fs::write(&source, b"mine").unwrap();

        let mut temp = TempFileSet::new("req1");
        let target = claim_target(dir.path(), "My_Title", "mp4", "req1", &source, &mut temp)
            .await
            .unwrap();

        assert_eq!(target, dir.path().join("My_Title-req1.mp4"));
        assert_eq!(std::fs::read(&taken).unwrap(), b"other request");
        assert_eq!(std::fs::read(&target).unwrap(), b"mine");
        assert!(!source.exists());
        assert!(temp.is_tracked(&target));
    }

    #[tokio::test]
    async fn test_find_output_skips_fragments() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".r.mp4.part"), vec![0u8; 100]).unwrap();
        std::fs::write(dir.path().join(".r.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join(".rr.mp4"), vec![0u8; 100]).unwrap();
        assert_eq!(find_output(dir.path(), ".r").await, Some(dir.path().join(".r.mp4")));
    }

    #[cfg(unix)]
    fn fake_ytdlp(dir: &Path, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-yt-dlp.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[cfg(unix)]
    const SUCCESS_SCRIPT: &str = r#"
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2;;
    *) shift;;
  esac
done
path=$(printf '%s' "$out" | sed 's/%(ext)s/mp4/')
head -c 3000 /dev/zero > "$path"
printf '{"title": "My Title", "ext": "mp4", "filepath": "%s"}\n' "$path"
"#;

    #[cfg(unix)]
    const CJK_TITLE_SCRIPT: &str = r#"
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2;;
    *) shift;;
  esac
done
path=$(printf '%s' "$out" | sed 's/%(ext)s/mp4/')
head -c 2000 /dev/zero > "$path"
t="日本語のタイトル"
title="$t$t$t$t$t$t$t$t$t$t$t$t"
printf '{"title": "%s", "ext": "mp4", "filepath": "%s"}\n' "$title" "$path"
"#;

    #[cfg(unix)]
    const FAILING_SCRIPT: &str = r#"
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2;;
    *) shift;;
  esac
done
path=$(printf '%s' "$out" | sed 's/%(ext)s/mp4.part/')
head -c 500 /dev/zero > "$path"
echo "ERROR: Unsupported URL: https://youtube.com/watch?v=abc" >&2
exit 1
"#;

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fetch_produces_exactly_one_file() {
        let bin_dir = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_ytdlp(bin_dir.path(), SUCCESS_SCRIPT);
        let fetcher = YtDlpFetcher::new(settings(dir.path(), &bin));

        let mut temp = TempFileSet::new("t");
        let artifact = fetcher.fetch(&request(), &mut temp).await.unwrap();

        assert_eq!(artifact.local_path, dir.path().join("My_Title.mp4"));
        assert_eq!(artifact.title, "My Title");
        assert_eq!(artifact.extension, "mp4");
        assert_eq!(artifact.size_bytes, 3000);
        assert_eq!(std::fs::metadata(&artifact.local_path).unwrap().len(), artifact.size_bytes);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        drop(temp);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fetch_keeps_long_multibyte_title_within_name_limit() {
        let bin_dir = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_ytdlp(bin_dir.path(), CJK_TITLE_SCRIPT);
        let fetcher = YtDlpFetcher::new(settings(dir.path(), &bin));

        let mut temp = TempFileSet::new("t");
        let artifact = fetcher.fetch(&request(), &mut temp).await.unwrap();

        let name = artifact.local_path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.len() < 255);
        assert!(name.starts_with("日本語のタイトル"));
        assert_eq!(artifact.title, "日本語のタイトル".repeat(12));
        assert_eq!(artifact.size_bytes, 2000);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_fetch_removes_partials() {
        let bin_dir = tempfile::tempdir().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let bin = fake_ytdlp(bin_dir.path(), FAILING_SCRIPT);
        let fetcher = YtDlpFetcher::new(settings(dir.path(), &bin));

        let mut temp = TempFileSet::new("t");
        let err = fetcher.fetch(&request(), &mut temp).await.unwrap_err();

        assert_eq!(err.kind, FetchErrorKind::UnsupportedContent);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_binary_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = YtDlpFetcher::new(settings(dir.path(), "no-such-extractor-binary-91"));
        let mut temp = TempFileSet::new("t");
        let err = fetcher.fetch(&request(), &mut temp).await.unwrap_err();
        assert!(err.message.contains("cannot run extractor"));
    }
}

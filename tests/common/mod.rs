//! Common test utilities
//!
//! Fake stages that drive the pipeline end to end without network access or
//! external binaries. Files are created sparse (`set_len`), so "300 MB"
//! artifacts cost nothing on disk.

#![allow(dead_code)]

use async_trait::async_trait;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use fetchgram::conversion::Transcoder;
use fetchgram::download::classifier::{ClassifierSettings, UrlClassifier};
use fetchgram::download::decider::{SizeThresholds, MB};
use fetchgram::download::error::{DeliveryError, FetchError, FetchErrorKind, TranscodeError};
use fetchgram::download::fetcher::MediaFetcher;
use fetchgram::download::resolver::{RedirectResolver, ResolveError};
use fetchgram::download::send::ChatTransport;
use fetchgram::download::{DownloadRequest, MediaArtifact, Pipeline, RequesterId, TempFileSet};
use fetchgram::storage::CloudUploader;

pub const REQUESTER: RequesterId = RequesterId(4242);

/// Creates a sparse file of the given logical size.
pub fn sparse_file(path: &Path, size: u64) {
    let file = std::fs::File::create(path).unwrap();
    file.set_len(size).unwrap();
}

/// Creates `path` only if it does not exist yet, starting with `tag`.
pub fn tagged_file(path: &Path, tag: &str, size: u64) -> std::io::Result<()> {
    let mut file = std::fs::OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(tag.as_bytes())?;
    file.set_len(size)
}

/// The tag written by [`tagged_file`], or an empty string for plain sparse files.
pub fn read_tag(path: &Path) -> std::io::Result<String> {
    let mut buf = [0u8; 32];
    let n = std::fs::File::open(path)?.read(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf[..n]).trim_end_matches('\0').to_string())
}

/// Number of regular files left in `dir`.
pub fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir)
        .map(|entries| entries.filter_map(Result::ok).filter(|e| e.path().is_file()).count())
        .unwrap_or(0)
}

/// Resolver that maps every shortened link to a fixed target.
pub struct StaticResolver {
    pub target: Option<&'static str>,
    pub calls: AtomicUsize,
}

impl StaticResolver {
    pub fn to(target: &'static str) -> Arc<Self> {
        Arc::new(Self {
            target: Some(target),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn timing_out() -> Arc<Self> {
        Arc::new(Self {
            target: None,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl RedirectResolver for StaticResolver {
    async fn resolve(&self, url: &Url) -> Result<Url, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.target {
            Some(target) => Ok(Url::parse(target).unwrap()),
            None => Err(ResolveError::Timeout(url.to_string())),
        }
    }
}

pub fn classifier_settings() -> ClassifierSettings {
    ClassifierSettings {
        allowed_domains: vec!["youtube.com".into(), "youtu.be".into(), "vimeo.com".into()],
        shortener_domains: vec!["bit.ly".into()],
        max_redirect_hops: 5,
        hop_timeout: Duration::from_secs(5),
    }
}

/// How the fake fetcher behaves.
#[derive(Clone)]
pub enum FetchBehavior {
    /// Writes an artifact of this many bytes.
    Produce(u64),
    /// Writes `<stem>.mp4` tagged with the request id, or `<stem>-<id>.mp4`
    /// when that name is taken, the way the real fetcher names files.
    ProduceTitled { stem: &'static str, size: u64 },
    /// Leaves a partial file behind and fails.
    Fail(FetchErrorKind),
    /// Writes a partial file, then hangs.
    Hang,
}

pub struct FakeFetcher {
    pub dir: PathBuf,
    pub behavior: FetchBehavior,
    pub calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn new(dir: &Path, behavior: FetchBehavior) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.to_path_buf(),
            behavior,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch(&self, request: &DownloadRequest, temp: &mut TempFileSet) -> Result<MediaArtifact, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let partial = self.dir.join(format!(".{}.mp4.part", request.id));
        temp.track(&partial);
        sparse_file(&partial, 1024);

        match &self.behavior {
            FetchBehavior::Produce(size) => {
                let path = self.dir.join(format!("Test_Clip-{}.mp4", request.id));
                temp.track(&path);
                sparse_file(&path, *size);
                temp.release(&partial).await;
                Ok(MediaArtifact::from_path(&path, "Test Clip").unwrap())
            }
            FetchBehavior::ProduceTitled { stem, size } => {
                let mut path = self.dir.join(format!("{}.mp4", stem));
                if let Err(e) = tagged_file(&path, &request.id, *size) {
                    assert_eq!(e.kind(), ErrorKind::AlreadyExists);
                    path = self.dir.join(format!("{}-{}.mp4", stem, request.id));
                    tagged_file(&path, &request.id, *size).unwrap();
                }
                temp.track(&path);
                temp.release(&partial).await;
                Ok(MediaArtifact::from_path(&path, *stem).unwrap())
            }
            FetchBehavior::Fail(kind) => Err(FetchError::new(*kind, "simulated failure")),
            FetchBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(FetchError::network("unreachable"))
            }
        }
    }
}

#[derive(Clone, Copy)]
pub enum TranscodeBehavior {
    /// Writes an output of this many bytes.
    Shrink(u64),
    Fail,
}

pub struct FakeTranscoder {
    pub behavior: TranscodeBehavior,
    pub calls: AtomicUsize,
    pub outputs: Mutex<Vec<PathBuf>>,
}

impl FakeTranscoder {
    pub fn new(behavior: TranscodeBehavior) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            calls: AtomicUsize::new(0),
            outputs: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_ne!(input, output);
        assert!(!output.exists(), "transcoder must never overwrite");
        self.outputs.lock().unwrap().push(output.to_path_buf());
        match self.behavior {
            TranscodeBehavior::Shrink(size) => {
                // Carry the input's tag over so deliveries can be traced back.
                read_tag(input)
                    .and_then(|tag| tagged_file(output, &tag, size))
                    .map_err(|e| TranscodeError::NoOutput(e.to_string()))
            }
            TranscodeBehavior::Fail => {
                // Half-written output, as a crashed encoder would leave.
                sparse_file(output, 10);
                Err(TranscodeError::Failed {
                    status: "exit status: 1".into(),
                    stderr: "simulated encoder crash".into(),
                })
            }
        }
    }
}

/// What the transport was asked to send, with the state of the file at that moment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(String),
    Video { path: PathBuf, size: u64, caption: String },
    Document { path: PathBuf, size: u64, caption: String },
}

#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Mutex<Vec<Sent>>,
    /// Tag of every file delivered, read once the send completes.
    pub tags: Mutex<Vec<String>>,
    /// Fail every file send with this error.
    pub fail_files: Option<fn() -> DeliveryError>,
    /// How long a file send takes.
    pub upload_time: Option<Duration>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing(error: fn() -> DeliveryError) -> Arc<Self> {
        Arc::new(Self {
            fail_files: Some(error),
            ..Self::default()
        })
    }

    pub fn slow(upload_time: Duration) -> Arc<Self> {
        Arc::new(Self {
            upload_time: Some(upload_time),
            ..Self::default()
        })
    }

    pub fn tags(&self) -> Vec<String> {
        self.tags.lock().unwrap().clone()
    }

    /// Holds the file for the upload time and reads it back at the end.
    async fn transfer(&self, path: &Path) -> Result<u64, DeliveryError> {
        if let Some(upload_time) = self.upload_time {
            tokio::time::sleep(upload_time).await;
        }
        let size = std::fs::metadata(path)?.len();
        self.tags.lock().unwrap().push(read_tag(path)?);
        Ok(size)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub fn files(&self) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|s| !matches!(s, Sent::Text(_)))
            .collect()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_text(&self, _to: RequesterId, text: &str) -> Result<(), DeliveryError> {
        self.sent.lock().unwrap().push(Sent::Text(text.to_string()));
        Ok(())
    }

    async fn send_video(&self, _to: RequesterId, path: &Path, caption: &str) -> Result<(), DeliveryError> {
        let size = self.transfer(path).await?;
        if let Some(error) = self.fail_files {
            return Err(error());
        }
        self.sent.lock().unwrap().push(Sent::Video {
            path: path.to_path_buf(),
            size,
            caption: caption.to_string(),
        });
        Ok(())
    }

    async fn send_document(&self, _to: RequesterId, path: &Path, caption: &str) -> Result<(), DeliveryError> {
        let size = self.transfer(path).await?;
        if let Some(error) = self.fail_files {
            return Err(error());
        }
        self.sent.lock().unwrap().push(Sent::Document {
            path: path.to_path_buf(),
            size,
            caption: caption.to_string(),
        });
        Ok(())
    }
}

pub struct FakeUploader {
    pub uploaded: Mutex<Vec<(PathBuf, u64)>>,
}

impl FakeUploader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            uploaded: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl CloudUploader for FakeUploader {
    async fn upload(&self, path: &Path) -> Result<Url, DeliveryError> {
        let size = std::fs::metadata(path)?.len();
        self.uploaded.lock().unwrap().push((path.to_path_buf(), size));
        Ok(Url::parse("https://files.example/abc123").unwrap())
    }
}

/// Pipeline over fakes with 50 MB / 1000 MB thresholds.
pub fn pipeline(
    fetcher: Arc<FakeFetcher>,
    transcoder: Arc<FakeTranscoder>,
    transport: Arc<RecordingTransport>,
    request_timeout: Duration,
) -> Pipeline {
    let classifier = UrlClassifier::new(classifier_settings(), StaticResolver::to("https://youtube.com/watch?v=abc"));
    Pipeline::new(
        classifier,
        fetcher,
        transcoder,
        transport,
        SizeThresholds::default(),
        request_timeout,
    )
}

pub fn mb(n: u64) -> u64 {
    n * MB
}

//! Worker pool bounds and isolation.

mod common;

use async_trait::async_trait;
use common::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fetchgram::download::classifier::UrlClassifier;
use fetchgram::download::decider::SizeThresholds;
use fetchgram::download::error::FetchError;
use fetchgram::download::fetcher::MediaFetcher;
use fetchgram::download::{DownloadQueue, DownloadRequest, MediaArtifact, Pipeline, TempFileSet};

/// Fetcher that records how many fetches overlap.
struct SlowFetcher {
    dir: std::path::PathBuf,
    current: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl MediaFetcher for SlowFetcher {
    async fn fetch(&self, request: &DownloadRequest, temp: &mut TempFileSet) -> Result<MediaArtifact, FetchError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(Duration::from_millis(100)).await;
        let path = self.dir.join(format!("{}.mp4", request.id));
        temp.track(&path);
        sparse_file(&path, mb(1));

        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(MediaArtifact::from_path(&path, "clip").unwrap())
    }
}

#[tokio::test]
async fn test_pool_bounds_concurrent_fetches() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = Arc::new(SlowFetcher {
        dir: dir.path().to_path_buf(),
        current: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    });
    let transport = RecordingTransport::new();
    let pipeline = Pipeline::new(
        UrlClassifier::new(classifier_settings(), StaticResolver::timing_out()),
        fetcher.clone(),
        FakeTranscoder::new(TranscodeBehavior::Fail),
        transport.clone(),
        SizeThresholds::default(),
        Duration::from_secs(30),
    );
    let queue = DownloadQueue::new(Arc::new(pipeline), 2);
    assert_eq!(queue.capacity(), 2);

    let handles: Vec<_> = (0..6)
        .map(|i| queue.submit(format!("https://youtube.com/watch?v={}", i), REQUESTER))
        .collect();
    for handle in handles {
        let outcome = handle.await.unwrap().expect("pool is open");
        assert!(outcome.is_ok());
    }

    assert!(fetcher.peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(transport.files().len(), 6);
    assert_eq!(queue.available_slots(), 2);
    assert_eq!(files_in(dir.path()), 0);
}

#[tokio::test]
async fn test_closed_pool_drops_new_requests() {
    let dir = tempfile::tempdir().unwrap();
    let fetcher = FakeFetcher::new(dir.path(), FetchBehavior::Produce(mb(1)));
    let transport = RecordingTransport::new();
    let queue = DownloadQueue::new(
        Arc::new(pipeline(
            fetcher.clone(),
            FakeTranscoder::new(TranscodeBehavior::Fail),
            transport,
            Duration::from_secs(30),
        )),
        1,
    );

    queue.close();
    let outcome = queue
        .submit("https://youtube.com/watch?v=1".to_string(), REQUESTER)
        .await
        .unwrap();

    assert!(outcome.is_none());
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

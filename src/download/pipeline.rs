//! Download pipeline orchestrator.
//!
//! One run per incoming message:
//!   classify → fetch → decide route → (transcode) → deliver → cleanup
//!
//! Stages run strictly in order under a single per-request deadline. Every
//! local file the run creates is owned by one [`TempFileSet`] that is created
//! before the deadline starts and cleaned up after it ends, so a timeout or a
//! failure in any stage never leaks a file.

use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

use crate::conversion::{transcoded_path, FfmpegTranscoder, Transcoder};
use crate::core::config::{DeliveryTarget, PipelineSettings};
use crate::core::error::{AppResult, ConfigError};
use crate::core::metrics;
use crate::core::utils::extract_link_candidate;
use crate::download::artifact::{new_request_id, DownloadRequest, MediaArtifact, RequesterId};
use crate::download::classifier::UrlClassifier;
use crate::download::decider::{decide, format_size, DeliveryRoute, SizeThresholds};
use crate::download::error::{DeliveryError, PipelineError};
use crate::download::fetcher::{MediaFetcher, YtDlpFetcher};
use crate::download::send::ChatTransport;
use crate::download::temp_files::TempFileSet;
use crate::storage::cloud::{CloudUploader, HttpCloudUploader};

/// Sent as soon as a link is accepted.
pub const DOWNLOADING_NOTICE: &str = "⏳ Downloading…";

pub const TRANSCODE_FAILED_NOTICE: &str = "⚠️ Couldn't compress this video, sending the original.";

/// What was delivered for a successful request.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub request_id: String,
    pub route: DeliveryRoute,
    /// Size of the file that was actually delivered.
    pub size_bytes: u64,
    /// True when the transcoded successor replaced the original.
    pub transcoded: bool,
    /// Shareable link when the artifact went to the cloud target.
    pub link: Option<Url>,
}

/// The artifact chosen for delivery plus anything the user should be told about it.
struct Prepared {
    artifact: MediaArtifact,
    transcoded: bool,
    notice: Option<String>,
}

pub struct Pipeline {
    classifier: UrlClassifier,
    fetcher: Arc<dyn MediaFetcher>,
    transcoder: Arc<dyn Transcoder>,
    transport: Arc<dyn ChatTransport>,
    uploader: Option<Arc<dyn CloudUploader>>,
    thresholds: SizeThresholds,
    request_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        classifier: UrlClassifier,
        fetcher: Arc<dyn MediaFetcher>,
        transcoder: Arc<dyn Transcoder>,
        transport: Arc<dyn ChatTransport>,
        thresholds: SizeThresholds,
        request_timeout: Duration,
    ) -> Self {
        Self {
            classifier,
            fetcher,
            transcoder,
            transport,
            uploader: None,
            thresholds,
            request_timeout,
        }
    }

    /// Routes finished artifacts to the cloud target instead of the chat.
    pub fn with_uploader(mut self, uploader: Arc<dyn CloudUploader>) -> Self {
        self.uploader = Some(uploader);
        self
    }

    /// Wires the production stages (yt-dlp, ffmpeg, HTTP upload) from settings.
    pub fn from_settings(settings: &PipelineSettings, transport: Arc<dyn ChatTransport>) -> AppResult<Self> {
        let classifier = UrlClassifier::with_http_resolver(settings.classifier.clone())?;
        let pipeline = Self::new(
            classifier,
            Arc::new(YtDlpFetcher::new(settings.fetcher.clone())),
            Arc::new(FfmpegTranscoder::new(settings.transcode.clone())),
            transport,
            settings.thresholds,
            settings.request_timeout,
        );

        match (settings.delivery_target, &settings.cloud) {
            (DeliveryTarget::Chat, _) => Ok(pipeline),
            (DeliveryTarget::Cloud, Some(cloud)) => {
                let uploader = HttpCloudUploader::new(cloud.clone())?.with_retry(settings.send_retry.clone());
                Ok(pipeline.with_uploader(Arc::new(uploader)))
            }
            (DeliveryTarget::Cloud, None) => Err(ConfigError::Missing("CLOUD_UPLOAD_URL").into()),
        }
    }

    /// Handles one inbound text message end to end.
    ///
    /// Failures are reported to the requester before being returned.
    pub async fn handle_message(&self, text: &str, requester: RequesterId) -> Result<DeliveryReport, PipelineError> {
        let _in_flight = metrics::InFlightGuard::enter();
        let candidate = extract_link_candidate(text);
        let id = new_request_id();

        let result = {
            let mut temp = TempFileSet::new(id.clone());
            let outcome = tokio::time::timeout(
                self.request_timeout,
                self.process(&id, candidate, requester, &mut temp),
            )
            .await;
            temp.cleanup_async().await;
            outcome.unwrap_or(Err(PipelineError::TimedOut(self.request_timeout)))
        };

        match &result {
            Ok(report) => {
                metrics::PIPELINE_OUTCOMES_TOTAL.with_label_values(&["delivered"]).inc();
                log::info!(
                    "[{}] Delivered {} for {} via {} ({})",
                    id,
                    candidate,
                    requester,
                    report.route,
                    format_size(report.size_bytes)
                );
            }
            Err(e) => {
                metrics::PIPELINE_OUTCOMES_TOTAL
                    .with_label_values(&[outcome_label(e)])
                    .inc();
                log::error!("[{}] Request {:?} from {} failed at {}: {}", id, candidate, requester, e.stage(), e);
                if let Err(send_err) = self.transport.send_text(requester, &e.user_message()).await {
                    log::warn!("[{}] Could not report failure to {}: {}", id, requester, send_err);
                }
            }
        }

        result
    }

    async fn process(
        &self,
        id: &str,
        candidate: &str,
        requester: RequesterId,
        temp: &mut TempFileSet,
    ) -> Result<DeliveryReport, PipelineError> {
        let url = self.classifier.classify(candidate).await.into_result()?;
        let request = DownloadRequest::with_id(id, url, requester);
        log::info!("[{}] Accepted {} from {}", request.id, request.source_url, requester);

        if let Err(e) = self.transport.send_text(requester, DOWNLOADING_NOTICE).await {
            log::warn!("[{}] Could not send progress notice: {}", request.id, e);
        }

        let artifact = self.fetcher.fetch(&request, temp).await?;
        let route = decide(artifact.size_bytes, &self.thresholds);
        metrics::DELIVERY_ROUTES_TOTAL.with_label_values(&[route.as_str()]).inc();
        log::info!(
            "[{}] Fetched {} ({}), route: {}",
            request.id,
            artifact.local_path.display(),
            format_size(artifact.size_bytes),
            route
        );

        let prepared = match route {
            DeliveryRoute::TranscodeThenSend => self.shrink(&request, artifact, temp).await,
            DeliveryRoute::Direct | DeliveryRoute::Document => Prepared {
                artifact,
                transcoded: false,
                notice: None,
            },
        };

        let started = Instant::now();
        let link = self.deliver(requester, route, &prepared).await;
        metrics::STAGE_DURATION_SECONDS
            .with_label_values(&["deliver"])
            .observe(started.elapsed().as_secs_f64());
        if let Err(e) = &link {
            metrics::DELIVERY_FAILURES_TOTAL
                .with_label_values(&[e.subcategory()])
                .inc();
        }

        Ok(DeliveryReport {
            request_id: request.id,
            route,
            size_bytes: prepared.artifact.size_bytes,
            transcoded: prepared.transcoded,
            link: link?,
        })
    }

    /// Runs the size-reducing transcode. Never fails: any problem falls back
    /// to the original artifact.
    async fn shrink(&self, request: &DownloadRequest, original: MediaArtifact, temp: &mut TempFileSet) -> Prepared {
        let output = transcoded_path(original.path(), &request.id);
        if tokio::fs::try_exists(&output).await.unwrap_or(true) {
            // Not ours to track or delete.
            log::warn!("[{}] {} already exists, sending the original", request.id, output.display());
            metrics::TRANSCODE_RESULTS_TOTAL.with_label_values(&["failed"]).inc();
            return Prepared {
                artifact: original,
                transcoded: false,
                notice: Some(TRANSCODE_FAILED_NOTICE.to_string()),
            };
        }
        temp.track(&output);

        let outcome = match self.transcoder.transcode(original.path(), &output).await {
            Ok(()) => MediaArtifact::from_path(&output, original.title.clone()).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(smaller) if smaller.size_bytes < original.size_bytes => {
                metrics::TRANSCODE_RESULTS_TOTAL.with_label_values(&["success"]).inc();
                log::info!(
                    "[{}] Transcoded {} -> {}",
                    request.id,
                    format_size(original.size_bytes),
                    format_size(smaller.size_bytes)
                );
                temp.release(original.path()).await;
                let notice = (smaller.size_bytes > self.thresholds.small()).then(|| {
                    format!(
                        "ℹ️ Still {} after compression, sending it anyway.",
                        format_size(smaller.size_bytes)
                    )
                });
                Prepared {
                    artifact: smaller,
                    transcoded: true,
                    notice,
                }
            }
            Ok(not_smaller) => {
                metrics::TRANSCODE_RESULTS_TOTAL.with_label_values(&["not_smaller"]).inc();
                log::info!(
                    "[{}] Transcode gave {} for a {} original, keeping the original",
                    request.id,
                    format_size(not_smaller.size_bytes),
                    format_size(original.size_bytes)
                );
                temp.release(&output).await;
                Prepared {
                    artifact: original,
                    transcoded: false,
                    notice: None,
                }
            }
            Err(e) => {
                metrics::TRANSCODE_RESULTS_TOTAL.with_label_values(&["failed"]).inc();
                log::warn!("[{}] Transcode failed, sending the original: {}", request.id, e);
                temp.release(&output).await;
                Prepared {
                    artifact: original,
                    transcoded: false,
                    notice: Some(TRANSCODE_FAILED_NOTICE.to_string()),
                }
            }
        }
    }

    async fn deliver(
        &self,
        requester: RequesterId,
        route: DeliveryRoute,
        prepared: &Prepared,
    ) -> Result<Option<Url>, DeliveryError> {
        let caption = caption_for(&prepared.artifact, prepared.notice.as_deref());
        let path: &Path = prepared.artifact.path();

        if let Some(uploader) = &self.uploader {
            let link = uploader.upload(path).await?;
            self.transport
                .send_text(requester, &format!("{}\n\n🔗 {}", caption, link))
                .await?;
            return Ok(Some(link));
        }

        match route {
            DeliveryRoute::Document => self.transport.send_document(requester, path, &caption).await?,
            DeliveryRoute::Direct | DeliveryRoute::TranscodeThenSend => {
                self.transport.send_video(requester, path, &caption).await?
            }
        }
        Ok(None)
    }
}

fn caption_for(artifact: &MediaArtifact, notice: Option<&str>) -> String {
    match notice {
        Some(notice) => format!("{}\n\n{}", artifact.title, notice),
        None => artifact.title.clone(),
    }
}

fn outcome_label(e: &PipelineError) -> &'static str {
    match e {
        PipelineError::Rejected(_) => "rejected",
        PipelineError::Fetch(_) => "fetch_failed",
        PipelineError::Delivery(_) => "delivery_failed",
        PipelineError::TimedOut(_) => "timed_out",
    }
}

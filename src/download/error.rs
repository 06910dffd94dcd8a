//! Error taxonomy for the download-and-deliver pipeline.
//!
//! Each stage owns one enum. Only [`FetchError`], [`DeliveryError`] and the
//! request deadline abort a request; [`TranscodeError`] is always recovered
//! from by delivering the original artifact.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why an input was not accepted as a downloadable link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Not an absolute http(s) URL with a host.
    Malformed,
    /// The (resolved) host is not on the allow-list.
    UnsupportedDomain,
    /// A shortened link could not be resolved within the hop and time budget.
    RedirectTimeout,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Malformed => "malformed",
            RejectReason::UnsupportedDomain => "unsupported_domain",
            RejectReason::RedirectTimeout => "redirect_timeout",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("link rejected ({reason}): {detail}")]
pub struct ClassificationError {
    pub reason: RejectReason,
    pub detail: String,
}

impl ClassificationError {
    pub fn new(reason: RejectReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// Failure categories reported by the media fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// The extractor cannot handle the page (no media, private, removed, geo-blocked).
    UnsupportedContent,
    /// Transient connectivity problem; retried under the fetch policy.
    NetworkFailure,
    /// The extractor did not finish within its time budget.
    ExtractionTimeout,
    /// The remote side throttled us (HTTP 429, quota, rate limit).
    QuotaExceeded,
}

#[derive(Debug, Clone, Error)]
#[error("{}: {message}", .kind.subcategory())]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::UnsupportedContent, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::NetworkFailure, message)
    }
}

impl FetchErrorKind {
    /// Returns subcategory for metrics
    pub fn subcategory(&self) -> &'static str {
        match self {
            FetchErrorKind::UnsupportedContent => "unsupported_content",
            FetchErrorKind::NetworkFailure => "network_failure",
            FetchErrorKind::ExtractionTimeout => "extraction_timeout",
            FetchErrorKind::QuotaExceeded => "quota_exceeded",
        }
    }

    /// Message shown to the requester.
    pub fn user_message(&self) -> &'static str {
        match self {
            FetchErrorKind::UnsupportedContent => {
                "❌ Couldn't find downloadable media at that link.\n\nIt may be private, removed or region-locked."
            }
            FetchErrorKind::NetworkFailure => "❌ Network problem while downloading.\n\nPlease try again in a minute.",
            FetchErrorKind::ExtractionTimeout => "⌛ The download took too long and was stopped.",
            FetchErrorKind::QuotaExceeded => "❌ The site is rate-limiting downloads right now.\n\nPlease try again later.",
        }
    }
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("transcoder exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("transcoder produced no output at {0}")]
    NoOutput(String),

    #[error("transcoder could not start: {0}")]
    Spawn(String),

    #[error("transcoder timed out after {}s", .0.as_secs())]
    Timeout(Duration),
}

#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The transport refused the file because of its size.
    #[error("file too large for the transport: {0}")]
    PayloadTooLarge(String),

    /// The transport or upload target could not be reached.
    #[error("transport unreachable: {0}")]
    Unreachable(String),

    /// The transport answered with an error.
    #[error("transport rejected the request: {0}")]
    Rejected(String),

    /// The artifact could not be read for sending.
    #[error("could not read artifact: {0}")]
    Io(#[from] std::io::Error),
}

impl DeliveryError {
    pub fn subcategory(&self) -> &'static str {
        match self {
            DeliveryError::PayloadTooLarge(_) => "payload_too_large",
            DeliveryError::Unreachable(_) => "unreachable",
            DeliveryError::Rejected(_) => "rejected",
            DeliveryError::Io(_) => "io",
        }
    }
}

/// Terminal failure of one request.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Rejected(#[from] ClassificationError),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("delivery failed: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("request timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

impl PipelineError {
    /// Stage label used in logs and metrics.
    pub fn stage(&self) -> &'static str {
        match self {
            PipelineError::Rejected(_) => "classify",
            PipelineError::Fetch(_) => "fetch",
            PipelineError::Delivery(_) => "deliver",
            PipelineError::TimedOut(_) => "timeout",
        }
    }

    /// Message shown to the requester.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Rejected(e) => match e.reason {
                RejectReason::Malformed => "🔗 That doesn't look like a link. Send me a full http(s) URL.".to_string(),
                RejectReason::UnsupportedDomain => "🚫 Unsupported link: downloads from this site aren't enabled.".to_string(),
                RejectReason::RedirectTimeout => {
                    "🚫 Unsupported link: the short link couldn't be resolved.".to_string()
                }
            },
            PipelineError::Fetch(e) => e.kind.user_message().to_string(),
            PipelineError::Delivery(DeliveryError::PayloadTooLarge(_)) => {
                "❌ The file is too large to send here.".to_string()
            }
            PipelineError::Delivery(_) => "❌ Couldn't deliver the file. Please try again later.".to_string(),
            PipelineError::TimedOut(_) => "⌛ This request took too long and was cancelled.".to_string(),
        }
    }
}

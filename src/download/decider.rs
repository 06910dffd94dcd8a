//! Size-based delivery routing.
//!
//! The decision is a pure function of the artifact size and the configured
//! thresholds, so the same input always yields the same route.

use crate::core::error::ConfigError;
use serde::Serialize;
use std::fmt;

/// One mebibyte; thresholds are configured in these units.
pub const MB: u64 = 1024 * 1024;

/// The two size cut-offs that drive routing.
///
/// Construction enforces `small < large`, so a decision can never be ambiguous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeThresholds {
    small: u64,
    large: u64,
}

impl SizeThresholds {
    pub fn new(small_bytes: u64, large_bytes: u64) -> Result<Self, ConfigError> {
        if small_bytes >= large_bytes {
            return Err(ConfigError::ThresholdOrder {
                small: small_bytes,
                large: large_bytes,
            });
        }
        Ok(Self {
            small: small_bytes,
            large: large_bytes,
        })
    }

    pub fn from_megabytes(small_mb: u64, large_mb: u64) -> Result<Self, ConfigError> {
        Self::new(small_mb.saturating_mul(MB), large_mb.saturating_mul(MB))
    }

    /// Largest size still sent inline as a video.
    pub fn small(&self) -> u64 {
        self.small
    }

    /// Largest size still worth transcoding.
    pub fn large(&self) -> u64 {
        self.large
    }
}

impl Default for SizeThresholds {
    fn default() -> Self {
        Self {
            small: 50 * MB,
            large: 1000 * MB,
        }
    }
}

/// How a fetched artifact reaches the requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryRoute {
    /// Small enough to send as an inline video.
    Direct,
    /// Compress first, then send as a video.
    TranscodeThenSend,
    /// Too large to transcode; send as a generic file attachment.
    Document,
}

impl DeliveryRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryRoute::Direct => "direct",
            DeliveryRoute::TranscodeThenSend => "transcode",
            DeliveryRoute::Document => "document",
        }
    }
}

impl fmt::Display for DeliveryRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn decide(size_bytes: u64, thresholds: &SizeThresholds) -> DeliveryRoute {
    if size_bytes <= thresholds.small {
        DeliveryRoute::Direct
    } else if size_bytes <= thresholds.large {
        DeliveryRoute::TranscodeThenSend
    } else {
        DeliveryRoute::Document
    }
}

/// Human-readable size for chat messages and logs.
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b >= MB as f64 * 1024.0 {
        format!("{:.2} GB", b / (MB as f64 * 1024.0))
    } else if b >= MB as f64 {
        format!("{:.1} MB", b / MB as f64)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{} B", bytes)
    }
}

//! Configuration read from the environment.
//!
//! Process-level values (token, ports, paths) are `Lazy` statics read once.
//! Everything that steers a pipeline decision is snapshotted into an
//! immutable [`PipelineSettings`] at startup and passed explicitly.

use once_cell::sync::Lazy;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::conversion::video::{TranscodeQuality, TranscodeSettings};
use crate::core::error::ConfigError;
use crate::core::retry::RetryConfig;
use crate::download::classifier::ClassifierSettings;
use crate::download::decider::{SizeThresholds, MB};
use crate::download::fetcher::FetcherSettings;
use crate::storage::cloud::CloudSettings;

/// Cached yt-dlp binary path
/// Read once at startup from YTDL_BIN environment variable or defaults to "yt-dlp"
pub static YTDL_BIN: Lazy<String> = Lazy::new(|| env::var("YTDL_BIN").unwrap_or_else(|_| "yt-dlp".to_string()));

/// Cached ffmpeg binary path
pub static FFMPEG_BIN: Lazy<String> = Lazy::new(|| env::var("FFMPEG_BIN").unwrap_or_else(|_| "ffmpeg".to_string()));

/// Download folder path
/// Read from DOWNLOAD_FOLDER environment variable
/// Supports tilde (~) expansion for home directory
pub static DOWNLOAD_FOLDER: Lazy<String> =
    Lazy::new(|| env::var("DOWNLOAD_FOLDER").unwrap_or_else(|_| "downloads".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: app.log, empty disables the file sink
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "app.log".to_string()));

/// Log level (error/warn/info/debug/trace)
pub static LOG_LEVEL: Lazy<String> = Lazy::new(|| env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()));

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable
pub static BOT_TOKEN: Lazy<String> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .unwrap_or_else(|_| String::new())
});

/// Public base URL for Telegram webhook delivery
/// Read from WEBHOOK_URL environment variable
pub static WEBHOOK_URL: Lazy<Option<String>> =
    Lazy::new(|| env::var("WEBHOOK_URL").ok().filter(|v| !v.trim().is_empty()));

/// Port the webhook listener binds to
/// Read from PORT environment variable
/// Default: 8080
pub static PORT: Lazy<u16> = Lazy::new(|| env::var("PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8080));

/// Dispatcher restart policy
pub mod dispatcher {
    use super::Duration;

    /// Maximum number of dispatcher restarts before giving up
    pub const MAX_RESTARTS: u32 = 5;

    /// Base delay between restarts, doubled per attempt
    pub const RESTART_DELAY_SECS: u64 = 5;

    pub fn restart_delay(attempt: u32) -> Duration {
        Duration::from_secs(RESTART_DELAY_SECS.saturating_mul(2u64.saturating_pow(attempt)))
    }
}

/// Network configuration
pub mod network {
    use super::Duration;

    /// Request timeout for Bot API calls (in seconds)
    /// Large because uploads of big videos go through the same client
    pub const REQUEST_TIMEOUT_SECS: u64 = 900;

    pub fn timeout() -> Duration {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    }
}

/// Health and metrics server configuration
pub mod health {
    use once_cell::sync::Lazy;
    use std::env;

    /// Start the health server
    /// Read from HEALTH_ENABLED environment variable
    /// Default: true
    pub static ENABLED: Lazy<bool> = Lazy::new(|| {
        env::var("HEALTH_ENABLED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(true)
    });

    /// Port for the health HTTP server
    /// Read from HEALTH_PORT environment variable
    /// Default: 9090
    pub static PORT: Lazy<u16> = Lazy::new(|| {
        env::var("HEALTH_PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(9090)
    });
}

/// Bot API server configuration utilities
pub mod bot_api {
    /// Returns the BOT_API_URL environment variable if set.
    pub fn get_url() -> Option<String> {
        std::env::var("BOT_API_URL").ok().filter(|v| !v.trim().is_empty())
    }

    /// Returns true if using a local Bot API server (not api.telegram.org).
    pub fn is_local() -> bool {
        get_url().map(|url| !url.contains("api.telegram.org")).unwrap_or(false)
    }
}

/// Hosts the extractor is allowed to fetch from, unless ALLOWED_DOMAINS overrides it.
pub const DEFAULT_ALLOWED_DOMAINS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "youtube-nocookie.com",
    "vimeo.com",
    "tiktok.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "reddit.com",
    "v.redd.it",
    "facebook.com",
    "fb.watch",
    "twitch.tv",
    "dailymotion.com",
    "soundcloud.com",
    "streamable.com",
];

/// Link shorteners whose redirects are resolved before the allow-list check.
pub const DEFAULT_SHORTENER_DOMAINS: &[&str] = &[
    "bit.ly",
    "t.co",
    "tinyurl.com",
    "goo.gl",
    "ow.ly",
    "is.gd",
    "buff.ly",
    "rebrand.ly",
    "vm.tiktok.com",
    "vt.tiktok.com",
];

/// Where finished artifacts go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryTarget {
    /// Back into the chat as a video or document.
    #[default]
    Chat,
    /// Uploaded to the cloud target; the chat gets a link.
    Cloud,
}

impl FromStr for DeliveryTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chat" | "telegram" => Ok(DeliveryTarget::Chat),
            "cloud" => Ok(DeliveryTarget::Cloud),
            other => Err(format!("expected 'chat' or 'cloud', got '{}'", other)),
        }
    }
}

impl fmt::Display for DeliveryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryTarget::Chat => f.write_str("chat"),
            DeliveryTarget::Cloud => f.write_str("cloud"),
        }
    }
}

/// Every knob that influences how a request moves through the pipeline.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub thresholds: SizeThresholds,
    pub classifier: ClassifierSettings,
    pub fetcher: FetcherSettings,
    pub transcode: TranscodeSettings,
    /// Retry policy at the chat transport boundary.
    pub send_retry: RetryConfig,
    /// Deadline for one request, classification through cleanup.
    pub request_timeout: Duration,
    /// Worker pool size.
    pub max_concurrent: usize,
    pub delivery_target: DeliveryTarget,
    pub cloud: Option<CloudSettings>,
}

impl PipelineSettings {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Reads settings through an arbitrary lookup, so tests need not touch the environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let small_mb: u64 = parse_or(&get, "SMALL_THRESHOLD_MB", 50)?;
        let large_mb: u64 = parse_or(&get, "LARGE_THRESHOLD_MB", 1000)?;
        let thresholds = SizeThresholds::from_megabytes(small_mb, large_mb)?;

        let classifier = ClassifierSettings {
            allowed_domains: list_or(&get, "ALLOWED_DOMAINS", DEFAULT_ALLOWED_DOMAINS),
            shortener_domains: list_or(&get, "SHORTENER_DOMAINS", DEFAULT_SHORTENER_DOMAINS),
            max_redirect_hops: parse_or(&get, "MAX_REDIRECT_HOPS", 5)?,
            hop_timeout: Duration::from_secs(parse_or(&get, "REDIRECT_HOP_TIMEOUT_SECS", 5)?),
        };

        let download_dir = get("DOWNLOAD_FOLDER").unwrap_or_else(|| "downloads".to_string());
        let max_filesize_mb: Option<u64> = match get("YTDL_MAX_FILESIZE_MB") {
            Some(raw) => Some(parse_value("YTDL_MAX_FILESIZE_MB", &raw)?),
            None => None,
        };
        let fetch_retry = RetryConfig::new()
            .max_retries(parse_or(&get, "FETCH_MAX_RETRIES", 2)?)
            .initial_delay(Duration::from_secs(parse_or(&get, "FETCH_RETRY_DELAY_SECS", 3)?));

        let fetcher = FetcherSettings {
            ytdl_bin: get("YTDL_BIN").unwrap_or_else(|| "yt-dlp".to_string()),
            download_dir: PathBuf::from(shellexpand::tilde(&download_dir).into_owned()),
            format: get("YTDL_FORMAT").unwrap_or_else(|| "bestvideo*+bestaudio/best".to_string()),
            remux_format: match lookup("YTDL_REMUX_FORMAT") {
                Some(v) if v.trim().is_empty() => None,
                Some(v) => Some(v.trim().to_string()),
                None => Some("mp4".to_string()),
            },
            max_filesize_bytes: max_filesize_mb.map(|mb| mb.saturating_mul(MB)),
            extractor_retries: parse_or(&get, "YTDL_RETRIES", 3)?,
            socket_timeout: Duration::from_secs(parse_or(&get, "SOCKET_TIMEOUT_SECS", 30)?),
            extraction_timeout: Duration::from_secs(parse_or(&get, "EXTRACTION_TIMEOUT_SECS", 600)?),
            retry: fetch_retry,
        };

        let transcode = TranscodeSettings {
            ffmpeg_bin: get("FFMPEG_BIN").unwrap_or_else(|| "ffmpeg".to_string()),
            quality: TranscodeQuality {
                crf: parse_or(&get, "TRANSCODE_CRF", 28)?,
                preset: get("TRANSCODE_PRESET").unwrap_or_else(|| "veryfast".to_string()),
                audio_bitrate: get("TRANSCODE_AUDIO_BITRATE").unwrap_or_else(|| "128k".to_string()),
            },
            timeout: Duration::from_secs(parse_or(&get, "TRANSCODE_TIMEOUT_SECS", 900)?),
        };
        if transcode.quality.crf > 51 {
            return Err(ConfigError::InvalidValue {
                name: "TRANSCODE_CRF",
                value: transcode.quality.crf.to_string(),
                reason: "must be between 0 and 51".to_string(),
            });
        }

        let send_retry = RetryConfig::quick().max_retries(parse_or(&get, "SEND_MAX_RETRIES", 2)?);

        let max_concurrent: usize = parse_or(&get, "MAX_CONCURRENT_DOWNLOADS", 2)?;
        if max_concurrent == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_CONCURRENT_DOWNLOADS",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        let delivery_target: DeliveryTarget = parse_or(&get, "DELIVERY_TARGET", DeliveryTarget::Chat)?;
        let cloud = match get("CLOUD_UPLOAD_URL") {
            Some(raw) => {
                let upload_url = url::Url::parse(&raw).map_err(|e| ConfigError::InvalidValue {
                    name: "CLOUD_UPLOAD_URL",
                    value: raw.clone(),
                    reason: e.to_string(),
                })?;
                Some(CloudSettings {
                    upload_url,
                    field_name: get("CLOUD_UPLOAD_FIELD").unwrap_or_else(|| "file".to_string()),
                    token: get("CLOUD_UPLOAD_TOKEN"),
                    timeout: Duration::from_secs(parse_or(&get, "CLOUD_UPLOAD_TIMEOUT_SECS", 1800)?),
                })
            }
            None => None,
        };
        if delivery_target == DeliveryTarget::Cloud && cloud.is_none() {
            return Err(ConfigError::Missing("CLOUD_UPLOAD_URL"));
        }

        Ok(Self {
            thresholds,
            classifier,
            fetcher,
            transcode,
            send_retry,
            request_timeout: Duration::from_secs(parse_or(&get, "REQUEST_TIMEOUT_SECS", 1800)?),
            max_concurrent,
            delivery_target,
            cloud,
        })
    }

    /// Logs the effective configuration. Secrets are never printed.
    pub fn log_summary(&self) {
        log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        log::info!("Pipeline configuration");
        log::info!(
            "  thresholds: small={} MB, large={} MB",
            self.thresholds.small() / MB,
            self.thresholds.large() / MB
        );
        log::info!("  allowed domains: {}", self.classifier.allowed_domains.join(", "));
        log::info!(
            "  shorteners: {} (max {} hops, {:?}/hop)",
            self.classifier.shortener_domains.join(", "),
            self.classifier.max_redirect_hops,
            self.classifier.hop_timeout
        );
        log::info!(
            "  extractor: {} -f '{}' into {}",
            self.fetcher.ytdl_bin,
            self.fetcher.format,
            self.fetcher.download_dir.display()
        );
        log::info!(
            "  transcoder: {} crf={} preset={}",
            self.transcode.ffmpeg_bin,
            self.transcode.quality.crf,
            self.transcode.quality.preset
        );
        log::info!(
            "  workers={} request_timeout={:?} target={}",
            self.max_concurrent,
            self.request_timeout,
            self.delivery_target
        );
        if let Some(cloud) = &self.cloud {
            log::info!(
                "  cloud upload: {} (token {})",
                cloud.upload_url,
                if cloud.token.is_some() { "set" } else { "not set" }
            );
        }
        log::info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }
}

fn parse_value<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        name,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

fn parse_or<T, G>(get: &G, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}

fn list_or<G>(get: &G, name: &str, default: &[&str]) -> Vec<String>
where
    G: Fn(&str) -> Option<String>,
{
    match get(name) {
        Some(raw) => raw
            .split(',')
            .map(|d| d.trim().trim_end_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect(),
        None => default.iter().map(|d| d.to_string()).collect(),
    }
}

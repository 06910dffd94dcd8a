//! Classification of yt-dlp failures from its stderr output.

use crate::download::error::FetchErrorKind;

/// Maps yt-dlp stderr to a fetch failure category.
///
/// Order matters: throttling messages often also mention "unable to download",
/// and timeouts mention "connection", so the more specific checks run first.
pub fn analyze_ytdlp_error(stderr: &str) -> FetchErrorKind {
    let stderr_lower = stderr.to_lowercase();

    if stderr_lower.contains("http error 429")
        || stderr_lower.contains("too many requests")
        || stderr_lower.contains("rate-limit")
        || stderr_lower.contains("rate limit")
        || stderr_lower.contains("quota")
    {
        return FetchErrorKind::QuotaExceeded;
    }

    if stderr_lower.contains("unsupported url")
        || stderr_lower.contains("no video formats found")
        || stderr_lower.contains("requested format is not available")
        || stderr_lower.contains("private video")
        || stderr_lower.contains("video unavailable")
        || stderr_lower.contains("this video is not available")
        || stderr_lower.contains("video is private")
        || stderr_lower.contains("has been removed")
        || stderr_lower.contains("does not exist")
        || stderr_lower.contains("not available in your country")
        || stderr_lower.contains("sign in to confirm your age")
        || stderr_lower.contains("http error 404")
        || stderr_lower.contains("file is larger than max-filesize")
    {
        return FetchErrorKind::UnsupportedContent;
    }

    if stderr_lower.contains("timed out") || stderr_lower.contains("read timeout") {
        return FetchErrorKind::NetworkFailure;
    }

    if stderr_lower.contains("connection")
        || stderr_lower.contains("network")
        || stderr_lower.contains("socket")
        || stderr_lower.contains("dns")
        || stderr_lower.contains("name or service not known")
        || stderr_lower.contains("failed to connect")
        || stderr_lower.contains("temporary failure")
        || stderr_lower.contains("http error 5")
        || stderr_lower.contains("incomplete")
    {
        return FetchErrorKind::NetworkFailure;
    }

    // An unknown failure is reported, not retried.
    FetchErrorKind::UnsupportedContent
}

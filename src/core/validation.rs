//! URL and filename validation utilities
//!
//! Security-focused checks for user input:
//! - Link syntax (absolute http/https URL with a host)
//! - Host allow-list matching (exact host or any subdomain)
//! - Title sanitization before a title becomes a filename

use thiserror::Error;
use url::Url;

/// Longest sanitized title, in characters, kept in a filename.
pub const MAX_TITLE_CHARS: usize = 120;

/// Byte budget for the stem. Filesystems count name length in bytes (255 on
/// most), and the stem still gets a request-id suffix and an extension.
pub const MAX_TITLE_BYTES: usize = 200;

/// Validation errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// Not parseable as an absolute URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Parseable, but not http/https
    #[error("Unsupported scheme '{scheme}' in {url}")]
    UnsupportedScheme { url: String, scheme: String },

    /// No host component (e.g. `http:///path`)
    #[error("URL has no host: {0}")]
    MissingHost(String),
}

/// Parses a candidate link and checks the parts every download link needs.
///
/// No network access happens here.
///
/// # Examples
/// ```
/// use fetchgram::core::validation::parse_link;
///
/// assert!(parse_link("https://youtube.com/watch?v=dQw4w9WgXcQ").is_ok());
/// assert!(parse_link("ftp://youtube.com/video").is_err());
/// assert!(parse_link("not a url").is_err());
/// ```
pub fn parse_link(input: &str) -> Result<Url, ValidationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidUrl(trimmed.to_string()));
    }

    let parsed = Url::parse(trimmed).map_err(|_| ValidationError::InvalidUrl(trimmed.to_string()))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(ValidationError::UnsupportedScheme {
            url: trimmed.to_string(),
            scheme: parsed.scheme().to_string(),
        });
    }

    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(parsed),
        _ => Err(ValidationError::MissingHost(trimmed.to_string())),
    }
}

/// Lowercased host with any trailing root dot removed.
pub fn normalized_host(url: &Url) -> Option<String> {
    url.host_str()
        .map(|h| h.trim_end_matches('.').to_ascii_lowercase())
        .filter(|h| !h.is_empty())
}

/// True when `host` equals a listed domain or is a subdomain of one.
///
/// `evil-youtube.com` does not match `youtube.com`; `m.youtube.com` does.
pub fn host_matches(host: &str, domains: &[String]) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    domains.iter().any(|domain| {
        let domain = domain.trim_end_matches('.').to_ascii_lowercase();
        host == domain || host.strip_suffix(&domain).is_some_and(|rest| rest.ends_with('.'))
    })
}

/// Turns a media title into a safe filename stem.
///
/// Path separators, reserved characters and control characters become `_`,
/// double quotes become `'`, spaces become `_`, leading/trailing dots and
/// whitespace are dropped and the result is capped at [`MAX_TITLE_CHARS`]
/// characters and [`MAX_TITLE_BYTES`] bytes, cut on a char boundary.
/// An empty result becomes `unnamed`.
pub fn sanitize_title(title: &str) -> String {
    let mut result = String::with_capacity(title.len());

    for c in title.chars() {
        match c {
            '/' | '\\' => result.push('_'),
            ':' | '*' | '?' | '<' | '>' | '|' => result.push('_'),
            '"' => result.push('\''),
            c if c.is_control() => result.push('_'),
            _ => result.push(c),
        }
    }

    let trimmed = result.trim_matches(|c: char| c.is_whitespace() || c == '.');
    let joined = trimmed.split_whitespace().collect::<Vec<_>>().join("_");
    let mut capped = String::with_capacity(MAX_TITLE_BYTES);
    for c in joined.chars().take(MAX_TITLE_CHARS) {
        if capped.len() + c.len_utf8() > MAX_TITLE_BYTES {
            break;
        }
        capped.push(c);
    }
    let capped = capped.trim_end_matches('.');

    if capped.is_empty() {
        "unnamed".to_string()
    } else {
        capped.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn domains(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_link_accepts_http_and_https() {
        assert!(parse_link("https://youtube.com/watch?v=1").is_ok());
        assert!(parse_link("http://vimeo.com/123").is_ok());
        assert!(parse_link("  https://youtu.be/abc  ").is_ok());
    }

    #[test]
    fn test_parse_link_rejects_malformed() {
        assert!(matches!(parse_link(""), Err(ValidationError::InvalidUrl(_))));
        assert!(matches!(parse_link("hello world"), Err(ValidationError::InvalidUrl(_))));
        assert!(matches!(parse_link("youtube.com/watch"), Err(ValidationError::InvalidUrl(_))));
        assert!(matches!(
            parse_link("ftp://youtube.com/video"),
            Err(ValidationError::UnsupportedScheme { .. })
        ));
        assert!(matches!(
            parse_link("javascript:alert(1)"),
            Err(ValidationError::UnsupportedScheme { .. })
        ));
        assert!(parse_link("https://").is_err());
        assert!(parse_link("https://a.com/x https://b.com").is_err());
    }

    #[test]
    fn test_host_matching() {
        let allowed = domains(&["youtube.com", "youtu.be"]);
        assert!(host_matches("youtube.com", &allowed));
        assert!(host_matches("www.youtube.com", &allowed));
        assert!(host_matches("M.YouTube.com.", &allowed));
        assert!(host_matches("youtu.be", &allowed));
        assert!(!host_matches("evil-youtube.com", &allowed));
        assert!(!host_matches("youtube.com.evil.net", &allowed));
        assert!(!host_matches("example.com", &allowed));
        assert!(!host_matches("youtube.com", &[]));
    }

    #[test]
    fn test_normalized_host() {
        let url = Url::parse("https://WWW.Example.COM./path").unwrap();
        assert_eq!(normalized_host(&url).as_deref(), Some("www.example.com"));
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("My Title"), "My_Title");
        assert_eq!(sanitize_title("a/b\\c:d*e?f<g>h|i"), "a_b_c_d_e_f_g_h_i");
        assert_eq!(sanitize_title("say \"hi\""), "say_'hi'");
        assert_eq!(sanitize_title("  ..hidden.. "), "hidden");
        assert_eq!(sanitize_title("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(sanitize_title("tab\there"), "tab_here");
        assert_eq!(sanitize_title(""), "unnamed");
        assert_eq!(sanitize_title("..."), "unnamed");
    }

    #[test]
    fn test_sanitize_title_caps_length() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_title(&long).chars().count(), MAX_TITLE_CHARS);
    }

    #[test]
    fn test_sanitize_title_caps_multibyte_by_bytes() {
        let cjk = "日本語のタイトル".repeat(12);
        let stem = sanitize_title(&cjk);
        assert!(stem.len() <= MAX_TITLE_BYTES);
        assert!(cjk.starts_with(&stem));
        assert_eq!(stem.chars().count(), MAX_TITLE_BYTES / 3);

        let emoji = "🎬".repeat(100);
        let stem = sanitize_title(&emoji);
        assert!(stem.len() <= MAX_TITLE_BYTES);
        assert_eq!(stem.chars().count(), MAX_TITLE_BYTES / 4);
    }
}

use lazy_regex::regex;

/// Telegram rejects captions longer than this many characters.
pub const MAX_CAPTION_CHARS: usize = 1024;

/// Picks the part of a chat message that should be classified as a link.
///
/// Returns the first `http://` or `https://` token when the message has one,
/// otherwise the whole trimmed text (which the classifier will then reject
/// as malformed if it is not a link).
///
/// # Example
///
/// ```
/// use fetchgram::core::utils::extract_link_candidate;
///
/// assert_eq!(extract_link_candidate("look: https://youtu.be/x !"), "https://youtu.be/x");
/// assert_eq!(extract_link_candidate("  hello  "), "hello");
/// ```
pub fn extract_link_candidate(text: &str) -> &str {
    let re = regex!(r"(?i)https?://\S+");
    match re.find(text) {
        Some(m) => m.as_str().trim_end_matches(['.', ',', ')', '!', '?', '"', '\'', '>']),
        None => text.trim(),
    }
}

/// Cuts text to the caption limit on a character boundary, adding an ellipsis.
pub fn truncate_caption(text: &str) -> String {
    if text.chars().count() <= MAX_CAPTION_CHARS {
        return text.to_string();
    }
    let mut out: String = text.chars().take(MAX_CAPTION_CHARS - 1).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_link_candidate() {
        assert_eq!(
            extract_link_candidate("https://www.youtube.com/watch?v=abc"),
            "https://www.youtube.com/watch?v=abc"
        );
        assert_eq!(
            extract_link_candidate("check this (https://vimeo.com/1)."),
            "https://vimeo.com/1"
        );
        assert_eq!(
            extract_link_candidate("two: http://a.com/1 https://b.com/2"),
            "http://a.com/1"
        );
        assert_eq!(extract_link_candidate("HTTPS://X.COM/a"), "HTTPS://X.COM/a");
        assert_eq!(extract_link_candidate("no link here"), "no link here");
        assert_eq!(extract_link_candidate(""), "");
    }

    #[test]
    fn test_truncate_caption() {
        assert_eq!(truncate_caption("short"), "short");
        let long = "я".repeat(2000);
        let cut = truncate_caption(&long);
        assert_eq!(cut.chars().count(), MAX_CAPTION_CHARS);
        assert!(cut.ends_with('…'));
    }
}

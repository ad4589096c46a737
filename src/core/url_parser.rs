use std::sync::LazyLock;

use regex::Regex;

use super::error::DownloadError;
use crate::platforms::Platform;

static VIDEO_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedUrl {
    pub platform: Platform,
    /// Canonical form handed to the extractor.
    pub url: String,
    pub content_id: Option<String>,
}

/// Validates a user-supplied URL and rewrites known video links to their
/// canonical watch-page form, dropping query parameters unrelated to
/// identification.
pub fn normalize(input: &str) -> Result<ParsedUrl, DownloadError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DownloadError::InvalidInput("No URL provided".into()));
    }

    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let parsed = url::Url::parse(&with_scheme)
        .map_err(|e| DownloadError::InvalidInput(format!("Malformed URL '{}': {}", trimmed, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(DownloadError::InvalidInput(format!(
            "Unsupported URL scheme '{}'",
            parsed.scheme()
        )));
    }
    if parsed.host_str().map(|h| h.is_empty()).unwrap_or(true) {
        return Err(DownloadError::InvalidInput(format!("URL '{}' has no host", trimmed)));
    }

    match Platform::from_url(parsed.as_str()) {
        Platform::YouTube => {
            let id = youtube_video_id(&parsed).ok_or_else(|| {
                DownloadError::InvalidInput(format!("Could not find a video id in '{}'", trimmed))
            })?;
            Ok(ParsedUrl {
                platform: Platform::YouTube,
                url: format!("https://www.youtube.com/watch?v={}", id),
                content_id: Some(id),
            })
        }
        Platform::Other => Ok(ParsedUrl {
            platform: Platform::Other,
            url: parsed.to_string(),
            content_id: None,
        }),
    }
}

fn youtube_video_id(parsed: &url::Url) -> Option<String> {
    let host = parsed.host_str()?.to_lowercase();
    let segments: Vec<&str> = parsed.path().split('/').filter(|s| !s.is_empty()).collect();

    let candidate = if host == "youtu.be" || host.ends_with(".youtu.be") {
        segments.first().map(|s| s.to_string())
    } else {
        match segments.first() {
            Some(&"shorts") | Some(&"embed") | Some(&"live") | Some(&"v") => {
                segments.get(1).map(|s| s.to_string())
            }
            _ => parsed
                .query_pairs()
                .find(|(k, _)| k == "v")
                .map(|(_, v)| v.to_string()),
        }
    };

    candidate.filter(|id| VIDEO_ID_RE.is_match(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_link_becomes_watch_url_without_timestamp() {
        let parsed = normalize("https://youtu.be/abc123?t=5").unwrap();
        assert_eq!(parsed.url, "https://www.youtube.com/watch?v=abc123");
        assert_eq!(parsed.content_id.as_deref(), Some("abc123"));
        assert_eq!(parsed.platform, Platform::YouTube);
    }

    #[test]
    fn watch_url_drops_playlist_and_tracking_params() {
        let raw = "https://m.youtube.com/watch?v=dQw4w9WgXcQ&list=PL1&index=2&si=track";
        let parsed = normalize(raw).unwrap();
        assert_eq!(parsed.url, "https://www.youtube.com/watch?v=dQw4w9WgXcQ");
    }

    #[test]
    fn shorts_and_embed_are_canonicalised() {
        assert_eq!(
            normalize("https://www.youtube.com/shorts/xyz_987").unwrap().url,
            "https://www.youtube.com/watch?v=xyz_987"
        );
        assert_eq!(
            normalize("https://www.youtube-nocookie.com/embed/xyz_987?autoplay=1").unwrap().url,
            "https://www.youtube.com/watch?v=xyz_987"
        );
    }

    #[test]
    fn missing_scheme_is_assumed_https() {
        assert_eq!(
            normalize("youtu.be/abc123").unwrap().url,
            "https://www.youtube.com/watch?v=abc123"
        );
    }

    #[test]
    fn other_hosts_pass_through() {
        let parsed = normalize("https://vimeo.com/12345").unwrap();
        assert_eq!(parsed.platform, Platform::Other);
        assert_eq!(parsed.url, "https://vimeo.com/12345");
    }

    #[test]
    fn empty_and_malformed_inputs_are_invalid() {
        assert!(matches!(normalize("   "), Err(DownloadError::InvalidInput(_))));
        assert!(matches!(normalize("http://"), Err(DownloadError::InvalidInput(_))));
        assert!(matches!(normalize("ftp://example.com/a"), Err(DownloadError::InvalidInput(_))));
    }

    #[test]
    fn youtube_without_id_is_invalid() {
        assert!(matches!(
            normalize("https://www.youtube.com/feed/trending"),
            Err(DownloadError::InvalidInput(_))
        ));
    }
}

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use relayget_core::core::events::MediaKind;
use unicode_normalization::UnicodeNormalization;

static FORBIDDEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).unwrap());
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

const MAX_TITLE_CHARS: usize = 50;

pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "webm", "avi", "flv"];
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "opus", "ogg", "webm", "wav"];

/// Title cleaned for use in a `Content-Disposition` file name.
pub fn clean_title(title: &str, kind: MediaKind) -> String {
    let title: String = title.nfc().collect();
    let cleaned = FORBIDDEN_RE.replace_all(&title, "");
    let cleaned = WS_RE.replace_all(&cleaned, " ");
    let cleaned: String = cleaned
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .take(MAX_TITLE_CHARS)
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        kind.as_str().to_string()
    } else {
        cleaned.to_string()
    }
}

pub fn download_name(title: &str, kind: MediaKind, path: &Path) -> String {
    let ext = extension_of(path).unwrap_or_else(|| default_extension(kind).to_string());
    format!("{}.{}", clean_title(title, kind), ext)
}

/// ASCII fallback for the quoted `filename=` parameter.
pub fn ascii_fallback(name: &str) -> String {
    let ascii: String = name
        .chars()
        .map(|c| if c.is_ascii() && c != '"' && c != '\\' { c } else { '_' })
        .collect();
    sanitize_filename::sanitize(ascii)
}

pub fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

fn default_extension(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Video => "mp4",
        MediaKind::Audio => "mp3",
    }
}

pub fn mime_type(path: &Path, kind: MediaKind) -> &'static str {
    match (extension_of(path).as_deref(), kind) {
        (Some("webm"), MediaKind::Audio) => "audio/webm",
        (Some("webm"), MediaKind::Video) => "video/webm",
        (Some("mkv"), _) => "video/x-matroska",
        (Some("avi"), _) => "video/x-msvideo",
        (Some("flv"), _) => "video/x-flv",
        (Some("mp3"), _) => "audio/mpeg",
        (Some("m4a"), _) => "audio/mp4",
        (Some("opus"), _) => "audio/opus",
        (Some("ogg"), _) => "audio/ogg",
        (Some("wav"), _) => "audio/wav",
        (_, MediaKind::Audio) => "audio/mpeg",
        _ => "video/mp4",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn clean_title_strips_forbidden_chars() {
        assert_eq!(clean_title("a:b?c<d>", MediaKind::Video), "abcd");
    }

    #[test]
    fn clean_title_collapses_whitespace() {
        assert_eq!(clean_title("hello   \t world", MediaKind::Video), "hello world");
    }

    #[test]
    fn clean_title_truncates() {
        let long = "x".repeat(120);
        assert_eq!(clean_title(&long, MediaKind::Video).chars().count(), 50);
    }

    #[test]
    fn clean_title_falls_back_to_kind() {
        assert_eq!(clean_title("???", MediaKind::Audio), "audio");
        assert_eq!(clean_title("", MediaKind::Video), "video");
    }

    #[test]
    fn clean_title_unicode_nfc_normalization() {
        assert_eq!(clean_title("e\u{0301}", MediaKind::Video), "\u{00e9}");
    }

    #[test]
    fn download_name_keeps_artifact_extension() {
        let artifact = PathBuf::from("/tmp/x/clip.webm");
        let name = download_name("My Clip: Part 1", MediaKind::Video, &artifact);
        assert_eq!(name, "My Clip Part 1.webm");
    }

    #[test]
    fn ascii_fallback_replaces_quotes_and_unicode() {
        assert_eq!(ascii_fallback("caf\u{00e9} \"x\".mp4"), "caf_ _x_.mp4");
    }

    #[test]
    fn mime_by_extension() {
        assert_eq!(mime_type(Path::new("a.mkv"), MediaKind::Video), "video/x-matroska");
        assert_eq!(mime_type(Path::new("a.m4a"), MediaKind::Audio), "audio/mp4");
        assert_eq!(mime_type(Path::new("a.webm"), MediaKind::Audio), "audio/webm");
        assert_eq!(mime_type(Path::new("a"), MediaKind::Video), "video/mp4");
    }
}

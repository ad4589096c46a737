use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use relayget_core::core::events::MediaKind;

/// Metadata returned by the extractor's dry-run probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaProbe {
    pub title: String,
    pub duration_seconds: Option<f64>,
    pub is_live: bool,
    pub available_formats: Vec<FormatInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatInfo {
    pub format_id: String,
    pub ext: String,
    pub height: Option<u32>,
    pub has_video: bool,
    pub has_audio: bool,
    pub filesize: Option<u64>,
}

/// Everything one attempt hands to the extractor.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub kind: MediaKind,
    pub format_selector: String,
    pub player_client: String,
    pub skip_streaming_manifests: bool,
    pub user_agent: String,
    pub headers: Vec<(String, String)>,
    pub retries: u32,
    pub fragment_retries: u32,
    pub socket_timeout: Duration,
    pub sleep_between_requests: Option<Duration>,
    pub output_dir: PathBuf,
    pub output_template: String,
    pub proxy: Option<String>,
    pub geo_bypass: bool,
    pub skip_certificate_check: bool,
}

/// Byte-level progress reported by the extractor while transferring.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    Downloading {
        downloaded_bytes: Option<u64>,
        total_bytes: Option<u64>,
    },
    Finished,
}

#[derive(Debug, Clone, Default)]
pub struct TransferOutput {
    pub file_path: Option<PathBuf>,
    pub reported_bytes: Option<u64>,
}

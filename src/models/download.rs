use std::path::PathBuf;

use chrono::{DateTime, Utc};
use relayget_core::core::events::MediaKind;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub task_id: Uuid,
    pub url: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    RetriableFailure,
    FatalFailure,
}

/// One strategy execution, kept only for the orchestration report.
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    pub strategy_index: usize,
    pub strategy: String,
    pub identity_id: usize,
    pub fingerprint: String,
    pub started_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub error_detail: Option<String>,
}

/// Validated artifact handed to the web layer. The work directory is
/// removed when this value is dropped.
#[derive(Debug)]
pub struct Deliverable {
    pub task_id: Uuid,
    pub title: String,
    pub kind: MediaKind,
    pub path: PathBuf,
    pub size: u64,
    pub strategy: String,
    pub work_dir: TempDir,
}

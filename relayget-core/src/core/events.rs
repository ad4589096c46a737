use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Video,
    Audio,
}

impl MediaKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "" | "video" | "mp4" => Some(MediaKind::Video),
            "audio" | "mp3" => Some(MediaKind::Audio),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Starting,
    Analyzing,
    Downloading,
    Converting,
    Retrying,
    Complete,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Error)
    }
}

/// Point-in-time view of one download task, as relayed to progress observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSnapshot {
    pub task_id: Uuid,
    pub url: String,
    pub requested_kind: MediaKind,
    pub status: TaskStatus,
    pub progress_percent: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,
    pub attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub downloaded_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    /// Synthetic heartbeat emitted while a task is idle; never stored.
    #[serde(default)]
    pub keepalive: bool,
    pub created_at: DateTime<Utc>,
    pub last_update_at: DateTime<Utc>,
}

impl TaskSnapshot {
    pub fn new(task_id: Uuid, url: impl Into<String>, requested_kind: MediaKind) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            url: url.into(),
            requested_kind,
            status: TaskStatus::Starting,
            progress_percent: 0.0,
            message: "Starting download".to_string(),
            title: None,
            strategy: None,
            attempt: 0,
            downloaded_bytes: None,
            total_bytes: None,
            keepalive: false,
            created_at: now,
            last_update_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !self.keepalive && self.status.is_terminal()
    }

    pub fn to_keepalive(&self) -> Self {
        let mut beat = self.clone();
        beat.keepalive = true;
        beat.last_update_at = Utc::now();
        beat
    }
}

/// Sink for task progress. Publishing must never block the caller.
pub trait EventEmitter: Send + Sync + 'static {
    fn emit_snapshot(&self, snapshot: &TaskSnapshot);
    fn close(&self, task_id: Uuid);
}

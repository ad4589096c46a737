//! Scripted collaborators for exercising the download pipeline without
//! spawning yt-dlp.

use std::collections::VecDeque;
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use relayget_core::core::events::{EventEmitter, TaskSnapshot, TaskStatus};
use relayget_core::models::settings::{default_strategies, AppSettings};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::strategy::StrategyCatalog;
use crate::models::media::{MediaProbe, RequestConfig, TransferEvent, TransferOutput};
use crate::platforms::traits::MediaExtractor;

pub fn settings() -> AppSettings {
    let mut settings = AppSettings::default();
    let t = &mut settings.timing;
    t.local_min_delay_secs = 0.0;
    t.local_max_delay_secs = 0.0;
    t.hosted_min_delay_secs = 0.0;
    t.hosted_max_delay_secs = 0.0;
    t.emergency_min_delay_secs = 0.0;
    t.emergency_max_delay_secs = 0.0;
    settings.rate_limit.limit = 1_000;
    settings.progress.throttle_ms = 0;
    settings.progress.idle_keepalive_ms = 50;
    settings
}

pub fn catalog() -> StrategyCatalog {
    StrategyCatalog::from_settings(&default_strategies()).unwrap()
}

#[derive(Debug, Clone)]
pub enum Step {
    Deliver {
        bytes: usize,
        ext: &'static str,
        report_path: bool,
        reported: Option<u64>,
    },
    FailProbe(String),
    FailTransfer(String),
    /// Transfer "succeeds" without writing anything.
    Nothing,
}

impl Step {
    pub fn deliver(bytes: usize, ext: &'static str) -> Self {
        Step::Deliver {
            bytes,
            ext,
            report_path: true,
            reported: None,
        }
    }

    pub fn fail_probe(message: &str) -> Self {
        Step::FailProbe(message.to_string())
    }

    pub fn fail_transfer(message: &str) -> Self {
        Step::FailTransfer(message.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub url: String,
    pub player_client: String,
    pub user_agent: String,
    pub forwarded_for: Option<String>,
}

/// Plays one step per attempt, in order.
pub struct ScriptedExtractor {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedExtractor {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaExtractor for ScriptedExtractor {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn probe(&self, url: &str, config: &RequestConfig) -> anyhow::Result<MediaProbe> {
        self.calls.lock().unwrap().push(Call {
            url: url.to_string(),
            player_client: config.player_client.clone(),
            user_agent: config.user_agent.clone(),
            forwarded_for: config
                .headers
                .iter()
                .find(|(k, _)| k == "X-Forwarded-For")
                .map(|(_, v)| v.clone()),
        });

        let mut steps = self.steps.lock().unwrap();
        if let Some(Step::FailProbe(message)) = steps.front().cloned() {
            steps.pop_front();
            return Err(anyhow!(message));
        }
        Ok(MediaProbe {
            title: "Scripted: clip".to_string(),
            duration_seconds: Some(3.0),
            is_live: false,
            available_formats: Vec::new(),
        })
    }

    async fn transfer(
        &self,
        _url: &str,
        config: &RequestConfig,
        progress: mpsc::Sender<TransferEvent>,
    ) -> anyhow::Result<TransferOutput> {
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Deliver {
                bytes,
                ext,
                report_path,
                reported,
            }) => {
                let path = config.output_dir.join(format!("clip.{}", ext));
                tokio::fs::write(&path, vec![7u8; bytes]).await?;
                let _ = progress
                    .send(TransferEvent::Downloading {
                        downloaded_bytes: Some(bytes as u64 / 2),
                        total_bytes: Some(bytes as u64),
                    })
                    .await;
                let _ = progress.send(TransferEvent::Finished).await;
                Ok(TransferOutput {
                    file_path: report_path.then_some(path),
                    reported_bytes: reported.or(report_path.then_some(bytes as u64)),
                })
            }
            Some(Step::FailTransfer(message)) => {
                let _ = progress
                    .send(TransferEvent::Downloading {
                        downloaded_bytes: Some(10),
                        total_bytes: Some(100),
                    })
                    .await;
                Err(anyhow!(message))
            }
            Some(Step::Nothing) => {
                let _ = progress.send(TransferEvent::Finished).await;
                Ok(TransferOutput::default())
            }
            Some(Step::FailProbe(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("script exhausted")),
        }
    }
}

#[derive(Default)]
pub struct RecordingEmitter {
    seen: Mutex<Vec<TaskSnapshot>>,
    closed: Mutex<Vec<Uuid>>,
}

impl RecordingEmitter {
    pub fn snapshots(&self) -> Vec<TaskSnapshot> {
        self.seen.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<TaskStatus> {
        self.snapshots().iter().map(|s| s.status).collect()
    }

    pub fn closed(&self) -> Vec<Uuid> {
        self.closed.lock().unwrap().clone()
    }
}

impl EventEmitter for RecordingEmitter {
    fn emit_snapshot(&self, snapshot: &TaskSnapshot) {
        self.seen.lock().unwrap().push(snapshot.clone());
    }

    fn close(&self, task_id: Uuid) {
        self.closed.lock().unwrap().push(task_id);
    }
}

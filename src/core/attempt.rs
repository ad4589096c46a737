//! One strategy, one identity, one try.
//!
//! The executor waits out the timing delay, probes the media, runs the
//! transfer while relaying byte counters into the task's progress, then
//! validates the artifact on disk. Every failure comes back as a value;
//! nothing here decides which tier runs next.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use relayget_core::core::events::MediaKind;
use relayget_core::models::settings::{Environment, LoggingSettings, ValidationSettings};
use tokio::io::AsyncSeekExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::classify::{self, AttemptOutcome};
use super::error::DownloadError;
use super::filename::{AUDIO_EXTENSIONS, VIDEO_EXTENSIONS};
use super::identity::Identity;
use super::progress::ProgressTracker;
use super::strategy::Strategy;
use super::timing::{TimingContext, TimingPolicy};
use crate::models::media::{RequestConfig, TransferEvent, TransferOutput};
use crate::platforms::traits::MediaExtractor;

const TRANSFER_EVENT_BUFFER: usize = 64;
const PROBE_TIMEOUT_FACTOR: u32 = 2;

#[derive(Debug, Clone)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: u64,
    pub title: String,
}

/// Tagged result of one attempt; the orchestrator switches on the tag.
#[derive(Debug)]
pub enum AttemptResult {
    Success(Artifact),
    Retriable(DownloadError),
    Fatal(DownloadError),
}

impl AttemptResult {
    fn from_error(err: DownloadError) -> Self {
        match classify::outcome_of(&err) {
            AttemptOutcome::RetriableFailure => AttemptResult::Retriable(err),
            _ => AttemptResult::Fatal(err),
        }
    }

    pub fn outcome(&self) -> AttemptOutcome {
        match self {
            AttemptResult::Success(_) => AttemptOutcome::Success,
            AttemptResult::Retriable(_) => AttemptOutcome::RetriableFailure,
            AttemptResult::Fatal(_) => AttemptOutcome::FatalFailure,
        }
    }
}

pub struct AttemptPlan<'a> {
    pub task_id: Uuid,
    pub url: &'a str,
    pub kind: MediaKind,
    pub strategy: &'a Strategy,
    pub strategy_index: usize,
    pub identity: &'a Identity,
    pub fingerprint: &'a str,
    pub work_dir: &'a Path,
}

pub struct AttemptExecutor {
    extractor: Arc<dyn MediaExtractor>,
    timing: Arc<TimingPolicy>,
    environment: Environment,
    validation: ValidationSettings,
    logging: LoggingSettings,
    transfer_deadline: Duration,
    proxy: Option<String>,
}

impl AttemptExecutor {
    pub fn new(
        extractor: Arc<dyn MediaExtractor>,
        timing: Arc<TimingPolicy>,
        environment: Environment,
        validation: ValidationSettings,
        logging: LoggingSettings,
        transfer_deadline: Duration,
        proxy: Option<String>,
    ) -> Self {
        Self {
            extractor,
            timing,
            environment,
            validation,
            logging,
            transfer_deadline,
            proxy,
        }
    }

    pub async fn run(
        &self,
        plan: &AttemptPlan<'_>,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
    ) -> AttemptResult {
        match self.try_run(plan, tracker, cancel).await {
            Ok(artifact) => {
                if self.logging.log_successful_identities {
                    tracing::info!(
                        "[attempt] {} succeeded on '{}' with identity #{} ({}) fp={}",
                        plan.task_id,
                        plan.strategy.name,
                        plan.identity.id,
                        plan.identity.synthetic_address,
                        plan.fingerprint
                    );
                }
                AttemptResult::Success(artifact)
            }
            Err(err) => {
                let result = AttemptResult::from_error(err);
                if self.logging.log_failed_attempts {
                    if let AttemptResult::Retriable(e) | AttemptResult::Fatal(e) = &result {
                        tracing::warn!(
                            "[attempt] {} failed on '{}' with identity #{} fp={} ({:?}): {}",
                            plan.task_id,
                            plan.strategy.name,
                            plan.identity.id,
                            plan.fingerprint,
                            result.outcome(),
                            e
                        );
                    }
                }
                result
            }
        }
    }

    async fn try_run(
        &self,
        plan: &AttemptPlan<'_>,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<Artifact, DownloadError> {
        let delay = self.timing.delay_for(TimingContext {
            environment: self.environment,
            attempt_index: plan.strategy_index,
        });
        if !delay.is_zero() {
            tracing::debug!(
                "[attempt] waiting {:.1}s before '{}'",
                delay.as_secs_f64(),
                plan.strategy.name
            );
        }
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }

        let config = plan
            .strategy
            .request_config(plan.identity, plan.kind, plan.work_dir, self.proxy.clone());

        tracker.analyzing();
        let probe_deadline = plan.strategy.timeout * PROBE_TIMEOUT_FACTOR;
        let probing = tokio::time::timeout(probe_deadline, self.extractor.probe(plan.url, &config));
        let probe = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
            res = probing => match res {
                Ok(Ok(probe)) => probe,
                Ok(Err(e)) => return Err(classify::classify_error(&e)),
                Err(_) => return Err(DownloadError::Extraction(format!(
                    "metadata probe timed out after {}s",
                    probe_deadline.as_secs()
                ))),
            },
        };
        if probe.is_live {
            return Err(DownloadError::Extraction("live streams cannot be downloaded".into()));
        }
        tracker.set_title(&probe.title);

        let output = self.transfer(plan, &config, tracker, cancel).await?;

        tracker.converting();
        let path = match output.file_path.clone().filter(|p| p.is_file()) {
            Some(path) => path,
            None => locate_artifact(plan.work_dir, plan.kind)
                .await?
                .ok_or(DownloadError::NoArtifactFound)?,
        };
        let size = self.validate(&path, plan.kind, &output).await?;

        Ok(Artifact {
            path,
            size,
            title: probe.title,
        })
    }

    async fn transfer(
        &self,
        plan: &AttemptPlan<'_>,
        config: &RequestConfig,
        tracker: &mut ProgressTracker,
        cancel: &CancellationToken,
    ) -> Result<TransferOutput, DownloadError> {
        let (tx, mut rx) = mpsc::channel::<TransferEvent>(TRANSFER_EVENT_BUFFER);
        let transfer = self.extractor.transfer(plan.url, config, tx);
        tokio::pin!(transfer);
        let deadline = tokio::time::sleep(self.transfer_deadline);
        tokio::pin!(deadline);

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                _ = &mut deadline => {
                    return Err(DownloadError::Extraction(format!(
                        "transfer exceeded {}s deadline",
                        self.transfer_deadline.as_secs()
                    )));
                }
                res = &mut transfer => break res,
                Some(event) = rx.recv() => tracker.on_transfer(&event),
            }
        };
        while let Ok(event) = rx.try_recv() {
            tracker.on_transfer(&event);
        }
        result.map_err(|e| classify::classify_error(&e))
    }

    /// Size floor per kind, then a second size read through a fresh handle
    /// that must agree with what the transfer reported.
    async fn validate(
        &self,
        path: &Path,
        kind: MediaKind,
        output: &TransferOutput,
    ) -> Result<u64, DownloadError> {
        let size = tokio::fs::metadata(path).await?.len();
        let minimum = match kind {
            MediaKind::Video => self.validation.min_video_bytes,
            MediaKind::Audio => self.validation.min_audio_bytes,
        };
        if size < minimum {
            return Err(DownloadError::ArtifactTooSmall { size, minimum });
        }

        let mut file = tokio::fs::File::open(path).await?;
        let actual = file.seek(SeekFrom::End(0)).await?;
        let reported = output.reported_bytes.unwrap_or(size);
        if actual != reported {
            return Err(DownloadError::ArtifactSizeMismatch { reported, actual });
        }
        Ok(actual)
    }
}

fn is_partial(name: &str) -> bool {
    name.starts_with('.')
        || name.ends_with(".part")
        || name.ends_with(".ytdl")
        || name.contains(".part-Frag")
}

/// Picks the finished media file in `dir`, by extension preference and
/// then by size.
pub async fn locate_artifact(
    dir: &Path,
    kind: MediaKind,
) -> Result<Option<PathBuf>, DownloadError> {
    let preference = match kind {
        MediaKind::Video => VIDEO_EXTENSIONS,
        MediaKind::Audio => AUDIO_EXTENSIONS,
    };

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut best: Option<(usize, u64, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        if is_partial(&name) {
            continue;
        }
        let meta = entry.metadata().await?;
        if !meta.is_file() {
            continue;
        }
        let Some(rank) = super::filename::extension_of(&path)
            .and_then(|ext| preference.iter().position(|p| *p == ext))
        else {
            continue;
        };
        let better = match &best {
            None => true,
            Some((best_rank, best_size, _)) => {
                rank < *best_rank || (rank == *best_rank && meta.len() > *best_size)
            }
        };
        if better {
            best = Some((rank, meta.len(), path));
        }
    }
    Ok(best.map(|(_, _, path)| path))
}

//! Fallback state machine over the strategy catalog.
//!
//! `PENDING -> ANALYZING -> ATTEMPTING(i) -> SUCCEEDED | ATTEMPTING(i+1) | FAILED`
//!
//! Tiers run strictly in catalog order, one attempt at a time per task.
//! Access denials and missing artifacts advance to the next tier with a
//! fresh identity; validation failures re-run the same tier until its retry
//! budget is spent; anything else ends the task.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use relayget_core::core::events::EventEmitter;
use relayget_core::models::settings::{AppSettings, Environment};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::attempt::{AttemptExecutor, AttemptPlan, AttemptResult};
use super::error::DownloadError;
use super::identity::{session_fingerprint, IdentityCooldowns, IdentityPool};
use super::progress::ProgressTracker;
use super::rate_limit::RateLimiter;
use super::strategy::StrategyCatalog;
use super::timing::TimingPolicy;
use super::url_parser;
use crate::core::http_client;
use crate::models::download::{AttemptRecord, Deliverable, DownloadRequest};
use crate::platforms::traits::MediaExtractor;

/// Shared, process-wide collaborators injected into every orchestration.
pub struct OrchestratorDeps {
    pub catalog: Arc<StrategyCatalog>,
    pub executor: Arc<AttemptExecutor>,
    pub publisher: Arc<dyn EventEmitter>,
    pub limiter: Arc<RateLimiter>,
    pub timing: Arc<TimingPolicy>,
    pub pool: Arc<IdentityPool>,
    pub cooldowns: Arc<IdentityCooldowns>,
    pub work_root: PathBuf,
    pub throttle_ms: u64,
}

/// Cheap to clone; each inbound request drives its own orchestration.
#[derive(Clone)]
pub struct Orchestrator {
    catalog: Arc<StrategyCatalog>,
    executor: Arc<AttemptExecutor>,
    publisher: Arc<dyn EventEmitter>,
    limiter: Arc<RateLimiter>,
    timing: Arc<TimingPolicy>,
    pool: Arc<IdentityPool>,
    cooldowns: Arc<IdentityCooldowns>,
    work_root: PathBuf,
    throttle_ms: u64,
}

pub struct OrchestrationReport {
    pub task_id: Uuid,
    pub attempts: Vec<AttemptRecord>,
    pub result: Result<Deliverable, DownloadError>,
}

impl OrchestrationReport {
    /// Tier indices in the order they were entered.
    pub fn strategy_trace(&self) -> Vec<usize> {
        let mut trace: Vec<usize> = self.attempts.iter().map(|a| a.strategy_index).collect();
        trace.dedup();
        trace
    }
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> Self {
        Self {
            catalog: deps.catalog,
            executor: deps.executor,
            publisher: deps.publisher,
            limiter: deps.limiter,
            timing: deps.timing,
            pool: deps.pool,
            cooldowns: deps.cooldowns,
            work_root: deps.work_root,
            throttle_ms: deps.throttle_ms,
        }
    }

    /// Builds the shared components from settings.
    pub fn from_settings(
        settings: &AppSettings,
        environment: Environment,
        extractor: Arc<dyn MediaExtractor>,
        publisher: Arc<dyn EventEmitter>,
        work_root: PathBuf,
    ) -> anyhow::Result<Self> {
        let catalog = Arc::new(StrategyCatalog::from_settings(&settings.strategies)?);
        let timing = Arc::new(TimingPolicy::new(settings.timing.clone()));
        let executor = Arc::new(AttemptExecutor::new(
            extractor,
            timing.clone(),
            environment,
            settings.validation.clone(),
            settings.logging.clone(),
            Duration::from_secs(settings.server.transfer_deadline_secs),
            http_client::proxy_url(&settings.proxy),
        ));
        let pool = Arc::new(IdentityPool::new(settings.identities.clone()));
        tracing::debug!(
            "[orchestrator] {} strategies, {} identities, work root {}",
            catalog.names().len(),
            pool.len(),
            work_root.display()
        );
        Ok(Self::new(OrchestratorDeps {
            catalog,
            executor,
            publisher,
            limiter: Arc::new(RateLimiter::new(&settings.rate_limit)),
            cooldowns: Arc::new(IdentityCooldowns::new(timing.identity_cooldown())),
            timing,
            pool,
            work_root,
            throttle_ms: settings.progress.throttle_ms,
        }))
    }

    pub fn catalog(&self) -> &StrategyCatalog {
        &self.catalog
    }

    pub async fn run(
        &self,
        request: DownloadRequest,
        cancel: CancellationToken,
    ) -> Result<Deliverable, DownloadError> {
        self.execute(request, cancel).await.result
    }

    /// Runs one task to completion. The only errors it reports are
    /// `InvalidInput`, `AllStrategiesExhausted` and `Cancelled`.
    pub async fn execute(
        &self,
        request: DownloadRequest,
        cancel: CancellationToken,
    ) -> OrchestrationReport {
        let task_id = request.task_id;
        let mut tracker = ProgressTracker::new(
            task_id,
            &request.url,
            request.kind,
            self.publisher.clone(),
            self.throttle_ms,
        );
        tracker.starting();

        let mut attempts = Vec::new();
        let result = self.drive(&request, &mut tracker, &mut attempts, &cancel).await;
        let result = result.map_err(|err| {
            if err.is_final() {
                err
            } else {
                DownloadError::AllStrategiesExhausted {
                    attempted: tiers_attempted(&attempts),
                    last_error: err.to_string(),
                }
            }
        });
        match &result {
            Ok(deliverable) => {
                tracing::info!(
                    "[orchestrator] {} complete via '{}' after {} attempt(s): {} ({} bytes)",
                    task_id,
                    deliverable.strategy,
                    attempts.len(),
                    deliverable.title,
                    deliverable.size
                );
                tracker.complete("Download complete");
            }
            Err(err) => {
                tracing::error!("[orchestrator] {} failed: {}", task_id, err);
                tracker.fail(err.to_string());
            }
        }

        OrchestrationReport {
            task_id,
            attempts,
            result,
        }
    }

    async fn drive(
        &self,
        request: &DownloadRequest,
        tracker: &mut ProgressTracker,
        attempts: &mut Vec<AttemptRecord>,
        cancel: &CancellationToken,
    ) -> Result<Deliverable, DownloadError> {
        let task_id = request.task_id;
        let parsed = url_parser::normalize(&request.url)?;
        tracker.set_url(&parsed.url);
        tracing::info!(
            "[orchestrator] {} accepted {} {} ({})",
            task_id,
            request.kind,
            parsed.url,
            parsed.platform
        );

        let work_dir = self.create_work_dir().await.map_err(|e| {
            tracing::error!(
                "[orchestrator] {} cannot use work root {}: {}",
                task_id,
                self.work_root.display(),
                e
            );
            DownloadError::AllStrategiesExhausted {
                attempted: 0,
                last_error: format!("could not create work directory: {}", e),
            }
        })?;

        let mut used_identities: HashSet<usize> = HashSet::new();
        let mut last_error: Option<DownloadError> = None;
        let mut index = 0;

        'tiers: while let Some(strategy) = self.catalog.get(index) {
            let mut sub_tries = 0;
            loop {
                if cancel.is_cancelled() {
                    return Err(DownloadError::Cancelled);
                }
                self.limiter.acquire(cancel).await?;

                let mut excluded = self.cooldowns.blocked_for(task_id);
                excluded.extend(used_identities.iter().copied());
                let identity = self.pool.acquire_excluding(
                    self.pool.favor_successful(),
                    Some(strategy.client_variant),
                    &excluded,
                );
                used_identities.insert(identity.id);
                self.cooldowns.mark_used(identity.id, task_id);

                let fingerprint = session_fingerprint(&parsed.url);
                tracker.begin_attempt(attempts.len() as u32 + 1, &strategy.name);
                tracing::info!(
                    "[orchestrator] {} tier {} '{}' (client={}, <= {}p) identity #{} {} {}x{} fp={}",
                    task_id,
                    index,
                    strategy.name,
                    strategy.client_variant.as_str(),
                    strategy.quality_ceiling.height(),
                    identity.id,
                    identity.platform,
                    identity.screen.0,
                    identity.screen.1,
                    fingerprint
                );

                let started_at = Utc::now();
                let plan = AttemptPlan {
                    task_id,
                    url: &parsed.url,
                    kind: request.kind,
                    strategy,
                    strategy_index: index,
                    identity: &identity,
                    fingerprint: &fingerprint,
                    work_dir: work_dir.path(),
                };
                let result = self.executor.run(&plan, tracker, cancel).await;
                attempts.push(AttemptRecord {
                    strategy_index: index,
                    strategy: strategy.name.clone(),
                    identity_id: identity.id,
                    fingerprint,
                    started_at,
                    outcome: result.outcome(),
                    error_detail: match &result {
                        AttemptResult::Retriable(e) | AttemptResult::Fatal(e) => {
                            Some(e.to_string())
                        }
                        AttemptResult::Success(_) => None,
                    },
                });

                match result {
                    AttemptResult::Success(artifact) => {
                        self.pool.record_outcome(identity.id, true);
                        self.timing.record_success();
                        return Ok(Deliverable {
                            task_id,
                            title: artifact.title,
                            kind: request.kind,
                            path: artifact.path,
                            size: artifact.size,
                            strategy: strategy.name.clone(),
                            work_dir,
                        });
                    }
                    AttemptResult::Fatal(DownloadError::Cancelled) => {
                        return Err(DownloadError::Cancelled);
                    }
                    AttemptResult::Fatal(err) => {
                        self.timing.record_failure();
                        last_error = Some(err);
                        break 'tiers;
                    }
                    AttemptResult::Retriable(err) => {
                        self.pool.record_outcome(identity.id, false);
                        self.timing.record_failure();
                        clear_dir(work_dir.path()).await;

                        if err.is_validation_failure() && sub_tries < strategy.retry_budget {
                            sub_tries += 1;
                            tracker.reset_for_retry(format!(
                                "{}; retrying '{}' ({}/{})",
                                err, strategy.name, sub_tries, strategy.retry_budget
                            ));
                            last_error = Some(err);
                            continue;
                        }

                        if self.catalog.is_last(index) {
                            last_error = Some(err);
                            break 'tiers;
                        }
                        let next = self
                            .catalog
                            .get(index + 1)
                            .map(|s| s.name.clone())
                            .unwrap_or_default();
                        tracker.reset_for_retry(format!(
                            "Strategy '{}' failed ({}); retrying with '{}'",
                            strategy.name, err, next
                        ));
                        last_error = Some(err);
                        index += 1;
                        continue 'tiers;
                    }
                }
            }
        }

        Err(DownloadError::AllStrategiesExhausted {
            attempted: tiers_attempted(attempts),
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no strategies configured".to_string()),
        })
    }

    async fn create_work_dir(&self) -> std::io::Result<tempfile::TempDir> {
        tokio::fs::create_dir_all(&self.work_root).await?;
        tempfile::Builder::new()
            .prefix("relayget_")
            .tempdir_in(&self.work_root)
    }
}

fn tiers_attempted(attempts: &[AttemptRecord]) -> usize {
    attempts
        .iter()
        .map(|a| a.strategy_index)
        .collect::<HashSet<_>>()
        .len()
}

async fn clear_dir(dir: &Path) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return,
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let removed = if path.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        if let Err(e) = removed {
            tracing::debug!("[orchestrator] could not remove {}: {}", path.display(), e);
        }
    }
}

//! Per-task progress mailboxes.
//!
//! The orchestrator is the single writer of a mailbox and publishing never
//! blocks it: when a mailbox is full, intermediate snapshots are dropped and
//! a terminal snapshot overwrites the newest queued one. One subscriber
//! drains the mailbox; a resubscription first replays the latest known
//! snapshot. A mailbox disappears once its terminal snapshot has been
//! drained, or after a grace period if nobody drains it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::Stream;
use relayget_core::core::events::{EventEmitter, MediaKind, TaskSnapshot, TaskStatus};
use relayget_core::models::settings::ProgressSettings;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::models::media::TransferEvent;

/// Percent shown when a task restarts on a lower tier.
pub const RETRY_RESET_PERCENT: f64 = 5.0;

const ANALYZING_PERCENT: f64 = 5.0;
const TRANSFER_START_PERCENT: f64 = 10.0;
const TRANSFER_END_PERCENT: f64 = 90.0;
const CONVERTING_PERCENT: f64 = 95.0;

struct Mailbox {
    queue: VecDeque<TaskSnapshot>,
    latest: Option<TaskSnapshot>,
    closed_at: Option<Instant>,
    created_at: Instant,
}

struct MailboxHandle {
    state: Mutex<Mailbox>,
    notify: Notify,
}

impl MailboxHandle {
    fn new() -> Self {
        Self {
            state: Mutex::new(Mailbox {
                queue: VecDeque::new(),
                latest: None,
                closed_at: None,
                created_at: Instant::now(),
            }),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Mailbox> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

pub struct ProgressHub {
    mailboxes: Mutex<HashMap<Uuid, Arc<MailboxHandle>>>,
    capacity: usize,
    idle_keepalive: Duration,
    grace: Duration,
}

impl ProgressHub {
    pub fn new(settings: &ProgressSettings) -> Self {
        Self {
            mailboxes: Mutex::new(HashMap::new()),
            capacity: settings.mailbox_capacity.max(1),
            idle_keepalive: Duration::from_millis(settings.idle_keepalive_ms.max(1)),
            grace: Duration::from_secs(settings.reap_grace_secs),
        }
    }

    fn map(&self) -> MutexGuard<'_, HashMap<Uuid, Arc<MailboxHandle>>> {
        match self.mailboxes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn mailbox(&self, task_id: Uuid) -> Arc<MailboxHandle> {
        self.map()
            .entry(task_id)
            .or_insert_with(|| Arc::new(MailboxHandle::new()))
            .clone()
    }

    /// Best-effort enqueue; never blocks and never fails.
    pub fn publish(&self, snapshot: TaskSnapshot) {
        let handle = self.mailbox(snapshot.task_id);
        {
            let mut mailbox = handle.lock();
            if mailbox.closed_at.is_some() {
                tracing::debug!("[progress] dropping update for closed task {}", snapshot.task_id);
                return;
            }
            let terminal = snapshot.is_terminal();
            if mailbox.queue.len() >= self.capacity {
                if !terminal {
                    tracing::trace!(
                        "[progress] mailbox full for {}, update dropped",
                        snapshot.task_id
                    );
                    mailbox.latest = Some(snapshot);
                    return;
                }
                mailbox.queue.pop_back();
            }
            mailbox.queue.push_back(snapshot.clone());
            mailbox.latest = Some(snapshot);
            if terminal {
                mailbox.closed_at = Some(Instant::now());
            }
        }
        handle.notify.notify_one();
    }

    pub fn close(&self, task_id: Uuid) {
        let handle = match self.map().get(&task_id) {
            Some(h) => h.clone(),
            None => return,
        };
        {
            let mut mailbox = handle.lock();
            if mailbox.closed_at.is_none() {
                mailbox.closed_at = Some(Instant::now());
            }
        }
        handle.notify.notify_one();
    }

    pub fn active_mailboxes(&self) -> usize {
        self.map().len()
    }

    /// Lazy sequence of snapshots for one task. Ends after a terminal
    /// snapshot, when the mailbox is closed and empty, or when nothing was
    /// ever published within the grace period. Idle periods yield
    /// keepalive snapshots instead of ending.
    pub fn subscribe(
        self: &Arc<Self>,
        task_id: Uuid,
    ) -> impl Stream<Item = TaskSnapshot> + Send + 'static {
        let subscription = Subscription {
            hub: self.clone(),
            mailbox: self.mailbox(task_id),
            task_id,
            replay_latest: true,
            finished: false,
        };
        futures::stream::unfold(subscription, |mut sub| async move {
            let snapshot = sub.next_snapshot().await?;
            Some((snapshot, sub))
        })
    }

    /// Frees mailboxes that were closed, or never written, longer ago than
    /// the grace period. Returns how many were removed.
    pub fn reap_expired(&self) -> usize {
        let now = Instant::now();
        let mut map = self.map();
        let before = map.len();
        map.retain(|_, handle| {
            let mailbox = handle.lock();
            let expired = match mailbox.closed_at {
                Some(closed) => now.duration_since(closed) >= self.grace,
                None => {
                    mailbox.latest.is_none()
                        && now.duration_since(mailbox.created_at) >= self.grace
                }
            };
            !expired
        });
        let removed = before - map.len();
        if removed > 0 {
            tracing::debug!("[progress] reaped {} idle mailbox(es)", removed);
        }
        removed
    }

    fn forget_if_current(&self, task_id: Uuid, mailbox: &Arc<MailboxHandle>) {
        let mut map = self.map();
        if map.get(&task_id).is_some_and(|current| Arc::ptr_eq(current, mailbox)) {
            map.remove(&task_id);
        }
    }
}

impl EventEmitter for ProgressHub {
    fn emit_snapshot(&self, snapshot: &TaskSnapshot) {
        self.publish(snapshot.clone());
    }

    fn close(&self, task_id: Uuid) {
        ProgressHub::close(self, task_id);
    }
}

struct Subscription {
    hub: Arc<ProgressHub>,
    mailbox: Arc<MailboxHandle>,
    task_id: Uuid,
    replay_latest: bool,
    finished: bool,
}

impl Subscription {
    async fn next_snapshot(&mut self) -> Option<TaskSnapshot> {
        loop {
            if self.finished {
                return None;
            }

            let keepalive_base = {
                let mut mailbox = self.mailbox.lock();
                if let Some(snapshot) = mailbox.queue.pop_front() {
                    self.replay_latest = false;
                    drop(mailbox);
                    return Some(self.deliver(snapshot));
                }
                if self.replay_latest {
                    self.replay_latest = false;
                    if let Some(latest) = mailbox.latest.clone() {
                        drop(mailbox);
                        return Some(self.deliver(latest));
                    }
                }
                let abandoned =
                    mailbox.latest.is_none() && mailbox.created_at.elapsed() >= self.hub.grace;
                if mailbox.closed_at.is_some() || abandoned {
                    if abandoned {
                        tracing::debug!(
                            "[progress] no updates for {}, ending stream",
                            self.task_id
                        );
                    }
                    self.finished = true;
                    drop(mailbox);
                    self.hub.forget_if_current(self.task_id, &self.mailbox);
                    return None;
                }
                mailbox.latest.clone()
            };

            let idle = self.hub.idle_keepalive;
            if tokio::time::timeout(idle, self.mailbox.notify.notified()).await.is_err() {
                let base = keepalive_base.unwrap_or_else(|| {
                    TaskSnapshot::new(self.task_id, String::new(), MediaKind::Video)
                });
                return Some(base.to_keepalive());
            }
        }
    }

    fn deliver(&mut self, snapshot: TaskSnapshot) -> TaskSnapshot {
        if snapshot.is_terminal() {
            self.finished = true;
            self.hub.forget_if_current(self.task_id, &self.mailbox);
        }
        snapshot
    }
}

pub struct ProgressThrottle {
    last_emit: Instant,
    min_interval: Duration,
}

impl ProgressThrottle {
    pub fn new(min_interval_ms: u64) -> Self {
        let min_interval = Duration::from_millis(min_interval_ms);
        Self {
            last_emit: Instant::now().checked_sub(min_interval).unwrap_or_else(Instant::now),
            min_interval,
        }
    }

    pub fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.last_emit) >= self.min_interval {
            self.last_emit = now;
            true
        } else {
            false
        }
    }
}

/// Owns the live view of one task and writes it to the emitter at phase
/// boundaries. Percent never decreases except through `reset_for_retry`.
pub struct ProgressTracker {
    snapshot: TaskSnapshot,
    emitter: Arc<dyn EventEmitter>,
    throttle: ProgressThrottle,
}

impl ProgressTracker {
    pub fn new(
        task_id: Uuid,
        url: &str,
        kind: MediaKind,
        emitter: Arc<dyn EventEmitter>,
        throttle_ms: u64,
    ) -> Self {
        Self {
            snapshot: TaskSnapshot::new(task_id, url, kind),
            emitter,
            throttle: ProgressThrottle::new(throttle_ms),
        }
    }

    pub fn snapshot(&self) -> &TaskSnapshot {
        &self.snapshot
    }

    pub fn set_url(&mut self, url: &str) {
        self.snapshot.url = url.to_string();
    }

    pub fn begin_attempt(&mut self, attempt: u32, strategy: &str) {
        self.snapshot.attempt = attempt;
        self.snapshot.strategy = Some(strategy.to_string());
    }

    pub fn set_title(&mut self, title: &str) {
        self.snapshot.title = Some(title.to_string());
    }

    pub fn update(&mut self, status: TaskStatus, percent: f64, message: impl Into<String>) {
        self.snapshot.status = status;
        let percent = percent.clamp(0.0, 100.0);
        self.snapshot.progress_percent = self.snapshot.progress_percent.max(percent);
        self.snapshot.message = message.into();
        self.emit();
    }

    pub fn starting(&mut self) {
        self.update(TaskStatus::Starting, 0.0, "Starting download");
    }

    pub fn analyzing(&mut self) {
        self.update(TaskStatus::Analyzing, ANALYZING_PERCENT, "Analyzing media");
    }

    pub fn converting(&mut self) {
        self.update(TaskStatus::Converting, CONVERTING_PERCENT, "Finalizing file");
    }

    pub fn reset_for_retry(&mut self, message: impl Into<String>) {
        self.snapshot.status = TaskStatus::Retrying;
        self.snapshot.progress_percent = RETRY_RESET_PERCENT;
        self.snapshot.downloaded_bytes = None;
        self.snapshot.total_bytes = None;
        self.snapshot.message = message.into();
        self.emit();
    }

    pub fn on_transfer(&mut self, event: &TransferEvent) {
        match event {
            TransferEvent::Downloading {
                downloaded_bytes,
                total_bytes,
            } => {
                self.snapshot.downloaded_bytes = *downloaded_bytes;
                if total_bytes.is_some() {
                    self.snapshot.total_bytes = *total_bytes;
                }
                let percent = match (downloaded_bytes, self.snapshot.total_bytes) {
                    (Some(done), Some(total)) if total > 0 => {
                        let fraction = (*done as f64 / total as f64).min(1.0);
                        let span = TRANSFER_END_PERCENT - TRANSFER_START_PERCENT;
                        TRANSFER_START_PERCENT + fraction * span
                    }
                    _ => TRANSFER_START_PERCENT,
                };
                let first = self.snapshot.status != TaskStatus::Downloading;
                if first || self.throttle.should_emit() {
                    self.update(TaskStatus::Downloading, percent, "Downloading");
                } else {
                    self.snapshot.progress_percent = self.snapshot.progress_percent.max(percent);
                }
            }
            TransferEvent::Finished => {
                self.update(TaskStatus::Downloading, TRANSFER_END_PERCENT, "Download finished");
            }
        }
    }

    pub fn complete(&mut self, message: impl Into<String>) {
        self.update(TaskStatus::Complete, 100.0, message);
        self.emitter.close(self.snapshot.task_id);
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.snapshot.status = TaskStatus::Error;
        self.snapshot.message = message.into();
        self.emit();
        self.emitter.close(self.snapshot.task_id);
    }

    fn emit(&mut self) {
        self.snapshot.last_update_at = Utc::now();
        self.emitter.emit_snapshot(&self.snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn settings(capacity: usize, idle_ms: u64) -> ProgressSettings {
        ProgressSettings {
            mailbox_capacity: capacity,
            idle_keepalive_ms: idle_ms,
            reap_grace_secs: 300,
            throttle_ms: 0,
        }
    }

    fn no_grace(capacity: usize, idle_ms: u64) -> ProgressSettings {
        ProgressSettings {
            reap_grace_secs: 0,
            ..settings(capacity, idle_ms)
        }
    }

    fn snap(task_id: Uuid, status: TaskStatus, percent: f64) -> TaskSnapshot {
        let url = "https://www.youtube.com/watch?v=abc123";
        let mut s = TaskSnapshot::new(task_id, url, MediaKind::Video);
        s.status = status;
        s.progress_percent = percent;
        s
    }

    #[tokio::test]
    async fn subscriber_sees_publication_order_and_ends_on_terminal() {
        let hub = Arc::new(ProgressHub::new(&settings(16, 5_000)));
        let id = Uuid::new_v4();
        hub.publish(snap(id, TaskStatus::Starting, 0.0));
        hub.publish(snap(id, TaskStatus::Downloading, 40.0));
        hub.publish(snap(id, TaskStatus::Complete, 100.0));

        let seen: Vec<TaskSnapshot> = hub.subscribe(id).collect().await;
        let statuses: Vec<TaskStatus> = seen.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![TaskStatus::Starting, TaskStatus::Downloading, TaskStatus::Complete]
        );
        assert_eq!(hub.active_mailboxes(), 0);
    }

    #[tokio::test]
    async fn publish_after_subscribe_wakes_the_subscriber() {
        let hub = Arc::new(ProgressHub::new(&settings(16, 5_000)));
        let id = Uuid::new_v4();
        let mut stream = Box::pin(hub.subscribe(id));

        let writer = hub.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.publish(snap(id, TaskStatus::Analyzing, 5.0));
            writer.publish(snap(id, TaskStatus::Error, 5.0));
        });

        assert_eq!(stream.next().await.unwrap().status, TaskStatus::Analyzing);
        assert_eq!(stream.next().await.unwrap().status, TaskStatus::Error);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn idle_subscription_emits_keepalive() {
        let hub = Arc::new(ProgressHub::new(&settings(16, 30)));
        let id = Uuid::new_v4();
        hub.publish(snap(id, TaskStatus::Downloading, 20.0));

        let mut stream = Box::pin(hub.subscribe(id));
        let first = stream.next().await.unwrap();
        assert!(!first.keepalive);
        let beat = stream.next().await.unwrap();
        assert!(beat.keepalive);
        assert_eq!(beat.status, TaskStatus::Downloading);
    }

    #[tokio::test]
    async fn full_mailbox_drops_updates_but_keeps_terminal() {
        let hub = Arc::new(ProgressHub::new(&settings(2, 5_000)));
        let id = Uuid::new_v4();
        for pct in [10.0, 20.0, 30.0, 40.0] {
            hub.publish(snap(id, TaskStatus::Downloading, pct));
        }
        hub.publish(snap(id, TaskStatus::Complete, 100.0));

        let seen: Vec<TaskSnapshot> = hub.subscribe(id).collect().await;
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].progress_percent, 10.0);
        assert_eq!(seen.last().unwrap().status, TaskStatus::Complete);
    }

    #[tokio::test]
    async fn closed_mailbox_ends_without_terminal() {
        let hub = Arc::new(ProgressHub::new(&settings(8, 5_000)));
        let id = Uuid::new_v4();
        hub.publish(snap(id, TaskStatus::Downloading, 50.0));
        hub.close(id);
        hub.publish(snap(id, TaskStatus::Downloading, 60.0));

        let seen: Vec<TaskSnapshot> = hub.subscribe(id).collect().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].progress_percent, 50.0);
    }

    #[tokio::test]
    async fn resubscribe_replays_latest() {
        let hub = Arc::new(ProgressHub::new(&settings(8, 5_000)));
        let id = Uuid::new_v4();
        hub.publish(snap(id, TaskStatus::Downloading, 30.0));
        {
            let mut first = Box::pin(hub.subscribe(id));
            assert_eq!(first.next().await.unwrap().progress_percent, 30.0);
        }
        let mut second = Box::pin(hub.subscribe(id));
        assert_eq!(second.next().await.unwrap().progress_percent, 30.0);
    }

    #[test]
    fn undrained_terminal_mailboxes_are_reaped() {
        let hub = ProgressHub::new(&no_grace(8, 5_000));
        let id = Uuid::new_v4();
        hub.publish(snap(id, TaskStatus::Error, 0.0));
        assert_eq!(hub.active_mailboxes(), 1);
        assert_eq!(hub.reap_expired(), 1);
        assert_eq!(hub.active_mailboxes(), 0);
    }

    #[tokio::test]
    async fn unknown_task_stream_ends_after_grace() {
        let hub = Arc::new(ProgressHub::new(&no_grace(8, 20)));
        let id = Uuid::new_v4();

        let drain = hub.subscribe(id).collect::<Vec<TaskSnapshot>>();
        let seen = tokio::time::timeout(Duration::from_secs(5), drain)
            .await
            .expect("stream for an unknown task kept running");
        assert!(seen.is_empty());
        assert_eq!(hub.active_mailboxes(), 0);
    }

    #[tokio::test]
    async fn drained_task_resubscription_ends_after_grace() {
        let hub = Arc::new(ProgressHub::new(&no_grace(8, 20)));
        let id = Uuid::new_v4();
        hub.publish(snap(id, TaskStatus::Complete, 100.0));
        let first: Vec<TaskSnapshot> = hub.subscribe(id).collect().await;
        assert_eq!(first.len(), 1);

        let drain = hub.subscribe(id).collect::<Vec<TaskSnapshot>>();
        let again = tokio::time::timeout(Duration::from_secs(5), drain)
            .await
            .expect("stream for a drained task kept running");
        assert!(again.is_empty());
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<TaskSnapshot>>,
        closed: Mutex<Vec<Uuid>>,
    }

    impl EventEmitter for Recorder {
        fn emit_snapshot(&self, snapshot: &TaskSnapshot) {
            self.seen.lock().unwrap().push(snapshot.clone());
        }

        fn close(&self, task_id: Uuid) {
            self.closed.lock().unwrap().push(task_id);
        }
    }

    #[test]
    fn tracker_percent_is_monotonic_within_attempt() {
        let recorder = Arc::new(Recorder::default());
        let id = Uuid::new_v4();
        let mut tracker = ProgressTracker::new(id, "u", MediaKind::Video, recorder.clone(), 0);
        tracker.analyzing();
        for (done, total) in [(50, 100), (20, 100), (80, 100)] {
            tracker.on_transfer(&TransferEvent::Downloading {
                downloaded_bytes: Some(done),
                total_bytes: Some(total),
            });
        }
        tracker.converting();
        tracker.complete("done");

        let seen = recorder.seen.lock().unwrap();
        let percents: Vec<f64> = seen.iter().map(|s| s.progress_percent).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
        assert_eq!(*percents.last().unwrap(), 100.0);
        assert_eq!(recorder.closed.lock().unwrap().as_slice(), &[id]);
    }

    #[test]
    fn retry_resets_to_small_positive_value() {
        let recorder = Arc::new(Recorder::default());
        let mut tracker =
            ProgressTracker::new(Uuid::new_v4(), "u", MediaKind::Audio, recorder.clone(), 0);
        tracker.on_transfer(&TransferEvent::Downloading {
            downloaded_bytes: Some(90),
            total_bytes: Some(100),
        });
        tracker.reset_for_retry("Retrying with fallback");
        let last = recorder.seen.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.status, TaskStatus::Retrying);
        assert_eq!(last.progress_percent, RETRY_RESET_PERCENT);
    }
}

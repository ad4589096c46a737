use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::RngExt;
use relayget_core::models::settings::RateLimitSettings;
use tokio_util::sync::CancellationToken;

use super::error::DownloadError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Delay(Duration),
}

#[derive(Debug)]
struct RateWindow {
    window_start: Instant,
    count: u32,
    limit: u32,
    window_duration: Duration,
    blocked_until: Option<Instant>,
}

/// Process-wide fixed-window gate on acquisition attempts.
///
/// Resets are lazy: the window is recomputed on the next `admit` call.
pub struct RateLimiter {
    window: Mutex<RateWindow>,
    backoff_min: Duration,
    backoff_max: Duration,
}

impl RateLimiter {
    pub fn new(settings: &RateLimitSettings) -> Self {
        Self {
            window: Mutex::new(RateWindow {
                window_start: Instant::now(),
                count: 0,
                limit: settings.limit.max(1),
                window_duration: Duration::from_secs(settings.window_secs.max(1)),
                blocked_until: None,
            }),
            backoff_min: Duration::from_secs(settings.backoff_min_secs),
            backoff_max: Duration::from_secs(
                settings.backoff_max_secs.max(settings.backoff_min_secs),
            ),
        }
    }

    pub fn admit(&self) -> Admission {
        self.admit_at(Instant::now())
    }

    fn admit_at(&self, now: Instant) -> Admission {
        let mut window = match self.window.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(until) = window.blocked_until {
            if now < until {
                return Admission::Delay(until - now);
            }
            window.blocked_until = None;
            window.window_start = now;
            window.count = 0;
        }

        if now.duration_since(window.window_start) >= window.window_duration {
            window.window_start = now;
            window.count = 0;
        }

        if window.count < window.limit {
            window.count += 1;
            return Admission::Admitted;
        }

        let backoff = self.random_backoff();
        window.blocked_until = Some(now + backoff);
        tracing::warn!(
            "[ratelimit] {} attempts within {:?}, backing off {:.1}s",
            window.count,
            window.window_duration,
            backoff.as_secs_f64()
        );
        Admission::Delay(backoff)
    }

    fn random_backoff(&self) -> Duration {
        if self.backoff_max <= self.backoff_min {
            return self.backoff_min;
        }
        let low = self.backoff_min.as_millis() as u64;
        let high = self.backoff_max.as_millis() as u64;
        let ms = rand::rng().random_range(low..=high);
        Duration::from_millis(ms)
    }

    /// Suspends until admitted or the token is cancelled.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), DownloadError> {
        loop {
            match self.admit() {
                Admission::Admitted => return Ok(()),
                Admission::Delay(wait) => {
                    tracing::info!(
                        "[ratelimit] waiting {:.1}s before next attempt",
                        wait.as_secs_f64()
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = cancel.cancelled() => return Err(DownloadError::Cancelled),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(&RateLimitSettings::default())
    }

    #[test]
    fn fourth_admission_in_window_is_delayed() {
        let limiter = limiter();
        let start = Instant::now();
        for i in 0..3 {
            assert_eq!(limiter.admit_at(start + Duration::from_secs(i)), Admission::Admitted);
        }
        match limiter.admit_at(start + Duration::from_secs(4)) {
            Admission::Delay(d) => assert!(d >= Duration::from_secs(30), "delay {d:?}"),
            Admission::Admitted => panic!("fourth call must not be admitted"),
        }
    }

    #[test]
    fn window_resets_lazily_after_it_elapses() {
        let limiter = limiter();
        let start = Instant::now();
        for _ in 0..3 {
            assert_eq!(limiter.admit_at(start), Admission::Admitted);
        }
        assert_eq!(limiter.admit_at(start + Duration::from_secs(10)), Admission::Admitted);
    }

    #[test]
    fn callers_inside_backoff_get_remaining_wait() {
        let limiter = limiter();
        let start = Instant::now();
        for _ in 0..3 {
            limiter.admit_at(start);
        }
        let first = match limiter.admit_at(start) {
            Admission::Delay(d) => d,
            Admission::Admitted => panic!("expected delay"),
        };
        match limiter.admit_at(start + Duration::from_secs(5)) {
            Admission::Delay(d) => assert_eq!(d, first - Duration::from_secs(5)),
            Admission::Admitted => panic!("still backing off"),
        }
        assert_eq!(limiter.admit_at(start + first), Admission::Admitted);
    }

    #[test]
    fn backoff_stays_within_configured_range() {
        let limiter = limiter();
        for _ in 0..100 {
            let d = limiter.random_backoff();
            assert!(d >= Duration::from_secs(30) && d <= Duration::from_secs(60));
        }
    }

    #[tokio::test]
    async fn acquire_observes_cancellation() {
        let limiter = RateLimiter::new(&RateLimitSettings {
            limit: 1,
            window_secs: 60,
            backoff_min_secs: 30,
            backoff_max_secs: 30,
        });
        let token = CancellationToken::new();
        limiter.acquire(&token).await.unwrap();

        token.cancel();
        let err = limiter.acquire(&token).await.unwrap_err();
        assert!(matches!(err, DownloadError::Cancelled));
    }
}

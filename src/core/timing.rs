use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::RngExt;
use relayget_core::models::settings::{Environment, TimingSettings};

#[derive(Debug, Clone, Copy)]
pub struct TimingContext {
    pub environment: Environment,
    pub attempt_index: usize,
}

/// Inter-request delays with jitter, widened per fallback tier and
/// escalated to the emergency range after repeated failures.
pub struct TimingPolicy {
    settings: TimingSettings,
    consecutive_failures: AtomicU32,
}

impl TimingPolicy {
    pub fn new(settings: TimingSettings) -> Self {
        Self {
            settings,
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn delay_for(&self, ctx: TimingContext) -> Duration {
        let (min, max) = self.range_for(ctx);
        if !self.settings.jitter || max <= min {
            return Duration::from_secs_f64(min);
        }
        Duration::from_secs_f64(rand::rng().random_range(min..=max))
    }

    /// The `(min, max)` window in seconds that `delay_for` samples from.
    pub fn range_for(&self, ctx: TimingContext) -> (f64, f64) {
        let s = &self.settings;
        let (base_min, base_max) = if self.in_emergency() {
            (s.emergency_min_delay_secs, s.emergency_max_delay_secs)
        } else {
            match ctx.environment {
                Environment::Local => (s.local_min_delay_secs, s.local_max_delay_secs),
                Environment::Hosted => (s.hosted_min_delay_secs, s.hosted_max_delay_secs),
            }
        };
        let scale = 1.0 + s.escalation_factor * ctx.attempt_index as f64;
        (base_min * scale, base_max * scale)
    }

    pub fn identity_cooldown(&self) -> Duration {
        Duration::from_secs(self.settings.identity_cooldown_secs)
    }

    pub fn in_emergency(&self) -> bool {
        let threshold = self.settings.max_consecutive_failures;
        threshold > 0 && self.consecutive_failures.load(Ordering::Relaxed) >= threshold
    }

    pub fn record_failure(&self) -> u32 {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures == self.settings.max_consecutive_failures {
            tracing::warn!(
                "[timing] {} consecutive failures, switching to emergency delays",
                failures
            );
        }
        failures
    }

    pub fn record_success(&self) {
        let previous = self.consecutive_failures.swap(0, Ordering::Relaxed);
        let threshold = self.settings.max_consecutive_failures;
        if threshold > 0 && previous >= threshold {
            tracing::info!("[timing] leaving emergency mode after a successful attempt");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(environment: Environment, attempt_index: usize) -> TimingContext {
        TimingContext {
            environment,
            attempt_index,
        }
    }

    #[test]
    fn delay_stays_inside_local_range() {
        let policy = TimingPolicy::new(TimingSettings::default());
        for _ in 0..200 {
            let d = policy.delay_for(ctx(Environment::Local, 0)).as_secs_f64();
            assert!((1.0..=3.0).contains(&d), "delay {d} out of range");
        }
    }

    #[test]
    fn hosted_is_slower_than_local() {
        let policy = TimingPolicy::new(TimingSettings::default());
        let (local_min, local_max) = policy.range_for(ctx(Environment::Local, 0));
        let (hosted_min, hosted_max) = policy.range_for(ctx(Environment::Hosted, 0));
        assert!(hosted_min > local_min);
        assert!(hosted_max > local_max);
    }

    #[test]
    fn later_tiers_wait_longer() {
        let policy = TimingPolicy::new(TimingSettings::default());
        let (min0, max0) = policy.range_for(ctx(Environment::Local, 0));
        let (min2, max2) = policy.range_for(ctx(Environment::Local, 2));
        assert!(min2 > min0);
        assert!(max2 > max0);
        assert_eq!((min2, max2), (2.0, 6.0));
    }

    #[test]
    fn emergency_after_consecutive_failures() {
        let policy = TimingPolicy::new(TimingSettings::default());
        for _ in 0..3 {
            policy.record_failure();
        }
        assert!(policy.in_emergency());
        let (min, _) = policy.range_for(ctx(Environment::Local, 0));
        assert_eq!(min, 20.0);

        policy.record_success();
        assert!(!policy.in_emergency());
    }

    #[test]
    fn jitter_disabled_returns_lower_bound() {
        let settings = TimingSettings {
            jitter: false,
            ..TimingSettings::default()
        };
        let policy = TimingPolicy::new(settings);
        assert_eq!(policy.delay_for(ctx(Environment::Hosted, 0)), Duration::from_secs(5));
    }

    #[test]
    fn cooldown_comes_from_settings() {
        let policy = TimingPolicy::new(TimingSettings::default());
        assert_eq!(policy.identity_cooldown(), Duration::from_secs(3600));
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rand::RngExt;
use relayget_core::models::settings::{ClientVariant, IdentitySettings};
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const DESKTOP_AGENTS: &[(&str, &str)] = &[
    (
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
        "Windows",
    ),
    (
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:122.0) Gecko/20100101 Firefox/122.0",
        "Windows",
    ),
    (
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36",
        "macOS",
    ),
    (
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.3.1 Safari/605.1.15",
        "macOS",
    ),
];

const MOBILE_AGENTS: &[(&str, &str, ClientVariant)] = &[
    (
        "Mozilla/5.0 (iPhone; CPU iPhone OS 17_3 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.3 Mobile/15E148 Safari/604.1",
        "iOS",
        ClientVariant::Mweb,
    ),
    (
        "Mozilla/5.0 (iPad; CPU OS 17_3 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.3 Mobile/15E148 Safari/604.1",
        "iOS",
        ClientVariant::Mweb,
    ),
    (
        "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Mobile Safari/537.36",
        "Android",
        ClientVariant::Android,
    ),
];

const LOCALES: &[&str] = &["en-US", "en-GB"];

const SCREENS: &[(u32, u32)] = &[(1920, 1080), (1366, 768), (1440, 900)];

/// First octets of large consumer ISP allocations.
const ISP_FIRST_OCTETS: &[u8] = &[24, 50, 67, 68, 71, 73, 76, 98, 99, 108, 174, 184];

#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub id: usize,
    pub user_agent: String,
    pub locale: String,
    pub client_variant: ClientVariant,
    pub synthetic_address: String,
    pub platform: String,
    pub screen: (u32, u32),
    pub success_score: i32,
}

/// Catalog of simulated client fingerprints shared by every task.
pub struct IdentityPool {
    identities: Mutex<Vec<Identity>>,
    settings: IdentitySettings,
}

impl IdentityPool {
    pub fn new(settings: IdentitySettings) -> Self {
        let addresses =
            synthetic_addresses(settings.address_pool_size.max(1), settings.simulate_isp_ranges);
        let mut identities = Vec::new();

        let mut push = |user_agent: &str, platform: &str, variant: ClientVariant, locale: &str| {
            let id = identities.len();
            let screen = SCREENS[id % SCREENS.len()];
            identities.push(Identity {
                id,
                user_agent: user_agent.to_string(),
                locale: locale.to_string(),
                client_variant: variant,
                synthetic_address: addresses[id % addresses.len()].clone(),
                platform: platform.to_string(),
                screen,
                success_score: 0,
            });
        };

        for locale in LOCALES {
            for (ua, platform) in DESKTOP_AGENTS {
                push(ua, platform, ClientVariant::Web, locale);
            }
            for (ua, platform, variant) in MOBILE_AGENTS {
                push(ua, platform, *variant, locale);
            }
        }

        Self {
            identities: Mutex::new(identities),
            settings,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn favor_successful(&self) -> bool {
        self.settings.favor_successful
    }

    pub fn acquire(&self, favor_successful: bool) -> Identity {
        self.acquire_excluding(favor_successful, None, &HashSet::new())
    }

    /// Draws an identity outside `excluded`, preferring ones tagged with
    /// `variant`. Freshness wins over the tag: a non-excluded identity of
    /// another variant is drawn before an excluded matching one, and the
    /// whole catalog is used once everything is excluded.
    pub fn acquire_excluding(
        &self,
        favor_successful: bool,
        variant: Option<ClientVariant>,
        excluded: &HashSet<usize>,
    ) -> Identity {
        let identities = self.lock();
        if !self.settings.rotate {
            return identities[0].clone();
        }

        let tagged = |i: &Identity| variant.is_none_or(|v| i.client_variant == v);
        let fresh: Vec<&Identity> =
            identities.iter().filter(|i| !excluded.contains(&i.id)).collect();
        let mut candidates: Vec<&Identity> = fresh.iter().copied().filter(|i| tagged(i)).collect();
        if candidates.is_empty() {
            candidates = fresh;
        }
        if candidates.is_empty() {
            tracing::debug!("[identity] every identity excluded, drawing from full pool");
            candidates = identities.iter().filter(|i| tagged(i)).collect();
        }
        if candidates.is_empty() {
            candidates = identities.iter().collect();
        }

        let mut rng = rand::rng();
        if !favor_successful {
            return candidates[rng.random_range(0..candidates.len())].clone();
        }

        let weights: Vec<u64> = candidates.iter().map(|i| self.weight_of(i)).collect();
        let total: u64 = weights.iter().sum();
        let mut pick = rng.random_range(0..total);
        for (identity, weight) in candidates.iter().zip(&weights) {
            if pick < *weight {
                return (*identity).clone();
            }
            pick -= weight;
        }
        candidates[candidates.len() - 1].clone()
    }

    fn weight_of(&self, identity: &Identity) -> u64 {
        identity.success_score.max(0) as u64 + self.settings.weight_floor.max(1) as u64
    }

    pub fn record_outcome(&self, identity_id: usize, succeeded: bool) {
        if !self.settings.favor_successful {
            return;
        }
        let mut identities = self.lock();
        if let Some(identity) = identities.get_mut(identity_id) {
            let delta = if succeeded { 1 } else { -1 };
            identity.success_score = (identity.success_score + delta)
                .clamp(self.settings.min_score, self.settings.max_score);
        }
    }

    pub fn snapshot(&self) -> Vec<Identity> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Identity>> {
        match self.identities.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn synthetic_addresses(count: usize, isp_ranges: bool) -> Vec<String> {
    let mut rng = rand::rng();
    (0..count)
        .map(|_| {
            let first = if isp_ranges {
                ISP_FIRST_OCTETS[rng.random_range(0..ISP_FIRST_OCTETS.len())]
            } else {
                rng.random_range(1..=223u8)
            };
            format!(
                "{}.{}.{}.{}",
                first,
                rng.random_range(0..=255u8),
                rng.random_range(0..=255u8),
                rng.random_range(1..=254u8)
            )
        })
        .collect()
}

/// Side table enforcing the reuse cooldown of identities across tasks.
pub struct IdentityCooldowns {
    cooldown: Duration,
    last_used: Mutex<HashMap<usize, (Uuid, Instant)>>,
}

impl IdentityCooldowns {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_used: Mutex::new(HashMap::new()),
        }
    }

    /// Identities used by a different task within the cooldown window.
    pub fn blocked_for(&self, task_id: Uuid) -> HashSet<usize> {
        self.blocked_at(task_id, Instant::now())
    }

    fn blocked_at(&self, task_id: Uuid, now: Instant) -> HashSet<usize> {
        let mut table = match self.last_used.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.retain(|_, (_, at)| now.duration_since(*at) < self.cooldown);
        table
            .iter()
            .filter(|(_, (owner, _))| *owner != task_id)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn mark_used(&self, identity_id: usize, task_id: Uuid) {
        let mut table = match self.last_used.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        table.insert(identity_id, (task_id, Instant::now()));
    }
}

/// Short correlation id for one attempt, logged alongside the identity.
pub fn session_fingerprint(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
    hasher.update(rand::random::<u64>().to_le_bytes());
    hasher.update(url.as_bytes());
    hasher
        .finalize()
        .iter()
        .take(8)
        .map(|b| format!("{:02x}", b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> IdentityPool {
        IdentityPool::new(IdentitySettings::default())
    }

    #[test]
    fn catalog_crosses_agents_and_locales() {
        let pool = pool();
        assert_eq!(pool.len(), LOCALES.len() * (DESKTOP_AGENTS.len() + MOBILE_AGENTS.len()));
        let snapshot = pool.snapshot();
        assert!(snapshot.iter().all(|i| i.synthetic_address.split('.').count() == 4));
    }

    #[test]
    fn favored_identity_is_drawn_more_than_uniform() {
        let pool = pool();
        for _ in 0..10 {
            pool.record_outcome(3, true);
        }

        let draws = 1000;
        let hits = (0..draws).filter(|_| pool.acquire(true).id == 3).count();
        let uniform = draws / pool.len();
        assert!(hits > uniform * 2, "favored identity drawn {hits} times, uniform share {uniform}");
    }

    #[test]
    fn scores_are_clamped() {
        let pool = pool();
        for _ in 0..50 {
            pool.record_outcome(0, true);
            pool.record_outcome(1, false);
        }
        let snapshot = pool.snapshot();
        assert_eq!(snapshot[0].success_score, 10);
        assert_eq!(snapshot[1].success_score, -5);
    }

    #[test]
    fn unseen_identities_remain_reachable() {
        let pool = pool();
        for _ in 0..10 {
            pool.record_outcome(0, true);
        }
        let seen: HashSet<usize> = (0..2000).map(|_| pool.acquire(true).id).collect();
        assert!(seen.len() > 1);
    }

    #[test]
    fn excluded_identities_are_skipped_until_exhausted() {
        let pool = pool();
        let excluded: HashSet<usize> = (1..pool.len()).collect();
        for _ in 0..20 {
            assert_eq!(pool.acquire_excluding(false, None, &excluded).id, 0);
        }
        let everything: HashSet<usize> = (0..pool.len()).collect();
        let fallback = pool.acquire_excluding(false, None, &everything);
        assert!(fallback.id < pool.len());
    }

    #[test]
    fn variant_tag_steers_the_draw() {
        let pool = pool();
        for _ in 0..200 {
            let web = pool.acquire_excluding(true, Some(ClientVariant::Web), &HashSet::new());
            assert_eq!(web.client_variant, ClientVariant::Web);
            assert!(!web.user_agent.contains("Mobile"), "{}", web.user_agent);

            let mweb = pool.acquire_excluding(true, Some(ClientVariant::Mweb), &HashSet::new());
            assert_eq!(mweb.client_variant, ClientVariant::Mweb);
            assert!(mweb.user_agent.contains("Mobile"), "{}", mweb.user_agent);
        }
    }

    #[test]
    fn untagged_variant_draws_from_whole_pool() {
        let pool = pool();
        let none = HashSet::new();
        let seen: HashSet<usize> = (0..2000)
            .map(|_| pool.acquire_excluding(false, Some(ClientVariant::TvEmbedded), &none).id)
            .collect();
        assert_eq!(seen.len(), pool.len());
    }

    #[test]
    fn fresh_identity_beats_matching_variant() {
        let pool = pool();
        let snapshot = pool.snapshot();
        let excluded: HashSet<usize> = snapshot
            .iter()
            .filter(|i| i.client_variant == ClientVariant::Mweb)
            .map(|i| i.id)
            .collect();
        for _ in 0..50 {
            let drawn = pool.acquire_excluding(false, Some(ClientVariant::Mweb), &excluded);
            assert!(!excluded.contains(&drawn.id));
        }

        let everything: HashSet<usize> = (0..pool.len()).collect();
        let reused = pool.acquire_excluding(false, Some(ClientVariant::Mweb), &everything);
        assert_eq!(reused.client_variant, ClientVariant::Mweb);
    }

    #[test]
    fn scores_untouched_when_favoring_disabled() {
        let pool = IdentityPool::new(IdentitySettings {
            favor_successful: false,
            ..IdentitySettings::default()
        });
        pool.record_outcome(0, true);
        assert_eq!(pool.snapshot()[0].success_score, 0);
    }

    #[test]
    fn cooldown_blocks_other_tasks_only() {
        let table = IdentityCooldowns::new(Duration::from_secs(3600));
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        table.mark_used(2, owner);

        assert!(table.blocked_for(other).contains(&2));
        assert!(!table.blocked_for(owner).contains(&2));
    }

    #[test]
    fn cooldown_expires() {
        let table = IdentityCooldowns::new(Duration::from_secs(1));
        table.mark_used(2, Uuid::new_v4());
        let later = Instant::now() + Duration::from_secs(2);
        assert!(table.blocked_at(Uuid::new_v4(), later).is_empty());
    }

    #[test]
    fn fingerprint_is_sixteen_hex_chars() {
        let fp = session_fingerprint("https://www.youtube.com/watch?v=abc123");
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

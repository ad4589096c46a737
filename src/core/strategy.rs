use std::path::Path;
use std::time::Duration;

use rand::RngExt;
use relayget_core::core::events::MediaKind;
use relayget_core::models::settings::{ClientVariant, QualityCeiling, StrategySettings};
use serde::Serialize;

use super::identity::Identity;
use crate::models::media::RequestConfig;

const OUTPUT_TEMPLATE: &str = "%(title).200s.%(ext)s";

const ACCEPT_HTML: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8";

const REFERERS: &[Option<&str>] = &[
    Some("https://www.google.com/"),
    Some("https://www.youtube.com/"),
    None,
];

/// One fallback tier. Immutable once the catalog is built.
#[derive(Debug, Clone, Serialize)]
pub struct Strategy {
    pub name: String,
    pub client_variant: ClientVariant,
    pub quality_ceiling: QualityCeiling,
    pub retry_budget: u32,
    pub fragment_retry_budget: u32,
    pub timeout: Duration,
    pub skip_streaming_manifests: bool,
    pub sleep_between_requests: Option<Duration>,
}

impl From<&StrategySettings> for Strategy {
    fn from(s: &StrategySettings) -> Self {
        Self {
            name: s.name.clone(),
            client_variant: s.client_variant,
            quality_ceiling: s.quality_ceiling,
            retry_budget: s.retry_budget,
            fragment_retry_budget: s.fragment_retry_budget,
            timeout: Duration::from_secs(s.timeout_secs),
            skip_streaming_manifests: s.skip_streaming_manifests,
            sleep_between_requests: s
                .sleep_between_requests_secs
                .filter(|secs| *secs > 0.0)
                .map(Duration::from_secs_f64),
        }
    }
}

impl Strategy {
    pub fn format_selector(&self, kind: MediaKind) -> String {
        let h = self.quality_ceiling.height();
        match kind {
            MediaKind::Audio => "bestaudio/best".to_string(),
            MediaKind::Video => format!(
                "bestvideo[height<={h}]+bestaudio/best[height<={h}]/best",
                h = h
            ),
        }
    }

    /// Merges tier parameters with the identity's headers.
    pub fn request_config(
        &self,
        identity: &Identity,
        kind: MediaKind,
        output_dir: &Path,
        proxy: Option<String>,
    ) -> RequestConfig {
        let mut headers = vec![
            ("Accept".to_string(), ACCEPT_HTML.to_string()),
            (
                "Accept-Language".to_string(),
                format!("{},en;q=0.9", identity.locale),
            ),
            ("Accept-Encoding".to_string(), "gzip, deflate, br".to_string()),
            ("DNT".to_string(), "1".to_string()),
            ("Connection".to_string(), "keep-alive".to_string()),
            ("X-Forwarded-For".to_string(), identity.synthetic_address.clone()),
            ("Sec-CH-UA-Platform".to_string(), format!("\"{}\"", identity.platform)),
        ];
        if let Some(referer) = REFERERS[rand::rng().random_range(0..REFERERS.len())] {
            headers.push(("Referer".to_string(), referer.to_string()));
        }

        RequestConfig {
            kind,
            format_selector: self.format_selector(kind),
            player_client: self.client_variant.as_str().to_string(),
            skip_streaming_manifests: self.skip_streaming_manifests,
            user_agent: identity.user_agent.clone(),
            headers,
            retries: self.retry_budget,
            fragment_retries: self.fragment_retry_budget,
            socket_timeout: self.timeout,
            sleep_between_requests: self.sleep_between_requests,
            output_dir: output_dir.to_path_buf(),
            output_template: OUTPUT_TEMPLATE.to_string(),
            proxy,
            geo_bypass: true,
            skip_certificate_check: true,
        }
    }
}

/// Ordered tiers, most capable first. The order is fixed at startup.
pub struct StrategyCatalog {
    strategies: Vec<Strategy>,
}

impl StrategyCatalog {
    pub fn from_settings(settings: &[StrategySettings]) -> anyhow::Result<Self> {
        if settings.is_empty() {
            anyhow::bail!("strategy catalog must not be empty");
        }
        Ok(Self {
            strategies: settings.iter().map(Strategy::from).collect(),
        })
    }

    pub fn get(&self, index: usize) -> Option<&Strategy> {
        self.strategies.get(index)
    }

    pub fn is_last(&self, index: usize) -> bool {
        index + 1 >= self.strategies.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.strategies.iter().map(|s| s.name.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identity::IdentityPool;
    use relayget_core::models::settings::{default_strategies, IdentitySettings};

    fn catalog() -> StrategyCatalog {
        StrategyCatalog::from_settings(&default_strategies()).unwrap()
    }

    #[test]
    fn empty_catalog_rejected() {
        assert!(StrategyCatalog::from_settings(&[]).is_err());
    }

    #[test]
    fn catalog_keeps_configured_order() {
        let catalog = catalog();
        assert_eq!(catalog.names(), vec!["primary", "fallback", "emergency", "minimal"]);
        assert!(catalog.is_last(3));
        assert!(!catalog.is_last(2));
    }

    #[test]
    fn video_selector_caps_height() {
        let fallback = catalog().get(1).cloned().unwrap();
        assert_eq!(
            fallback.format_selector(MediaKind::Video),
            "bestvideo[height<=720]+bestaudio/best[height<=720]/best"
        );
        assert_eq!(fallback.format_selector(MediaKind::Audio), "bestaudio/best");
    }

    #[test]
    fn request_config_carries_identity_headers() {
        let pool = IdentityPool::new(IdentitySettings::default());
        let identity = pool.acquire(false);
        let strategy = catalog().get(0).cloned().unwrap();
        let config =
            strategy.request_config(&identity, MediaKind::Video, Path::new("/tmp/x"), None);

        assert_eq!(config.user_agent, identity.user_agent);
        assert_eq!(config.player_client, "web");
        assert!(config
            .headers
            .iter()
            .any(|(k, v)| k == "X-Forwarded-For" && *v == identity.synthetic_address));
        assert!(config
            .headers
            .iter()
            .any(|(k, v)| k == "Accept-Language" && v.starts_with(&identity.locale)));
        assert_eq!(config.retries, 2);
        assert_eq!(config.socket_timeout, Duration::from_secs(30));
    }

    #[test]
    fn zero_sleep_is_dropped() {
        let mut settings = default_strategies();
        settings[0].sleep_between_requests_secs = Some(0.0);
        let catalog = StrategyCatalog::from_settings(&settings).unwrap();
        assert!(catalog.get(0).unwrap().sleep_between_requests.is_none());
    }
}

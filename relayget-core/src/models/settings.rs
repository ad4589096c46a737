use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub environment: EnvironmentSettings,
    #[serde(default)]
    pub timing: TimingSettings,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub identities: IdentitySettings,
    #[serde(default = "default_strategies")]
    pub strategies: Vec<StrategySettings>,
    #[serde(default)]
    pub validation: ValidationSettings,
    #[serde(default)]
    pub progress: ProgressSettings,
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub proxy: ProxySettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Hosted,
}

impl Environment {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "local" => Some(Environment::Local),
            "hosted" | "cloud" => Some(Environment::Hosted),
            _ => None,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Local => f.write_str("local"),
            Environment::Hosted => f.write_str("hosted"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnvironmentSettings {
    /// Forces a mode; `None` means auto-detect from the host environment.
    #[serde(default)]
    pub mode: Option<Environment>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingSettings {
    pub local_min_delay_secs: f64,
    pub local_max_delay_secs: f64,
    pub hosted_min_delay_secs: f64,
    pub hosted_max_delay_secs: f64,
    pub emergency_min_delay_secs: f64,
    pub emergency_max_delay_secs: f64,
    /// Each fallback tier widens the delay range by this fraction of the base.
    #[serde(default = "default_escalation_factor")]
    pub escalation_factor: f64,
    pub max_consecutive_failures: u32,
    pub identity_cooldown_secs: u64,
    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_escalation_factor() -> f64 {
    0.5
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            local_min_delay_secs: 1.0,
            local_max_delay_secs: 3.0,
            hosted_min_delay_secs: 5.0,
            hosted_max_delay_secs: 12.0,
            emergency_min_delay_secs: 20.0,
            emergency_max_delay_secs: 45.0,
            escalation_factor: default_escalation_factor(),
            max_consecutive_failures: 3,
            identity_cooldown_secs: 3600,
            jitter: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSettings {
    pub limit: u32,
    pub window_secs: u64,
    pub backoff_min_secs: u64,
    pub backoff_max_secs: u64,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            limit: 3,
            window_secs: 10,
            backoff_min_secs: 30,
            backoff_max_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentitySettings {
    #[serde(default = "default_true")]
    pub rotate: bool,
    #[serde(default = "default_true")]
    pub favor_successful: bool,
    pub min_score: i32,
    pub max_score: i32,
    /// Added to every identity's weight so unproven ones stay reachable.
    pub weight_floor: u32,
    pub address_pool_size: usize,
    #[serde(default = "default_true")]
    pub simulate_isp_ranges: bool,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            rotate: true,
            favor_successful: true,
            min_score: -5,
            max_score: 10,
            weight_floor: 1,
            address_pool_size: 20,
            simulate_isp_ranges: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ClientVariant {
    Web,
    Mweb,
    Android,
    Ios,
    TvEmbedded,
}

impl ClientVariant {
    /// Value handed to the extractor's `player_client` argument.
    pub fn as_str(&self) -> &'static str {
        match self {
            ClientVariant::Web => "web",
            ClientVariant::Mweb => "mweb",
            ClientVariant::Android => "android",
            ClientVariant::Ios => "ios",
            ClientVariant::TvEmbedded => "tv_embedded",
        }
    }

    pub fn is_mobile(&self) -> bool {
        matches!(self, ClientVariant::Mweb | ClientVariant::Android | ClientVariant::Ios)
    }
}

impl fmt::Display for ClientVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QualityCeiling {
    #[serde(rename = "360")]
    P360,
    #[serde(rename = "480")]
    P480,
    #[serde(rename = "720")]
    P720,
    #[serde(rename = "1080")]
    P1080,
}

impl QualityCeiling {
    pub fn height(&self) -> u32 {
        match self {
            QualityCeiling::P360 => 360,
            QualityCeiling::P480 => 480,
            QualityCeiling::P720 => 720,
            QualityCeiling::P1080 => 1080,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategySettings {
    pub name: String,
    pub client_variant: ClientVariant,
    pub quality_ceiling: QualityCeiling,
    pub retry_budget: u32,
    pub fragment_retry_budget: u32,
    pub timeout_secs: u64,
    #[serde(default)]
    pub skip_streaming_manifests: bool,
    #[serde(default)]
    pub sleep_between_requests_secs: Option<f64>,
}

pub fn default_strategies() -> Vec<StrategySettings> {
    vec![
        StrategySettings {
            name: "primary".into(),
            client_variant: ClientVariant::Web,
            quality_ceiling: QualityCeiling::P1080,
            retry_budget: 2,
            fragment_retry_budget: 2,
            timeout_secs: 30,
            skip_streaming_manifests: true,
            sleep_between_requests_secs: Some(1.0),
        },
        StrategySettings {
            name: "fallback".into(),
            client_variant: ClientVariant::Mweb,
            quality_ceiling: QualityCeiling::P720,
            retry_budget: 2,
            fragment_retry_budget: 3,
            timeout_secs: 30,
            skip_streaming_manifests: true,
            sleep_between_requests_secs: Some(2.0),
        },
        StrategySettings {
            name: "emergency".into(),
            client_variant: ClientVariant::Android,
            quality_ceiling: QualityCeiling::P480,
            retry_budget: 1,
            fragment_retry_budget: 3,
            timeout_secs: 45,
            skip_streaming_manifests: false,
            sleep_between_requests_secs: Some(3.0),
        },
        StrategySettings {
            name: "minimal".into(),
            client_variant: ClientVariant::TvEmbedded,
            quality_ceiling: QualityCeiling::P360,
            retry_budget: 1,
            fragment_retry_budget: 5,
            timeout_secs: 60,
            skip_streaming_manifests: false,
            sleep_between_requests_secs: None,
        },
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSettings {
    pub min_video_bytes: u64,
    pub min_audio_bytes: u64,
}

impl Default for ValidationSettings {
    fn default() -> Self {
        Self {
            min_video_bytes: 100_000,
            min_audio_bytes: 50_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSettings {
    pub mailbox_capacity: usize,
    pub idle_keepalive_ms: u64,
    pub reap_grace_secs: u64,
    pub throttle_ms: u64,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self {
            mailbox_capacity: 64,
            idle_keepalive_ms: 10_000,
            reap_grace_secs: 300,
            throttle_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    pub bind_address: String,
    pub port: u16,
    /// Upper bound for one transfer phase, independent of the socket timeout.
    pub transfer_deadline_secs: u64,
    pub stream_chunk_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".into(),
            port: 5000,
            transfer_deadline_secs: 1800,
            stream_chunk_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProxySettings {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_proxy_type")]
    pub proxy_type: String,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

fn default_proxy_type() -> String {
    "http".into()
}

fn default_proxy_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub verbose: bool,
    pub log_successful_identities: bool,
    pub log_failed_attempts: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            verbose: true,
            log_successful_identities: true,
            log_failed_attempts: true,
        }
    }
}

fn default_schema_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            schema_version: 1,
            environment: EnvironmentSettings::default(),
            timing: TimingSettings::default(),
            rate_limit: RateLimitSettings::default(),
            identities: IdentitySettings::default(),
            strategies: default_strategies(),
            validation: ValidationSettings::default(),
            progress: ProgressSettings::default(),
            server: ServerSettings::default(),
            proxy: ProxySettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl AppSettings {
    /// Rejects settings the runtime cannot honour.
    pub fn validate(&self) -> Result<(), String> {
        if self.strategies.is_empty() {
            return Err("at least one strategy must be configured".into());
        }
        let mut names = std::collections::HashSet::new();
        for s in &self.strategies {
            if s.name.trim().is_empty() {
                return Err("strategy names must not be empty".into());
            }
            if !names.insert(s.name.as_str()) {
                return Err(format!("duplicate strategy name '{}'", s.name));
            }
            if s.timeout_secs == 0 {
                return Err(format!("strategy '{}' has a zero timeout", s.name));
            }
        }

        let t = &self.timing;
        for (label, min, max) in [
            ("local delay", t.local_min_delay_secs, t.local_max_delay_secs),
            ("hosted delay", t.hosted_min_delay_secs, t.hosted_max_delay_secs),
            ("emergency delay", t.emergency_min_delay_secs, t.emergency_max_delay_secs),
        ] {
            if !(min >= 0.0 && min <= max) {
                return Err(format!("{} range is invalid: {}..{}", label, min, max));
            }
        }
        if t.escalation_factor < 0.0 {
            return Err("escalation factor must not be negative".into());
        }

        let r = &self.rate_limit;
        if r.limit == 0 || r.window_secs == 0 {
            return Err("rate limit and window must be positive".into());
        }
        if r.backoff_min_secs > r.backoff_max_secs {
            return Err("rate limit back-off range is invalid".into());
        }

        let i = &self.identities;
        if i.min_score > i.max_score {
            return Err("identity score bounds are inverted".into());
        }
        if i.address_pool_size == 0 {
            return Err("address pool must not be empty".into());
        }

        if self.progress.mailbox_capacity == 0 {
            return Err("progress mailbox capacity must be positive".into());
        }
        Ok(())
    }
}

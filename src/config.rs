//! Gateway configuration, loaded once at startup and read-only afterwards.

use crate::application::orchestrator::{OrchestratorConfig, Strategy};
use crate::domain::provider::{Credentials, ProviderConfig, ProviderId};
use crate::error::{PaymentError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    fn parse_or_default(value: Option<String>) -> Self {
        match value.as_deref().map(str::to_lowercase).as_deref() {
            Some("production") => Self::Production,
            Some("staging") => Self::Staging,
            _ => Self::Development,
        }
    }

    /// Endpoint used when a provider's base URL is not set explicitly.
    pub fn default_endpoint(&self, provider: ProviderId) -> &'static str {
        match (provider, self) {
            (ProviderId::KgInicis, Self::Production) => "https://iniapi.inicis.com",
            (ProviderId::KgInicis, _) => "https://stginiapi.inicis.com",
            (ProviderId::NaverPay, _) => "https://dev.apis.naver.com/naverpay-partner/naverpay",
            (ProviderId::KakaoPay, _) => "https://kapi.kakao.com",
            (ProviderId::NicePayments, Self::Production) => "https://webapi.nicepay.co.kr",
            (ProviderId::NicePayments, _) => "https://sandbox-api.nicepay.co.kr",
        }
    }
}

fn default_window_capacity() -> usize {
    100
}

fn default_recent_window_minutes() -> i64 {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Number of recent attempts retained per provider.
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,
    #[serde(default = "default_recent_window_minutes")]
    pub recent_window_minutes: i64,
}

impl HealthConfig {
    /// Span used for the recent success rate.
    pub fn recent_window(&self) -> Result<chrono::Duration> {
        if self.recent_window_minutes <= 0 {
            return Err(PaymentError::ConfigurationError(format!(
                "health.recent_window_minutes must be positive, got {}",
                self.recent_window_minutes
            )));
        }
        chrono::Duration::try_minutes(self.recent_window_minutes).ok_or_else(|| {
            PaymentError::ConfigurationError(format!(
                "health.recent_window_minutes is out of range: {}",
                self.recent_window_minutes
            ))
        })
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            window_capacity: default_window_capacity(),
            recent_window_minutes: default_recent_window_minutes(),
        }
    }
}

fn default_max_concurrency() -> usize {
    5
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub providers: BTreeMap<ProviderId, ProviderConfig>,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

impl GatewayConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the settings that cannot be expressed through serde alone.
    pub fn validate(&self) -> Result<()> {
        self.health.recent_window()?;
        Ok(())
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key/value source shaped like the process
    /// environment. A provider counts as configured only when both its merchant id
    /// and api key are present.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = Environment::parse_or_default(lookup("ENVIRONMENT"));
        let mut providers = BTreeMap::new();

        for provider in ProviderId::ALL {
            let prefix = provider.env_prefix();
            let var = |suffix: &str| lookup(&format!("{prefix}_{suffix}"));
            let (Some(merchant_id), Some(api_key)) = (var("MERCHANT_ID"), var("API_KEY")) else {
                continue;
            };

            let endpoint = var("API_BASE_URL")
                .unwrap_or_else(|| environment.default_endpoint(provider).to_string());
            let mut config = ProviderConfig::new(
                endpoint,
                Credentials {
                    merchant_id,
                    api_key,
                    secret_key: var("SECRET_KEY"),
                },
            );
            if let Some(secs) = var("TIMEOUT") {
                config.timeout_ms = parse_number::<u64>(&prefix, "TIMEOUT", &secs)?
                    .checked_mul(1_000)
                    .ok_or_else(|| out_of_range(&prefix, "TIMEOUT", &secs))?;
            }
            if let Some(retries) = var("MAX_RETRIES") {
                config.max_retries = parse_number(&prefix, "MAX_RETRIES", &retries)?;
            }
            if let Some(delay) = var("RETRY_DELAY") {
                let secs: f64 = parse_number(&prefix, "RETRY_DELAY", &delay)?;
                config.retry_base_delay_ms = Duration::try_from_secs_f64(secs)
                    .ok()
                    .and_then(|parsed| u64::try_from(parsed.as_millis()).ok())
                    .ok_or_else(|| out_of_range(&prefix, "RETRY_DELAY", &delay))?;
            }
            providers.insert(provider, config);
        }

        let mut orchestrator = OrchestratorConfig::default();
        if let Some(strategy) = lookup("PAYMENT_STRATEGY") {
            orchestrator.strategy = Strategy::from_str(&strategy)?;
        }
        if let Some(primary) = lookup("PAYMENT_PRIMARY_PROVIDER") {
            orchestrator.primary = Some(primary.parse()?);
        }
        if let Some(fallbacks) = lookup("PAYMENT_FALLBACK_PROVIDERS") {
            orchestrator.fallbacks = fallbacks
                .split(',')
                .filter(|item| !item.trim().is_empty())
                .map(str::parse)
                .collect::<Result<Vec<ProviderId>>>()?;
        }

        let config = Self {
            environment,
            providers,
            orchestrator,
            ..Default::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn provider(&self, provider: ProviderId) -> Option<&ProviderConfig> {
        self.providers.get(&provider)
    }

    pub fn is_configured(&self, provider: ProviderId) -> bool {
        self.providers.contains_key(&provider)
    }

    pub fn configured_providers(&self) -> Vec<ProviderId> {
        self.providers.keys().copied().collect()
    }
}

fn parse_number<T: FromStr>(prefix: &str, suffix: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        PaymentError::ConfigurationError(format!("{prefix}_{suffix} is not a number: {raw}"))
    })
}

fn out_of_range(prefix: &str, suffix: &str, raw: &str) -> PaymentError {
    PaymentError::ConfigurationError(format!("{prefix}_{suffix} is out of range: {raw}"))
}

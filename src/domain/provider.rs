use crate::error::PaymentError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Closed set of payment providers the gateway knows how to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    KgInicis,
    NaverPay,
    KakaoPay,
    NicePayments,
}

impl ProviderId {
    pub const ALL: [ProviderId; 4] = [
        ProviderId::KgInicis,
        ProviderId::NaverPay,
        ProviderId::KakaoPay,
        ProviderId::NicePayments,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::KgInicis => "kg_inicis",
            Self::NaverPay => "naver_pay",
            Self::KakaoPay => "kakao_pay",
            Self::NicePayments => "nice_payments",
        }
    }

    /// Prefix of the environment variables holding this provider's settings.
    pub fn env_prefix(&self) -> String {
        self.as_str().to_uppercase()
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|provider| provider.as_str() == normalized)
            .ok_or_else(|| PaymentError::ConfigurationError(format!("unknown provider: {s}")))
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub merchant_id: String,
    pub api_key: String,
    #[serde(default)]
    pub secret_key: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("merchant_id", &self.merchant_id)
            .field("api_key", &"<redacted>")
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    1_000
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

fn default_session_max_age_secs() -> u64 {
    3_600
}

fn default_session_idle_secs() -> u64 {
    300
}

/// Read-only connection settings for one provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub endpoint_base: String,
    pub credentials: Credentials,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_session_max_age_secs")]
    pub session_max_age_secs: u64,
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
    /// Provider-specific settings the core never interprets.
    #[serde(default)]
    pub extra: BTreeMap<String, Value>,
}

impl ProviderConfig {
    pub fn new(endpoint_base: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            endpoint_base: endpoint_base.into(),
            credentials,
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            session_max_age_secs: default_session_max_age_secs(),
            session_idle_secs: default_session_idle_secs(),
            extra: BTreeMap::new(),
        }
    }

    pub fn validate(&self, provider: ProviderId) -> Result<(), PaymentError> {
        let missing = if self.credentials.merchant_id.trim().is_empty() {
            Some("merchant_id")
        } else if self.credentials.api_key.trim().is_empty() {
            Some("api_key")
        } else if self.endpoint_base.trim().is_empty() {
            Some("endpoint_base")
        } else {
            None
        };
        match missing {
            Some(field) => Err(PaymentError::ConfigurationError(format!(
                "{field} is not set for {provider}"
            ))),
            None => Ok(()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }

    pub fn session_max_age(&self) -> Duration {
        Duration::from_secs(self.session_max_age_secs)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }
}

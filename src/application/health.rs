use crate::config::HealthConfig;
use crate::domain::health::{HealthStatus, ProviderHealth, ProviderMetrics, RequestMetric};
use crate::domain::provider::ProviderId;
use crate::error::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealthStatus {
    pub status: HealthStatus,
    pub recent_success_rate: f64,
    pub total_requests: u64,
    pub avg_response_time_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub overall_status: HealthStatus,
    pub providers: BTreeMap<ProviderId, ProviderHealthStatus>,
    pub timestamp: DateTime<Utc>,
}

/// Collects every provider attempt and derives per-provider health.
///
/// Shared by all invocation wrappers of a process; concurrent recorders
/// serialize on a single `RwLock`.
pub struct HealthTracker {
    window_capacity: usize,
    recent_window: Duration,
    providers: RwLock<HashMap<ProviderId, ProviderHealth>>,
}

impl Default for HealthTracker {
    fn default() -> Self {
        let config = HealthConfig::default();
        Self::with_window(config.window_capacity, Duration::minutes(config.recent_window_minutes))
    }
}

impl HealthTracker {
    /// Fails with `ConfigurationError` when the recent window is not a positive,
    /// representable number of minutes.
    pub fn new(config: &HealthConfig) -> Result<Self> {
        Ok(Self::with_window(config.window_capacity, config.recent_window()?))
    }

    fn with_window(window_capacity: usize, recent_window: Duration) -> Self {
        Self {
            window_capacity,
            recent_window,
            providers: RwLock::new(HashMap::new()),
        }
    }

    pub async fn record_attempt(&self, metric: RequestMetric) {
        if metric.success {
            info!(
                provider = %metric.provider,
                endpoint = %metric.endpoint,
                method = %metric.method,
                status_code = metric.status_code,
                latency_ms = metric.latency_ms,
                "provider request succeeded"
            );
        } else {
            warn!(
                provider = %metric.provider,
                endpoint = %metric.endpoint,
                method = %metric.method,
                status_code = metric.status_code,
                latency_ms = metric.latency_ms,
                error_kind = ?metric.error_kind,
                error = metric.error_message.as_deref().unwrap_or_default(),
                "provider request failed"
            );
        }

        let mut providers = self.providers.write().await;
        providers
            .entry(metric.provider)
            .or_insert_with(|| ProviderHealth::new(metric.provider, self.window_capacity))
            .add(metric);
    }

    /// Success ratio of the retained attempts younger than `window`.
    pub async fn recent_success_rate(&self, provider: ProviderId, window: Duration) -> Option<f64> {
        let providers = self.providers.read().await;
        providers
            .get(&provider)
            .map(|health| health.recent_success_rate(window, Utc::now()))
    }

    pub async fn metrics(&self, provider: ProviderId) -> Option<ProviderMetrics> {
        let providers = self.providers.read().await;
        providers
            .get(&provider)
            .map(|health| health.snapshot(self.recent_window, Utc::now()))
    }

    pub async fn all_metrics(&self) -> BTreeMap<ProviderId, ProviderMetrics> {
        let now = Utc::now();
        let providers = self.providers.read().await;
        providers
            .iter()
            .map(|(id, health)| (*id, health.snapshot(self.recent_window, now)))
            .collect()
    }

    pub async fn health_status(&self) -> HealthReport {
        let now = Utc::now();
        let providers = self.providers.read().await;
        let statuses: BTreeMap<ProviderId, ProviderHealthStatus> = providers
            .iter()
            .map(|(id, health)| {
                let recent_success_rate = health.recent_success_rate(self.recent_window, now);
                let status = health.status(self.recent_window, now);
                (
                    *id,
                    ProviderHealthStatus {
                        status,
                        recent_success_rate,
                        total_requests: health.total_requests,
                        avg_response_time_ms: health.average_response_time_ms(),
                    },
                )
            })
            .collect();

        let overall_status = statuses
            .values()
            .map(|entry| entry.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);

        HealthReport {
            overall_status,
            providers: statuses,
            timestamp: now,
        }
    }

    /// Forgets the metrics of one provider, or of every provider.
    pub async fn reset(&self, provider: Option<ProviderId>) {
        let mut providers = self.providers.write().await;
        match provider {
            Some(provider) => {
                providers.remove(&provider);
            }
            None => providers.clear(),
        }
    }
}

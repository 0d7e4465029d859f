use super::provider::ProviderId;
use crate::error::ErrorKind;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// One observed provider call, successful or not.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestMetric {
    pub provider: ProviderId,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub latency_ms: f64,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

impl RequestMetric {
    pub fn success(
        provider: ProviderId,
        endpoint: impl Into<String>,
        method: impl Into<String>,
        latency_ms: f64,
    ) -> Self {
        Self {
            provider,
            endpoint: endpoint.into(),
            method: method.into(),
            status_code: 200,
            latency_ms,
            timestamp: Utc::now(),
            success: true,
            error_kind: None,
            error_message: None,
        }
    }

    pub fn failure(
        provider: ProviderId,
        endpoint: impl Into<String>,
        method: impl Into<String>,
        status_code: u16,
        latency_ms: f64,
        error_kind: ErrorKind,
        error_message: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            endpoint: endpoint.into(),
            method: method.into(),
            status_code,
            latency_ms,
            timestamp: Utc::now(),
            success: false,
            error_kind: Some(error_kind),
            error_message: Some(error_message.into()),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn from_success_rate(rate: f64) -> Self {
        if rate >= 0.95 {
            Self::Healthy
        } else if rate >= 0.80 {
            Self::Degraded
        } else {
            Self::Unhealthy
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        };
        f.write_str(label)
    }
}

/// Aggregate of every attempt against one provider.
///
/// Counters only grow. The rolling window keeps at most `capacity` attempts,
/// evicting the oldest first.
#[derive(Debug, Clone)]
pub struct ProviderHealth {
    pub provider: ProviderId,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    total_success_latency_ms: f64,
    recent: VecDeque<RequestMetric>,
    capacity: usize,
    error_counts: BTreeMap<ErrorKind, u64>,
}

impl ProviderHealth {
    pub fn new(provider: ProviderId, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            provider,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            total_success_latency_ms: 0.0,
            recent: VecDeque::with_capacity(capacity),
            capacity,
            error_counts: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, metric: RequestMetric) {
        self.total_requests += 1;
        if metric.success {
            self.successful_requests += 1;
            self.total_success_latency_ms += metric.latency_ms;
        } else {
            self.failed_requests += 1;
            if let Some(kind) = metric.error_kind {
                *self.error_counts.entry(kind).or_insert(0) += 1;
            }
        }

        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(metric);
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            return 0.0;
        }
        self.successful_requests as f64 / self.total_requests as f64
    }

    /// Mean latency of successful attempts.
    pub fn average_response_time_ms(&self) -> f64 {
        if self.successful_requests == 0 {
            return 0.0;
        }
        self.total_success_latency_ms / self.successful_requests as f64
    }

    /// Success ratio over the window entries newer than `now - window`.
    ///
    /// A provider whose retained attempts all predate the span scores `0.0`.
    pub fn recent_success_rate(&self, window: Duration, now: DateTime<Utc>) -> f64 {
        let cutoff = now - window;
        let (total, successful) = self
            .recent
            .iter()
            .filter(|metric| metric.timestamp >= cutoff)
            .fold((0usize, 0usize), |(total, ok), metric| {
                (total + 1, ok + usize::from(metric.success))
            });
        if total == 0 {
            return 0.0;
        }
        successful as f64 / total as f64
    }

    pub fn status(&self, window: Duration, now: DateTime<Utc>) -> HealthStatus {
        HealthStatus::from_success_rate(self.recent_success_rate(window, now))
    }

    pub fn recent(&self) -> impl Iterator<Item = &RequestMetric> {
        self.recent.iter()
    }

    pub fn error_counts(&self) -> &BTreeMap<ErrorKind, u64> {
        &self.error_counts
    }

    pub fn snapshot(&self, window: Duration, now: DateTime<Utc>) -> ProviderMetrics {
        ProviderMetrics {
            provider: self.provider,
            total_requests: self.total_requests,
            successful_requests: self.successful_requests,
            failed_requests: self.failed_requests,
            success_rate: self.success_rate(),
            avg_response_time_ms: self.average_response_time_ms(),
            recent_success_rate: self.recent_success_rate(window, now),
            error_counts: self.error_counts.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderMetrics {
    pub provider: ProviderId,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub recent_success_rate: f64,
    pub error_counts: BTreeMap<ErrorKind, u64>,
}

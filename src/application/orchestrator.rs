//! Drives payment operations across one or more providers under a
//! configurable failure-handling strategy.

use crate::application::registry::ProviderRegistry;
use crate::domain::money::Amount;
use crate::domain::provider::ProviderId;
use crate::domain::transaction::{
    CancelRequest, PaymentOutcome, ProviderResponse, TransactionRequest, TransactionStatus,
};
use crate::error::{PaymentError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Exactly one resolved provider; its error propagates untouched.
    Single,
    /// Every candidate in order until one succeeds.
    #[default]
    #[serde(alias = "retry_all", alias = "best_effort")]
    ExhaustAll,
    /// Candidates in order, aborting on the first failure.
    FailFast,
    /// One provider per call, rotating through the available ones.
    RoundRobin,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::ExhaustAll => "exhaust_all",
            Self::FailFast => "fail_fast",
            Self::RoundRobin => "round_robin",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "single" | "fixed" => Ok(Self::Single),
            "exhaust_all" | "retry_all" | "best_effort" => Ok(Self::ExhaustAll),
            "fail_fast" => Ok(Self::FailFast),
            "round_robin" => Ok(Self::RoundRobin),
            _ => Err(PaymentError::ConfigurationError(format!(
                "unknown strategy: {s}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub primary: Option<ProviderId>,
    #[serde(default)]
    pub fallbacks: Vec<ProviderId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProviderUsage {
    pub success_count: u64,
    pub failure_count: u64,
    pub last_used: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceInfo {
    pub strategy: Strategy,
    pub primary: Option<ProviderId>,
    pub fallbacks: Vec<ProviderId>,
    pub available_providers: Vec<ProviderId>,
    pub usage: BTreeMap<ProviderId, ProviderUsage>,
}

pub struct PaymentOrchestrator {
    registry: Arc<ProviderRegistry>,
    config: OrchestratorConfig,
    next_index: AtomicUsize,
    usage: Mutex<HashMap<ProviderId, ProviderUsage>>,
}

impl PaymentOrchestrator {
    pub fn new(registry: Arc<ProviderRegistry>, config: OrchestratorConfig) -> Self {
        Self {
            registry,
            config,
            next_index: AtomicUsize::new(0),
            usage: Mutex::new(HashMap::new()),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.config.strategy
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Candidate providers for one request: the preferred provider when
    /// available, else the primary, else the available fallbacks; the
    /// remaining available providers follow in registry order.
    pub fn resolve_order(&self, preferred: Option<ProviderId>) -> Vec<ProviderId> {
        let available = self.registry.available_providers();
        let head: Vec<ProviderId> = match (preferred, self.config.primary) {
            (Some(provider), _) if available.contains(&provider) => vec![provider],
            (_, Some(provider)) if available.contains(&provider) => vec![provider],
            _ => self
                .config
                .fallbacks
                .iter()
                .copied()
                .filter(|provider| available.contains(provider))
                .fold(Vec::new(), |mut acc, provider| {
                    if !acc.contains(&provider) {
                        acc.push(provider);
                    }
                    acc
                }),
        };

        let mut order = head;
        for provider in available {
            if !order.contains(&provider) {
                order.push(provider);
            }
        }
        order
    }

    pub async fn process_payment(
        &self,
        request: &TransactionRequest,
        preferred: Option<ProviderId>,
    ) -> Result<PaymentOutcome> {
        request.validate()?;
        debug!(order_id = %request.order_id(), strategy = %self.config.strategy, "processing payment");

        match self.config.strategy {
            Strategy::Single => {
                let provider = self
                    .resolve_order(preferred)
                    .first()
                    .copied()
                    .ok_or(PaymentError::NoProviderAvailable)?;
                self.attempt(provider, request).await
            }
            Strategy::RoundRobin => {
                let available = self.registry.available_providers();
                if available.is_empty() {
                    return Err(PaymentError::NoProviderAvailable);
                }
                let index = self.next_index.fetch_add(1, Ordering::Relaxed);
                self.attempt(available[index % available.len()], request).await
            }
            Strategy::FailFast => {
                let provider = self
                    .resolve_order(preferred)
                    .first()
                    .copied()
                    .ok_or(PaymentError::NoProviderAvailable)?;
                let result = self.attempt(provider, request).await;
                if result.is_err() {
                    warn!(order_id = %request.order_id(), provider = %provider, "fail-fast strategy aborting");
                }
                result
            }
            Strategy::ExhaustAll => self.exhaust_all(request, preferred).await,
        }
    }

    async fn exhaust_all(
        &self,
        request: &TransactionRequest,
        preferred: Option<ProviderId>,
    ) -> Result<PaymentOutcome> {
        let candidates = self.resolve_order(preferred);
        let mut last_failure = None;

        for (index, provider) in candidates.iter().copied().enumerate() {
            match self.attempt(provider, request).await {
                Ok(outcome) => return Ok(outcome),
                Err(err @ PaymentError::ValidationError(_)) => return Err(err),
                Err(err) => {
                    warn!(
                        order_id = %request.order_id(),
                        provider = %provider,
                        error = %err,
                        "provider failed, moving to the next candidate"
                    );
                    last_failure = Some((index + 1, provider, err));
                }
            }
        }

        match last_failure {
            Some((attempted, provider, err)) => {
                error!(order_id = %request.order_id(), attempted, "every provider failed");
                Err(PaymentError::ProvidersExhausted {
                    provider,
                    attempted,
                    source: Box::new(err),
                })
            }
            None => Err(PaymentError::NoProviderAvailable),
        }
    }

    async fn attempt(
        &self,
        provider: ProviderId,
        request: &TransactionRequest,
    ) -> Result<PaymentOutcome> {
        info!(order_id = %request.order_id(), provider = %provider, "trying provider");
        let result = match self.registry.create(provider).await {
            Ok(client) => client.create_transaction(request).await,
            Err(err) => Err(err),
        };
        self.record_usage(provider, result.is_ok()).await;

        let created = result?;
        info!(
            order_id = %request.order_id(),
            provider = %provider,
            external_ref = %created.external_ref,
            "payment created"
        );
        Ok(PaymentOutcome {
            provider,
            order_id: request.order_id().to_string(),
            external_ref: created.external_ref,
            status: created.status,
            raw: created.raw,
        })
    }

    async fn record_usage(&self, provider: ProviderId, success: bool) {
        let now = Utc::now();
        let mut usage = self.usage.lock().await;
        let entry = usage.entry(provider).or_default();
        entry.last_used = Some(now);
        if success {
            entry.success_count += 1;
            entry.last_success = Some(now);
        } else {
            entry.failure_count += 1;
            entry.last_failure = Some(now);
        }
    }

    pub async fn confirm_payment(
        &self,
        provider: ProviderId,
        external_ref: &str,
        order_id: &str,
        amount: Amount,
    ) -> Result<ProviderResponse> {
        let result = match self.registry.create(provider).await {
            Ok(client) => client.confirm_transaction(external_ref, order_id, amount).await,
            Err(err) => Err(err),
        };
        self.record_usage(provider, result.is_ok()).await;
        result
    }

    async fn query_at(&self, provider: ProviderId, external_ref: &str) -> Result<ProviderResponse> {
        let result = match self.registry.create(provider).await {
            Ok(client) => client.query_transaction(external_ref).await,
            Err(err) => Err(err),
        };
        self.record_usage(provider, result.is_ok()).await;
        result
    }

    async fn cancel_at(
        &self,
        provider: ProviderId,
        external_ref: &str,
        cancel: &CancelRequest,
    ) -> Result<ProviderResponse> {
        let result = match self.registry.create(provider).await {
            Ok(client) => client.cancel_transaction(external_ref, cancel).await,
            Err(err) => Err(err),
        };
        self.record_usage(provider, result.is_ok()).await;
        result
    }

    /// Looks a transaction up at `provider`, or at every available provider in
    /// turn until one knows it. Failing providers are skipped.
    pub async fn query_payment(
        &self,
        external_ref: &str,
        provider: Option<ProviderId>,
    ) -> Result<ProviderResponse> {
        if let Some(provider) = provider {
            return self.query_at(provider, external_ref).await;
        }

        for provider in self.registry.available_providers() {
            match self.query_at(provider, external_ref).await {
                Ok(response) if response.status != TransactionStatus::NotFound => {
                    return Ok(response);
                }
                Ok(_) => debug!(provider = %provider, external_ref, "transaction unknown"),
                Err(err) => {
                    warn!(provider = %provider, external_ref, error = %err, "status lookup failed")
                }
            }
        }
        Ok(ProviderResponse::not_found())
    }

    /// Cancels at `provider`, or at the first available provider that accepts
    /// the cancellation.
    pub async fn cancel_payment(
        &self,
        external_ref: &str,
        cancel: &CancelRequest,
        provider: Option<ProviderId>,
    ) -> Result<ProviderResponse> {
        if let Some(provider) = provider {
            return self.cancel_at(provider, external_ref, cancel).await;
        }

        let mut last_failure = None;
        let mut attempted = 0;
        for provider in self.registry.available_providers() {
            attempted += 1;
            match self.cancel_at(provider, external_ref, cancel).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    warn!(provider = %provider, external_ref, error = %err, "cancellation failed");
                    last_failure = Some((provider, err));
                }
            }
        }

        match last_failure {
            Some((provider, err)) => Err(PaymentError::ProvidersExhausted {
                provider,
                attempted,
                source: Box::new(err),
            }),
            None => Err(PaymentError::NoProviderAvailable),
        }
    }

    pub async fn verify_callback(
        &self,
        provider: ProviderId,
        payload: &str,
        signature: &str,
    ) -> Result<bool> {
        let result = match self.registry.create(provider).await {
            Ok(client) => client.verify_callback(payload, signature).await,
            Err(err) => Err(err),
        };
        self.record_usage(provider, result.is_ok()).await;
        result
    }

    pub async fn usage(&self) -> BTreeMap<ProviderId, ProviderUsage> {
        let usage = self.usage.lock().await;
        usage.iter().map(|(id, entry)| (*id, entry.clone())).collect()
    }

    pub async fn service_info(&self) -> ServiceInfo {
        ServiceInfo {
            strategy: self.config.strategy,
            primary: self.config.primary,
            fallbacks: self.config.fallbacks.clone(),
            available_providers: self.registry.available_providers(),
            usage: self.usage().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::health::HealthTracker;
    use crate::config::GatewayConfig;
    use crate::domain::provider::{Credentials, ProviderConfig};
    use crate::infrastructure::simulated::SimulatedProvider;

    fn orchestrator(config: OrchestratorConfig) -> PaymentOrchestrator {
        orchestrator_with_failures(config, &[])
    }

    /// Kg, Naver and Kakao are configured; the `failing` ones reject every call
    /// with an authentication error, which is never retried.
    fn orchestrator_with_failures(
        config: OrchestratorConfig,
        failing: &[ProviderId],
    ) -> PaymentOrchestrator {
        let mut gateway = GatewayConfig::default();
        for provider in [ProviderId::KgInicis, ProviderId::NaverPay, ProviderId::KakaoPay] {
            let mut provider_config = ProviderConfig::new(
                "https://pg.example",
                Credentials {
                    merchant_id: "m".to_string(),
                    api_key: "k".to_string(),
                    secret_key: None,
                },
            );
            if failing.contains(&provider) {
                provider_config
                    .extra
                    .insert("fail_first".to_string(), serde_json::json!(u32::MAX));
                provider_config
                    .extra
                    .insert("failure".to_string(), serde_json::json!("auth"));
            }
            gateway.providers.insert(provider, provider_config);
        }
        let mut registry =
            ProviderRegistry::new(Arc::new(gateway), Arc::new(HealthTracker::default()));
        for provider in [
            ProviderId::KgInicis,
            ProviderId::NaverPay,
            ProviderId::KakaoPay,
            ProviderId::NicePayments,
        ] {
            registry.register(provider, SimulatedProvider::constructor());
        }
        PaymentOrchestrator::new(Arc::new(registry), config)
    }

    #[test]
    fn test_strategy_parsing_and_aliases() {
        assert_eq!("fail-fast".parse::<Strategy>().unwrap(), Strategy::FailFast);
        assert_eq!("RETRY_ALL".parse::<Strategy>().unwrap(), Strategy::ExhaustAll);
        assert_eq!("best_effort".parse::<Strategy>().unwrap(), Strategy::ExhaustAll);
        assert_eq!("round_robin".parse::<Strategy>().unwrap(), Strategy::RoundRobin);
        assert!("random".parse::<Strategy>().is_err());

        let parsed: Strategy = serde_json::from_str("\"retry_all\"").unwrap();
        assert_eq!(parsed, Strategy::ExhaustAll);
    }

    #[test]
    fn test_preferred_provider_leads_when_available() {
        let orchestrator = orchestrator(OrchestratorConfig {
            primary: Some(ProviderId::NaverPay),
            ..Default::default()
        });
        assert_eq!(
            orchestrator.resolve_order(Some(ProviderId::KakaoPay)),
            vec![ProviderId::KakaoPay, ProviderId::KgInicis, ProviderId::NaverPay]
        );
        // NicePayments is registered but not configured.
        assert_eq!(
            orchestrator.resolve_order(Some(ProviderId::NicePayments)),
            vec![ProviderId::NaverPay, ProviderId::KgInicis, ProviderId::KakaoPay]
        );
    }

    #[test]
    fn test_fallbacks_filtered_to_available() {
        let orchestrator = orchestrator(OrchestratorConfig {
            fallbacks: vec![ProviderId::NicePayments, ProviderId::KakaoPay, ProviderId::KakaoPay],
            ..Default::default()
        });
        assert_eq!(
            orchestrator.resolve_order(None),
            vec![ProviderId::KakaoPay, ProviderId::KgInicis, ProviderId::NaverPay]
        );
    }

    #[test]
    fn test_default_order_is_registry_order() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        assert_eq!(
            orchestrator.resolve_order(None),
            vec![ProviderId::KgInicis, ProviderId::NaverPay, ProviderId::KakaoPay]
        );
    }

    #[tokio::test]
    async fn test_query_falls_back_until_found() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        let request = TransactionRequest::new(
            "order-7",
            "Shoes",
            rust_decimal_macros::dec!(89000),
            "KRW",
            crate::domain::transaction::PaymentMethod::Card,
            "cust-7",
        )
        .unwrap();
        let outcome = orchestrator
            .process_payment(&request, Some(ProviderId::KakaoPay))
            .await
            .unwrap();

        let found = orchestrator.query_payment(&outcome.external_ref, None).await.unwrap();
        assert_eq!(found.status, TransactionStatus::Ready);
        let missing = orchestrator.query_payment("nope", None).await.unwrap();
        assert_eq!(missing.status, TransactionStatus::NotFound);

        // Every lookup counts as use of the provider asked, found or not.
        let usage = orchestrator.usage().await;
        assert_eq!(usage[&ProviderId::KakaoPay].success_count, 3);
        assert_eq!(usage[&ProviderId::KgInicis].success_count, 2);
        assert_eq!(usage[&ProviderId::NaverPay].success_count, 2);
        assert!(usage[&ProviderId::KakaoPay].last_used.is_some());
    }

    fn request(order_id: &str) -> TransactionRequest {
        TransactionRequest::new(
            order_id,
            "Shoes",
            rust_decimal_macros::dec!(89000),
            "KRW",
            crate::domain::transaction::PaymentMethod::Card,
            "cust-7",
        )
        .unwrap()
    }

    fn full_cancel() -> CancelRequest {
        CancelRequest {
            reason: crate::domain::transaction::CancelReason::CustomerRequest,
            amount: None,
            detail: None,
        }
    }

    #[tokio::test]
    async fn test_confirm_payment_checks_the_created_transaction() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        let request = request("order-1");
        let outcome = orchestrator.process_payment(&request, None).await.unwrap();
        assert_eq!(outcome.provider, ProviderId::KgInicis);

        let confirmed = orchestrator
            .confirm_payment(ProviderId::KgInicis, &outcome.external_ref, "order-1", request.amount())
            .await
            .unwrap();
        assert_eq!(confirmed.status, TransactionStatus::Done);

        let wrong_amount = Amount::new(rust_decimal_macros::dec!(1)).unwrap();
        let err = orchestrator
            .confirm_payment(ProviderId::KgInicis, &outcome.external_ref, "order-1", wrong_amount)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::ValidationError(_)));

        let usage = orchestrator.usage().await;
        assert_eq!(usage[&ProviderId::KgInicis].success_count, 2);
        assert_eq!(usage[&ProviderId::KgInicis].failure_count, 1);
        assert!(usage[&ProviderId::KgInicis].last_failure.is_some());
    }

    #[tokio::test]
    async fn test_cancel_without_provider_moves_to_the_next_one() {
        let orchestrator = orchestrator_with_failures(
            OrchestratorConfig::default(),
            &[ProviderId::KgInicis],
        );
        let outcome = orchestrator
            .process_payment(&request("order-2"), Some(ProviderId::NaverPay))
            .await
            .unwrap();

        let cancelled = orchestrator
            .cancel_payment(&outcome.external_ref, &full_cancel(), None)
            .await
            .unwrap();
        assert_eq!(cancelled.status, TransactionStatus::Canceled);

        let usage = orchestrator.usage().await;
        assert_eq!(usage[&ProviderId::KgInicis].failure_count, 1);
        assert_eq!(usage[&ProviderId::NaverPay].success_count, 2);
        assert!(!usage.contains_key(&ProviderId::KakaoPay));
    }

    #[tokio::test]
    async fn test_cancel_without_provider_reports_the_last_failure() {
        let orchestrator = orchestrator_with_failures(
            OrchestratorConfig::default(),
            &[ProviderId::KgInicis, ProviderId::NaverPay, ProviderId::KakaoPay],
        );

        let err = orchestrator
            .cancel_payment("kg_inicis-unknown", &full_cancel(), None)
            .await
            .unwrap_err();

        match err {
            PaymentError::ProvidersExhausted {
                provider,
                attempted,
                source,
            } => {
                assert_eq!(provider, ProviderId::KakaoPay);
                assert_eq!(attempted, 3);
                assert!(matches!(*source, PaymentError::AuthenticationError { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        let usage = orchestrator.usage().await;
        assert!(usage.values().all(|entry| entry.failure_count == 1));
    }

    #[tokio::test]
    async fn test_verify_callback_uses_the_provider_secret() {
        let orchestrator = orchestrator(OrchestratorConfig::default());
        let payload = r#"{"tid":"naver_pay-1","status":"done"}"#;
        let signature = SimulatedProvider::sign("k", payload);

        assert!(
            orchestrator
                .verify_callback(ProviderId::NaverPay, payload, &signature)
                .await
                .unwrap()
        );
        assert!(
            !orchestrator
                .verify_callback(ProviderId::NaverPay, payload, "deadbeef")
                .await
                .unwrap()
        );
        // NicePayments has a client but no configuration.
        let err = orchestrator
            .verify_callback(ProviderId::NicePayments, payload, &signature)
            .await
            .unwrap_err();
        assert!(matches!(err, PaymentError::ConfigurationError(_)));
    }

    #[tokio::test]
    async fn test_service_info_reports_configuration_and_usage() {
        let orchestrator = orchestrator(OrchestratorConfig {
            strategy: Strategy::FailFast,
            primary: Some(ProviderId::KakaoPay),
            fallbacks: vec![ProviderId::NaverPay],
        });
        orchestrator.process_payment(&request("order-3"), None).await.unwrap();

        let info = orchestrator.service_info().await;
        assert_eq!(info.strategy, Strategy::FailFast);
        assert_eq!(info.primary, Some(ProviderId::KakaoPay));
        assert_eq!(info.fallbacks, vec![ProviderId::NaverPay]);
        assert_eq!(
            info.available_providers,
            vec![ProviderId::KgInicis, ProviderId::NaverPay, ProviderId::KakaoPay]
        );
        assert_eq!(info.usage.len(), 1);
        assert_eq!(info.usage[&ProviderId::KakaoPay].success_count, 1);
    }
}

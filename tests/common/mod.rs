#![allow(dead_code)]

use async_trait::async_trait;
use pgflow::application::gateway::PaymentGateway;
use pgflow::application::orchestrator::{OrchestratorConfig, Strategy};
use pgflow::config::GatewayConfig;
use pgflow::domain::money::Amount;
use pgflow::domain::ports::{ClientConstructor, ProviderClient, ProviderClientRef};
use pgflow::domain::provider::{Credentials, ProviderConfig, ProviderId};
use pgflow::domain::session::Session;
use pgflow::domain::transaction::{
    CancelRequest, CreatedTransaction, PaymentMethod, ProviderResponse, TransactionRequest,
    TransactionStatus,
};
use pgflow::error::{PaymentError, Result};
use rust_decimal_macros::dec;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

/// Tracks how many calls are running at once and the highest count seen.
#[derive(Default)]
pub struct InFlightProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightProbe {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub fn connection_error(provider: ProviderId) -> PaymentError {
    PaymentError::ConnectionError {
        provider,
        message: "connection refused".to_string(),
    }
}

pub fn auth_error(provider: ProviderId) -> PaymentError {
    PaymentError::AuthenticationError {
        provider,
        message: "invalid api key".to_string(),
    }
}

pub fn validation_error(_provider: ProviderId) -> PaymentError {
    PaymentError::ValidationError("amount exceeds card limit".to_string())
}

/// Provider whose `create_transaction` fails the first `fail_first` calls.
pub struct ScriptedProvider {
    pub provider: ProviderId,
    fail_first: u32,
    error: fn(ProviderId) -> PaymentError,
    delay: Duration,
    probe: Option<Arc<InFlightProbe>>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn ok(provider: ProviderId) -> Arc<Self> {
        Self::failing(provider, 0, connection_error)
    }

    pub fn always_failing(provider: ProviderId, error: fn(ProviderId) -> PaymentError) -> Arc<Self> {
        Self::failing(provider, u32::MAX, error)
    }

    pub fn failing(
        provider: ProviderId,
        fail_first: u32,
        error: fn(ProviderId) -> PaymentError,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            fail_first,
            error,
            delay: Duration::ZERO,
            probe: None,
            calls: AtomicU32::new(0),
        })
    }

    pub fn probed(provider: ProviderId, delay: Duration, probe: Arc<InFlightProbe>) -> Arc<Self> {
        Arc::new(Self {
            provider,
            fail_first: 0,
            error: connection_error,
            delay,
            probe: Some(probe),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn constructor(self: &Arc<Self>) -> ClientConstructor {
        let client = Arc::clone(self);
        Box::new(move |_, _| {
            let client: ProviderClientRef = client.clone();
            Ok(client)
        })
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    async fn create_transaction(
        &self,
        _session: &Session,
        request: &TransactionRequest,
    ) -> Result<CreatedTransaction> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(probe) = &self.probe {
            probe.enter();
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(probe) = &self.probe {
            probe.exit();
        }
        if call < self.fail_first {
            return Err((self.error)(self.provider));
        }
        Ok(CreatedTransaction {
            external_ref: format!("{}-{}", self.provider, request.order_id()),
            status: TransactionStatus::Ready,
            raw: serde_json::Value::Null,
        })
    }

    async fn confirm_transaction(
        &self,
        _session: &Session,
        _external_ref: &str,
        _order_id: &str,
        _amount: Amount,
    ) -> Result<ProviderResponse> {
        Ok(ProviderResponse {
            status: TransactionStatus::Done,
            raw: serde_json::Value::Null,
        })
    }

    async fn query_transaction(&self, _session: &Session, _external_ref: &str) -> Result<ProviderResponse> {
        Ok(ProviderResponse::not_found())
    }

    async fn cancel_transaction(
        &self,
        _session: &Session,
        _external_ref: &str,
        _cancel: &CancelRequest,
    ) -> Result<ProviderResponse> {
        Ok(ProviderResponse {
            status: TransactionStatus::Canceled,
            raw: serde_json::Value::Null,
        })
    }

    async fn verify_callback(&self, _payload: &str, _signature: &str) -> Result<bool> {
        Ok(true)
    }
}

pub fn provider_config(max_retries: u32, base_delay_ms: u64) -> ProviderConfig {
    let mut config = ProviderConfig::new(
        "https://pg.test",
        Credentials {
            merchant_id: "merchant".to_string(),
            api_key: "api-key".to_string(),
            secret_key: None,
        },
    );
    config.max_retries = max_retries;
    config.retry_base_delay_ms = base_delay_ms;
    config
}

/// Gateway over scripted providers, each configured with `max_retries` and a
/// 100 ms backoff base, registered in the given order.
pub fn gateway(
    strategy: Strategy,
    max_retries: u32,
    clients: &[Arc<ScriptedProvider>],
) -> PaymentGateway {
    let mut config = GatewayConfig {
        orchestrator: OrchestratorConfig {
            strategy,
            ..Default::default()
        },
        ..Default::default()
    };
    for client in clients {
        config
            .providers
            .insert(client.provider, provider_config(max_retries, 100));
    }
    PaymentGateway::new(
        config,
        clients
            .iter()
            .map(|client| (client.provider, client.constructor()))
            .collect::<Vec<_>>(),
    )
    .unwrap()
}

pub fn request(order_id: &str) -> TransactionRequest {
    TransactionRequest::new(
        order_id,
        "Wireless earbuds",
        dec!(129000),
        "KRW",
        PaymentMethod::Card,
        "customer-1",
    )
    .unwrap()
}

pub fn write_csv(path: &Path, rows: &[[&str; 6]]) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);
    wtr.write_record(["order_id", "order_name", "amount", "currency", "method", "customer_ref"])?;
    for row in rows {
        wtr.write_record(row)?;
    }
    wtr.flush()?;
    Ok(())
}

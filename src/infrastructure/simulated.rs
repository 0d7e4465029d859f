use crate::domain::money::Amount;
use crate::domain::ports::{ClientConstructor, ProviderClient, ProviderClientRef};
use crate::domain::provider::{ProviderConfig, ProviderId};
use crate::domain::session::Session;
use crate::domain::transaction::{
    CancelRequest, CreatedTransaction, ProviderResponse, TransactionRequest, TransactionStatus,
};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Failure injected by a [`SimulatedProvider`] while `fail_first` is not spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    Connection,
    Timeout,
    Authentication,
    RateLimit,
    ServerError,
    MalformedResponse,
}

impl FailureMode {
    fn parse(raw: &str) -> Result<Self> {
        match raw {
            "connection" => Ok(Self::Connection),
            "timeout" => Ok(Self::Timeout),
            "auth" | "authentication" => Ok(Self::Authentication),
            "rate_limit" => Ok(Self::RateLimit),
            "http_500" => Ok(Self::ServerError),
            "response" => Ok(Self::MalformedResponse),
            other => Err(PaymentError::ConfigurationError(format!(
                "unknown simulated failure '{other}'"
            ))),
        }
    }

    fn error(&self, provider: ProviderId, timeout: Duration) -> PaymentError {
        match self {
            Self::Connection => PaymentError::ConnectionError {
                provider,
                message: "simulated connection reset".to_string(),
            },
            Self::Timeout => PaymentError::TimeoutError { provider, timeout },
            Self::Authentication => PaymentError::AuthenticationError {
                provider,
                message: "simulated credential rejection".to_string(),
            },
            Self::RateLimit => PaymentError::RateLimitError {
                provider,
                retry_after: None,
            },
            Self::ServerError => PaymentError::HttpError {
                provider,
                status: 500,
                message: "simulated internal error".to_string(),
            },
            Self::MalformedResponse => PaymentError::ResponseError {
                provider,
                message: "simulated garbage body".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone)]
struct StoredTransaction {
    order_id: String,
    amount: Amount,
    status: TransactionStatus,
}

/// In-process provider with scripted behaviour, driven by `ProviderConfig.extra`:
///
/// - `fail_first`: number of provider calls that fail before any succeeds
/// - `failure`: which error those calls return (`connection` by default)
/// - `latency_ms`: artificial delay applied to every call
pub struct SimulatedProvider {
    provider: ProviderId,
    secret: String,
    fail_first: u64,
    failure: FailureMode,
    latency: Duration,
    timeout: Duration,
    calls: AtomicU64,
    transactions: RwLock<HashMap<String, StoredTransaction>>,
}

impl SimulatedProvider {
    pub fn new(provider: ProviderId, config: &ProviderConfig) -> Result<Self> {
        let number = |key: &str| -> Result<u64> {
            match config.extra.get(key) {
                None => Ok(0),
                Some(value) => value.as_u64().ok_or_else(|| {
                    PaymentError::ConfigurationError(format!(
                        "{provider}: '{key}' must be a non-negative integer"
                    ))
                }),
            }
        };
        let failure = match config.extra.get("failure").and_then(Value::as_str) {
            Some(raw) => FailureMode::parse(raw)?,
            None => FailureMode::Connection,
        };

        Ok(Self {
            provider,
            secret: config
                .credentials
                .secret_key
                .clone()
                .unwrap_or_else(|| config.credentials.api_key.clone()),
            fail_first: number("fail_first")?,
            failure,
            latency: Duration::from_millis(number("latency_ms")?),
            timeout: config.timeout(),
            calls: AtomicU64::new(0),
            transactions: RwLock::new(HashMap::new()),
        })
    }

    pub fn constructor() -> ClientConstructor {
        Box::new(|provider, config| {
            let client: ProviderClientRef = Arc::new(Self::new(provider, config)?);
            Ok(client)
        })
    }

    /// Hex encoded SHA-256 of the secret followed by the payload.
    pub fn sign(secret: &str, payload: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(secret.as_bytes());
        hasher.update(payload.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    async fn simulate(&self) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if call < self.fail_first {
            return Err(self.failure.error(self.provider, self.timeout));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        external_ref: &str,
        status: TransactionStatus,
    ) -> Option<StoredTransaction> {
        let mut transactions = self.transactions.write().await;
        transactions.get_mut(external_ref).map(|stored| {
            stored.status = status;
            stored.clone()
        })
    }
}

#[async_trait]
impl ProviderClient for SimulatedProvider {
    async fn create_transaction(
        &self,
        _session: &Session,
        request: &TransactionRequest,
    ) -> Result<CreatedTransaction> {
        self.simulate().await?;
        let external_ref = format!("{}-{}", self.provider, Uuid::new_v4().simple());
        self.transactions.write().await.insert(
            external_ref.clone(),
            StoredTransaction {
                order_id: request.order_id().to_string(),
                amount: request.amount(),
                status: TransactionStatus::Ready,
            },
        );
        Ok(CreatedTransaction {
            raw: json!({
                "tid": external_ref,
                "order_id": request.order_id(),
                "amount": request.amount().value(),
                "currency": request.currency(),
            }),
            external_ref,
            status: TransactionStatus::Ready,
        })
    }

    async fn confirm_transaction(
        &self,
        _session: &Session,
        external_ref: &str,
        order_id: &str,
        amount: Amount,
    ) -> Result<ProviderResponse> {
        self.simulate().await?;
        {
            let transactions = self.transactions.read().await;
            let Some(stored) = transactions.get(external_ref) else {
                return Ok(ProviderResponse::not_found());
            };
            if stored.order_id != order_id || stored.amount != amount {
                return Err(PaymentError::ValidationError(format!(
                    "confirmation does not match transaction {external_ref}"
                )));
            }
        }
        let status = self
            .update_status(external_ref, TransactionStatus::Done)
            .await
            .map_or(TransactionStatus::NotFound, |stored| stored.status);
        Ok(ProviderResponse {
            status,
            raw: json!({ "tid": external_ref, "status": status.as_str() }),
        })
    }

    async fn query_transaction(
        &self,
        _session: &Session,
        external_ref: &str,
    ) -> Result<ProviderResponse> {
        self.simulate().await?;
        let transactions = self.transactions.read().await;
        Ok(match transactions.get(external_ref) {
            Some(stored) => ProviderResponse {
                status: stored.status,
                raw: json!({
                    "tid": external_ref,
                    "order_id": stored.order_id,
                    "status": stored.status.as_str(),
                }),
            },
            None => ProviderResponse::not_found(),
        })
    }

    async fn cancel_transaction(
        &self,
        _session: &Session,
        external_ref: &str,
        cancel: &CancelRequest,
    ) -> Result<ProviderResponse> {
        self.simulate().await?;
        let status = match cancel.amount {
            Some(_) => TransactionStatus::PartialCanceled,
            None => TransactionStatus::Canceled,
        };
        Ok(match self.update_status(external_ref, status).await {
            Some(_) => ProviderResponse {
                status,
                raw: json!({ "tid": external_ref, "reason": cancel.reason }),
            },
            None => ProviderResponse::not_found(),
        })
    }

    async fn verify_callback(&self, payload: &str, signature: &str) -> Result<bool> {
        Ok(Self::sign(&self.secret, payload).eq_ignore_ascii_case(signature))
    }
}

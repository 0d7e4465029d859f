//! Resilient invocation of a single provider: session reuse, per-attempt
//! timeout, bounded exponential backoff and health reporting.

use crate::application::health::HealthTracker;
use crate::domain::health::RequestMetric;
use crate::domain::money::Amount;
use crate::domain::ports::ProviderClientRef;
use crate::domain::provider::{ProviderConfig, ProviderId};
use crate::domain::session::Session;
use crate::domain::transaction::{
    CancelRequest, CreatedTransaction, ProviderResponse, TransactionRequest,
};
use crate::error::{PaymentError, Result};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Confirm,
    Query,
    Cancel,
    VerifyCallback,
}

impl Operation {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Create => "/payments",
            Self::Confirm => "/payments/confirm",
            Self::Query => "/payments/query",
            Self::Cancel => "/payments/cancel",
            Self::VerifyCallback => "/callbacks/verify",
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            Self::Query => "GET",
            _ => "POST",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ProviderConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay(),
            max_delay: config.max_retry_delay(),
            timeout: config.timeout(),
        }
    }

    /// Total number of attempts, the first one included.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before the attempt following `attempt` (zero based): `base * 2^attempt`,
    /// capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

struct Lease {
    session: Arc<Session>,
    last_used: Instant,
}

/// Holds the one reusable session of a provider.
pub struct SessionSlot {
    provider: ProviderId,
    max_age: Duration,
    idle: Duration,
    current: Mutex<Option<Lease>>,
    next_id: AtomicU64,
}

impl SessionSlot {
    pub fn new(provider: ProviderId, max_age: Duration, idle: Duration) -> Self {
        Self {
            provider,
            max_age,
            idle,
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// Returns the live session, opening a new one when none exists or the
    /// current one is too old or has been idle too long.
    pub async fn acquire(&self) -> Arc<Session> {
        let mut current = self.current.lock().await;
        let now = Instant::now();
        if let Some(lease) = current.as_mut()
            && now.duration_since(lease.session.created_at) < self.max_age
            && now.duration_since(lease.last_used) < self.idle
        {
            lease.last_used = now;
            return Arc::clone(&lease.session);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(provider = %self.provider, session_id = id, "opening session");
        let session = Arc::new(Session::new(id, self.provider));
        *current = Some(Lease {
            session: Arc::clone(&session),
            last_used: now,
        });
        session
    }

    pub async fn invalidate(&self) {
        if let Some(lease) = self.current.lock().await.take() {
            debug!(provider = %self.provider, session_id = lease.session.id, "session invalidated");
        }
    }

    pub async fn current_id(&self) -> Option<u64> {
        self.current.lock().await.as_ref().map(|lease| lease.session.id)
    }
}

/// Wraps a provider client with retry, timeout and session management.
pub struct ResilientClient {
    provider: ProviderId,
    client: ProviderClientRef,
    policy: RetryPolicy,
    sessions: SessionSlot,
    health: Arc<HealthTracker>,
}

impl ResilientClient {
    pub fn new(
        provider: ProviderId,
        client: ProviderClientRef,
        config: &ProviderConfig,
        health: Arc<HealthTracker>,
    ) -> Self {
        Self {
            provider,
            client,
            policy: RetryPolicy::from_config(config),
            sessions: SessionSlot::new(provider, config.session_max_age(), config.session_idle()),
            health,
        }
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn sessions(&self) -> &SessionSlot {
        &self.sessions
    }

    /// Runs `call` until it succeeds, fails fatally or the retry budget is spent.
    ///
    /// Attempts are strictly sequential. Each one is bounded by the policy
    /// timeout, and dropping the returned future aborts the in-flight call.
    pub async fn invoke<T, F, Fut>(&self, operation: Operation, call: F) -> Result<T>
    where
        F: Fn(ProviderClientRef, Arc<Session>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
        T: Send,
    {
        let attempts = self.policy.attempts();
        let mut attempt = 0;
        loop {
            let session = self.sessions.acquire().await;
            debug!(
                provider = %self.provider,
                endpoint = operation.endpoint(),
                attempt = attempt + 1,
                session_id = session.id,
                "invoking provider"
            );

            let started = Instant::now();
            let pending = call(Arc::clone(&self.client), session);
            let outcome = match timeout(self.policy.timeout, pending).await {
                Ok(result) => result.map_err(|err| self.classify(err)),
                Err(_) => Err(PaymentError::TimeoutError {
                    provider: self.provider,
                    timeout: self.policy.timeout,
                }),
            };
            let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;

            let err = match outcome {
                Ok(value) => {
                    self.health
                        .record_attempt(RequestMetric::success(
                            self.provider,
                            operation.endpoint(),
                            operation.method(),
                            latency_ms,
                        ))
                        .await;
                    return Ok(value);
                }
                Err(err) => err,
            };

            self.health
                .record_attempt(RequestMetric::failure(
                    self.provider,
                    operation.endpoint(),
                    operation.method(),
                    err.status_code(),
                    latency_ms,
                    err.kind(),
                    err.to_string(),
                ))
                .await;

            if matches!(err, PaymentError::ConnectionError { .. }) {
                self.sessions.invalidate().await;
            }
            if !err.is_transient() {
                return Err(err);
            }
            if attempt + 1 >= attempts {
                return Err(PaymentError::RetryExhausted {
                    provider: self.provider,
                    attempts,
                    source: Box::new(err),
                });
            }

            let delay = err.retry_after().unwrap_or_else(|| self.policy.backoff(attempt));
            warn!(
                provider = %self.provider,
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying provider call"
            );
            sleep(delay).await;
            attempt += 1;
        }
    }

    /// Keeps the classified provider failures; anything else a client returns
    /// becomes a transport failure.
    fn classify(&self, err: PaymentError) -> PaymentError {
        match err {
            PaymentError::ConfigurationError(_)
            | PaymentError::ConnectionError { .. }
            | PaymentError::TimeoutError { .. }
            | PaymentError::AuthenticationError { .. }
            | PaymentError::RateLimitError { .. }
            | PaymentError::ValidationError(_)
            | PaymentError::ResponseError { .. }
            | PaymentError::HttpError { .. }
            | PaymentError::TransportError(_) => err,
            other => PaymentError::TransportError(format!("{}: {other}", self.provider)),
        }
    }

    pub async fn create_transaction(&self, request: &TransactionRequest) -> Result<CreatedTransaction> {
        self.invoke(Operation::Create, move |client, session| async move {
            client.create_transaction(&session, request).await
        })
        .await
    }

    pub async fn confirm_transaction(
        &self,
        external_ref: &str,
        order_id: &str,
        amount: Amount,
    ) -> Result<ProviderResponse> {
        self.invoke(Operation::Confirm, move |client, session| async move {
            client
                .confirm_transaction(&session, external_ref, order_id, amount)
                .await
        })
        .await
    }

    pub async fn query_transaction(&self, external_ref: &str) -> Result<ProviderResponse> {
        self.invoke(Operation::Query, move |client, session| async move {
            client.query_transaction(&session, external_ref).await
        })
        .await
    }

    pub async fn cancel_transaction(
        &self,
        external_ref: &str,
        cancel: &CancelRequest,
    ) -> Result<ProviderResponse> {
        self.invoke(Operation::Cancel, move |client, session| async move {
            client.cancel_transaction(&session, external_ref, cancel).await
        })
        .await
    }

    pub async fn verify_callback(&self, payload: &str, signature: &str) -> Result<bool> {
        self.invoke(Operation::VerifyCallback, move |client, _session| async move {
            client.verify_callback(payload, signature).await
        })
        .await
    }

    /// Drops the session and releases the underlying client.
    pub async fn close(&self) -> Result<()> {
        self.sessions.invalidate().await;
        debug!(provider = %self.provider, "closing provider client");
        self.client.close().await
    }
}

use crate::application::health::{HealthReport, HealthTracker};
use crate::application::orchestrator::{PaymentOrchestrator, ProviderUsage, Strategy};
use crate::application::registry::{ProviderRegistry, ProviderStatus};
use crate::application::steps::{PAYMENT_WORKFLOW_ID, payment_workflow};
use crate::application::workflow::WorkflowManager;
use crate::config::GatewayConfig;
use crate::domain::health::HealthStatus;
use crate::domain::ports::ClientConstructor;
use crate::domain::provider::ProviderId;
use crate::domain::transaction::{PaymentOutcome, TransactionRequest};
use crate::domain::workflow::{HistoryQuery, WorkflowContext, WorkflowExecution};
use crate::error::{PaymentError, Result};
use crate::infrastructure::in_memory::InMemoryExecutionStore;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub strategy: Strategy,
    pub providers: BTreeMap<ProviderId, ProviderStatus>,
    pub usage: BTreeMap<ProviderId, ProviderUsage>,
    pub health: HealthReport,
    pub timestamp: DateTime<Utc>,
}

/// Entry point of the payment core: owns one set of collaborators and
/// exposes single and batch submission.
pub struct PaymentGateway {
    config: Arc<GatewayConfig>,
    registry: Arc<ProviderRegistry>,
    orchestrator: Arc<PaymentOrchestrator>,
    workflows: WorkflowManager,
    health: Arc<HealthTracker>,
}

impl PaymentGateway {
    pub fn new(
        config: GatewayConfig,
        constructors: impl IntoIterator<Item = (ProviderId, ClientConstructor)>,
    ) -> Result<Self> {
        let config = Arc::new(config);
        let health = Arc::new(HealthTracker::new(&config.health)?);
        let mut registry = ProviderRegistry::new(Arc::clone(&config), Arc::clone(&health));
        for (provider, constructor) in constructors {
            registry.register(provider, constructor);
        }
        let registry = Arc::new(registry);
        let orchestrator = Arc::new(PaymentOrchestrator::new(
            Arc::clone(&registry),
            config.orchestrator.clone(),
        ));

        let mut workflows = WorkflowManager::new();
        workflows.register(payment_workflow(
            Arc::clone(&orchestrator),
            Arc::new(InMemoryExecutionStore::new()),
        ));

        info!(
            strategy = %config.orchestrator.strategy,
            available = ?registry.available_providers(),
            "payment gateway ready"
        );
        Ok(Self {
            config,
            registry,
            orchestrator,
            workflows,
            health,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<PaymentOrchestrator> {
        &self.orchestrator
    }

    pub fn workflows(&self) -> &WorkflowManager {
        &self.workflows
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }

    /// Charges one request, either directly through the orchestrator or
    /// wrapped in the standard payment workflow.
    pub async fn process_payment(
        &self,
        request: &TransactionRequest,
        preferred: Option<ProviderId>,
        use_workflow: bool,
    ) -> Result<PaymentOutcome> {
        if !use_workflow {
            return self.orchestrator.process_payment(request, preferred).await;
        }

        let mut ctx = WorkflowContext::new(request.clone()).with_preferred_provider(preferred);
        let execution = self
            .workflows
            .execute_workflow(PAYMENT_WORKFLOW_ID, &mut ctx)
            .await?;
        debug!(execution_id = %execution.execution_id, order_id = %request.order_id(), "workflow finished");
        ctx.outcome.ok_or(PaymentError::NoProviderAvailable)
    }

    /// Submits every request with at most `max_concurrency` in flight
    /// (configured default when `None`, never less than one). Results are
    /// returned in input order.
    pub async fn process_batch(
        &self,
        requests: &[TransactionRequest],
        preferred: Option<ProviderId>,
        use_workflow: bool,
        max_concurrency: Option<usize>,
    ) -> Vec<Result<PaymentOutcome>> {
        let limit = max_concurrency
            .unwrap_or(self.config.batch.max_concurrency)
            .max(1);
        let semaphore = Semaphore::new(limit);
        info!(requests = requests.len(), max_concurrency = limit, "processing batch");

        join_all(requests.iter().map(|request| {
            let semaphore = &semaphore;
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|err| PaymentError::TransportError(err.to_string()))?;
                self.process_payment(request, preferred, use_workflow).await
            }
        }))
        .await
    }

    /// Workflow executions matching `query`, newest first.
    pub async fn payment_history(&self, query: &HistoryQuery) -> Result<Vec<WorkflowExecution>> {
        self.workflows.history(query).await
    }

    pub async fn get_execution(&self, execution_id: &str) -> Result<Option<WorkflowExecution>> {
        self.workflows.get_execution(execution_id).await
    }

    pub async fn cleanup_history(&self, max_age_hours: i64) -> Result<usize> {
        self.workflows.cleanup_all(max_age_hours).await
    }

    pub async fn health_check(&self) -> HealthCheck {
        let health = self.health.health_status().await;
        HealthCheck {
            status: health.overall_status,
            strategy: self.orchestrator.strategy(),
            providers: self.registry.status().await,
            usage: self.orchestrator.usage().await,
            timestamp: health.timestamp,
            health,
        }
    }

    pub async fn close(&self) -> Result<()> {
        info!("closing payment gateway");
        self.registry.close_all().await
    }
}

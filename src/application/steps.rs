//! Handlers of the standard payment workflow.

use crate::application::orchestrator::PaymentOrchestrator;
use crate::application::workflow::{RetryDelay, Workflow, WorkflowStep};
use crate::domain::ports::{ExecutionStoreRef, StepHandler};
use crate::domain::workflow::{StepCategory, WorkflowContext};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub const PAYMENT_WORKFLOW_ID: &str = "payment_processing";

pub struct ValidateRequest;

#[async_trait]
impl StepHandler for ValidateRequest {
    async fn run(&self, ctx: &mut WorkflowContext) -> Result<()> {
        ctx.request.validate()?;
        ctx.insert("validated_at", Utc::now().to_rfc3339());
        Ok(())
    }
}

pub struct LogPaymentStart;

#[async_trait]
impl StepHandler for LogPaymentStart {
    async fn run(&self, ctx: &mut WorkflowContext) -> Result<()> {
        info!(
            order_id = %ctx.request.order_id(),
            amount = %ctx.request.amount(),
            currency = %ctx.request.currency(),
            "payment started"
        );
        ctx.insert("payment_started_at", Utc::now().to_rfc3339());
        Ok(())
    }
}

/// Charges the customer through the orchestrator and stores the outcome in the context.
pub struct ProcessPayment {
    orchestrator: Arc<PaymentOrchestrator>,
}

impl ProcessPayment {
    pub fn new(orchestrator: Arc<PaymentOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl StepHandler for ProcessPayment {
    async fn run(&self, ctx: &mut WorkflowContext) -> Result<()> {
        let outcome = self
            .orchestrator
            .process_payment(&ctx.request, ctx.preferred_provider)
            .await?;
        ctx.insert("provider", outcome.provider.as_str());
        ctx.insert("external_ref", outcome.external_ref.as_str());
        ctx.insert("payment_status", outcome.status.as_str());
        ctx.outcome = Some(outcome);
        Ok(())
    }
}

pub struct SendNotification;

#[async_trait]
impl StepHandler for SendNotification {
    async fn run(&self, ctx: &mut WorkflowContext) -> Result<()> {
        let Some(outcome) = &ctx.outcome else {
            return Err(PaymentError::ValidationError(
                "no payment outcome to notify about".to_string(),
            ));
        };
        info!(
            order_id = %outcome.order_id,
            customer_ref = %ctx.request.customer_ref(),
            provider = %outcome.provider,
            "payment notification sent"
        );
        ctx.insert("notified", true);
        Ok(())
    }
}

pub struct LogPaymentComplete;

#[async_trait]
impl StepHandler for LogPaymentComplete {
    async fn run(&self, ctx: &mut WorkflowContext) -> Result<()> {
        info!(
            order_id = %ctx.request.order_id(),
            external_ref = ctx.outcome.as_ref().map(|o| o.external_ref.as_str()).unwrap_or("-"),
            "payment completed"
        );
        ctx.insert("payment_completed_at", Utc::now().to_rfc3339());
        Ok(())
    }
}

/// validate, log start, pay, notify, log completion.
pub fn payment_workflow(
    orchestrator: Arc<PaymentOrchestrator>,
    store: ExecutionStoreRef,
) -> Workflow {
    Workflow::with_store(PAYMENT_WORKFLOW_ID, store)
        .step(
            WorkflowStep::new("validate_request", StepCategory::Validation, Arc::new(ValidateRequest))
                .with_timeout(Duration::from_secs(5)),
        )
        .step(
            WorkflowStep::new("log_payment_start", StepCategory::Logging, Arc::new(LogPaymentStart))
                .optional()
                .with_timeout(Duration::from_secs(5)),
        )
        .step(
            WorkflowStep::new(
                "process_payment",
                StepCategory::Payment,
                Arc::new(ProcessPayment::new(orchestrator)),
            )
            .with_timeout(Duration::from_secs(60))
            .with_retries(2, RetryDelay::Fixed(Duration::from_secs(1))),
        )
        .step(
            WorkflowStep::new("send_notification", StepCategory::Notification, Arc::new(SendNotification))
                .optional()
                .with_timeout(Duration::from_secs(10)),
        )
        .step(
            WorkflowStep::new(
                "log_payment_complete",
                StepCategory::Logging,
                Arc::new(LogPaymentComplete),
            )
            .optional()
            .with_timeout(Duration::from_secs(5)),
        )
}

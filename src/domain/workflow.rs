use super::provider::ProviderId;
use super::transaction::{PaymentOutcome, TransactionRequest};
use crate::error::PaymentError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Pending,
    Processing,
    Success,
    Failed,
    Cancelled,
    Timeout,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }

    fn can_become(&self, next: WorkflowStatus) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Processing | Self::Cancelled),
            Self::Processing => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepCategory {
    Validation,
    Payment,
    Notification,
    Logging,
}

/// Execution history of one workflow run for one order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowExecution {
    pub execution_id: String,
    pub workflow_id: String,
    pub order_id: String,
    pub provider: Option<ProviderId>,
    pub status: WorkflowStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub current_step: Option<String>,
    pub steps_completed: Vec<String>,
    pub steps_failed: Vec<String>,
    pub error_message: Option<String>,
    pub context: Map<String, Value>,
}

impl WorkflowExecution {
    pub fn new(
        execution_id: impl Into<String>,
        workflow_id: impl Into<String>,
        order_id: impl Into<String>,
        provider: Option<ProviderId>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            workflow_id: workflow_id.into(),
            order_id: order_id.into(),
            provider,
            status: WorkflowStatus::Pending,
            started_at: Utc::now(),
            completed_at: None,
            current_step: None,
            steps_completed: Vec::new(),
            steps_failed: Vec::new(),
            error_message: None,
            context: Map::new(),
        }
    }

    /// Moves to `next`, refusing to leave a terminal state.
    pub fn transition(&mut self, next: WorkflowStatus) -> Result<(), PaymentError> {
        if !self.status.can_become(next) {
            return Err(PaymentError::InvalidTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
            self.current_step = None;
        }
        Ok(())
    }

    /// Wall time of the run so far, or of the whole run once terminal.
    pub fn duration(&self) -> chrono::Duration {
        self.completed_at.unwrap_or_else(Utc::now) - self.started_at
    }
}

/// Shared mutable state handed from step to step during one run.
#[derive(Debug, Clone)]
pub struct WorkflowContext {
    pub request: TransactionRequest,
    pub preferred_provider: Option<ProviderId>,
    pub outcome: Option<PaymentOutcome>,
    pub data: Map<String, Value>,
}

impl WorkflowContext {
    pub fn new(request: TransactionRequest) -> Self {
        Self {
            request,
            preferred_provider: None,
            outcome: None,
            data: Map::new(),
        }
    }

    pub fn with_preferred_provider(mut self, provider: Option<ProviderId>) -> Self {
        self.preferred_provider = provider;
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}

/// Filter for the payment history built from workflow executions.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub order_id: Option<String>,
    pub provider: Option<ProviderId>,
    pub started_after: Option<DateTime<Utc>>,
    pub started_before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    pub fn matches(&self, execution: &WorkflowExecution) -> bool {
        if let Some(order_id) = &self.order_id
            && &execution.order_id != order_id
        {
            return false;
        }
        if let Some(provider) = self.provider
            && execution.provider != Some(provider)
        {
            return false;
        }
        if let Some(after) = self.started_after
            && execution.started_at < after
        {
            return false;
        }
        if let Some(before) = self.started_before
            && execution.started_at > before
        {
            return false;
        }
        true
    }
}

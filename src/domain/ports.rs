use super::money::Amount;
use super::provider::{ProviderConfig, ProviderId};
use super::session::Session;
use super::transaction::{CancelRequest, CreatedTransaction, ProviderResponse, TransactionRequest};
use super::workflow::{WorkflowContext, WorkflowExecution};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// The five-operation capability every payment provider implements.
///
/// Implementations own the wire protocol, field naming and signing of a
/// single provider. Any error they return that is not one of the classified
/// variants is treated as a transport failure by the invocation wrapper.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    async fn create_transaction(
        &self,
        session: &Session,
        request: &TransactionRequest,
    ) -> Result<CreatedTransaction>;

    async fn confirm_transaction(
        &self,
        session: &Session,
        external_ref: &str,
        order_id: &str,
        amount: Amount,
    ) -> Result<ProviderResponse>;

    async fn query_transaction(
        &self,
        session: &Session,
        external_ref: &str,
    ) -> Result<ProviderResponse>;

    async fn cancel_transaction(
        &self,
        session: &Session,
        external_ref: &str,
        cancel: &CancelRequest,
    ) -> Result<ProviderResponse>;

    async fn verify_callback(&self, payload: &str, signature: &str) -> Result<bool>;

    /// Releases provider-side resources. Called once during teardown.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Storage for workflow execution history.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn save(&self, execution: WorkflowExecution) -> Result<()>;
    async fn get(&self, execution_id: &str) -> Result<Option<WorkflowExecution>>;
    async fn by_order(&self, order_id: &str) -> Result<Vec<WorkflowExecution>>;
    async fn all(&self) -> Result<Vec<WorkflowExecution>>;
    /// Removes every execution started before `cutoff`, returning how many were dropped.
    async fn remove_started_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// One unit of work inside a workflow.
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn run(&self, ctx: &mut WorkflowContext) -> Result<()>;
}

pub type ProviderClientRef = Arc<dyn ProviderClient>;
pub type ExecutionStoreRef = Arc<dyn ExecutionStore>;
pub type StepHandlerRef = Arc<dyn StepHandler>;

/// Builds the client for a provider from its configuration.
pub type ClientConstructor =
    Box<dyn Fn(ProviderId, &ProviderConfig) -> Result<ProviderClientRef> + Send + Sync>;

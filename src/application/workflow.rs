//! Step-based workflow engine with per-step timeout and retry, and
//! execution history.

use crate::domain::ports::{ExecutionStoreRef, StepHandlerRef};
use crate::domain::workflow::{
    HistoryQuery, StepCategory, WorkflowContext, WorkflowExecution, WorkflowStatus,
};
use crate::error::{PaymentError, Result};
use crate::infrastructure::in_memory::InMemoryExecutionStore;
use chrono::Utc;
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::pending;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDelay {
    Fixed(Duration),
    Exponential { base: Duration, max: Duration },
}

impl RetryDelay {
    fn after(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Exponential { base, max } => 2u32
                .checked_pow(attempt)
                .and_then(|factor| base.checked_mul(factor))
                .map_or(max, |delay| delay.min(max)),
        }
    }
}

pub struct WorkflowStep {
    pub name: String,
    pub category: StepCategory,
    pub handler: StepHandlerRef,
    pub required: bool,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: RetryDelay,
}

impl WorkflowStep {
    /// A required step with a 30 second timeout and no retries.
    pub fn new(name: impl Into<String>, category: StepCategory, handler: StepHandlerRef) -> Self {
        Self {
            name: name.into(),
            category,
            handler,
            required: true,
            timeout: Duration::from_secs(30),
            max_retries: 0,
            retry_delay: RetryDelay::Fixed(Duration::from_secs(1)),
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, delay: RetryDelay) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = delay;
        self
    }

    pub fn descriptor(&self) -> StepDescriptor {
        StepDescriptor {
            name: self.name.clone(),
            category: self.category,
            required: self.required,
            timeout_ms: self.timeout.as_millis() as u64,
            max_retries: self.max_retries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepDescriptor {
    pub name: String,
    pub category: StepCategory,
    pub required: bool,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

/// Sending half of a cancellation pair.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Receiving half of a cancellation pair, handed to a running execution.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    /// Resolves once cancellation is requested. Never resolves if the handle is
    /// dropped without cancelling.
    pub async fn cancelled(&mut self) {
        let outcome = self.0.wait_for(|cancelled| *cancelled).await.map(|_| ());
        if outcome.is_err() {
            pending::<()>().await;
        }
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(Arc::new(tx)), CancelSignal(rx))
}

enum Interrupt {
    Cancelled,
    Deadline(Duration),
}

async fn cancelled(signal: Option<&mut CancelSignal>) {
    match signal {
        Some(signal) => signal.cancelled().await,
        None => pending().await,
    }
}

async fn expired(deadline: Option<Duration>) {
    match deadline {
        Some(deadline) => sleep(deadline).await,
        None => pending().await,
    }
}

/// An ordered list of steps run against one shared context per execution.
pub struct Workflow {
    id: String,
    steps: Vec<WorkflowStep>,
    store: ExecutionStoreRef,
    seq: AtomicU64,
}

impl Workflow {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_store(id, Arc::new(InMemoryExecutionStore::new()))
    }

    pub fn with_store(id: impl Into<String>, store: ExecutionStoreRef) -> Self {
        Self {
            id: id.into(),
            steps: Vec::new(),
            store,
            seq: AtomicU64::new(0),
        }
    }

    pub fn step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn steps(&self) -> Vec<StepDescriptor> {
        self.steps.iter().map(WorkflowStep::descriptor).collect()
    }

    pub async fn execute(&self, ctx: &mut WorkflowContext) -> Result<WorkflowExecution> {
        self.execute_inner(ctx, None, None).await
    }

    /// Like [`Workflow::execute`], but the whole run is bounded by `deadline`;
    /// an overrun ends with status `timeout`.
    pub async fn execute_with_deadline(
        &self,
        ctx: &mut WorkflowContext,
        deadline: Duration,
    ) -> Result<WorkflowExecution> {
        self.execute_inner(ctx, Some(deadline), None).await
    }

    /// Like [`Workflow::execute`], but aborts the in-flight step when `signal`
    /// fires; the execution ends with status `cancelled`.
    pub async fn execute_with_cancel(
        &self,
        ctx: &mut WorkflowContext,
        mut signal: CancelSignal,
    ) -> Result<WorkflowExecution> {
        self.execute_inner(ctx, None, Some(&mut signal)).await
    }

    async fn execute_inner(
        &self,
        ctx: &mut WorkflowContext,
        deadline: Option<Duration>,
        signal: Option<&mut CancelSignal>,
    ) -> Result<WorkflowExecution> {
        let mut execution = WorkflowExecution::new(
            self.next_execution_id(ctx.request.order_id()),
            self.id.as_str(),
            ctx.request.order_id(),
            ctx.preferred_provider,
        );
        execution.transition(WorkflowStatus::Processing)?;
        self.store.save(execution.clone()).await?;
        info!(
            workflow = %self.id,
            execution_id = %execution.execution_id,
            order_id = %execution.order_id,
            "workflow started"
        );

        let outcome = {
            let run = self.run_steps(&mut execution, ctx);
            tokio::select! {
                biased;
                _ = cancelled(signal) => Err(Interrupt::Cancelled),
                _ = expired(deadline) => Err(Interrupt::Deadline(deadline.unwrap_or_default())),
                result = run => Ok(result),
            }
        };

        for (key, value) in &ctx.data {
            execution.context.insert(key.clone(), value.clone());
        }
        if let Some(payment) = &ctx.outcome {
            execution.provider = Some(payment.provider);
        }

        let result = match outcome {
            Ok(Ok(())) => {
                execution.transition(WorkflowStatus::Success)?;
                info!(
                    workflow = %self.id,
                    execution_id = %execution.execution_id,
                    completed = execution.steps_completed.len(),
                    failed = execution.steps_failed.len(),
                    duration_ms = execution.duration().num_milliseconds(),
                    "workflow succeeded"
                );
                Ok(())
            }
            Ok(Err(err)) => {
                execution.error_message = Some(err.to_string());
                execution.transition(WorkflowStatus::Failed)?;
                error!(workflow = %self.id, execution_id = %execution.execution_id, error = %err, "workflow failed");
                Err(err)
            }
            Err(Interrupt::Cancelled) => {
                execution.error_message = Some("execution cancelled".to_string());
                execution.transition(WorkflowStatus::Cancelled)?;
                warn!(workflow = %self.id, execution_id = %execution.execution_id, "workflow cancelled");
                Err(PaymentError::WorkflowCancelled(execution.execution_id.clone()))
            }
            Err(Interrupt::Deadline(deadline)) => {
                execution.error_message = Some(format!("deadline of {deadline:?} exceeded"));
                execution.transition(WorkflowStatus::Timeout)?;
                warn!(workflow = %self.id, execution_id = %execution.execution_id, "workflow timed out");
                Err(PaymentError::WorkflowTimeout {
                    execution_id: execution.execution_id.clone(),
                    deadline,
                })
            }
        };

        self.store.save(execution.clone()).await?;
        result.map(|()| execution)
    }

    async fn run_steps(
        &self,
        execution: &mut WorkflowExecution,
        ctx: &mut WorkflowContext,
    ) -> Result<()> {
        for step in &self.steps {
            execution.current_step = Some(step.name.clone());
            self.store.save(execution.clone()).await?;

            match self.run_step(step, ctx).await {
                Ok(()) => execution.steps_completed.push(step.name.clone()),
                Err(err) if step.required => {
                    execution.steps_failed.push(step.name.clone());
                    return Err(err);
                }
                Err(err) => {
                    warn!(workflow = %self.id, step = %step.name, error = %err, "optional step failed");
                    execution.steps_failed.push(step.name.clone());
                    execution
                        .context
                        .insert(format!("{}_error", step.name), err.to_string().into());
                }
            }
        }
        Ok(())
    }

    async fn run_step(&self, step: &WorkflowStep, ctx: &mut WorkflowContext) -> Result<()> {
        let attempts = step.max_retries.saturating_add(1);
        let mut attempt = 0;
        loop {
            debug!(workflow = %self.id, step = %step.name, attempt = attempt + 1, "running step");
            let result = match timeout(step.timeout, step.handler.run(&mut *ctx)).await {
                Ok(result) => result,
                Err(_) => Err(PaymentError::StepTimeout {
                    step: step.name.clone(),
                    timeout: step.timeout,
                }),
            };
            let err = match result {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            if err.is_fatal() || attempt + 1 >= attempts {
                return Err(PaymentError::StepFailed {
                    step: step.name.clone(),
                    attempts: attempt + 1,
                    source: Box::new(err),
                });
            }
            let delay = step.retry_delay.after(attempt);
            warn!(step = %step.name, attempt = attempt + 1, error = %err, "step failed, retrying");
            sleep(delay).await;
            attempt += 1;
        }
    }

    fn next_execution_id(&self, order_id: &str) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}_{}_{}_{}",
            self.id,
            order_id,
            Utc::now().timestamp_micros(),
            seq
        )
    }

    pub async fn get_execution(&self, execution_id: &str) -> Result<Option<WorkflowExecution>> {
        self.store.get(execution_id).await
    }

    pub async fn executions_by_order(&self, order_id: &str) -> Result<Vec<WorkflowExecution>> {
        self.store.by_order(order_id).await
    }

    pub async fn executions(&self) -> Result<Vec<WorkflowExecution>> {
        self.store.all().await
    }

    /// Drops executions started more than `max_age_hours` ago.
    pub async fn cleanup(&self, max_age_hours: i64) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::hours(max_age_hours);
        let removed = self.store.remove_started_before(cutoff).await?;
        if removed > 0 {
            info!(workflow = %self.id, removed, "old executions purged");
        }
        Ok(removed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowSummary {
    pub workflow_id: String,
    pub total_executions: usize,
    pub recent_executions: Vec<String>,
    pub steps: Vec<StepDescriptor>,
}

/// Registry of workflows by id.
#[derive(Default)]
pub struct WorkflowManager {
    workflows: BTreeMap<String, Arc<Workflow>>,
}

impl WorkflowManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, workflow: Workflow) -> Arc<Workflow> {
        let workflow = Arc::new(workflow);
        self.workflows
            .insert(workflow.id().to_string(), Arc::clone(&workflow));
        workflow
    }

    pub fn get(&self, workflow_id: &str) -> Option<Arc<Workflow>> {
        self.workflows.get(workflow_id).cloned()
    }

    pub fn workflow_ids(&self) -> Vec<String> {
        self.workflows.keys().cloned().collect()
    }

    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        ctx: &mut WorkflowContext,
    ) -> Result<WorkflowExecution> {
        let workflow = self
            .get(workflow_id)
            .ok_or_else(|| PaymentError::WorkflowNotFound(workflow_id.to_string()))?;
        workflow.execute(ctx).await
    }

    pub async fn get_execution(&self, execution_id: &str) -> Result<Option<WorkflowExecution>> {
        for workflow in self.workflows.values() {
            if let Some(execution) = workflow.get_execution(execution_id).await? {
                return Ok(Some(execution));
            }
        }
        Ok(None)
    }

    pub async fn workflow_summary(&self, workflow_id: &str) -> Result<WorkflowSummary> {
        let workflow = self
            .get(workflow_id)
            .ok_or_else(|| PaymentError::WorkflowNotFound(workflow_id.to_string()))?;
        let mut executions = workflow.executions().await?;
        executions.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        Ok(WorkflowSummary {
            workflow_id: workflow_id.to_string(),
            total_executions: executions.len(),
            recent_executions: executions
                .iter()
                .take(10)
                .map(|execution| execution.execution_id.clone())
                .collect(),
            steps: workflow.steps(),
        })
    }

    pub async fn cleanup_all(&self, max_age_hours: i64) -> Result<usize> {
        let mut removed = 0;
        for workflow in self.workflows.values() {
            removed += workflow.cleanup(max_age_hours).await?;
        }
        Ok(removed)
    }

    /// Executions of every workflow matching `query`, newest first.
    pub async fn history(&self, query: &HistoryQuery) -> Result<Vec<WorkflowExecution>> {
        let mut matched = Vec::new();
        for workflow in self.workflows.values() {
            matched.extend(
                workflow
                    .executions()
                    .await?
                    .into_iter()
                    .filter(|execution| query.matches(execution)),
            );
        }
        matched.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::StepHandler;
    use crate::domain::transaction::{PaymentMethod, TransactionRequest};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicU32;

    struct Counting {
        calls: AtomicU32,
        fail_times: u32,
        error: fn() -> PaymentError,
    }

    impl Counting {
        fn ok() -> Arc<Self> {
            Self::failing(0)
        }

        fn failing(fail_times: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                fail_times,
                error: || PaymentError::TransportError("step broke".to_string()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StepHandler for Counting {
        async fn run(&self, ctx: &mut WorkflowContext) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                return Err((self.error)());
            }
            ctx.insert(format!("call_{call}"), true);
            Ok(())
        }
    }

    struct Sleepy(Duration);

    #[async_trait]
    impl StepHandler for Sleepy {
        async fn run(&self, _ctx: &mut WorkflowContext) -> Result<()> {
            sleep(self.0).await;
            Ok(())
        }
    }

    fn context() -> WorkflowContext {
        WorkflowContext::new(
            TransactionRequest::new("order-1", "Lamp", dec!(25000), "KRW", PaymentMethod::Card, "c-1")
                .unwrap(),
        )
    }

    #[test]
    fn test_exponential_retry_delay_doubles_up_to_max() {
        let delay = RetryDelay::Exponential {
            base: Duration::from_millis(100),
            max: Duration::from_millis(250),
        };
        assert_eq!(delay.after(0), Duration::from_millis(100));
        assert_eq!(delay.after(1), Duration::from_millis(200));
        assert_eq!(delay.after(2), Duration::from_millis(250));
        assert_eq!(delay.after(40), Duration::from_millis(250));
        assert_eq!(RetryDelay::Fixed(Duration::from_secs(1)).after(5), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_retries_back_off_exponentially() {
        let flaky = Counting::failing(3);
        let workflow = Workflow::new("wf").step(
            WorkflowStep::new("charge", StepCategory::Payment, flaky.clone()).with_retries(
                3,
                RetryDelay::Exponential {
                    base: Duration::from_millis(100),
                    max: Duration::from_millis(250),
                },
            ),
        );

        let started = tokio::time::Instant::now();
        let execution = workflow.execute(&mut context()).await.unwrap();
        let elapsed = started.elapsed();

        assert_eq!(execution.status, WorkflowStatus::Success);
        assert_eq!(flaky.calls(), 4);
        // 100 + 200 + 250, nothing after the successful attempt.
        assert!(elapsed >= Duration::from_millis(550));
        assert!(elapsed < Duration::from_millis(800));
    }

    #[tokio::test]
    async fn test_required_failure_halts_remaining_steps() {
        let a = Counting::failing(u32::MAX);
        let b = Counting::ok();
        let workflow = Workflow::new("wf")
            .step(WorkflowStep::new("a", StepCategory::Validation, a.clone()))
            .step(WorkflowStep::new("b", StepCategory::Payment, b.clone()));

        let err = workflow.execute(&mut context()).await.unwrap_err();
        assert!(matches!(err, PaymentError::StepFailed { ref step, .. } if step == "a"));
        assert_eq!(b.calls(), 0);

        let executions = workflow.executions_by_order("order-1").await.unwrap();
        assert_eq!(executions.len(), 1);
        let execution = &executions[0];
        assert_eq!(execution.status, WorkflowStatus::Failed);
        assert_eq!(execution.steps_failed, vec!["a".to_string()]);
        assert!(execution.steps_completed.is_empty());
        assert!(execution.error_message.is_some());
        assert!(execution.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_optional_failure_does_not_halt() {
        let workflow = Workflow::new("wf")
            .step(WorkflowStep::new("a", StepCategory::Logging, Counting::failing(u32::MAX)).optional())
            .step(WorkflowStep::new("b", StepCategory::Payment, Counting::ok()));

        let execution = workflow.execute(&mut context()).await.unwrap();
        assert_eq!(execution.status, WorkflowStatus::Success);
        assert_eq!(execution.steps_failed, vec!["a".to_string()]);
        assert_eq!(execution.steps_completed, vec!["b".to_string()]);
        assert!(execution.context.contains_key("a_error"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_retries_until_success() {
        let flaky = Counting::failing(2);
        let workflow = Workflow::new("wf").step(
            WorkflowStep::new("pay", StepCategory::Payment, flaky.clone())
                .with_retries(2, RetryDelay::Fixed(Duration::from_millis(50))),
        );

        let execution = workflow.execute(&mut context()).await.unwrap();
        assert_eq!(flaky.calls(), 3);
        assert_eq!(execution.steps_completed, vec!["pay".to_string()]);
        assert_eq!(execution.context.get("call_2"), Some(&serde_json::Value::Bool(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_step_error_is_not_retried() {
        let handler = Arc::new(Counting {
            calls: AtomicU32::new(0),
            fail_times: u32::MAX,
            error: || PaymentError::ValidationError("bad".to_string()),
        });
        let workflow = Workflow::new("wf").step(
            WorkflowStep::new("validate", StepCategory::Validation, handler.clone())
                .with_retries(3, RetryDelay::Fixed(Duration::from_millis(10))),
        );

        let err = workflow.execute(&mut context()).await.unwrap_err();
        assert!(matches!(err, PaymentError::StepFailed { attempts: 1, .. }));
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_timeout_is_enforced() {
        let workflow = Workflow::new("wf").step(
            WorkflowStep::new("slow", StepCategory::Notification, Arc::new(Sleepy(Duration::from_secs(60))))
                .with_timeout(Duration::from_secs(1)),
        );

        let err = workflow.execute(&mut context()).await.unwrap_err();
        match err {
            PaymentError::StepFailed { source, .. } => {
                assert!(matches!(*source, PaymentError::StepTimeout { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_marks_execution_timeout() {
        let workflow = Workflow::new("wf").step(
            WorkflowStep::new("slow", StepCategory::Payment, Arc::new(Sleepy(Duration::from_secs(20))))
                .with_timeout(Duration::from_secs(60)),
        );

        let err = workflow
            .execute_with_deadline(&mut context(), Duration::from_secs(5))
            .await
            .unwrap_err();
        let PaymentError::WorkflowTimeout { execution_id, .. } = err else {
            panic!("expected a workflow timeout");
        };
        let execution = workflow.get_execution(&execution_id).await.unwrap().unwrap();
        assert_eq!(execution.status, WorkflowStatus::Timeout);
        assert!(execution.current_step.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_in_flight_step() {
        let workflow = Arc::new(Workflow::new("wf").step(WorkflowStep::new(
            "slow",
            StepCategory::Payment,
            Arc::new(Sleepy(Duration::from_secs(20))),
        )));
        let (handle, signal) = cancel_pair();

        let runner = Arc::clone(&workflow);
        let task = tokio::spawn(async move {
            let mut ctx = context();
            runner.execute_with_cancel(&mut ctx, signal).await
        });
        sleep(Duration::from_secs(1)).await;
        handle.cancel();

        let err = task.await.unwrap().unwrap_err();
        let PaymentError::WorkflowCancelled(execution_id) = err else {
            panic!("expected cancellation");
        };
        let execution = workflow.get_execution(&execution_id).await.unwrap().unwrap();
        assert_eq!(execution.status, WorkflowStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_get_execution_is_idempotent() {
        let workflow = Workflow::new("wf").step(WorkflowStep::new("a", StepCategory::Payment, Counting::ok()));
        let execution = workflow.execute(&mut context()).await.unwrap();

        let first = workflow.get_execution(&execution.execution_id).await.unwrap();
        let second = workflow.get_execution(&execution.execution_id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, Some(execution));
    }

    #[tokio::test]
    async fn test_manager_summary_history_and_cleanup() {
        let mut manager = WorkflowManager::new();
        manager.register(Workflow::new("wf").step(WorkflowStep::new("a", StepCategory::Payment, Counting::ok())));

        for _ in 0..3 {
            manager.execute_workflow("wf", &mut context()).await.unwrap();
        }
        assert!(matches!(
            manager.execute_workflow("missing", &mut context()).await,
            Err(PaymentError::WorkflowNotFound(_))
        ));

        let summary = manager.workflow_summary("wf").await.unwrap();
        assert_eq!(summary.total_executions, 3);
        assert_eq!(summary.recent_executions.len(), 3);
        assert_eq!(summary.steps[0].name, "a");

        let history = manager
            .history(&HistoryQuery {
                order_id: Some("order-1".to_string()),
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].started_at >= history[1].started_at);

        assert_eq!(manager.cleanup_all(1).await.unwrap(), 0);
        assert_eq!(manager.cleanup_all(-1).await.unwrap(), 3);
    }
}

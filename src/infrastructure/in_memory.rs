use crate::domain::ports::ExecutionStore;
use crate::domain::workflow::WorkflowExecution;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory store for workflow executions.
///
/// Uses `Arc<RwLock<HashMap<String, WorkflowExecution>>>` keyed by execution id.
/// History lives as long as the process; nothing is written to disk.
#[derive(Default, Clone)]
pub struct InMemoryExecutionStore {
    executions: Arc<RwLock<HashMap<String, WorkflowExecution>>>,
}

impl InMemoryExecutionStore {
    /// Creates a new, empty execution store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn save(&self, execution: WorkflowExecution) -> Result<()> {
        let mut executions = self.executions.write().await;
        executions.insert(execution.execution_id.clone(), execution);
        Ok(())
    }

    async fn get(&self, execution_id: &str) -> Result<Option<WorkflowExecution>> {
        let executions = self.executions.read().await;
        Ok(executions.get(execution_id).cloned())
    }

    async fn by_order(&self, order_id: &str) -> Result<Vec<WorkflowExecution>> {
        let executions = self.executions.read().await;
        let mut matched: Vec<_> = executions
            .values()
            .filter(|execution| execution.order_id == order_id)
            .cloned()
            .collect();
        matched.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        Ok(matched)
    }

    async fn all(&self) -> Result<Vec<WorkflowExecution>> {
        let executions = self.executions.read().await;
        Ok(executions.values().cloned().collect())
    }

    async fn remove_started_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut executions = self.executions.write().await;
        let before = executions.len();
        executions.retain(|_, execution| execution.started_at >= cutoff);
        Ok(before - executions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::workflow::WorkflowStatus;
    use chrono::Duration;

    #[tokio::test]
    async fn test_in_memory_execution_store() {
        let store = InMemoryExecutionStore::new();
        let execution = WorkflowExecution::new("wf_a_1", "wf", "order-a", None);

        store.save(execution.clone()).await.unwrap();
        let retrieved = store.get("wf_a_1").await.unwrap().unwrap();
        assert_eq!(retrieved, execution);

        assert!(store.get("wf_b_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_overwrites_same_execution() {
        let store = InMemoryExecutionStore::new();
        let mut execution = WorkflowExecution::new("wf_a_1", "wf", "order-a", None);
        store.save(execution.clone()).await.unwrap();

        execution.transition(WorkflowStatus::Processing).unwrap();
        store.save(execution).await.unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, WorkflowStatus::Processing);
    }

    #[tokio::test]
    async fn test_by_order_and_age_based_removal() {
        let store = InMemoryExecutionStore::new();
        let mut old = WorkflowExecution::new("wf_a_1", "wf", "order-a", None);
        old.started_at = Utc::now() - Duration::hours(48);
        store.save(old).await.unwrap();
        store
            .save(WorkflowExecution::new("wf_a_2", "wf", "order-a", None))
            .await
            .unwrap();
        store
            .save(WorkflowExecution::new("wf_b_1", "wf", "order-b", None))
            .await
            .unwrap();

        let for_a = store.by_order("order-a").await.unwrap();
        assert_eq!(for_a.len(), 2);
        assert_eq!(for_a[0].execution_id, "wf_a_1");

        let removed = store
            .remove_started_before(Utc::now() - Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.by_order("order-a").await.unwrap().len(), 1);
    }
}

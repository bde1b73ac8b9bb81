use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::WorkflowStore;
use crate::error::StoreError;
use crate::models::{ExecutionRecord, ExecutionStatus, WorkflowGraph};
use crate::report::NodeOutcome;

#[derive(Default)]
struct Inner {
    /// Insertion order is listing order.
    workflows: Vec<WorkflowGraph>,
    executions: Vec<ExecutionRecord>,
    node_outcomes: HashMap<Uuid, Vec<NodeOutcome>>,
}

/// Process-local store. Every operation runs under one mutex, which is what
/// makes `claim_execution` atomic.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    inner: Mutex<Inner>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workflows(workflows: impl IntoIterator<Item = WorkflowGraph>) -> Self {
        let store = Self::new();
        for graph in workflows {
            store.insert_workflow(graph);
        }
        store
    }

    /// Add `graph`, replacing a stored workflow with the same ID.
    pub fn insert_workflow(&self, graph: WorkflowGraph) {
        let mut inner = self.lock();
        match inner.workflows.iter_mut().find(|w| w.id == graph.id) {
            Some(existing) => *existing = graph,
            None => inner.workflows.push(graph),
        }
    }

    pub fn remove_workflow(&self, workflow_id: Uuid) -> Option<WorkflowGraph> {
        let mut inner = self.lock();
        let index = inner.workflows.iter().position(|w| w.id == workflow_id)?;
        Some(inner.workflows.remove(index))
    }

    /// Every execution record, in claim order.
    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.lock().executions.clone()
    }

    pub fn execution(&self, execution_id: Uuid) -> Option<ExecutionRecord> {
        self.lock().executions.iter().find(|e| e.id == execution_id).cloned()
    }

    pub fn node_outcomes(&self, execution_id: Uuid) -> Vec<NodeOutcome> {
        self.lock()
            .node_outcomes
            .get(&execution_id)
            .cloned()
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn list_workflows(&self) -> Result<Vec<WorkflowGraph>, StoreError> {
        Ok(self.lock().workflows.clone())
    }

    async fn get_last_execution(
        &self,
        workflow_id: Uuid,
    ) -> Result<Option<ExecutionRecord>, StoreError> {
        Ok(self
            .lock()
            .executions
            .iter()
            .filter(|e| e.workflow_id == workflow_id)
            .max_by_key(|e| e.start_time)
            .cloned())
    }

    async fn claim_execution(&self, workflow_id: Uuid) -> Result<ExecutionRecord, StoreError> {
        let mut inner = self.lock();

        if !inner.workflows.iter().any(|w| w.id == workflow_id) {
            return Err(StoreError::NotFound { entity: "workflow", id: workflow_id });
        }
        let pending = inner
            .executions
            .iter()
            .any(|e| e.workflow_id == workflow_id && e.status == ExecutionStatus::Pending);
        if pending {
            return Err(StoreError::AlreadyPending { workflow_id });
        }

        let record = ExecutionRecord::pending(workflow_id, Utc::now());
        inner.executions.push(record.clone());
        Ok(record)
    }

    async fn complete_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        end_time: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        if !status.is_terminal() {
            return Err(StoreError::InvalidTransition { execution_id, status });
        }

        let mut inner = self.lock();
        let record = inner
            .executions
            .iter_mut()
            .find(|e| e.id == execution_id)
            .ok_or(StoreError::NotFound { entity: "execution", id: execution_id })?;
        if record.status != ExecutionStatus::Pending {
            return Err(StoreError::InvalidTransition { execution_id, status });
        }

        record.status = status;
        record.end_time = Some(end_time);
        Ok(())
    }

    async fn record_node_outcomes(
        &self,
        execution_id: Uuid,
        outcomes: &[NodeOutcome],
    ) -> Result<(), StoreError> {
        self.lock()
            .node_outcomes
            .entry(execution_id)
            .or_default()
            .extend_from_slice(outcomes);
        Ok(())
    }

    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<ExecutionRecord>, StoreError> {
        let mut records: Vec<ExecutionRecord> = self
            .lock()
            .executions
            .iter()
            .rev()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_one() -> (InMemoryWorkflowStore, Uuid) {
        let graph = WorkflowGraph::new("empty", vec![], vec![]);
        let id = graph.id;
        (InMemoryWorkflowStore::with_workflows([graph]), id)
    }

    #[tokio::test]
    async fn second_claim_conflicts_while_pending() {
        let (store, wf) = store_with_one();

        let first = store.claim_execution(wf).await.expect("first claim wins");
        assert_eq!(first.status, ExecutionStatus::Pending);

        let second = store.claim_execution(wf).await;
        assert!(matches!(second, Err(StoreError::AlreadyPending { workflow_id }) if workflow_id == wf));
        assert_eq!(store.executions().len(), 1);

        store
            .complete_execution(first.id, ExecutionStatus::Success, Utc::now())
            .await
            .unwrap();
        assert!(store.claim_execution(wf).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_claims_produce_one_pending_record() {
        let (store, wf) = store_with_one();

        let (a, b) = tokio::join!(store.claim_execution(wf), store.claim_execution(wf));
        assert_eq!(usize::from(a.is_ok()) + usize::from(b.is_ok()), 1);

        let pending = store
            .executions()
            .into_iter()
            .filter(|e| e.status == ExecutionStatus::Pending)
            .count();
        assert_eq!(pending, 1);
    }

    #[tokio::test]
    async fn completion_happens_exactly_once() {
        let (store, wf) = store_with_one();
        let record = store.claim_execution(wf).await.unwrap();

        store
            .complete_execution(record.id, ExecutionStatus::Failure, Utc::now())
            .await
            .unwrap();
        let again = store
            .complete_execution(record.id, ExecutionStatus::Success, Utc::now())
            .await;
        assert!(matches!(again, Err(StoreError::InvalidTransition { .. })));
        assert_eq!(store.execution(record.id).unwrap().status, ExecutionStatus::Failure);
    }

    #[tokio::test]
    async fn pending_is_not_a_terminal_status() {
        let (store, wf) = store_with_one();
        let record = store.claim_execution(wf).await.unwrap();
        let result = store
            .complete_execution(record.id, ExecutionStatus::Pending, Utc::now())
            .await;
        assert!(matches!(result, Err(StoreError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn last_execution_is_most_recently_started() {
        let (store, wf) = store_with_one();
        let first = store.claim_execution(wf).await.unwrap();
        store
            .complete_execution(first.id, ExecutionStatus::Success, Utc::now())
            .await
            .unwrap();
        let second = store.claim_execution(wf).await.unwrap();

        let last = store.get_last_execution(wf).await.unwrap().unwrap();
        assert_eq!(last.id, second.id);
        assert_eq!(store.list_executions(wf).await.unwrap()[0].id, second.id);
    }
}

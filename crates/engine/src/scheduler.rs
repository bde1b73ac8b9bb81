//! Scheduler loop.
//!
//! Each tick lists every workflow, asks the `TriggerEvaluator` whether its
//! designated trigger is due, and for due workflows atomically claims a
//! `Pending` execution record before launching the `DagExecutor` on a
//! background task. The loop never waits for launched runs.
//!
//! Any number of schedulers may share a store: exclusivity comes from
//! `WorkflowStore::claim_execution`, not from this process.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::error::StoreError;
use crate::executor::DagExecutor;
use crate::models::{ExecutionRecord, ExecutionStatus, WorkflowGraph};
use crate::report::ExecutionReport;
use crate::store::WorkflowStore;
use crate::trigger::TriggerEvaluator;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Cadence of the scheduler loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Sleep between successful ticks.
    pub poll_interval: Duration,
    /// First delay after a failed tick; doubles on each consecutive failure.
    pub initial_backoff: Duration,
    /// Ceiling for the failure back-off.
    pub max_backoff: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// Launched runs
// ---------------------------------------------------------------------------

/// A run started by [`Scheduler::tick`].
///
/// Dropping the handle detaches the run; it keeps going in the background.
#[derive(Debug)]
pub struct LaunchedRun {
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
    /// Resolves to the report, or `None` if the graph was rejected.
    pub handle: JoinHandle<Option<ExecutionReport>>,
}

struct RunningEntry {
    execution_id: Uuid,
    cancel: CancellationToken,
}

type RunningMap = Arc<Mutex<HashMap<Uuid, RunningEntry>>>;

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    store: Arc<dyn WorkflowStore>,
    evaluator: TriggerEvaluator,
    executor: Arc<DagExecutor>,
    config: SchedulerConfig,
    /// Runs launched by this instance, keyed by workflow.
    running: RunningMap,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        evaluator: TriggerEvaluator,
        executor: Arc<DagExecutor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            evaluator,
            executor,
            config,
            running: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancelling this token stops the loop and every run it launched.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Number of runs launched by this instance that have not finished.
    pub fn running_count(&self) -> usize {
        lock(&self.running).len()
    }

    /// Tick until shutdown.
    ///
    /// A failed tick is retried with exponential back-off; nothing that
    /// happens to an individual workflow stops the loop.
    pub async fn run(&self) {
        info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "scheduler starting"
        );
        let mut backoff = self.config.initial_backoff;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let delay = match self.tick().await {
                Ok(launched) => {
                    if !launched.is_empty() {
                        debug!(launched = launched.len(), "tick launched runs");
                    }
                    backoff = self.config.initial_backoff;
                    self.config.poll_interval
                }
                Err(err) => {
                    error!(error = %err, retry_in_ms = backoff.as_millis() as u64, "scheduler tick failed");
                    let delay = backoff;
                    backoff = std::cmp::min(backoff * 2, self.config.max_backoff);
                    delay
                }
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!(running = self.running_count(), "scheduler stopped");
    }

    /// Wait up to `timeout` for launched runs to finish. Returns `true` if
    /// none are left.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.running_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }

    /// One scan over every workflow.
    ///
    /// # Errors
    /// Only a failure to list workflows fails the tick; per-workflow store
    /// errors are logged and the workflow is retried next tick.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<Vec<LaunchedRun>, StoreError> {
        let workflows = self.store.list_workflows().await?;

        let live: HashSet<Uuid> = workflows.iter().map(|w| w.id).collect();
        self.cancel_orphaned_runs(&live);
        self.evaluator.retain_workflows(&live);

        let now = Utc::now();
        let mut launched = Vec::new();
        for graph in workflows {
            let workflow_id = graph.id;
            match self.consider(graph, now).await {
                Ok(Some(run)) => launched.push(run),
                Ok(None) => {}
                Err(err) => warn!(%workflow_id, error = %err, "skipping workflow this tick"),
            }
        }
        Ok(launched)
    }

    async fn consider(
        &self,
        graph: WorkflowGraph,
        now: DateTime<Utc>,
    ) -> Result<Option<LaunchedRun>, StoreError> {
        let Some(trigger) = graph.trigger() else {
            debug!(workflow_id = %graph.id, "workflow has no trigger node");
            return Ok(None);
        };

        let last = self.store.get_last_execution(graph.id).await?;
        let decision = self
            .evaluator
            .evaluate(graph.id, trigger, last.as_ref(), now)
            .await;
        if !decision.is_due() {
            return Ok(None);
        }

        // The trigger state only advances once the claim is settled, so a
        // store error leaves the decision to be retried next tick.
        let record = match self.store.claim_execution(graph.id).await {
            Ok(record) => {
                self.evaluator.commit(graph.id, trigger);
                record
            }
            Err(StoreError::AlreadyPending { workflow_id }) => {
                self.evaluator.commit(workflow_id, trigger);
                debug!(%workflow_id, "claim conflict; another run owns this workflow");
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let trigger_id = trigger.id.clone();
        Ok(Some(self.launch(graph, trigger_id, record)))
    }

    /// Spawn the executor for a claimed run and fold its result back into
    /// the store.
    fn launch(&self, graph: WorkflowGraph, trigger_id: String, record: ExecutionRecord) -> LaunchedRun {
        let workflow_id = graph.id;
        let execution_id = record.id;
        let cancel = self.shutdown.child_token();

        lock(&self.running).insert(
            workflow_id,
            RunningEntry { execution_id, cancel: cancel.clone() },
        );

        info!(%workflow_id, %execution_id, trigger = %trigger_id, "launching execution");

        let store = Arc::clone(&self.store);
        let executor = Arc::clone(&self.executor);
        let running = Arc::clone(&self.running);
        let span = info_span!("execution", %workflow_id, %execution_id);

        let handle = tokio::spawn(
            async move {
                let (status, report) =
                    match executor.execute(&graph, &trigger_id, execution_id, &cancel).await {
                        Ok(report) => (report.overall_status, Some(report)),
                        Err(err) => {
                            warn!(error = %err, "graph rejected");
                            (ExecutionStatus::Failure, None)
                        }
                    };

                if let Some(report) = &report {
                    if let Err(err) = store.record_node_outcomes(execution_id, &report.per_node).await {
                        error!(error = %err, "failed to persist node outcomes");
                    }
                }
                if let Err(err) = store.complete_execution(execution_id, status, Utc::now()).await {
                    error!(error = %err, %status, "failed to complete execution record");
                }

                let mut running = lock(&running);
                if running.get(&workflow_id).is_some_and(|e| e.execution_id == execution_id) {
                    running.remove(&workflow_id);
                }
                drop(running);

                report
            }
            .instrument(span),
        );

        LaunchedRun { workflow_id, execution_id, handle }
    }

    /// Cancel runs whose workflow is no longer listed.
    fn cancel_orphaned_runs(&self, live: &HashSet<Uuid>) {
        for (workflow_id, entry) in lock(&self.running).iter() {
            if !live.contains(workflow_id) && !entry.cancel.is_cancelled() {
                info!(%workflow_id, execution_id = %entry.execution_id, "workflow removed; cancelling run");
                entry.cancel.cancel();
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

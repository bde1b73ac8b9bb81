//! `engine` crate: workflow graph models, trigger evaluation, the DAG
//! executor and the scheduler loop that ties them to a `WorkflowStore`.

pub mod dag;
pub mod error;
pub mod executor;
pub mod models;
pub mod report;
pub mod scheduler;
pub mod store;
pub mod trigger;

pub use dag::validate_graph;
pub use error::{GraphError, StoreError};
pub use executor::{DagExecutor, ExecutorConfig};
pub use models::{ExecutionRecord, ExecutionStatus, WorkflowEdge, WorkflowGraph, WorkflowNode};
pub use report::{DispatchError, ExecutionReport, NodeOutcome, NodeStatus};
pub use scheduler::{LaunchedRun, Scheduler, SchedulerConfig};
pub use store::{InMemoryWorkflowStore, PgWorkflowStore, WorkflowStore};
pub use trigger::{TriggerDecision, TriggerEvaluator};

#[cfg(test)]
mod executor_tests;

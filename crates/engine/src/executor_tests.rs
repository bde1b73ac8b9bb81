//! Tests for the DAG executor.
//!
//! Connectors are `MockConnector`s registered under the node types the
//! graphs use, so no exchange or database is involved.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use connectors::mock::MockConnector;
use connectors::{ConnectorError, ConnectorRegistry, Credentials};

use crate::error::GraphError;
use crate::executor::{DagExecutor, ExecutorConfig};
use crate::models::{ExecutionStatus, NodeRole, WorkflowEdge, WorkflowGraph, WorkflowNode};
use crate::report::{DispatchError, ExecutionReport, NodeStatus};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn trigger(id: &str) -> WorkflowNode {
    WorkflowNode {
        id: id.into(),
        role: NodeRole::Trigger,
        node_type: "timer".into(),
        metadata: json!({ "intervalSeconds": 60 }),
        credentials: Credentials::default(),
        position: None,
    }
}

/// Action node whose symbol equals its ID, so mock call logs read as paths.
fn action(id: &str, venue: &str) -> WorkflowNode {
    WorkflowNode {
        id: id.into(),
        role: NodeRole::Action,
        node_type: venue.into(),
        metadata: json!({ "side": "LONG", "symbol": id, "quantity": 1.0 }),
        credentials: Credentials::default(),
        position: None,
    }
}

fn edge(source: &str, target: &str) -> WorkflowEdge {
    WorkflowEdge::new(source, target)
}

fn executor(registry: ConnectorRegistry) -> DagExecutor {
    DagExecutor::new(Arc::new(registry), ExecutorConfig::default())
}

async fn run(executor: &DagExecutor, graph: &WorkflowGraph, start: &str) -> ExecutionReport {
    executor
        .execute(graph, start, Uuid::new_v4(), &CancellationToken::new())
        .await
        .expect("graph should execute")
}

fn visited(report: &ExecutionReport) -> Vec<&str> {
    report.per_node.iter().map(|o| o.node_id.as_str()).collect()
}

// ---------------------------------------------------------------------------
// Dispatch and reporting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_action_is_dispatched_once() {
    let lighter = MockConnector::succeeding("lighter");
    let exec = executor(ConnectorRegistry::new().with("lighter", Arc::new(lighter.clone())));

    let graph = WorkflowGraph::new("one", vec![trigger("T"), action("A", "lighter")], vec![edge("T", "A")]);
    let report = run(&exec, &graph, "T").await;

    assert_eq!(report.overall_status, ExecutionStatus::Success);
    assert_eq!(report.workflow_id, graph.id);
    assert_eq!(visited(&report), vec!["A"]);
    assert_eq!(report.per_node[0].status, NodeStatus::Success);
    assert_eq!(report.per_node[0].order.as_ref().unwrap().venue, "lighter");
    assert_eq!(lighter.call_count(), 1);
}

#[tokio::test]
async fn sibling_failure_does_not_stop_other_branch() {
    let failing = MockConnector::failing("hyperliquid", ConnectorError::RateLimited("slow down".into()));
    let succeeding = MockConnector::succeeding("backpack");
    let exec = executor(
        ConnectorRegistry::new()
            .with("hyperliquid", Arc::new(failing.clone()))
            .with("backpack", Arc::new(succeeding.clone())),
    );

    let graph = WorkflowGraph::new(
        "siblings",
        vec![trigger("T"), action("A1", "hyperliquid"), action("A2", "backpack")],
        vec![edge("T", "A1"), edge("T", "A2")],
    );
    let report = run(&exec, &graph, "T").await;

    assert_eq!(report.overall_status, ExecutionStatus::Failure);
    assert_eq!(visited(&report), vec!["A1", "A2"]);
    assert_eq!(
        report.per_node[0].error,
        Some(DispatchError::Connector(ConnectorError::RateLimited("slow down".into())))
    );
    assert_eq!(report.per_node[1].status, NodeStatus::Success);
    assert_eq!(failing.call_count(), 1);
    assert_eq!(succeeding.call_count(), 1);
}

#[tokio::test]
async fn failed_node_ends_its_branch() {
    let failing = MockConnector::failing("hyperliquid", ConnectorError::RejectedByExchange("margin".into()));
    let downstream = MockConnector::succeeding("lighter");
    let exec = executor(
        ConnectorRegistry::new()
            .with("hyperliquid", Arc::new(failing))
            .with("lighter", Arc::new(downstream.clone())),
    );

    let graph = WorkflowGraph::new(
        "chain",
        vec![trigger("T"), action("A", "hyperliquid"), action("B", "lighter")],
        vec![edge("T", "A"), edge("A", "B")],
    );
    let report = run(&exec, &graph, "T").await;

    assert_eq!(visited(&report), vec!["A"]);
    assert_eq!(downstream.call_count(), 0);
    assert_eq!(report.failures().count(), 1);
}

#[tokio::test]
async fn report_is_depth_first_in_edge_order() {
    let lighter = MockConnector::succeeding("lighter");
    let exec = executor(ConnectorRegistry::new().with("lighter", Arc::new(lighter)));

    let graph = WorkflowGraph::new(
        "tree",
        vec![
            trigger("T"),
            action("A", "lighter"),
            action("A1", "lighter"),
            action("B", "lighter"),
            action("B1", "lighter"),
        ],
        vec![edge("T", "A"), edge("T", "B"), edge("A", "A1"), edge("B", "B1")],
    );
    let report = run(&exec, &graph, "T").await;

    assert_eq!(visited(&report), vec!["A", "A1", "B", "B1"]);
}

#[tokio::test]
async fn diamond_target_is_dispatched_once_per_path() {
    let lighter = MockConnector::succeeding("lighter");
    let exec = executor(ConnectorRegistry::new().with("lighter", Arc::new(lighter.clone())));

    let graph = WorkflowGraph::new(
        "diamond",
        vec![
            trigger("T"),
            action("L", "lighter"),
            action("R", "lighter"),
            action("J", "lighter"),
        ],
        vec![edge("T", "L"), edge("T", "R"), edge("L", "J"), edge("R", "J")],
    );
    let report = run(&exec, &graph, "T").await;

    assert_eq!(report.overall_status, ExecutionStatus::Success);
    assert_eq!(report.outcomes_for("J").count(), 2);
    assert_eq!(lighter.symbols().iter().filter(|s| *s == "J").count(), 2);
    assert_eq!(lighter.call_count(), 4);
}

#[tokio::test]
async fn cycle_is_cut_when_branch_revisits_a_node() {
    let lighter = MockConnector::succeeding("lighter");
    let exec = executor(ConnectorRegistry::new().with("lighter", Arc::new(lighter.clone())));

    let graph = WorkflowGraph::new(
        "loop",
        vec![trigger("T"), action("A", "lighter"), action("B", "lighter")],
        vec![edge("T", "A"), edge("A", "B"), edge("B", "A")],
    );
    let report = run(&exec, &graph, "T").await;

    assert_eq!(report.overall_status, ExecutionStatus::Failure);
    assert_eq!(visited(&report), vec!["A", "B", "A"]);
    assert_eq!(lighter.symbols(), vec!["A", "B"]);
    assert_eq!(
        report.per_node[2].error,
        Some(DispatchError::CycleDetected { node_id: "A".into(), depth: 3 })
    );
}

#[tokio::test]
async fn fanned_out_self_loop_dispatches_once() {
    let lighter = MockConnector::succeeding("lighter");
    let exec = executor(ConnectorRegistry::new().with("lighter", Arc::new(lighter.clone())));

    // Two parallel self-edges would double the work at every level if only
    // depth were bounded.
    let graph = WorkflowGraph::new(
        "self-loop",
        vec![trigger("T"), action("A", "lighter")],
        vec![edge("T", "A"), edge("A", "A"), WorkflowEdge { id: "again".into(), ..edge("A", "A") }],
    );
    let report = run(&exec, &graph, "T").await;

    assert_eq!(lighter.call_count(), 1);
    assert_eq!(report.per_node.len(), 3);
    assert_eq!(report.failures().count(), 2);
    assert!(report
        .failures()
        .all(|o| matches!(o.error, Some(DispatchError::CycleDetected { depth: 2, .. }))));
}

#[tokio::test]
async fn edge_back_to_start_is_a_cycle() {
    let lighter = MockConnector::succeeding("lighter");
    let exec = executor(ConnectorRegistry::new().with("lighter", Arc::new(lighter.clone())));

    let graph = WorkflowGraph::new(
        "round-trip",
        vec![trigger("T"), action("A", "lighter")],
        vec![edge("T", "A"), edge("A", "T")],
    );
    let report = run(&exec, &graph, "T").await;

    assert_eq!(lighter.call_count(), 1);
    assert_eq!(report.per_node[1].node_id, "T");
    assert!(matches!(report.per_node[1].error, Some(DispatchError::CycleDetected { .. })));
}

#[tokio::test]
async fn long_chain_stops_at_max_depth() {
    let lighter = MockConnector::succeeding("lighter");
    let exec = DagExecutor::new(
        Arc::new(ConnectorRegistry::new().with("lighter", Arc::new(lighter.clone()))),
        ExecutorConfig { max_depth: 2 },
    );

    let graph = WorkflowGraph::new(
        "chain",
        vec![trigger("T"), action("A", "lighter"), action("B", "lighter"), action("C", "lighter")],
        vec![edge("T", "A"), edge("A", "B"), edge("B", "C")],
    );
    let report = run(&exec, &graph, "T").await;

    assert_eq!(lighter.symbols(), vec!["A", "B"]);
    assert_eq!(
        report.per_node.last().unwrap().error,
        Some(DispatchError::DepthExceeded { depth: 3, max_depth: 2 })
    );
}

#[tokio::test]
async fn mid_graph_trigger_is_skipped_and_passed_through() {
    let lighter = MockConnector::succeeding("lighter");
    let exec = executor(ConnectorRegistry::new().with("lighter", Arc::new(lighter.clone())));

    let graph = WorkflowGraph::new(
        "relay",
        vec![trigger("T"), action("A", "lighter"), trigger("T2"), action("B", "lighter")],
        vec![edge("T", "A"), edge("A", "T2"), edge("T2", "B")],
    );
    let report = run(&exec, &graph, "T").await;

    assert_eq!(visited(&report), vec!["A", "T2", "B"]);
    assert_eq!(report.per_node[1].status, NodeStatus::Skipped);
    assert_eq!(report.overall_status, ExecutionStatus::Success);
    assert_eq!(lighter.call_count(), 2);
}

#[tokio::test]
async fn unknown_action_type_fails_as_unsupported() {
    let exec = executor(ConnectorRegistry::new());

    let graph = WorkflowGraph::new("nowhere", vec![trigger("T"), action("A", "ftx")], vec![edge("T", "A")]);
    let report = run(&exec, &graph, "T").await;

    assert_eq!(report.overall_status, ExecutionStatus::Failure);
    assert!(matches!(
        report.per_node[0].error,
        Some(DispatchError::Connector(ConnectorError::Unsupported(_)))
    ));
}

#[tokio::test]
async fn trigger_without_edges_yields_empty_success() {
    let exec = executor(ConnectorRegistry::new());
    let graph = WorkflowGraph::new("lonely", vec![trigger("T")], vec![]);

    let report = run(&exec, &graph, "T").await;
    assert!(report.per_node.is_empty());
    assert_eq!(report.overall_status, ExecutionStatus::Success);
}

// ---------------------------------------------------------------------------
// Cancellation and concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelled_run_dispatches_nothing() {
    let lighter = MockConnector::succeeding("lighter");
    let exec = executor(ConnectorRegistry::new().with("lighter", Arc::new(lighter.clone())));

    let graph = WorkflowGraph::new(
        "cancelled",
        vec![trigger("T"), action("A", "lighter"), action("B", "lighter")],
        vec![edge("T", "A"), edge("T", "B")],
    );
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = exec.execute(&graph, "T", Uuid::new_v4(), &cancel).await.unwrap();

    assert_eq!(lighter.call_count(), 0);
    assert!(report.per_node.iter().all(|o| o.error == Some(DispatchError::Cancelled)));
    assert_eq!(report.overall_status, ExecutionStatus::Failure);
}

#[tokio::test(start_paused = true)]
async fn branches_run_concurrently_and_chains_sequentially() {
    let lighter = MockConnector::succeeding("lighter").with_delay(Duration::from_millis(100));
    let exec = executor(ConnectorRegistry::new().with("lighter", Arc::new(lighter.clone())));

    let graph = WorkflowGraph::new(
        "parallel",
        vec![
            trigger("T"),
            action("A1", "lighter"),
            action("A2", "lighter"),
            action("B1", "lighter"),
            action("B2", "lighter"),
        ],
        vec![edge("T", "A1"), edge("A1", "A2"), edge("T", "B1"), edge("B1", "B2")],
    );

    let started = tokio::time::Instant::now();
    let report = run(&exec, &graph, "T").await;
    let elapsed = started.elapsed();

    // Two sequential hops per branch, both branches at once.
    assert!(elapsed >= Duration::from_millis(200), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_millis(300), "elapsed {elapsed:?}");
    assert_eq!(visited(&report), vec!["A1", "A2", "B1", "B2"]);

    let symbols = lighter.symbols();
    let position = |id: &str| symbols.iter().position(|s| s == id).unwrap();
    assert!(position("A1") < position("A2"));
    assert!(position("B1") < position("B2"));
}

// ---------------------------------------------------------------------------
// Graph errors
// ---------------------------------------------------------------------------

#[tokio::test]
async fn malformed_graph_is_rejected_before_dispatch() {
    let lighter = MockConnector::succeeding("lighter");
    let exec = executor(ConnectorRegistry::new().with("lighter", Arc::new(lighter.clone())));

    let graph = WorkflowGraph::new(
        "dangling",
        vec![trigger("T"), action("A", "lighter")],
        vec![edge("T", "A"), edge("A", "ghost")],
    );
    let result = exec
        .execute(&graph, "T", Uuid::new_v4(), &CancellationToken::new())
        .await;

    assert!(matches!(result, Err(GraphError::UnknownNodeReference { .. })));
    assert_eq!(lighter.call_count(), 0);
}

#[tokio::test]
async fn missing_start_node_is_an_error() {
    let exec = executor(ConnectorRegistry::new());
    let graph = WorkflowGraph::new("g", vec![trigger("T")], vec![]);

    let result = exec
        .execute(&graph, "nope", Uuid::new_v4(), &CancellationToken::new())
        .await;
    assert_eq!(result.unwrap_err(), GraphError::UnknownStartNode("nope".into()));
}

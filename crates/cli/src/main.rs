//! `tradeflow` CLI entry-point.
//!
//! Available sub-commands:
//! - `run`      — run the scheduler loop against Postgres.
//! - `execute`  — execute one workflow file once, in memory.
//! - `validate` — validate a workflow JSON file.
//! - `import`   — store a workflow JSON file in Postgres.
//! - `history`  — list the executions of a workflow and their node outcomes.
//! - `migrate`  — run pending database migrations.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use db::models::NodeExecutionRow;

use connectors::{ConnectorRegistry, PriceOracle, StaticPriceOracle};
use engine::dag::{is_acyclic, reachable_from};
use engine::{
    DagExecutor, ExecutorConfig, GraphError, InMemoryWorkflowStore, PgWorkflowStore, Scheduler,
    SchedulerConfig, TriggerEvaluator, WorkflowGraph, WorkflowStore,
};

#[derive(Parser)]
#[command(name = "tradeflow", about = "Trading workflow scheduler and executor", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct DatabaseArgs {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
    #[arg(long, env = "TRADEFLOW_DB_MAX_CONNECTIONS", default_value_t = 10)]
    max_connections: u32,
}

#[derive(Args)]
struct ExecutorArgs {
    /// Deepest node that may be visited on one path before the run is
    /// failed as cyclic.
    #[arg(long, env = "TRADEFLOW_MAX_DEPTH", default_value_t = 64)]
    max_depth: usize,
}

impl ExecutorArgs {
    fn executor(&self) -> DagExecutor {
        DagExecutor::new(
            Arc::new(ConnectorRegistry::paper_trading()),
            ExecutorConfig { max_depth: self.max_depth },
        )
    }
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler loop until Ctrl-C.
    Run {
        #[command(flatten)]
        db: DatabaseArgs,
        #[command(flatten)]
        executor: ExecutorArgs,
        #[arg(long, env = "TRADEFLOW_POLL_INTERVAL_MS", default_value_t = 1000)]
        poll_interval_ms: u64,
        /// Fixed quote for price triggers, e.g. `--quote BTC=100000`.
        #[arg(long = "quote", value_parser = parse_quote)]
        quotes: Vec<(String, f64)>,
        /// How long to wait for in-flight runs after shutdown.
        #[arg(long, default_value_t = 10)]
        drain_seconds: u64,
    },
    /// Execute a workflow file once from its trigger and print the report.
    Execute {
        path: PathBuf,
        #[command(flatten)]
        executor: ExecutorArgs,
    },
    /// Validate a workflow definition JSON file.
    Validate { path: PathBuf },
    /// Store a workflow definition JSON file.
    Import {
        path: PathBuf,
        #[command(flatten)]
        db: DatabaseArgs,
    },
    /// List executions of a workflow, newest first.
    History {
        workflow_id: Uuid,
        #[command(flatten)]
        db: DatabaseArgs,
    },
    /// Run pending database migrations.
    Migrate {
        #[command(flatten)]
        db: DatabaseArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match Cli::parse().command {
        Command::Run { db, executor, poll_interval_ms, quotes, drain_seconds } => {
            let store = PgWorkflowStore::new(connect(&db).await?);

            let oracle: Option<Arc<dyn PriceOracle>> = if quotes.is_empty() {
                None
            } else {
                let oracle = StaticPriceOracle::new();
                for (asset, price) in quotes {
                    oracle.set_quote(&asset, price);
                }
                Some(Arc::new(oracle))
            };

            let scheduler = Scheduler::new(
                Arc::new(store),
                TriggerEvaluator::new(oracle),
                Arc::new(executor.executor()),
                SchedulerConfig {
                    poll_interval: Duration::from_millis(poll_interval_ms),
                    ..SchedulerConfig::default()
                },
            );

            let shutdown = scheduler.shutdown_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown requested");
                    shutdown.cancel();
                }
            });

            scheduler.run().await;
            if !scheduler.drain(Duration::from_secs(drain_seconds)).await {
                warn!(running = scheduler.running_count(), "exiting with runs still in flight");
            }
        }
        Command::Execute { path, executor } => {
            let graph = read_graph(&path)?;
            let trigger_id = graph
                .trigger()
                .map(|t| t.id.clone())
                .ok_or(GraphError::NoTrigger)?;

            let store = InMemoryWorkflowStore::with_workflows([graph.clone()]);
            let record = store.claim_execution(graph.id).await?;

            let report = executor
                .executor()
                .execute(&graph, &trigger_id, record.id, &CancellationToken::new())
                .await?;
            store.record_node_outcomes(record.id, &report.per_node).await?;
            store
                .complete_execution(record.id, report.overall_status, Utc::now())
                .await?;

            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Validate { path } => {
            let graph = read_graph(&path)?;
            if let Err(e) = engine::validate_graph(&graph) {
                eprintln!("❌ Validation failed: {e}");
                std::process::exit(1);
            }
            let Some(trigger) = graph.trigger() else {
                eprintln!("❌ Validation failed: {}", GraphError::NoTrigger);
                std::process::exit(1);
            };

            let reachable: Vec<&str> = reachable_from(&graph, &trigger.id)
                .into_iter()
                .filter(|id| graph.node(id).is_some_and(|n| !n.is_trigger()))
                .collect();
            println!(
                "✅ Workflow is valid. Trigger: {} ({}), actions: {reachable:?}",
                trigger.id, trigger.node_type
            );
            if !is_acyclic(&graph) {
                println!("⚠️  Graph contains a cycle; runs will stop at the depth limit.");
            }
        }
        Command::Import { path, db } => {
            let graph = read_graph(&path)?;
            engine::validate_graph(&graph)?;
            let store = PgWorkflowStore::new(connect(&db).await?);
            store.insert_workflow(&graph).await?;
            println!("{}", graph.id);
        }
        Command::History { workflow_id, db } => {
            let store = PgWorkflowStore::new(connect(&db).await?);
            let graph = store.get_workflow(workflow_id).await?;
            println!("# {} ({})", graph.name, graph.id);
            for record in store.list_executions(workflow_id).await? {
                println!("{}", serde_json::to_string(&record)?);
                for row in store.node_executions(record.id).await? {
                    println!("    {}", describe_node_row(&row));
                }
            }
        }
        Command::Migrate { db } => {
            let pool = connect(&db).await?;
            db::pool::run_migrations(&pool).await?;
            info!("migrations applied successfully");
        }
    }

    Ok(())
}

async fn connect(args: &DatabaseArgs) -> Result<db::DbPool> {
    db::pool::create_pool(&args.database_url, args.max_connections)
        .await
        .context("failed to connect to database")
}

fn read_graph(path: &Path) -> Result<WorkflowGraph> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("invalid workflow JSON in {}", path.display()))
}

/// One line per persisted node outcome: `node_id status [order_id] [error]`.
fn describe_node_row(row: &NodeExecutionRow) -> String {
    let mut line = format!("{} {}", row.node_id, row.status);
    if let Some(order_id) = row.output.as_ref().and_then(|o| o.get("order_id")).and_then(|v| v.as_str()) {
        line.push_str(&format!(" order={order_id}"));
    }
    if let Some(error) = &row.error {
        line.push_str(&format!(" error=\"{error}\""));
    }
    line
}

fn parse_quote(raw: &str) -> Result<(String, f64), String> {
    let (asset, price) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected ASSET=PRICE, got '{raw}'"))?;
    let price: f64 = price
        .trim()
        .parse()
        .map_err(|e| format!("invalid price in '{raw}': {e}"))?;
    Ok((asset.trim().to_owned(), price))
}

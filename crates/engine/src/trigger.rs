//! Trigger readiness.
//!
//! `TriggerEvaluator` decides whether a workflow's designated trigger is due:
//! - `timer`: due with no prior execution, or once `intervalSeconds` have
//!   elapsed since the previous execution *started*.
//! - `price-trigger`: due when the oracle quote has moved to the other side
//!   of `targetPrice` since the last committed observation. The first
//!   observation only records which side the price is on.
//!
//! A crossing is held back until the caller calls
//! [`TriggerEvaluator::commit`], which the scheduler does once the run has
//! been claimed. A crossing whose claim failed is seen again next tick.
//!
//! Unknown trigger types are reported as `Unsupported`, with a single warning
//! per workflow and type.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use connectors::PriceOracle;

use crate::models::{ExecutionRecord, PriceTriggerMetadata, TimerMetadata, TriggerSpec, WorkflowNode};

/// Whether a workflow should run now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerDecision {
    Due,
    NotDue,
    /// No evaluator exists for this trigger type. Treated as `NotDue`.
    Unsupported,
}

impl TriggerDecision {
    pub fn is_due(&self) -> bool {
        matches!(self, Self::Due)
    }
}

/// Which side of a price threshold the last observed quote was on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ThresholdSide {
    Below,
    AtOrAbove,
}

impl ThresholdSide {
    fn of(price: f64, target: f64) -> Self {
        if price >= target {
            Self::AtOrAbove
        } else {
            Self::Below
        }
    }
}

type TriggerKey = (Uuid, String);

pub struct TriggerEvaluator {
    oracle: Option<Arc<dyn PriceOracle>>,
    /// Last committed threshold side per (workflow, trigger node).
    price_sides: Mutex<HashMap<TriggerKey, ThresholdSide>>,
    /// Crossings reported as `Due` but not yet committed.
    staged_sides: Mutex<HashMap<TriggerKey, ThresholdSide>>,
    /// (workflow, trigger type) pairs already warned about.
    reported_unsupported: Mutex<HashSet<TriggerKey>>,
}

impl TriggerEvaluator {
    /// `oracle` may be `None`; price triggers then never fire.
    pub fn new(oracle: Option<Arc<dyn PriceOracle>>) -> Self {
        Self {
            oracle,
            price_sides: Mutex::new(HashMap::new()),
            staged_sides: Mutex::new(HashMap::new()),
            reported_unsupported: Mutex::new(HashSet::new()),
        }
    }

    /// Decide whether `trigger` of workflow `workflow_id` is due at `now`,
    /// given the workflow's most recently started execution.
    pub async fn evaluate(
        &self,
        workflow_id: Uuid,
        trigger: &WorkflowNode,
        last_execution: Option<&ExecutionRecord>,
        now: DateTime<Utc>,
    ) -> TriggerDecision {
        match trigger.trigger_spec() {
            Ok(Some(TriggerSpec::Timer(meta))) => timer_due(&meta, last_execution, now),
            Ok(Some(TriggerSpec::Price(meta))) => self.price_due(workflow_id, &trigger.id, &meta).await,
            Ok(None) => {
                self.report_unsupported(workflow_id, &trigger.node_type);
                TriggerDecision::Unsupported
            }
            Err(err) => {
                warn!(%workflow_id, node_id = %trigger.id, error = %err, "trigger cannot be evaluated");
                TriggerDecision::NotDue
            }
        }
    }

    /// Record that a `Due` decision for `trigger` was acted on.
    ///
    /// Until this is called, a price crossing stays pending and keeps being
    /// reported as `Due`. No-op for triggers without state.
    pub fn commit(&self, workflow_id: Uuid, trigger: &WorkflowNode) {
        let key = (workflow_id, trigger.id.clone());
        if let Some(side) = lock(&self.staged_sides).remove(&key) {
            lock(&self.price_sides).insert(key, side);
        }
    }

    /// Drop per-trigger state for workflows that no longer exist.
    pub fn retain_workflows(&self, live: &HashSet<Uuid>) {
        lock(&self.price_sides).retain(|(workflow_id, _), _| live.contains(workflow_id));
        lock(&self.staged_sides).retain(|(workflow_id, _), _| live.contains(workflow_id));
        lock(&self.reported_unsupported).retain(|(workflow_id, _)| live.contains(workflow_id));
    }

    async fn price_due(
        &self,
        workflow_id: Uuid,
        node_id: &str,
        meta: &PriceTriggerMetadata,
    ) -> TriggerDecision {
        let Some(oracle) = &self.oracle else {
            debug!(%workflow_id, asset = %meta.asset, "no price oracle configured");
            return TriggerDecision::NotDue;
        };

        let price = match oracle.get_quote(&meta.asset).await {
            Ok(price) => price,
            Err(err) => {
                debug!(%workflow_id, error = %err, "quote unavailable; retrying next tick");
                return TriggerDecision::NotDue;
            }
        };

        let side = ThresholdSide::of(price, meta.target_price);
        let key = (workflow_id, node_id.to_owned());
        let mut committed = lock(&self.price_sides);
        let previous = committed.get(&key).copied();

        match previous {
            Some(prev) if prev != side => {
                drop(committed);
                info!(
                    %workflow_id,
                    asset = %meta.asset,
                    price,
                    target = meta.target_price,
                    "price crossed threshold"
                );
                lock(&self.staged_sides).insert(key, side);
                TriggerDecision::Due
            }
            _ => {
                // Baseline or same side: nothing to act on.
                committed.insert(key.clone(), side);
                drop(committed);
                lock(&self.staged_sides).remove(&key);
                TriggerDecision::NotDue
            }
        }
    }

    fn report_unsupported(&self, workflow_id: Uuid, node_type: &str) {
        let first = lock(&self.reported_unsupported).insert((workflow_id, node_type.to_owned()));
        if first {
            warn!(%workflow_id, node_type, "unsupported trigger type; workflow will not be scheduled");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn timer_due(
    meta: &TimerMetadata,
    last_execution: Option<&ExecutionRecord>,
    now: DateTime<Utc>,
) -> TriggerDecision {
    let Some(last) = last_execution else {
        return TriggerDecision::Due;
    };

    let elapsed = now.signed_duration_since(last.start_time).num_seconds();
    let interval = i64::try_from(meta.interval_seconds).unwrap_or(i64::MAX);
    if elapsed >= interval {
        TriggerDecision::Due
    } else {
        TriggerDecision::NotDue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use connectors::{Credentials, StaticPriceOracle};
    use serde_json::json;

    use crate::models::NodeRole;

    fn timer(interval: u64) -> WorkflowNode {
        WorkflowNode {
            id: "t".into(),
            role: NodeRole::Trigger,
            node_type: "timer".into(),
            metadata: json!({ "intervalSeconds": interval }),
            credentials: Credentials::default(),
            position: None,
        }
    }

    fn price_trigger(asset: &str, target: f64) -> WorkflowNode {
        WorkflowNode {
            id: "p".into(),
            role: NodeRole::Trigger,
            node_type: "price-trigger".into(),
            metadata: json!({ "asset": asset, "targetPrice": target }),
            credentials: Credentials::default(),
            position: None,
        }
    }

    fn started_at(workflow_id: Uuid, start: DateTime<Utc>) -> ExecutionRecord {
        ExecutionRecord::pending(workflow_id, start)
    }

    #[tokio::test]
    async fn timer_without_history_is_due() {
        let evaluator = TriggerEvaluator::new(None);
        let decision = evaluator.evaluate(Uuid::new_v4(), &timer(60), None, Utc::now()).await;
        assert_eq!(decision, TriggerDecision::Due);
    }

    #[tokio::test]
    async fn timer_is_due_exactly_at_interval() {
        let evaluator = TriggerEvaluator::new(None);
        let wf = Uuid::new_v4();
        let t0 = Utc::now();
        let last = started_at(wf, t0);

        for (offset, expected) in [
            (0, TriggerDecision::NotDue),
            (59, TriggerDecision::NotDue),
            (60, TriggerDecision::Due),
            (3600, TriggerDecision::Due),
        ] {
            let now = t0 + Duration::seconds(offset);
            assert_eq!(
                evaluator.evaluate(wf, &timer(60), Some(&last), now).await,
                expected,
                "offset {offset}s"
            );
        }
    }

    #[tokio::test]
    async fn timer_measures_from_start_not_end() {
        let evaluator = TriggerEvaluator::new(None);
        let wf = Uuid::new_v4();
        let t0 = Utc::now();
        let mut last = started_at(wf, t0);
        last.end_time = Some(t0 + Duration::seconds(50));

        let decision = evaluator
            .evaluate(wf, &timer(60), Some(&last), t0 + Duration::seconds(61))
            .await;
        assert_eq!(decision, TriggerDecision::Due);
    }

    #[tokio::test]
    async fn price_trigger_fires_once_per_crossing() {
        let oracle = Arc::new(StaticPriceOracle::new());
        let evaluator = TriggerEvaluator::new(Some(oracle.clone()));
        let wf = Uuid::new_v4();
        let node = price_trigger("BTC", 100_000.0);
        let now = Utc::now();

        let mut decisions = Vec::new();
        for price in [95_000.0, 99_000.0, 101_000.0, 102_000.0, 98_000.0, 97_000.0] {
            oracle.set_quote("BTC", price);
            let decision = evaluator.evaluate(wf, &node, None, now).await;
            if decision.is_due() {
                evaluator.commit(wf, &node);
            }
            decisions.push(decision);
        }

        use TriggerDecision::{Due, NotDue};
        // First observation only establishes the baseline.
        assert_eq!(decisions, vec![NotDue, NotDue, Due, NotDue, Due, NotDue]);
    }

    #[tokio::test]
    async fn uncommitted_crossing_stays_due() {
        let oracle = Arc::new(StaticPriceOracle::new());
        let evaluator = TriggerEvaluator::new(Some(oracle.clone()));
        let wf = Uuid::new_v4();
        let node = price_trigger("BTC", 100.0);
        let now = Utc::now();

        oracle.set_quote("BTC", 90.0);
        assert_eq!(evaluator.evaluate(wf, &node, None, now).await, TriggerDecision::NotDue);

        oracle.set_quote("BTC", 110.0);
        assert_eq!(evaluator.evaluate(wf, &node, None, now).await, TriggerDecision::Due);
        // The run could not be claimed, so nothing was committed.
        assert_eq!(evaluator.evaluate(wf, &node, None, now).await, TriggerDecision::Due);

        evaluator.commit(wf, &node);
        assert_eq!(evaluator.evaluate(wf, &node, None, now).await, TriggerDecision::NotDue);
    }

    #[tokio::test]
    async fn crossing_back_before_commit_is_forgotten() {
        let oracle = Arc::new(StaticPriceOracle::new());
        let evaluator = TriggerEvaluator::new(Some(oracle.clone()));
        let wf = Uuid::new_v4();
        let node = price_trigger("BTC", 100.0);
        let now = Utc::now();

        oracle.set_quote("BTC", 90.0);
        evaluator.evaluate(wf, &node, None, now).await;
        oracle.set_quote("BTC", 110.0);
        assert!(evaluator.evaluate(wf, &node, None, now).await.is_due());

        oracle.set_quote("BTC", 95.0);
        assert_eq!(evaluator.evaluate(wf, &node, None, now).await, TriggerDecision::NotDue);
        // Nothing staged any more; a stray commit changes nothing.
        evaluator.commit(wf, &node);
        oracle.set_quote("BTC", 105.0);
        assert!(evaluator.evaluate(wf, &node, None, now).await.is_due());
    }

    #[tokio::test]
    async fn unavailable_quote_is_not_due_and_keeps_state() {
        let oracle = Arc::new(StaticPriceOracle::new());
        let evaluator = TriggerEvaluator::new(Some(oracle.clone()));
        let wf = Uuid::new_v4();
        let node = price_trigger("ETH", 3_000.0);
        let now = Utc::now();

        oracle.set_quote("ETH", 2_900.0);
        assert_eq!(evaluator.evaluate(wf, &node, None, now).await, TriggerDecision::NotDue);

        oracle.clear_quote("ETH");
        assert_eq!(evaluator.evaluate(wf, &node, None, now).await, TriggerDecision::NotDue);

        oracle.set_quote("ETH", 3_100.0);
        assert_eq!(evaluator.evaluate(wf, &node, None, now).await, TriggerDecision::Due);
    }

    #[tokio::test]
    async fn price_state_is_per_workflow() {
        let oracle = Arc::new(StaticPriceOracle::new());
        let evaluator = TriggerEvaluator::new(Some(oracle.clone()));
        let (wf_a, wf_b) = (Uuid::new_v4(), Uuid::new_v4());
        let node = price_trigger("SOL", 150.0);
        let now = Utc::now();

        oracle.set_quote("SOL", 140.0);
        evaluator.evaluate(wf_a, &node, None, now).await;

        oracle.set_quote("SOL", 160.0);
        assert_eq!(evaluator.evaluate(wf_a, &node, None, now).await, TriggerDecision::Due);
        // wf_b has never seen the asset below the threshold.
        assert_eq!(evaluator.evaluate(wf_b, &node, None, now).await, TriggerDecision::NotDue);
    }

    #[tokio::test]
    async fn unknown_trigger_type_is_unsupported() {
        let evaluator = TriggerEvaluator::new(None);
        let mut node = timer(60);
        node.node_type = "webhook".into();
        let wf = Uuid::new_v4();

        for _ in 0..3 {
            assert_eq!(
                evaluator.evaluate(wf, &node, None, Utc::now()).await,
                TriggerDecision::Unsupported
            );
        }
        assert_eq!(evaluator.reported_unsupported.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retain_drops_state_of_deleted_workflows() {
        let oracle = Arc::new(StaticPriceOracle::new());
        let evaluator = TriggerEvaluator::new(Some(oracle.clone()));
        let (kept, deleted) = (Uuid::new_v4(), Uuid::new_v4());
        let mut webhook = timer(60);
        webhook.node_type = "webhook".into();

        oracle.set_quote("BTC", 90.0);
        for wf in [kept, deleted] {
            evaluator.evaluate(wf, &price_trigger("BTC", 100.0), None, Utc::now()).await;
            evaluator.evaluate(wf, &webhook, None, Utc::now()).await;
        }

        evaluator.retain_workflows(&HashSet::from([kept]));

        assert_eq!(evaluator.price_sides.lock().unwrap().len(), 1);
        let reported = evaluator.reported_unsupported.lock().unwrap();
        assert_eq!(reported.len(), 1);
        assert!(reported.iter().all(|(wf, _)| *wf == kept));
    }
}

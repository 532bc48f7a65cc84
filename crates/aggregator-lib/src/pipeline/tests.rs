//! Pipeline scenarios with in-process collaborators
//!
//! These tests verify:
//! - Fan-out, exclusion of failing nodes and the no-evidence error
//! - Arbitration in the ambiguous band and its fallback
//! - Batch isolation, ordering and the batch cap

use super::*;
use crate::consensus::WeightingPolicy;
use crate::error::{DetectionError, GatewayError};
use crate::gateway::{PredictionService, RuleEvaluator};
use crate::health::{components, ComponentStatus, HealthRegistry};
use crate::models::{
    ArbitrationResult, ModelStatus, NodeMetrics, Notice, PredictionResult, Transaction,
    TransactionInput, Verdict,
};
use crate::registry::NodeRegistry;
use crate::settings::{DetectionSettings, SettingsStore};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Barrier;

/// Amount that makes every node fail for that transaction
const POISONED_AMOUNT: f64 = 666.0;

#[derive(Clone)]
enum NodeBehavior {
    Score(f64),
    Fail,
    Slow(f64, Duration),
}

struct StubPredictions {
    behaviors: HashMap<String, NodeBehavior>,
    calls: AtomicUsize,
    barrier: Option<Arc<Barrier>>,
}

impl StubPredictions {
    fn new(behaviors: &[(&str, NodeBehavior)]) -> Self {
        Self {
            behaviors: behaviors
                .iter()
                .map(|(id, b)| (id.to_string(), b.clone()))
                .collect(),
            calls: AtomicUsize::new(0),
            barrier: None,
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PredictionService for StubPredictions {
    async fn predict(
        &self,
        node_id: &str,
        transaction: &Transaction,
    ) -> Result<PredictionResult, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        if transaction.amount == POISONED_AMOUNT {
            return Err(GatewayError::Transport("connection reset".into()));
        }

        let score = match self.behaviors.get(node_id) {
            Some(NodeBehavior::Score(score)) => *score,
            Some(NodeBehavior::Slow(score, delay)) => {
                tokio::time::sleep(*delay).await;
                *score
            }
            Some(NodeBehavior::Fail) | None => {
                return Err(GatewayError::Status {
                    status: 503,
                    body: "model not loaded".into(),
                })
            }
        };

        Ok(PredictionResult {
            node_id: node_id.to_string(),
            confidence_score: score,
            label: if score > 0.5 {
                Verdict::Fraud
            } else {
                Verdict::Legitimate
            },
        })
    }
}

struct StubEvaluator {
    decision: Option<Verdict>,
    calls: AtomicUsize,
}

impl StubEvaluator {
    fn deciding(decision: Verdict) -> Self {
        Self {
            decision: Some(decision),
            calls: AtomicUsize::new(0),
        }
    }

    fn unreachable() -> Self {
        Self {
            decision: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RuleEvaluator for StubEvaluator {
    async fn evaluate(
        &self,
        _transaction: &Transaction,
        _score: f64,
    ) -> Result<ArbitrationResult, GatewayError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.decision {
            Some(decision) => Ok(ArbitrationResult {
                triggered: true,
                matched_rules: BTreeSet::from([
                    "amount_exceeds_balance".to_string(),
                    "zero_recipient_initial".to_string(),
                ]),
                decision,
            }),
            None => Err(GatewayError::Transport("connection refused".into())),
        }
    }
}

fn metrics(f1: f64) -> NodeMetrics {
    NodeMetrics {
        accuracy: 0.9,
        precision: 0.9,
        recall: 0.9,
        f1_score: f1,
        auc: 0.9,
        data_volume: 1000,
        fraud_ratio: 0.05,
    }
}

fn input(amount: f64) -> TransactionInput {
    TransactionInput {
        amount: Some(amount),
        old_balance_origin: Some(1000.0),
        new_balance_origin: Some(1000.0 - amount.min(1000.0)),
        old_balance_dest: Some(0.0),
        new_balance_dest: Some(amount),
        kind: Some("TRANSFER".to_string()),
    }
}

fn item(amount: f64) -> serde_json::Value {
    serde_json::to_value(input(amount)).unwrap()
}

struct Harness {
    registry: NodeRegistry,
    predictions: Arc<StubPredictions>,
    evaluator: Arc<StubEvaluator>,
    health: HealthRegistry,
    controller: Arc<DetectionController>,
}

async fn harness(
    predictions: StubPredictions,
    evaluator: StubEvaluator,
    trained: &[(&str, Option<f64>)],
    settings: DetectionSettings,
    config: PipelineConfig,
) -> Harness {
    let registry = NodeRegistry::new(["1", "2", "3"]);
    for (id, f1) in trained {
        match f1 {
            Some(f1) => {
                registry.record_metrics(id, metrics(*f1)).await.unwrap();
            }
            None => {
                registry
                    .set_status(id, Some(ModelStatus::Trained), None)
                    .await
                    .unwrap();
            }
        }
    }

    let predictions = Arc::new(predictions);
    let evaluator = Arc::new(evaluator);
    let health = HealthRegistry::with_default_components().await;
    let controller = Arc::new(
        DetectionController::new(
            registry.clone(),
            SettingsStore::new(settings).unwrap(),
            predictions.clone(),
            evaluator.clone(),
        )
        .with_config(config)
        .with_health(health.clone()),
    );

    Harness {
        registry,
        predictions,
        evaluator,
        health,
        controller,
    }
}

fn equal_settings() -> DetectionSettings {
    DetectionSettings {
        weighting_policy: WeightingPolicy::Equal,
        ..Default::default()
    }
}

mod detection_tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_input_rejected_before_fan_out() {
        let h = harness(
            StubPredictions::new(&[("1", NodeBehavior::Score(0.9))]),
            StubEvaluator::deciding(Verdict::Fraud),
            &[("1", Some(0.8))],
            DetectionSettings::default(),
            PipelineConfig::default(),
        )
        .await;

        let mut bad = input(100.0);
        bad.new_balance_dest = None;
        let err = h.controller.detect(bad).await.unwrap_err();

        assert!(matches!(err, DetectionError::Validation(_)));
        assert_eq!(h.predictions.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_trained_nodes() {
        let h = harness(
            StubPredictions::new(&[("1", NodeBehavior::Score(0.9))]),
            StubEvaluator::deciding(Verdict::Fraud),
            &[],
            DetectionSettings::default(),
            PipelineConfig::default(),
        )
        .await;

        let err = h.controller.detect(input(100.0)).await.unwrap_err();

        assert_eq!(err, DetectionError::NoTrainedNodes);
        assert_eq!(h.predictions.calls(), 0);
    }

    #[tokio::test]
    async fn test_only_trained_nodes_are_contacted() {
        let h = harness(
            StubPredictions::new(&[
                ("1", NodeBehavior::Score(0.9)),
                ("2", NodeBehavior::Score(0.1)),
                ("3", NodeBehavior::Score(0.1)),
            ]),
            StubEvaluator::deciding(Verdict::Fraud),
            &[("1", Some(0.8))],
            DetectionSettings::default(),
            PipelineConfig::default(),
        )
        .await;

        let result = h.controller.detect(input(100.0)).await.unwrap();

        assert_eq!(h.predictions.calls(), 1);
        assert_eq!(result.predictions.len(), 1);
        assert_eq!(result.predictions[0].node_id, "1");
        assert_eq!(result.final_decision, Verdict::Fraud);
    }

    #[tokio::test]
    async fn test_equal_mean_in_band_is_arbitrated() {
        let h = harness(
            StubPredictions::new(&[
                ("1", NodeBehavior::Score(0.2)),
                ("2", NodeBehavior::Score(0.8)),
            ]),
            StubEvaluator::deciding(Verdict::Fraud),
            &[("1", Some(0.5)), ("2", Some(0.9))],
            equal_settings(),
            PipelineConfig::default(),
        )
        .await;

        let result = h.controller.detect(input(100.0)).await.unwrap();

        assert!((result.aggregated_score - 0.5).abs() < 1e-9);
        assert_eq!(result.final_decision, Verdict::Fraud);
        assert!(result.arbitration.as_ref().unwrap().triggered);
        assert!(result.notices.is_empty());
        assert_eq!(h.evaluator.calls(), 1);
    }

    #[tokio::test]
    async fn test_performance_weighting_uses_snapshot_metrics() {
        let h = harness(
            StubPredictions::new(&[
                ("1", NodeBehavior::Score(0.2)),
                ("2", NodeBehavior::Score(0.8)),
            ]),
            StubEvaluator::deciding(Verdict::Legitimate),
            &[("1", Some(0.5)), ("2", Some(0.9))],
            DetectionSettings::default(),
            PipelineConfig::default(),
        )
        .await;

        let result = h.controller.detect(input(100.0)).await.unwrap();

        let expected = (0.2 * 0.5 + 0.8 * 0.9) / 1.4;
        assert!((result.aggregated_score - expected).abs() < 1e-9);
        assert_eq!(result.final_decision, Verdict::Legitimate);
    }

    #[tokio::test]
    async fn test_high_score_skips_arbitration() {
        let h = harness(
            StubPredictions::new(&[("1", NodeBehavior::Score(0.8))]),
            StubEvaluator::deciding(Verdict::Legitimate),
            &[("1", Some(0.7))],
            DetectionSettings::default(),
            PipelineConfig::default(),
        )
        .await;

        let result = h.controller.detect(input(100.0)).await.unwrap();

        assert_eq!(result.final_decision, Verdict::Fraud);
        assert!(result.arbitration.is_none());
        assert_eq!(h.evaluator.calls(), 0);
    }

    #[tokio::test]
    async fn test_low_score_skips_arbitration() {
        let h = harness(
            StubPredictions::new(&[("1", NodeBehavior::Score(0.3))]),
            StubEvaluator::deciding(Verdict::Fraud),
            &[("1", Some(0.7))],
            DetectionSettings::default(),
            PipelineConfig::default(),
        )
        .await;

        let result = h.controller.detect(input(100.0)).await.unwrap();

        assert_eq!(result.final_decision, Verdict::Legitimate);
        assert!(result.arbitration.is_none());
        assert_eq!(h.evaluator.calls(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_evaluator_falls_back() {
        let h = harness(
            StubPredictions::new(&[("1", NodeBehavior::Score(0.55))]),
            StubEvaluator::unreachable(),
            &[("1", Some(0.7))],
            DetectionSettings::default(),
            PipelineConfig::default(),
        )
        .await;

        let result = h.controller.detect(input(100.0)).await.unwrap();

        assert_eq!(result.final_decision, Verdict::Legitimate);
        assert!(result.arbitration.is_none());
        assert!(matches!(
            result.notices.as_slice(),
            [Notice::ArbitrationUnavailable { .. }]
        ));

        let health = h.health.health().await;
        assert_eq!(
            health.components[components::RULE_EVALUATOR].status,
            ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_failing_node_is_excluded() {
        let h = harness(
            StubPredictions::new(&[
                ("1", NodeBehavior::Score(0.9)),
                ("2", NodeBehavior::Fail),
                ("3", NodeBehavior::Score(0.8)),
            ]),
            StubEvaluator::deciding(Verdict::Legitimate),
            &[("1", Some(0.5)), ("2", Some(0.5)), ("3", Some(0.5))],
            DetectionSettings::default(),
            PipelineConfig::default(),
        )
        .await;

        let result = h.controller.detect(input(100.0)).await.unwrap();

        let ids: Vec<_> = result.predictions.iter().map(|p| p.node_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert!((result.aggregated_score - 0.85).abs() < 1e-9);
        match &result.notices[..] {
            [Notice::NodeUnavailable { node_id, reason }] => {
                assert_eq!(node_id, "2");
                assert!(reason.contains("503"));
            }
            other => panic!("unexpected notices: {:?}", other),
        }

        let health = h.health.health().await;
        assert_eq!(
            health.components[components::PREDICTION_GATEWAY].status,
            ComponentStatus::Degraded
        );
    }

    #[tokio::test]
    async fn test_slow_node_times_out() {
        let h = harness(
            StubPredictions::new(&[
                ("1", NodeBehavior::Slow(0.1, Duration::from_millis(500))),
                ("2", NodeBehavior::Score(0.9)),
            ]),
            StubEvaluator::deciding(Verdict::Legitimate),
            &[("1", Some(0.5)), ("2", Some(0.5))],
            DetectionSettings::default(),
            PipelineConfig {
                prediction_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        )
        .await;

        let result = h.controller.detect(input(100.0)).await.unwrap();

        assert_eq!(result.predictions.len(), 1);
        assert_eq!(result.predictions[0].node_id, "2");
        match &result.notices[..] {
            [Notice::NodeUnavailable { node_id, reason }] => {
                assert_eq!(node_id, "1");
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected notices: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_all_nodes_failing_is_no_trained_nodes() {
        let h = harness(
            StubPredictions::new(&[("1", NodeBehavior::Fail), ("2", NodeBehavior::Fail)]),
            StubEvaluator::deciding(Verdict::Fraud),
            &[("1", Some(0.5)), ("2", Some(0.5))],
            DetectionSettings::default(),
            PipelineConfig::default(),
        )
        .await;

        let err = h.controller.detect(input(100.0)).await.unwrap_err();

        assert_eq!(err, DetectionError::NoTrainedNodes);
        assert_eq!(h.predictions.calls(), 2);
        assert_eq!(h.evaluator.calls(), 0);
    }

    #[tokio::test]
    async fn test_fan_out_is_concurrent() {
        // Every call waits until all three are in flight; sequential dispatch
        // would stall until the per-call timeout.
        let mut predictions = StubPredictions::new(&[
            ("1", NodeBehavior::Score(0.9)),
            ("2", NodeBehavior::Score(0.9)),
            ("3", NodeBehavior::Score(0.9)),
        ]);
        predictions.barrier = Some(Arc::new(Barrier::new(3)));

        let h = harness(
            predictions,
            StubEvaluator::deciding(Verdict::Fraud),
            &[("1", Some(0.5)), ("2", Some(0.5)), ("3", Some(0.5))],
            DetectionSettings::default(),
            PipelineConfig {
                prediction_timeout: Duration::from_secs(2),
                ..Default::default()
            },
        )
        .await;

        let result = h.controller.detect(input(100.0)).await.unwrap();

        assert_eq!(result.predictions.len(), 3);
        assert!(result.notices.is_empty());
    }

    #[tokio::test]
    async fn test_prediction_order_follows_registration() {
        let h = harness(
            StubPredictions::new(&[
                ("1", NodeBehavior::Slow(0.9, Duration::from_millis(60))),
                ("2", NodeBehavior::Slow(0.8, Duration::from_millis(30))),
                ("3", NodeBehavior::Score(0.95)),
            ]),
            StubEvaluator::deciding(Verdict::Fraud),
            &[("1", Some(0.5)), ("2", Some(0.5)), ("3", Some(0.5))],
            DetectionSettings::default(),
            PipelineConfig::default(),
        )
        .await;

        let result = h.controller.detect(input(100.0)).await.unwrap();

        let ids: Vec<_> = result.predictions.iter().map(|p| p.node_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn test_detection_is_deterministic() {
        let h = harness(
            StubPredictions::new(&[
                ("1", NodeBehavior::Score(0.4)),
                ("2", NodeBehavior::Score(0.7)),
                ("3", NodeBehavior::Fail),
            ]),
            StubEvaluator::deciding(Verdict::Fraud),
            &[("1", Some(0.6)), ("2", None), ("3", Some(0.9))],
            DetectionSettings::default(),
            PipelineConfig::default(),
        )
        .await;

        let first = h.controller.detect(input(5000.0)).await.unwrap();
        let second = h.controller.detect(input(5000.0)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_metrics_ingested_mid_flight_do_not_affect_captured_context() {
        let h = harness(
            StubPredictions::new(&[
                ("1", NodeBehavior::Score(0.9)),
                ("2", NodeBehavior::Score(0.1)),
            ]),
            StubEvaluator::deciding(Verdict::Fraud),
            &[("1", Some(0.5))],
            DetectionSettings::default(),
            PipelineConfig::default(),
        )
        .await;

        let context = h.controller.context().await;
        h.registry.record_metrics("2", metrics(0.9)).await.unwrap();

        let tx = Transaction::try_from(input(100.0)).unwrap();
        let result = h.controller.detect_with(tx, &context).await.unwrap();

        assert_eq!(result.predictions.len(), 1);
    }

    #[tokio::test]
    async fn test_arbitrate_passthrough() {
        let h = harness(
            StubPredictions::new(&[]),
            StubEvaluator::deciding(Verdict::Fraud),
            &[],
            DetectionSettings::default(),
            PipelineConfig::default(),
        )
        .await;
        let tx = Transaction::try_from(input(100.0)).unwrap();

        let result = h.controller.arbitrate(&tx, 0.5).await.unwrap();
        assert_eq!(result.decision, Verdict::Fraud);

        let err = h.controller.arbitrate(&tx, 1.5).await.unwrap_err();
        assert!(matches!(err, DetectionError::Validation(_)));
    }

    #[tokio::test]
    async fn test_arbitrate_passthrough_unavailable() {
        let h = harness(
            StubPredictions::new(&[]),
            StubEvaluator::unreachable(),
            &[],
            DetectionSettings::default(),
            PipelineConfig::default(),
        )
        .await;
        let tx = Transaction::try_from(input(100.0)).unwrap();

        let err = h.controller.arbitrate(&tx, 0.5).await.unwrap_err();
        assert!(matches!(err, DetectionError::ArbitrationUnavailable(_)));
    }
}

mod batch_tests {
    use super::*;

    async fn batch_harness() -> Harness {
        harness(
            StubPredictions::new(&[
                ("1", NodeBehavior::Score(0.9)),
                ("2", NodeBehavior::Score(0.8)),
            ]),
            StubEvaluator::deciding(Verdict::Fraud),
            &[("1", Some(0.5)), ("2", Some(0.5))],
            DetectionSettings::default(),
            PipelineConfig::default(),
        )
        .await
    }

    #[tokio::test]
    async fn test_failing_item_does_not_abort_batch() {
        let h = batch_harness().await;
        let coordinator = BatchCoordinator::new(h.controller.clone());

        let inputs = vec![
            item(10.0),
            item(20.0),
            item(POISONED_AMOUNT),
            item(40.0),
            item(50.0),
        ];
        let report = coordinator.run(inputs).await;

        assert_eq!(report.submitted, 5);
        assert_eq!(report.processed, 5);
        assert_eq!(report.results.len(), 5);
        assert_eq!(report.failed(), 1);

        for (i, item) in report.results.iter().enumerate() {
            assert_eq!(item.index, i);
        }

        let failed = &report.results[2];
        assert!(failed.result.is_none());
        assert_eq!(failed.error.as_ref().unwrap().code, "NO_TRAINED_NODES");

        for i in [0, 1, 3, 4] {
            let result = report.results[i].result.as_ref().unwrap();
            assert_eq!(result.final_decision, Verdict::Fraud);
        }
        assert_eq!(report.results[3].result.as_ref().unwrap().transaction.amount, 40.0);
    }

    #[tokio::test]
    async fn test_invalid_item_gets_validation_marker() {
        let h = batch_harness().await;
        let coordinator = BatchCoordinator::new(h.controller.clone());

        let mut bad = input(10.0);
        bad.kind = None;
        let report = coordinator
            .run(vec![serde_json::to_value(bad).unwrap(), item(20.0)])
            .await;

        assert_eq!(report.results[0].error.as_ref().unwrap().code, "VALIDATION_ERROR");
        assert!(report.results[1].is_ok());
    }

    #[tokio::test]
    async fn test_wrong_typed_items_are_isolated() {
        let h = batch_harness().await;
        let coordinator = BatchCoordinator::new(h.controller.clone());

        let mut wrong_type = item(30.0);
        wrong_type["amount"] = serde_json::json!("abc");
        let inputs = vec![
            item(10.0),
            wrong_type,
            serde_json::json!("not a transaction"),
            serde_json::Value::Null,
            item(50.0),
        ];
        let report = coordinator.run(inputs).await;

        assert_eq!(report.processed, 5);
        assert_eq!(report.failed(), 3);
        for i in [1, 2, 3] {
            let error = report.results[i].error.as_ref().unwrap();
            assert_eq!(error.code, "VALIDATION_ERROR");
        }
        assert!(report.results[1]
            .error
            .as_ref()
            .unwrap()
            .message
            .contains("invalid transaction"));
        assert!(report.results[0].is_ok());
        assert!(report.results[4].is_ok());
        // Only the two well-formed items reach the nodes
        assert_eq!(h.predictions.calls(), 4);
    }

    #[tokio::test]
    async fn test_batch_is_capped() {
        let h = batch_harness().await;
        let coordinator = BatchCoordinator::new(h.controller.clone());

        let inputs: Vec<_> = (0..12).map(|i| item(100.0 + i as f64)).collect();
        let report = coordinator.run(inputs).await;

        assert_eq!(report.submitted, 12);
        assert_eq!(report.processed, MAX_BATCH_SIZE);
        assert_eq!(report.results.len(), MAX_BATCH_SIZE);
        assert_eq!(h.predictions.calls(), MAX_BATCH_SIZE * 2);
    }

    #[tokio::test]
    async fn test_batch_without_trained_nodes_marks_every_item() {
        let h = harness(
            StubPredictions::new(&[("1", NodeBehavior::Score(0.9))]),
            StubEvaluator::deciding(Verdict::Fraud),
            &[],
            DetectionSettings::default(),
            PipelineConfig::default(),
        )
        .await;
        let coordinator = BatchCoordinator::new(h.controller.clone());

        let report = coordinator.run(vec![item(1.0), item(2.0)]).await;

        assert_eq!(report.failed(), 2);
        assert!(report
            .results
            .iter()
            .all(|item| item.error.as_ref().unwrap().code == "NO_TRAINED_NODES"));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let h = batch_harness().await;
        let report = BatchCoordinator::new(h.controller.clone()).run(Vec::new()).await;

        assert_eq!(report.submitted, 0);
        assert_eq!(report.processed, 0);
        assert!(report.results.is_empty());
    }
}

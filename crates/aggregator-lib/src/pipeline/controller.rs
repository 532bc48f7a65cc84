//! End-to-end detection of a single transaction

use crate::consensus::{AggregationEngine, ArbitrationGate, ScoreZone};
use crate::error::{DetectionError, GatewayError};
use crate::gateway::{PredictionService, RuleEvaluator};
use crate::health::{components, HealthRegistry};
use crate::models::{
    AggregatedResult, ArbitrationResult, Notice, PredictionResult, Transaction, TransactionInput,
};
use crate::observability::{AggregatorMetrics, StructuredLogger};
use crate::registry::{NodeRegistry, RegistrySnapshot};
use crate::settings::{DetectionSettings, SettingsStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default bound on one node prediction call
pub const DEFAULT_PREDICTION_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum number of transactions processed from one batch request
pub const MAX_BATCH_SIZE: usize = 10;

/// Default number of batch items in flight at once
pub const DEFAULT_BATCH_CONCURRENCY: usize = 4;

/// Timeouts and bounds of the detection pipeline
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub prediction_timeout: Duration,
    pub arbitration_timeout: Duration,
    pub max_batch_size: usize,
    pub batch_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prediction_timeout: DEFAULT_PREDICTION_TIMEOUT,
            arbitration_timeout: crate::consensus::DEFAULT_ARBITRATION_TIMEOUT,
            max_batch_size: MAX_BATCH_SIZE,
            batch_concurrency: DEFAULT_BATCH_CONCURRENCY,
        }
    }
}

/// Settings and node state captured once per detection or batch
#[derive(Debug, Clone)]
pub struct DetectionContext {
    pub settings: DetectionSettings,
    pub snapshot: RegistrySnapshot,
}

/// Orchestrates fan-out, aggregation and arbitration for one transaction
pub struct DetectionController {
    registry: NodeRegistry,
    settings: SettingsStore,
    predictions: Arc<dyn PredictionService>,
    evaluator: Arc<dyn RuleEvaluator>,
    config: PipelineConfig,
    health: HealthRegistry,
    metrics: AggregatorMetrics,
    logger: StructuredLogger,
}

impl DetectionController {
    pub fn new(
        registry: NodeRegistry,
        settings: SettingsStore,
        predictions: Arc<dyn PredictionService>,
        evaluator: Arc<dyn RuleEvaluator>,
    ) -> Self {
        Self {
            registry,
            settings,
            predictions,
            evaluator,
            config: PipelineConfig::default(),
            health: HealthRegistry::new(),
            metrics: AggregatorMetrics::new(),
            logger: StructuredLogger::new("fraud-aggregator"),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn metrics(&self) -> &AggregatorMetrics {
        &self.metrics
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Capture current settings and registry state
    pub async fn context(&self) -> DetectionContext {
        DetectionContext {
            settings: self.settings.current().await,
            snapshot: self.registry.snapshot().await,
        }
    }

    /// Validate raw input and run the full pipeline on it
    pub async fn detect(&self, input: TransactionInput) -> Result<AggregatedResult, DetectionError> {
        let transaction = Transaction::try_from(input)?;
        let context = self.context().await;
        self.detect_with(transaction, &context).await
    }

    /// Run the pipeline on a validated transaction under a captured context
    pub async fn detect_with(
        &self,
        transaction: Transaction,
        context: &DetectionContext,
    ) -> Result<AggregatedResult, DetectionError> {
        let start = Instant::now();

        let node_ids: Vec<String> = context
            .snapshot
            .trained_nodes()
            .map(|n| n.node_id.clone())
            .collect();
        if node_ids.is_empty() {
            debug!("No trained nodes, rejecting detection");
            return Err(DetectionError::NoTrainedNodes);
        }

        let (predictions, mut notices) = self.gather_predictions(&transaction, node_ids).await;

        let settings = &context.settings;
        let engine = AggregationEngine::new(settings.weighting_policy)
            .with_missing_metrics_weight(settings.missing_metrics_weight);
        let aggregated_score = match engine.aggregate(&predictions, &context.snapshot) {
            Ok(score) => score,
            Err(e) => {
                warn!(unavailable = notices.len(), "Every trained node failed to respond");
                return Err(e);
            }
        };

        let gate = ArbitrationGate::new(
            Arc::clone(&self.evaluator),
            settings.ambiguous_band,
            settings.arbitration_enabled,
        )
        .with_timeout(self.config.arbitration_timeout);

        let arbitration_invoked = settings.arbitration_enabled
            && gate.band().zone(aggregated_score) == ScoreZone::Ambiguous;
        let outcome = gate.resolve(&transaction, aggregated_score).await;

        if arbitration_invoked {
            let failure = match &outcome.notice {
                Some(Notice::ArbitrationUnavailable { reason }) => {
                    self.logger.log_arbitration_unavailable(aggregated_score, reason);
                    Some(reason.clone())
                }
                _ => None,
            };
            self.metrics.inc_arbitrations(failure.is_none());
            self.health
                .record_outcome(components::RULE_EVALUATOR, failure)
                .await;
        }
        notices.extend(outcome.notice);

        let elapsed = start.elapsed();
        self.metrics.observe_detection_latency(elapsed.as_secs_f64());
        self.metrics.inc_decisions(outcome.decision);
        self.logger.log_detection(
            aggregated_score,
            outcome.decision,
            predictions.len(),
            outcome.arbitration.is_some(),
            elapsed.as_millis() as u64,
        );

        Ok(AggregatedResult {
            transaction,
            predictions,
            aggregated_score,
            arbitration: outcome.arbitration,
            final_decision: outcome.decision,
            notices,
        })
    }

    /// Query every node concurrently and wait for all of them.
    ///
    /// Results keep the order of `node_ids`. Failed or timed-out nodes are
    /// reported as notices and never retried.
    async fn gather_predictions(
        &self,
        transaction: &Transaction,
        node_ids: Vec<String>,
    ) -> (Vec<PredictionResult>, Vec<Notice>) {
        let timeout = self.config.prediction_timeout;
        let mut handles = Vec::with_capacity(node_ids.len());

        for node_id in node_ids {
            let service = Arc::clone(&self.predictions);
            let transaction = transaction.clone();
            let task_node_id = node_id.clone();
            let handle = tokio::spawn(async move {
                let started = Instant::now();
                let result =
                    match tokio::time::timeout(timeout, service.predict(&task_node_id, &transaction))
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => Err(GatewayError::Timeout(timeout.as_millis() as u64)),
                    };
                (result, started.elapsed())
            });
            handles.push((node_id, handle));
        }

        let mut predictions = Vec::with_capacity(handles.len());
        let mut notices = Vec::new();

        for (node_id, handle) in handles {
            let reason = match handle.await {
                Ok((Ok(mut prediction), elapsed)) => {
                    self.metrics.observe_node_call_latency(elapsed.as_secs_f64());
                    prediction.node_id = node_id;
                    predictions.push(prediction);
                    continue;
                }
                Ok((Err(e), elapsed)) => {
                    self.metrics.observe_node_call_latency(elapsed.as_secs_f64());
                    e.to_string()
                }
                Err(e) => format!("prediction task failed: {}", e),
            };

            let unavailable = DetectionError::NodeUnavailable {
                node_id: node_id.clone(),
                reason: reason.clone(),
            };
            debug!(error = %unavailable, "Excluding node from aggregation");
            self.logger.log_node_unavailable(&node_id, &reason);
            self.metrics.inc_node_failures(&node_id);
            notices.push(Notice::NodeUnavailable { node_id, reason });
        }

        let failure = if notices.is_empty() {
            None
        } else {
            let failed: Vec<&str> = notices
                .iter()
                .filter_map(|n| match n {
                    Notice::NodeUnavailable { node_id, .. } => Some(node_id.as_str()),
                    _ => None,
                })
                .collect();
            Some(format!("unavailable nodes: {}", failed.join(", ")))
        };
        self.health
            .record_outcome(components::PREDICTION_GATEWAY, failure)
            .await;

        (predictions, notices)
    }

    /// Ask the rule evaluator directly, outside the detection flow
    pub async fn arbitrate(
        &self,
        transaction: &Transaction,
        score: f64,
    ) -> Result<ArbitrationResult, DetectionError> {
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(DetectionError::Validation(format!(
                "score must be within [0, 1], got {}",
                score
            )));
        }

        let settings = self.settings.current().await;
        let gate = ArbitrationGate::new(
            Arc::clone(&self.evaluator),
            settings.ambiguous_band,
            true,
        )
        .with_timeout(self.config.arbitration_timeout);

        match gate.evaluate(transaction, score).await {
            Ok(result) => {
                self.metrics.inc_arbitrations(true);
                self.health
                    .record_outcome(components::RULE_EVALUATOR, None)
                    .await;
                Ok(result)
            }
            Err(e) => {
                let reason = e.to_string();
                self.logger.log_arbitration_unavailable(score, &reason);
                self.metrics.inc_arbitrations(false);
                self.health
                    .record_outcome(components::RULE_EVALUATOR, Some(reason.clone()))
                    .await;
                Err(DetectionError::ArbitrationUnavailable(reason))
            }
        }
    }
}

//! Reduction of per-node predictions into one consensus score

use crate::error::DetectionError;
use crate::models::PredictionResult;
use crate::registry::RegistrySnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Weight assigned to a node that has never reported metrics
pub const DEFAULT_MISSING_METRICS_WEIGHT: f64 = 0.5;

/// Strategy used to combine node scores
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightingPolicy {
    /// Arithmetic mean of all scores
    Equal,
    /// Mean weighted by each node's F1 score
    #[default]
    Performance,
}

impl fmt::Display for WeightingPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WeightingPolicy::Equal => f.write_str("equal"),
            WeightingPolicy::Performance => f.write_str("performance"),
        }
    }
}

impl FromStr for WeightingPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "equal" => Ok(WeightingPolicy::Equal),
            "performance" => Ok(WeightingPolicy::Performance),
            other => Err(format!("invalid weighting policy '{}'", other)),
        }
    }
}

/// Combines predictions under a weighting policy
#[derive(Debug, Clone, Copy)]
pub struct AggregationEngine {
    policy: WeightingPolicy,
    missing_metrics_weight: f64,
}

impl Default for AggregationEngine {
    fn default() -> Self {
        Self::new(WeightingPolicy::default())
    }
}

impl AggregationEngine {
    pub fn new(policy: WeightingPolicy) -> Self {
        Self {
            policy,
            missing_metrics_weight: DEFAULT_MISSING_METRICS_WEIGHT,
        }
    }

    pub fn with_missing_metrics_weight(mut self, weight: f64) -> Self {
        self.missing_metrics_weight = weight;
        self
    }

    pub fn policy(&self) -> WeightingPolicy {
        self.policy
    }

    /// Weight of a node under the performance policy
    pub fn node_weight(&self, node_id: &str, nodes: &RegistrySnapshot) -> f64 {
        nodes
            .metrics_for(node_id)
            .map(|m| m.f1_score)
            .unwrap_or(self.missing_metrics_weight)
    }

    /// Consensus score in `[0, 1]`.
    ///
    /// An empty prediction set means no trained node produced evidence and is
    /// an error, never a zero score.
    pub fn aggregate(
        &self,
        predictions: &[PredictionResult],
        nodes: &RegistrySnapshot,
    ) -> Result<f64, DetectionError> {
        if predictions.is_empty() {
            return Err(DetectionError::NoTrainedNodes);
        }

        let score = match self.policy {
            WeightingPolicy::Equal => equal_mean(predictions),
            WeightingPolicy::Performance => {
                let (weighted, total) = predictions.iter().fold((0.0, 0.0), |(ws, tw), p| {
                    let weight = self.node_weight(&p.node_id, nodes);
                    (ws + p.confidence_score * weight, tw + weight)
                });

                if total > 0.0 {
                    weighted / total
                } else {
                    equal_mean(predictions)
                }
            }
        };

        Ok(score.clamp(0.0, 1.0))
    }
}

fn equal_mean(predictions: &[PredictionResult]) -> f64 {
    let sum: f64 = predictions.iter().map(|p| p.confidence_score).sum();
    sum / predictions.len() as f64
}

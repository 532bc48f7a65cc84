//! Rule-based arbitration for scores in the ambiguous band

use crate::error::{DetectionError, GatewayError};
use crate::gateway::RuleEvaluator;
use crate::models::{ArbitrationResult, Notice, Transaction, Verdict};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_AMBIGUOUS_LOW: f64 = 0.45;
pub const DEFAULT_AMBIGUOUS_HIGH: f64 = 0.7;

/// Default bound on a single rule evaluator call
pub const DEFAULT_ARBITRATION_TIMEOUT: Duration = Duration::from_secs(5);

/// Closed score interval `[low, high]` where consensus is not trusted on its own
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AmbiguousBand {
    pub low: f64,
    pub high: f64,
}

impl Default for AmbiguousBand {
    fn default() -> Self {
        Self {
            low: DEFAULT_AMBIGUOUS_LOW,
            high: DEFAULT_AMBIGUOUS_HIGH,
        }
    }
}

/// Where a score falls relative to the band
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreZone {
    Below,
    Ambiguous,
    Above,
}

impl AmbiguousBand {
    pub fn new(low: f64, high: f64) -> Result<Self, DetectionError> {
        let band = Self { low, high };
        band.validate()?;
        Ok(band)
    }

    /// Both bounds finite, within `[0, 1]`, and `low <= high`
    pub fn validate(&self) -> Result<(), DetectionError> {
        let in_unit = |v: f64| v.is_finite() && (0.0..=1.0).contains(&v);
        if !in_unit(self.low) || !in_unit(self.high) {
            return Err(DetectionError::Validation(format!(
                "ambiguous band bounds must be within [0, 1], got [{}, {}]",
                self.low, self.high
            )));
        }
        if self.low > self.high {
            return Err(DetectionError::Validation(format!(
                "ambiguous band lower bound {} exceeds upper bound {}",
                self.low, self.high
            )));
        }
        Ok(())
    }

    pub fn zone(&self, score: f64) -> ScoreZone {
        if score > self.high {
            ScoreZone::Above
        } else if score < self.low {
            ScoreZone::Below
        } else {
            ScoreZone::Ambiguous
        }
    }

    /// Decision from the score alone, used whenever arbitration does not decide
    pub fn score_only_decision(&self, score: f64) -> Verdict {
        if score > self.high {
            Verdict::Fraud
        } else {
            Verdict::Legitimate
        }
    }
}

/// Final decision plus whatever arbitration produced along the way
#[derive(Debug, Clone, PartialEq)]
pub struct GateOutcome {
    pub decision: Verdict,
    pub arbitration: Option<ArbitrationResult>,
    pub notice: Option<Notice>,
}

/// Decides when to consult the rule evaluator and merges its verdict
#[derive(Clone)]
pub struct ArbitrationGate {
    evaluator: Arc<dyn RuleEvaluator>,
    band: AmbiguousBand,
    enabled: bool,
    timeout: Duration,
}

impl ArbitrationGate {
    pub fn new(evaluator: Arc<dyn RuleEvaluator>, band: AmbiguousBand, enabled: bool) -> Self {
        Self {
            evaluator,
            band,
            enabled,
            timeout: DEFAULT_ARBITRATION_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn band(&self) -> AmbiguousBand {
        self.band
    }

    /// Resolve the binary verdict for an aggregated score.
    ///
    /// Evaluator failures never fail the detection; they surface as a notice
    /// and the score-only rule decides.
    pub async fn resolve(&self, transaction: &Transaction, score: f64) -> GateOutcome {
        match self.band.zone(score) {
            ScoreZone::Above => GateOutcome {
                decision: Verdict::Fraud,
                arbitration: None,
                notice: None,
            },
            ScoreZone::Below => GateOutcome {
                decision: Verdict::Legitimate,
                arbitration: None,
                notice: None,
            },
            ScoreZone::Ambiguous if !self.enabled => GateOutcome {
                decision: self.band.score_only_decision(score),
                arbitration: None,
                notice: None,
            },
            ScoreZone::Ambiguous => match self.evaluate(transaction, score).await {
                Ok(result) => {
                    debug!(
                        score = score,
                        decision = %result.decision,
                        matched_rules = result.matched_rules.len(),
                        "Arbitration decided ambiguous score"
                    );
                    GateOutcome {
                        decision: result.decision,
                        arbitration: Some(result),
                        notice: None,
                    }
                }
                Err(e) => {
                    warn!(score = score, error = %e, "Rule evaluator unavailable, using score-only decision");
                    GateOutcome {
                        decision: self.band.score_only_decision(score),
                        arbitration: None,
                        notice: Some(Notice::ArbitrationUnavailable {
                            reason: e.to_string(),
                        }),
                    }
                }
            },
        }
    }

    /// Call the evaluator directly, bounded by the gate timeout
    pub async fn evaluate(
        &self,
        transaction: &Transaction,
        score: f64,
    ) -> Result<ArbitrationResult, GatewayError> {
        match tokio::time::timeout(self.timeout, self.evaluator.evaluate(transaction, score)).await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.timeout.as_millis() as u64)),
        }
    }
}

//! Consensus over node predictions
//!
//! Aggregation reduces the per-node scores; arbitration turns the reduced
//! score into a binary verdict, consulting the rule evaluator in the
//! ambiguous band.

mod aggregation;
mod arbitration;

pub use aggregation::{AggregationEngine, WeightingPolicy, DEFAULT_MISSING_METRICS_WEIGHT};
pub use arbitration::{
    AmbiguousBand, ArbitrationGate, GateOutcome, ScoreZone, DEFAULT_AMBIGUOUS_HIGH,
    DEFAULT_AMBIGUOUS_LOW, DEFAULT_ARBITRATION_TIMEOUT,
};

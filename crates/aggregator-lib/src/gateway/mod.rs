//! Boundary with external collaborators
//!
//! This module provides:
//! - `PredictionService`: scores one transaction on one node
//! - `RuleEvaluator`: adjudicates scores in the ambiguous band
//! - HTTP implementations of both, built on a shared reqwest client

mod client;

pub use client::{
    GatewayConfig, HttpPredictionClient, HttpRuleEvaluator, GatewayClientBuilder,
    DEFAULT_REQUEST_TIMEOUT,
};

use crate::error::GatewayError;
use crate::models::{ArbitrationResult, PredictionResult, Transaction};
use async_trait::async_trait;

/// Scoring service of the prediction nodes
#[async_trait]
pub trait PredictionService: Send + Sync {
    /// Ask `node_id` for its fraud confidence on `transaction`
    async fn predict(
        &self,
        node_id: &str,
        transaction: &Transaction,
    ) -> Result<PredictionResult, GatewayError>;
}

/// External deterministic rule engine
#[async_trait]
pub trait RuleEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        transaction: &Transaction,
        score: f64,
    ) -> Result<ArbitrationResult, GatewayError>;
}

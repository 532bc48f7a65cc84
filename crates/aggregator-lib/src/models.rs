//! Core data models for the fraud aggregator

use crate::error::DetectionError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Training state of a node's local model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelStatus {
    NotTrained,
    Training,
    Trained,
    Error,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::NotTrained => "not_trained",
            ModelStatus::Training => "training",
            ModelStatus::Trained => "trained",
            ModelStatus::Error => "error",
        }
    }
}

/// Synchronization state of a node with the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    NotSynced,
    Pending,
    Synced,
    Error,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::NotSynced => "not_synced",
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Error => "error",
        }
    }
}

/// Evaluation metrics reported by a node after training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub auc: f64,
    pub data_volume: u64,
    pub fraud_ratio: f64,
}

impl NodeMetrics {
    /// Reject ratios outside `[0, 1]` or non-finite values
    pub fn validate(&self) -> Result<(), DetectionError> {
        let ratios = [
            ("accuracy", self.accuracy),
            ("precision", self.precision),
            ("recall", self.recall),
            ("f1Score", self.f1_score),
            ("auc", self.auc),
            ("fraudRatio", self.fraud_ratio),
        ];

        for (name, value) in ratios {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(DetectionError::Validation(format!(
                    "metric '{}' must be within [0, 1], got {}",
                    name, value
                )));
            }
        }

        Ok(())
    }
}

/// Last-known state of one prediction node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRecord {
    pub node_id: String,
    pub model_status: ModelStatus,
    pub sync_status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<NodeMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl NodeRecord {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            model_status: ModelStatus::NotTrained,
            sync_status: SyncStatus::NotSynced,
            metrics: None,
            last_sync_time: None,
        }
    }

    pub fn is_trained(&self) -> bool {
        self.model_status == ModelStatus::Trained
    }
}

/// Categorical transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Payment,
    Transfer,
    CashOut,
    CashIn,
    Debit,
}

impl TransactionType {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().replace('-', "_").as_str() {
            "PAYMENT" => Some(Self::Payment),
            "TRANSFER" => Some(Self::Transfer),
            "CASH_OUT" => Some(Self::CashOut),
            "CASH_IN" => Some(Self::CashIn),
            "DEBIT" => Some(Self::Debit),
            _ => None,
        }
    }
}

/// Raw transaction as supplied by a caller, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionInput {
    pub amount: Option<f64>,
    #[serde(rename = "oldbalanceOrg")]
    pub old_balance_origin: Option<f64>,
    #[serde(rename = "newbalanceOrig")]
    pub new_balance_origin: Option<f64>,
    #[serde(rename = "oldbalanceDest")]
    pub old_balance_dest: Option<f64>,
    #[serde(rename = "newbalanceDest")]
    pub new_balance_dest: Option<f64>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// Validated, immutable transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub amount: f64,
    #[serde(rename = "oldbalanceOrg")]
    pub old_balance_origin: f64,
    #[serde(rename = "newbalanceOrig")]
    pub new_balance_origin: f64,
    #[serde(rename = "oldbalanceDest")]
    pub old_balance_dest: f64,
    #[serde(rename = "newbalanceDest")]
    pub new_balance_dest: f64,
    #[serde(rename = "type")]
    pub kind: TransactionType,
}

impl TryFrom<TransactionInput> for Transaction {
    type Error = DetectionError;

    fn try_from(input: TransactionInput) -> Result<Self, Self::Error> {
        let mut missing = Vec::new();
        let mut field = |name: &'static str, value: Option<f64>| -> f64 {
            match value {
                Some(v) => v,
                None => {
                    missing.push(name);
                    0.0
                }
            }
        };

        let amount = field("amount", input.amount);
        let old_balance_origin = field("oldbalanceOrg", input.old_balance_origin);
        let new_balance_origin = field("newbalanceOrig", input.new_balance_origin);
        let old_balance_dest = field("oldbalanceDest", input.old_balance_dest);
        let new_balance_dest = field("newbalanceDest", input.new_balance_dest);
        if input.kind.is_none() {
            missing.push("type");
        }

        if !missing.is_empty() {
            return Err(DetectionError::Validation(format!(
                "missing required transaction fields: {}",
                missing.join(", ")
            )));
        }

        let numeric = [
            ("amount", amount),
            ("oldbalanceOrg", old_balance_origin),
            ("newbalanceOrig", new_balance_origin),
            ("oldbalanceDest", old_balance_dest),
            ("newbalanceDest", new_balance_dest),
        ];
        for (name, value) in numeric {
            if !value.is_finite() {
                return Err(DetectionError::Validation(format!(
                    "transaction field '{}' must be a finite number",
                    name
                )));
            }
        }
        if amount < 0.0 {
            return Err(DetectionError::Validation(
                "transaction amount must not be negative".to_string(),
            ));
        }

        let raw_kind = input.kind.unwrap_or_default();
        let kind = TransactionType::parse(&raw_kind).ok_or_else(|| {
            DetectionError::Validation(format!("unknown transaction type '{}'", raw_kind))
        })?;

        Ok(Self {
            amount,
            old_balance_origin,
            new_balance_origin,
            old_balance_dest,
            new_balance_dest,
            kind,
        })
    }
}

impl Transaction {
    /// Decode and validate one untyped JSON item.
    ///
    /// Wrong-typed fields and non-object items are validation errors.
    pub fn from_json(value: serde_json::Value) -> Result<Self, DetectionError> {
        let input: TransactionInput = serde_json::from_value(value)
            .map_err(|e| DetectionError::Validation(format!("invalid transaction: {}", e)))?;
        Self::try_from(input)
    }
}

/// Binary fraud verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Fraud,
    Legitimate,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Fraud => "fraud",
            Verdict::Legitimate => "legitimate",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score reported by one node for one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionResult {
    pub node_id: String,
    pub confidence_score: f64,
    pub label: Verdict,
}

/// Outcome of the external rule evaluator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArbitrationResult {
    pub triggered: bool,
    pub matched_rules: BTreeSet<String>,
    pub decision: Verdict,
}

/// Non-fatal condition absorbed while producing a result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    NodeUnavailable {
        #[serde(rename = "nodeId")]
        node_id: String,
        reason: String,
    },
    ArbitrationUnavailable { reason: String },
}

/// Final result of one detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResult {
    pub transaction: Transaction,
    pub predictions: Vec<PredictionResult>,
    pub aggregated_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arbitration: Option<ArbitrationResult>,
    pub final_decision: Verdict,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<Notice>,
}

//! Error taxonomy for detection and registry operations

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the aggregation pipeline and the node registry
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DetectionError {
    /// Malformed or missing input, rejected before any node is contacted
    #[error("validation error: {0}")]
    Validation(String),

    /// Registry operation referenced a node that was never configured
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    /// A single node's prediction call failed or timed out
    #[error("node '{node_id}' unavailable: {reason}")]
    NodeUnavailable { node_id: String, reason: String },

    /// No trained node produced evidence for the transaction
    #[error("no trained nodes available to score the transaction")]
    NoTrainedNodes,

    /// The rule evaluator could not be reached
    #[error("rule evaluator unavailable: {0}")]
    ArbitrationUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl DetectionError {
    /// Stable machine-readable code for API consumers
    pub fn code(&self) -> &'static str {
        match self {
            DetectionError::Validation(_) => "VALIDATION_ERROR",
            DetectionError::UnknownNode(_) => "UNKNOWN_NODE",
            DetectionError::NodeUnavailable { .. } => "NODE_UNAVAILABLE",
            DetectionError::NoTrainedNodes => "NO_TRAINED_NODES",
            DetectionError::ArbitrationUnavailable(_) => "ARBITRATION_UNAVAILABLE",
            DetectionError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

/// Failure talking to an external collaborator (prediction node or rule evaluator)
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("request timed out after {0}ms")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl GatewayError {
    /// Classify a `reqwest` failure; `timeout` is the client's configured bound
    pub fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout(timeout.as_millis() as u64)
        } else if err.is_decode() {
            GatewayError::MalformedResponse(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_distinct() {
        let errors = [
            DetectionError::Validation("x".into()),
            DetectionError::UnknownNode("x".into()),
            DetectionError::NodeUnavailable {
                node_id: "x".into(),
                reason: "y".into(),
            },
            DetectionError::NoTrainedNodes,
            DetectionError::ArbitrationUnavailable("x".into()),
            DetectionError::Internal("x".into()),
        ];

        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_node_unavailable_message() {
        let err = DetectionError::NodeUnavailable {
            node_id: "3".into(),
            reason: GatewayError::Timeout(250).to_string(),
        };
        assert_eq!(
            err.to_string(),
            "node '3' unavailable: request timed out after 250ms"
        );
    }
}

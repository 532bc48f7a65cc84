//! Bounded batch detection with per-item isolation

use super::controller::DetectionController;
use crate::error::DetectionError;
use crate::models::{AggregatedResult, Transaction};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

/// Error marker carried by a failed batch item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemError {
    pub code: String,
    pub message: String,
}

impl From<&DetectionError> for ItemError {
    fn from(err: &DetectionError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Outcome for one batch input, aligned by `index`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<AggregatedResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ItemError>,
}

impl BatchItem {
    fn from_outcome(index: usize, outcome: Result<AggregatedResult, DetectionError>) -> Self {
        match outcome {
            Ok(result) => Self {
                index,
                result: Some(result),
                error: None,
            },
            Err(e) => Self {
                index,
                result: None,
                error: Some(ItemError::from(&e)),
            },
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_some()
    }
}

/// Result of a batch request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    /// Items received in the request
    pub submitted: usize,
    /// Items actually processed (at most the batch cap)
    pub processed: usize,
    pub results: Vec<BatchItem>,
}

impl BatchReport {
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|item| !item.is_ok()).count()
    }
}

/// Runs the single-transaction pipeline over a bounded list
#[derive(Clone)]
pub struct BatchCoordinator {
    controller: Arc<DetectionController>,
}

impl BatchCoordinator {
    pub fn new(controller: Arc<DetectionController>) -> Self {
        Self { controller }
    }

    /// Process at most `max_batch_size` items, in parallel up to
    /// `batch_concurrency`, under one settings/registry snapshot.
    ///
    /// Items arrive as raw JSON and are decoded one by one, so a malformed
    /// or failing item becomes an error marker; it never aborts the batch.
    pub async fn run(&self, inputs: Vec<serde_json::Value>) -> BatchReport {
        let start = Instant::now();
        let config = self.controller.config();
        let submitted = inputs.len();

        let context = Arc::new(self.controller.context().await);
        let permits = Arc::new(Semaphore::new(config.batch_concurrency.max(1)));

        let handles: Vec<_> = inputs
            .into_iter()
            .take(config.max_batch_size)
            .map(|input| {
                let controller = Arc::clone(&self.controller);
                let context = Arc::clone(&context);
                let permits = Arc::clone(&permits);
                tokio::spawn(async move {
                    let _permit = permits.acquire_owned().await.ok();
                    match Transaction::from_json(input) {
                        Ok(transaction) => controller.detect_with(transaction, &context).await,
                        Err(e) => Err(e),
                    }
                })
            })
            .collect();

        let processed = handles.len();
        let mut results = Vec::with_capacity(processed);
        for (index, handle) in handles.into_iter().enumerate() {
            let outcome = handle
                .await
                .unwrap_or_else(|e| Err(DetectionError::Internal(e.to_string())));
            let item = BatchItem::from_outcome(index, outcome);
            self.controller.metrics().inc_batch_items(item.is_ok());
            results.push(item);
        }

        let report = BatchReport {
            submitted,
            processed,
            results,
        };
        self.controller.logger().log_batch(
            submitted,
            processed,
            report.failed(),
            start.elapsed().as_millis() as u64,
        );
        report
    }
}

//! Detection pipeline
//!
//! This module provides:
//! - `DetectionController`: fan-out to trained nodes, aggregation, arbitration
//! - `BatchCoordinator`: the same pipeline over a bounded list with per-item isolation

mod batch;
mod controller;

#[cfg(test)]
mod tests;

pub use batch::{BatchCoordinator, BatchItem, BatchReport, ItemError};
pub use controller::{
    DetectionContext, DetectionController, PipelineConfig, DEFAULT_BATCH_CONCURRENCY,
    DEFAULT_PREDICTION_TIMEOUT, MAX_BATCH_SIZE,
};

//! Aggregator library for federated fraud detection
//!
//! This crate provides the core functionality for:
//! - Tracking prediction nodes and their reported training metrics
//! - Fanning a transaction out to trained nodes over HTTP
//! - Weighted aggregation and rule-based arbitration of node scores
//! - Bounded batch detection
//! - Health checks and observability

pub mod consensus;
pub mod error;
pub mod gateway;
pub mod health;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod registry;
pub mod settings;

pub use consensus::{AggregationEngine, AmbiguousBand, ArbitrationGate, WeightingPolicy};
pub use error::{DetectionError, GatewayError};
pub use gateway::{PredictionService, RuleEvaluator};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AggregatorMetrics, StructuredLogger};
pub use pipeline::{BatchCoordinator, BatchReport, DetectionController, PipelineConfig};
pub use registry::{NodeRegistry, RegistrySnapshot};
pub use settings::{DetectionSettings, SettingsStore, SettingsUpdate};

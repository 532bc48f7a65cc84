//! Health tracking for the aggregator's outbound collaborators
//!
//! The prediction gateway and the rule evaluator degrade when a call fails
//! and recover on the next success. Neither ever makes the process unhealthy
//! on its own since the pipeline absorbs their failures; readiness instead
//! requires at least one trained node.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health of one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across components
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|h| h.status)
            .fold(ComponentStatus::Healthy, |worst, status| match (worst, status) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            })
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub trained_nodes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const PREDICTION_GATEWAY: &str = "prediction_gateway";
    pub const RULE_EVALUATOR: &str = "rule_evaluator";
}

/// Health registry shared between the pipeline and the API
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    initialized: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(BTreeMap::new())),
            initialized: Arc::new(RwLock::new(false)),
        }
    }

    /// Registry with the aggregator's standard components registered
    pub async fn with_default_components() -> Self {
        let registry = Self::new();
        registry.register(components::PREDICTION_GATEWAY).await;
        registry.register(components::RULE_EVALUATOR).await;
        registry
    }

    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components
            .write()
            .await
            .insert(name.to_string(), health);
    }

    /// Record the outcome of a call to a component.
    ///
    /// Repeated successes do not rewrite the entry, keeping the timestamp of
    /// the last state change.
    pub async fn record_outcome(&self, name: &str, failure: Option<String>) {
        let mut components = self.components.write().await;
        match failure {
            Some(message) => {
                components.insert(name.to_string(), ComponentHealth::degraded(message));
            }
            None => {
                let already_healthy = components
                    .get(name)
                    .map(|h| h.status == ComponentStatus::Healthy)
                    .unwrap_or(false);
                if !already_healthy {
                    components.insert(name.to_string(), ComponentHealth::healthy());
                }
            }
        }
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_initialized(&self, initialized: bool) {
        *self.initialized.write().await = initialized;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready once initialized, with no unhealthy component and some trained node
    pub async fn readiness(&self, trained_nodes: usize) -> ReadinessResponse {
        let initialized = *self.initialized.read().await;
        let health = self.health().await;

        let reason = if !initialized {
            Some("Aggregator not yet initialized".to_string())
        } else if health.status == ComponentStatus::Unhealthy {
            Some("Critical component unhealthy".to_string())
        } else if trained_nodes == 0 {
            Some("No trained nodes registered".to_string())
        } else {
            None
        };

        ReadinessResponse {
            ready: reason.is_none(),
            trained_nodes,
            reason,
        }
    }
}

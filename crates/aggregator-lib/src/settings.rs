//! Runtime detection settings
//!
//! Settings are seeded from configuration at startup and may be changed
//! through the API. They live in memory only. Every detection copies the
//! current settings once, so a batch is processed under one consistent view.

use crate::consensus::{AmbiguousBand, WeightingPolicy, DEFAULT_MISSING_METRICS_WEIGHT};
use crate::error::DetectionError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Policy knobs consumed by the detection pipeline
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionSettings {
    pub ambiguous_band: AmbiguousBand,
    pub weighting_policy: WeightingPolicy,
    pub arbitration_enabled: bool,
    /// Weight of nodes without metrics under the performance policy
    pub missing_metrics_weight: f64,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            ambiguous_band: AmbiguousBand::default(),
            weighting_policy: WeightingPolicy::Performance,
            arbitration_enabled: true,
            missing_metrics_weight: DEFAULT_MISSING_METRICS_WEIGHT,
        }
    }
}

impl DetectionSettings {
    pub fn validate(&self) -> Result<(), DetectionError> {
        self.ambiguous_band.validate()?;
        if !self.missing_metrics_weight.is_finite() || self.missing_metrics_weight < 0.0 {
            return Err(DetectionError::Validation(format!(
                "missing metrics weight must be a non-negative number, got {}",
                self.missing_metrics_weight
            )));
        }
        Ok(())
    }
}

/// Partial update; absent fields keep their current value
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsUpdate {
    pub ambiguous_band: Option<AmbiguousBand>,
    pub weighting_policy: Option<WeightingPolicy>,
    pub arbitration_enabled: Option<bool>,
    pub missing_metrics_weight: Option<f64>,
}

impl SettingsUpdate {
    pub fn is_empty(&self) -> bool {
        self.ambiguous_band.is_none()
            && self.weighting_policy.is_none()
            && self.arbitration_enabled.is_none()
            && self.missing_metrics_weight.is_none()
    }
}

/// Shared, lock-guarded settings
#[derive(Debug, Clone)]
pub struct SettingsStore {
    inner: Arc<RwLock<DetectionSettings>>,
}

impl Default for SettingsStore {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(DetectionSettings::default())),
        }
    }
}

impl SettingsStore {
    pub fn new(initial: DetectionSettings) -> Result<Self, DetectionError> {
        initial.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(initial)),
        })
    }

    pub async fn current(&self) -> DetectionSettings {
        *self.inner.read().await
    }

    /// Apply a partial update atomically; nothing changes if the result is invalid
    pub async fn apply(&self, update: SettingsUpdate) -> Result<DetectionSettings, DetectionError> {
        let mut current = self.inner.write().await;
        let mut next = *current;

        if let Some(band) = update.ambiguous_band {
            next.ambiguous_band = band;
        }
        if let Some(policy) = update.weighting_policy {
            next.weighting_policy = policy;
        }
        if let Some(enabled) = update.arbitration_enabled {
            next.arbitration_enabled = enabled;
        }
        if let Some(weight) = update.missing_metrics_weight {
            next.missing_metrics_weight = weight;
        }

        next.validate()?;
        *current = next;
        Ok(next)
    }
}

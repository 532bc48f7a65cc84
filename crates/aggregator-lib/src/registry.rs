//! In-memory directory of prediction nodes
//!
//! The registry is the only owner of node state. Handlers hold a cheap clone
//! of the handle; writes go through a single `RwLock` so metric ingestion from
//! several nodes never races with in-flight detections reading weights.

use crate::error::DetectionError;
use crate::models::{ModelStatus, NodeMetrics, NodeRecord, SyncStatus};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Shared node registry
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    nodes: Arc<RwLock<Vec<NodeRecord>>>,
}

impl NodeRegistry {
    /// Create a registry with one default record per configured node id.
    ///
    /// Registration order is preserved and determines the order of
    /// predictions in every result.
    pub fn new<I, S>(node_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut nodes: Vec<NodeRecord> = Vec::new();
        for id in node_ids {
            let id = id.into();
            if nodes.iter().any(|n| n.node_id == id) {
                warn!(node_id = %id, "Duplicate node id in configuration, ignoring");
                continue;
            }
            nodes.push(NodeRecord::new(id));
        }

        Self {
            nodes: Arc::new(RwLock::new(nodes)),
        }
    }

    /// All node records in registration order
    pub async fn list(&self) -> Vec<NodeRecord> {
        self.nodes.read().await.clone()
    }

    /// A single node record
    pub async fn get(&self, node_id: &str) -> Result<NodeRecord, DetectionError> {
        self.nodes
            .read()
            .await
            .iter()
            .find(|n| n.node_id == node_id)
            .cloned()
            .ok_or_else(|| DetectionError::UnknownNode(node_id.to_string()))
    }

    /// Store metrics reported by a node after training.
    ///
    /// Marks the node trained and synced and stamps the sync time.
    pub async fn record_metrics(
        &self,
        node_id: &str,
        metrics: NodeMetrics,
    ) -> Result<NodeRecord, DetectionError> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .iter_mut()
            .find(|n| n.node_id == node_id)
            .ok_or_else(|| DetectionError::UnknownNode(node_id.to_string()))?;

        metrics.validate()?;

        node.metrics = Some(metrics);
        node.model_status = ModelStatus::Trained;
        node.sync_status = SyncStatus::Synced;
        node.last_sync_time = Some(chrono::Utc::now());

        debug!(node_id = %node_id, "Node metrics recorded");
        Ok(node.clone())
    }

    /// Update status fields reported from outside (training started, sync failed, ...).
    ///
    /// Metrics are left untouched.
    pub async fn set_status(
        &self,
        node_id: &str,
        model_status: Option<ModelStatus>,
        sync_status: Option<SyncStatus>,
    ) -> Result<NodeRecord, DetectionError> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .iter_mut()
            .find(|n| n.node_id == node_id)
            .ok_or_else(|| DetectionError::UnknownNode(node_id.to_string()))?;

        if let Some(status) = model_status {
            node.model_status = status;
        }
        if let Some(status) = sync_status {
            node.sync_status = status;
        }

        Ok(node.clone())
    }

    /// Immutable copy of the registry for one detection or batch
    pub async fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            nodes: self.list().await,
        }
    }

    /// Number of nodes currently in `trained` status
    pub async fn trained_count(&self) -> usize {
        self.nodes
            .read()
            .await
            .iter()
            .filter(|n| n.is_trained())
            .count()
    }

    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }
}

/// Point-in-time view of the registry shared read-only by a pipeline run
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    nodes: Vec<NodeRecord>,
}

impl RegistrySnapshot {
    pub fn from_records(nodes: Vec<NodeRecord>) -> Self {
        Self { nodes }
    }

    /// Trained nodes in registration order
    pub fn trained_nodes(&self) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.iter().filter(|n| n.is_trained())
    }

    /// Metrics recorded for a node, if any
    pub fn metrics_for(&self, node_id: &str) -> Option<&NodeMetrics> {
        self.nodes
            .iter()
            .find(|n| n.node_id == node_id)
            .and_then(|n| n.metrics.as_ref())
    }

    pub fn nodes(&self) -> &[NodeRecord] {
        &self.nodes
    }
}

//! HTTP API for node management, detection, settings, health and metrics

use crate::error::{ApiError, ApiResult};
use aggregator_lib::{
    health::{ComponentStatus, HealthRegistry},
    models::{
        AggregatedResult, ArbitrationResult, ModelStatus, NodeMetrics, NodeRecord, SyncStatus,
        Transaction, TransactionInput,
    },
    observability::{AggregatorMetrics, StructuredLogger},
    pipeline::{BatchCoordinator, BatchReport, DetectionController},
    registry::NodeRegistry,
    settings::{DetectionSettings, SettingsStore, SettingsUpdate},
    DetectionError,
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{error, info};

/// Score sent to the evaluator when `/arbitrate` omits one
const DEFAULT_ARBITRATION_SCORE: f64 = 0.5;

/// Shared application state
pub struct AppState {
    pub registry: NodeRegistry,
    pub settings: SettingsStore,
    pub controller: Arc<DetectionController>,
    pub batch: BatchCoordinator,
    pub health_registry: HealthRegistry,
    pub metrics: AggregatorMetrics,
    pub logger: StructuredLogger,
}

impl AppState {
    /// The controller must share `registry`, `settings` and `health_registry`
    pub fn new(
        registry: NodeRegistry,
        settings: SettingsStore,
        controller: Arc<DetectionController>,
        health_registry: HealthRegistry,
    ) -> Self {
        Self {
            registry,
            settings,
            batch: BatchCoordinator::new(Arc::clone(&controller)),
            metrics: controller.metrics().clone(),
            logger: controller.logger().clone(),
            controller,
            health_registry,
        }
    }

    async fn refresh_trained_gauge(&self) {
        let trained = self.registry.trained_count().await;
        self.metrics.set_trained_nodes(trained as i64);
    }
}

#[derive(Debug, Deserialize)]
struct MetricsRequest {
    metrics: Option<NodeMetrics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusRequest {
    model_status: Option<ModelStatus>,
    sync_status: Option<SyncStatus>,
}

#[derive(Debug, Deserialize)]
struct DetectRequest {
    transaction: Option<TransactionInput>,
}

/// Items stay untyped here so one malformed item cannot reject the batch
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BatchRequest {
    List(Vec<serde_json::Value>),
    Wrapped { transactions: Vec<serde_json::Value> },
}

impl BatchRequest {
    fn into_inputs(self) -> Vec<serde_json::Value> {
        match self {
            BatchRequest::List(inputs) => inputs,
            BatchRequest::Wrapped { transactions } => transactions,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ArbitrateRequest {
    transaction: Option<TransactionInput>,
    score: Option<f64>,
}

fn missing(field: &str) -> ApiError {
    ApiError::Detection(DetectionError::Validation(format!(
        "request body must contain '{}'",
        field
    )))
}

async fn list_nodes(State(state): State<Arc<AppState>>) -> Json<Vec<NodeRecord>> {
    Json(state.registry.list().await)
}

async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
) -> ApiResult<Json<NodeRecord>> {
    Ok(Json(state.registry.get(&node_id).await?))
}

async fn record_metrics(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    payload: Result<Json<MetricsRequest>, JsonRejection>,
) -> ApiResult<Json<NodeRecord>> {
    // Unknown nodes are reported before body problems
    state.registry.get(&node_id).await?;

    let Json(request) = payload?;
    let metrics = request.metrics.ok_or_else(|| missing("metrics"))?;

    let record = state.registry.record_metrics(&node_id, metrics).await?;
    if let Some(metrics) = &record.metrics {
        state
            .logger
            .log_metrics_recorded(&node_id, metrics.f1_score, metrics.data_volume);
    }
    state.refresh_trained_gauge().await;

    Ok(Json(record))
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    Path(node_id): Path<String>,
    payload: Result<Json<StatusRequest>, JsonRejection>,
) -> ApiResult<Json<NodeRecord>> {
    state.registry.get(&node_id).await?;

    let Json(request) = payload?;
    if request.model_status.is_none() && request.sync_status.is_none() {
        return Err(missing("modelStatus or syncStatus"));
    }

    let record = state
        .registry
        .set_status(&node_id, request.model_status, request.sync_status)
        .await?;
    state.logger.log_status_changed(
        &node_id,
        record.model_status.as_str(),
        record.sync_status.as_str(),
    );
    state.refresh_trained_gauge().await;

    Ok(Json(record))
}

async fn detect(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<DetectRequest>, JsonRejection>,
) -> ApiResult<Json<AggregatedResult>> {
    let Json(request) = payload?;
    let input = request.transaction.ok_or_else(|| missing("transaction"))?;

    Ok(Json(state.controller.detect(input).await?))
}

async fn detect_batch(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> ApiResult<Json<BatchReport>> {
    let Json(request) = payload?;
    Ok(Json(state.batch.run(request.into_inputs()).await))
}

async fn arbitrate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ArbitrateRequest>, JsonRejection>,
) -> ApiResult<Json<ArbitrationResult>> {
    let Json(request) = payload?;
    let input = request.transaction.ok_or_else(|| missing("transaction"))?;
    let transaction = Transaction::try_from(input)?;
    let score = request.score.unwrap_or(DEFAULT_ARBITRATION_SCORE);

    Ok(Json(state.controller.arbitrate(&transaction, score).await?))
}

async fn get_settings(State(state): State<Arc<AppState>>) -> Json<DetectionSettings> {
    Json(state.settings.current().await)
}

async fn update_settings(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SettingsUpdate>, JsonRejection>,
) -> ApiResult<Json<DetectionSettings>> {
    let Json(update) = payload?;
    if update.is_empty() {
        return Err(missing("at least one setting"));
    }

    let settings = state.settings.apply(update).await?;
    state.logger.log_settings_updated(
        &settings.weighting_policy.to_string(),
        settings.ambiguous_band.low,
        settings.ambiguous_band.high,
        settings.arbitration_enabled,
    );

    Ok(Json(settings))
}

/// Health check response - returns 200 unless a component is unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let trained = state.registry.trained_count().await;
    let readiness = state.health_registry.readiness(trained).await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/nodes", get(list_nodes))
        .route("/nodes/:id", get(get_node))
        .route("/nodes/:id/metrics", post(record_metrics))
        .route("/nodes/:id/status", post(update_status))
        .route("/detect", post(detect))
        .route("/detect-batch", post(detect_batch))
        .route("/arbitrate", post(arbitrate))
        .route("/settings", get(get_settings).put(update_settings))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server, returning once `shutdown` resolves
pub async fn serve<F>(port: u16, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}

//! Fraud Aggregator - federated fraud prediction aggregator
//!
//! This binary serves the detection API, fanning transactions out to the
//! prediction nodes and consulting the rule evaluator on ambiguous scores.

use aggregator_lib::{
    gateway::GatewayClientBuilder,
    health::HealthRegistry,
    observability::{AggregatorMetrics, StructuredLogger},
    pipeline::DetectionController,
    registry::NodeRegistry,
    settings::SettingsStore,
};
use anyhow::Result;
use fraud_aggregator::{api, config::AggregatorConfig};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const AGGREGATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting fraud-aggregator");

    let config = AggregatorConfig::load()?;
    info!(
        api_port = config.api_port,
        nodes = ?config.node_ids,
        prediction_endpoint = %config.prediction_endpoint,
        rule_evaluator_endpoint = %config.rule_evaluator_endpoint,
        "Aggregator configured"
    );

    let registry = NodeRegistry::new(config.node_ids.iter().cloned());
    let settings = SettingsStore::new(config.detection_settings()?)?;

    let (predictions, evaluator) = GatewayClientBuilder::new()
        .config(config.gateway_config())
        .build()?;

    let health_registry = HealthRegistry::with_default_components().await;
    let metrics = AggregatorMetrics::new();
    metrics.set_trained_nodes(0);

    let logger = StructuredLogger::new(format!("fraud-aggregator:{}", config.api_port));
    logger.log_startup(AGGREGATOR_VERSION, registry.len().await);

    let controller = Arc::new(
        DetectionController::new(
            registry.clone(),
            settings.clone(),
            Arc::new(predictions),
            Arc::new(evaluator),
        )
        .with_config(config.pipeline_config())
        .with_health(health_registry.clone())
        .with_logger(logger.clone()),
    );

    let app_state = Arc::new(api::AppState::new(
        registry,
        settings,
        controller,
        health_registry.clone(),
    ));

    health_registry.set_initialized(true).await;

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let mut api_handle = tokio::spawn(api::serve(config.api_port, app_state, async move {
        shutdown_rx.await.ok();
    }));

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            logger.log_shutdown("SIGINT received");
            health_registry.set_initialized(false).await;
            shutdown_tx.send(()).ok();
            match api_handle.await {
                Ok(Err(e)) => error!(error = %e, "API server error during shutdown"),
                Err(e) => error!(error = %e, "API server task failed"),
                Ok(Ok(())) => {}
            }
        }
        result = &mut api_handle => {
            logger.log_shutdown("API server stopped");
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(e.into()),
            }
        }
    }

    info!("Shutting down");
    Ok(())
}

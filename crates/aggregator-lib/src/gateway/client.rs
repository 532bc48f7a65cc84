//! HTTP clients for prediction nodes and the rule evaluator

use super::{PredictionService, RuleEvaluator};
use crate::error::GatewayError;
use crate::models::{ArbitrationResult, PredictionResult, Transaction, Verdict};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Upper bound on any single outbound request at the transport level
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Endpoints and timeouts for the outbound clients
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Prediction service used by every node without an override
    pub prediction_endpoint: String,
    /// Per-node prediction service overrides
    pub node_endpoints: HashMap<String, String>,
    /// Rule evaluator base URL
    pub rule_evaluator_endpoint: String,
    /// Path of the rule evaluator route, relative to its base URL
    pub rule_evaluator_path: String,
    /// Transport-level request timeout
    pub request_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            prediction_endpoint: "http://localhost:5000".to_string(),
            node_endpoints: HashMap::new(),
            rule_evaluator_endpoint: "http://localhost:5000".to_string(),
            rule_evaluator_path: "ers".to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Parse a base URL so that relative joins append rather than replace
fn parse_base(raw: &str) -> Result<Url> {
    let mut url = Url::parse(raw).with_context(|| format!("Invalid endpoint URL: {}", raw))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

async fn post_json<B, T>(
    client: &Client,
    timeout: Duration,
    url: Url,
    body: &B,
) -> Result<T, GatewayError>
where
    B: Serialize + ?Sized,
    T: for<'de> Deserialize<'de>,
{
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| GatewayError::from_reqwest(e, timeout))?;

    if !response.status().is_success() {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        return Err(GatewayError::Status { status, body });
    }

    response
        .json::<T>()
        .await
        .map_err(|e| GatewayError::from_reqwest(e, timeout))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PredictRequest<'a> {
    node_id: &'a str,
    /// The prediction service looks models up by `client_id`
    #[serde(rename = "client_id")]
    client_id: &'a str,
    transaction: &'a Transaction,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictResponse {
    confidence_score: f64,
    prediction: Verdict,
}

/// Prediction service client, one base URL per node
pub struct HttpPredictionClient {
    client: Client,
    timeout: Duration,
    default_endpoint: Url,
    node_endpoints: HashMap<String, Url>,
}

impl HttpPredictionClient {
    pub fn new(client: Client, config: &GatewayConfig) -> Result<Self> {
        let default_endpoint = parse_base(&config.prediction_endpoint)?;
        let node_endpoints = config
            .node_endpoints
            .iter()
            .map(|(id, raw)| Ok((id.clone(), parse_base(raw)?)))
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self {
            client,
            timeout: config.request_timeout,
            default_endpoint,
            node_endpoints,
        })
    }

    /// Base URL serving `node_id`
    pub fn endpoint_for(&self, node_id: &str) -> &Url {
        self.node_endpoints
            .get(node_id)
            .unwrap_or(&self.default_endpoint)
    }
}

#[async_trait]
impl PredictionService for HttpPredictionClient {
    async fn predict(
        &self,
        node_id: &str,
        transaction: &Transaction,
    ) -> Result<PredictionResult, GatewayError> {
        let url = self
            .endpoint_for(node_id)
            .join("predict")
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let request = PredictRequest {
            node_id,
            client_id: node_id,
            transaction,
        };
        let response: PredictResponse = post_json(&self.client, self.timeout, url, &request).await?;

        let score = response.confidence_score;
        if !score.is_finite() || !(0.0..=1.0).contains(&score) {
            return Err(GatewayError::MalformedResponse(format!(
                "confidenceScore {} outside [0, 1]",
                score
            )));
        }

        debug!(node_id = %node_id, score = score, "Node prediction received");
        Ok(PredictionResult {
            node_id: node_id.to_string(),
            confidence_score: score,
            label: response.prediction,
        })
    }
}

#[derive(Serialize)]
struct ArbitrateRequest<'a> {
    transaction: &'a Transaction,
    score: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArbitrateResponse {
    triggered: bool,
    #[serde(default)]
    matched_rules: BTreeSet<String>,
    decision: Verdict,
}

/// Rule evaluator client
pub struct HttpRuleEvaluator {
    client: Client,
    timeout: Duration,
    url: Url,
}

impl HttpRuleEvaluator {
    pub fn new(client: Client, config: &GatewayConfig) -> Result<Self> {
        let url = parse_base(&config.rule_evaluator_endpoint)?
            .join(config.rule_evaluator_path.trim_start_matches('/'))
            .context("Invalid rule evaluator path")?;
        Ok(Self {
            client,
            timeout: config.request_timeout,
            url,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl RuleEvaluator for HttpRuleEvaluator {
    async fn evaluate(
        &self,
        transaction: &Transaction,
        score: f64,
    ) -> Result<ArbitrationResult, GatewayError> {
        let request = ArbitrateRequest { transaction, score };
        let response: ArbitrateResponse =
            post_json(&self.client, self.timeout, self.url.clone(), &request).await?;

        Ok(ArbitrationResult {
            triggered: response.triggered,
            matched_rules: response.matched_rules,
            decision: response.decision,
        })
    }
}

/// Builder producing both HTTP clients over one connection pool
pub struct GatewayClientBuilder {
    config: GatewayConfig,
}

impl GatewayClientBuilder {
    pub fn new() -> Self {
        Self {
            config: GatewayConfig::default(),
        }
    }

    pub fn prediction_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.prediction_endpoint = endpoint.into();
        self
    }

    pub fn node_endpoint(mut self, node_id: impl Into<String>, endpoint: impl Into<String>) -> Self {
        self.config
            .node_endpoints
            .insert(node_id.into(), endpoint.into());
        self
    }

    pub fn rule_evaluator_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.rule_evaluator_endpoint = endpoint.into();
        self
    }

    pub fn rule_evaluator_path(mut self, path: impl Into<String>) -> Self {
        self.config.rule_evaluator_path = path.into();
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<(HttpPredictionClient, HttpRuleEvaluator)> {
        let client = Client::builder()
            .timeout(self.config.request_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let predictions = HttpPredictionClient::new(client.clone(), &self.config)?;
        let evaluator = HttpRuleEvaluator::new(client, &self.config)?;
        Ok((predictions, evaluator))
    }
}

impl Default for GatewayClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

//! Aggregator configuration
//!
//! Values come from an optional TOML file, then `AGGREGATOR_*` environment
//! variables. Nested keys use a double underscore, so
//! `AGGREGATOR_NODE_ENDPOINTS__2=http://node-2:5000` overrides node 2 only.
//! The `config` crate lowercases keys, so override keys are matched against
//! node ids without regard to ASCII case.

use aggregator_lib::{
    consensus::AmbiguousBand,
    gateway::GatewayConfig,
    pipeline::PipelineConfig,
    settings::DetectionSettings,
    WeightingPolicy,
};
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "AGGREGATOR_CONFIG";

pub const DEFAULT_CONFIG_FILE: &str = "aggregator.toml";

const ENV_PREFIX: &str = "AGGREGATOR";

/// Aggregator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    /// Port of the detection API
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Prediction node ids, in registration order
    #[serde(default = "default_node_ids", deserialize_with = "node_id_list")]
    pub node_ids: Vec<String>,

    /// Prediction service shared by all nodes
    #[serde(default = "default_endpoint")]
    pub prediction_endpoint: String,

    /// Per-node prediction service overrides
    #[serde(default)]
    pub node_endpoints: HashMap<String, String>,

    #[serde(default = "default_endpoint")]
    pub rule_evaluator_endpoint: String,

    #[serde(default = "default_rule_evaluator_path")]
    pub rule_evaluator_path: String,

    #[serde(default = "default_timeout_ms")]
    pub prediction_timeout_ms: u64,

    #[serde(default = "default_timeout_ms")]
    pub arbitration_timeout_ms: u64,

    #[serde(default = "default_ambiguous_low")]
    pub ambiguous_low: f64,

    #[serde(default = "default_ambiguous_high")]
    pub ambiguous_high: f64,

    #[serde(default)]
    pub weighting_policy: WeightingPolicy,

    #[serde(default = "default_true")]
    pub arbitration_enabled: bool,

    /// Weight of a trained node that never reported metrics
    #[serde(default = "default_missing_metrics_weight")]
    pub missing_metrics_weight: f64,

    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

fn default_api_port() -> u16 {
    4000
}

fn default_node_ids() -> Vec<String> {
    vec!["1".to_string(), "2".to_string(), "3".to_string()]
}

fn default_endpoint() -> String {
    "http://localhost:5000".to_string()
}

fn default_rule_evaluator_path() -> String {
    "/ers".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_ambiguous_low() -> f64 {
    aggregator_lib::consensus::DEFAULT_AMBIGUOUS_LOW
}

fn default_ambiguous_high() -> f64 {
    aggregator_lib::consensus::DEFAULT_AMBIGUOUS_HIGH
}

fn default_true() -> bool {
    true
}

fn default_missing_metrics_weight() -> f64 {
    aggregator_lib::consensus::DEFAULT_MISSING_METRICS_WEIGHT
}

fn default_max_batch_size() -> usize {
    aggregator_lib::pipeline::MAX_BATCH_SIZE
}

fn default_batch_concurrency() -> usize {
    aggregator_lib::pipeline::DEFAULT_BATCH_CONCURRENCY
}

/// Node ids as a TOML array or a comma-separated string
fn node_id_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Csv(String),
        List(Vec<String>),
    }

    let ids = match Raw::deserialize(deserializer)? {
        Raw::Csv(csv) => csv.split(',').map(str::to_string).collect::<Vec<_>>(),
        Raw::List(list) => list,
    };
    Ok(ids
        .into_iter()
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty())
        .collect())
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            node_ids: default_node_ids(),
            prediction_endpoint: default_endpoint(),
            node_endpoints: HashMap::new(),
            rule_evaluator_endpoint: default_endpoint(),
            rule_evaluator_path: default_rule_evaluator_path(),
            prediction_timeout_ms: default_timeout_ms(),
            arbitration_timeout_ms: default_timeout_ms(),
            ambiguous_low: default_ambiguous_low(),
            ambiguous_high: default_ambiguous_high(),
            weighting_policy: WeightingPolicy::default(),
            arbitration_enabled: default_true(),
            missing_metrics_weight: default_missing_metrics_weight(),
            max_batch_size: default_max_batch_size(),
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

impl AggregatorConfig {
    /// Load configuration from the config file and environment
    pub fn load() -> Result<Self> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_with(&path, Self::environment())
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
    }

    /// Build from an explicit file path and environment source
    pub(crate) fn load_with(path: &str, environment: config::Environment) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(environment)
            .build()
            .context("Failed to read configuration")?;

        let mut config: Self = config
            .try_deserialize()
            .context("Invalid configuration")?;
        config.resolve_endpoint_keys()?;
        config.validate()?;
        Ok(config)
    }

    /// Re-key endpoint overrides onto the configured node ids
    fn resolve_endpoint_keys(&mut self) -> Result<()> {
        let mut resolved = HashMap::with_capacity(self.node_endpoints.len());
        for (key, endpoint) in self.node_endpoints.drain() {
            if self.node_ids.contains(&key) {
                resolved.insert(key, endpoint);
                continue;
            }

            let matches: Vec<&String> = self
                .node_ids
                .iter()
                .filter(|id| id.eq_ignore_ascii_case(&key))
                .collect();
            match matches.as_slice() {
                [id] => {
                    resolved.insert((*id).clone(), endpoint);
                }
                [] => {
                    resolved.insert(key, endpoint);
                }
                _ => bail!(
                    "Endpoint override '{}' matches several node ids that differ only in case",
                    key
                ),
            }
        }
        self.node_endpoints = resolved;
        Ok(())
    }

    /// Reject configurations the aggregator cannot start with
    pub fn validate(&self) -> Result<()> {
        if self.node_ids.is_empty() {
            bail!("At least one node id must be configured");
        }
        for id in self.node_endpoints.keys() {
            if !self.node_ids.contains(id) {
                bail!("Endpoint override for unknown node '{}'", id);
            }
        }
        if self.prediction_timeout_ms == 0 || self.arbitration_timeout_ms == 0 {
            bail!("Timeouts must be greater than zero");
        }
        if self.max_batch_size == 0 {
            bail!("max_batch_size must be greater than zero");
        }
        if self.batch_concurrency == 0 {
            bail!("batch_concurrency must be greater than zero");
        }
        self.detection_settings()?;
        Ok(())
    }

    pub fn prediction_timeout(&self) -> Duration {
        Duration::from_millis(self.prediction_timeout_ms)
    }

    pub fn arbitration_timeout(&self) -> Duration {
        Duration::from_millis(self.arbitration_timeout_ms)
    }

    /// Endpoints for the outbound HTTP clients.
    ///
    /// The transport timeout covers the longer of the two pipeline bounds.
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            prediction_endpoint: self.prediction_endpoint.clone(),
            node_endpoints: self.node_endpoints.clone(),
            rule_evaluator_endpoint: self.rule_evaluator_endpoint.clone(),
            rule_evaluator_path: self.rule_evaluator_path.trim_start_matches('/').to_string(),
            request_timeout: self.prediction_timeout().max(self.arbitration_timeout()),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            prediction_timeout: self.prediction_timeout(),
            arbitration_timeout: self.arbitration_timeout(),
            max_batch_size: self.max_batch_size,
            batch_concurrency: self.batch_concurrency,
        }
    }

    /// Initial runtime settings
    pub fn detection_settings(&self) -> Result<DetectionSettings> {
        let settings = DetectionSettings {
            ambiguous_band: AmbiguousBand {
                low: self.ambiguous_low,
                high: self.ambiguous_high,
            },
            weighting_policy: self.weighting_policy,
            arbitration_enabled: self.arbitration_enabled,
            missing_metrics_weight: self.missing_metrics_weight,
        };
        settings.validate()?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(vars: &[(&str, &str)]) -> config::Environment {
        let source = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<config::Map<String, String>>();
        AggregatorConfig::environment().source(Some(source))
    }

    fn temp_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_without_file_or_env() {
        let config = AggregatorConfig::load_with("does-not-exist.toml", env(&[])).unwrap();

        assert_eq!(config.api_port, 4000);
        assert_eq!(config.node_ids, vec!["1", "2", "3"]);
        assert_eq!(config.weighting_policy, WeightingPolicy::Performance);
        assert_eq!(config.max_batch_size, 10);
        assert_eq!(config.missing_metrics_weight, 0.5);
        assert!(config.arbitration_enabled);
    }

    #[test]
    fn test_environment_overrides() {
        let config = AggregatorConfig::load_with(
            "does-not-exist.toml",
            env(&[
                ("AGGREGATOR_API_PORT", "4100"),
                ("AGGREGATOR_NODE_IDS", "alpha, beta"),
                ("AGGREGATOR_WEIGHTING_POLICY", "equal"),
                ("AGGREGATOR_AMBIGUOUS_LOW", "0.4"),
                ("AGGREGATOR_ARBITRATION_ENABLED", "false"),
                ("AGGREGATOR_NODE_ENDPOINTS__BETA", "http://beta:5000"),
            ]),
        )
        .unwrap();

        assert_eq!(config.api_port, 4100);
        assert_eq!(config.node_ids, vec!["alpha", "beta"]);
        assert_eq!(config.weighting_policy, WeightingPolicy::Equal);
        assert_eq!(config.ambiguous_low, 0.4);
        assert!(!config.arbitration_enabled);
        assert_eq!(config.node_endpoints["beta"], "http://beta:5000");
    }

    #[test]
    fn test_file_then_environment() {
        let file = temp_config(
            r#"
api_port = 4200
node_ids = ["a", "b", "c", "d"]
ambiguous_high = 0.8
"#,
        );

        let path = file.path().to_string_lossy().into_owned();
        let config =
            AggregatorConfig::load_with(&path, env(&[("AGGREGATOR_API_PORT", "4300")])).unwrap();

        assert_eq!(config.api_port, 4300);
        assert_eq!(config.node_ids.len(), 4);
        assert_eq!(config.ambiguous_high, 0.8);
    }

    #[test]
    fn test_rejects_inverted_band() {
        let result = AggregatorConfig::load_with(
            "does-not-exist.toml",
            env(&[
                ("AGGREGATOR_AMBIGUOUS_LOW", "0.8"),
                ("AGGREGATOR_AMBIGUOUS_HIGH", "0.2"),
            ]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_empty_node_list() {
        let config = AggregatorConfig {
            node_ids: Vec::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_override_for_unknown_node() {
        let mut config = AggregatorConfig::default();
        config
            .node_endpoints
            .insert("9".to_string(), "http://node-9:5000".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_override_for_mixed_case_node() {
        let config = AggregatorConfig::load_with(
            "does-not-exist.toml",
            env(&[
                ("AGGREGATOR_NODE_IDS", "BankA,BankB"),
                ("AGGREGATOR_NODE_ENDPOINTS__BANKB", "http://bank-b:5000"),
            ]),
        )
        .unwrap();

        assert_eq!(config.node_ids, vec!["BankA", "BankB"]);
        assert_eq!(config.node_endpoints["BankB"], "http://bank-b:5000");
        assert_eq!(config.node_endpoints.len(), 1);
    }

    #[test]
    fn test_endpoint_override_ambiguous_case() {
        let mut config = AggregatorConfig {
            node_ids: vec!["a".to_string(), "A".to_string()],
            ..Default::default()
        };
        config
            .node_endpoints
            .insert("A".to_string(), "http://upper:5000".to_string());
        config.resolve_endpoint_keys().unwrap();
        assert_eq!(config.node_endpoints["A"], "http://upper:5000");

        let mut config = AggregatorConfig {
            node_ids: vec!["Node".to_string(), "NODE".to_string()],
            ..Default::default()
        };
        config
            .node_endpoints
            .insert("node".to_string(), "http://node:5000".to_string());
        assert!(config.resolve_endpoint_keys().is_err());
    }

    #[test]
    fn test_derived_configs() {
        let config = AggregatorConfig {
            prediction_timeout_ms: 2000,
            arbitration_timeout_ms: 3000,
            ..Default::default()
        };

        let gateway = config.gateway_config();
        assert_eq!(gateway.rule_evaluator_path, "ers");
        assert_eq!(gateway.request_timeout, Duration::from_secs(3));

        let pipeline = config.pipeline_config();
        assert_eq!(pipeline.prediction_timeout, Duration::from_secs(2));
        assert_eq!(pipeline.batch_concurrency, 4);

        let settings = config.detection_settings().unwrap();
        assert_eq!(settings.ambiguous_band.low, 0.45);
    }
}

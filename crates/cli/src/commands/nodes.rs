//! Node registry commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, MetricsRequest, NodeMetrics, NodeRecord, StatusRequest};
use crate::output::{
    color_status, format_ratio, format_score, print_info, print_json, print_success, print_table,
    print_warning, OutputFormat,
};

/// Row for the nodes table
#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Node")]
    node_id: String,
    #[tabled(rename = "Model")]
    model_status: String,
    #[tabled(rename = "Sync")]
    sync_status: String,
    #[tabled(rename = "F1")]
    f1_score: String,
    #[tabled(rename = "Accuracy")]
    accuracy: String,
    #[tabled(rename = "Samples")]
    data_volume: String,
    #[tabled(rename = "Last Sync")]
    last_sync: String,
}

impl From<&NodeRecord> for NodeRow {
    fn from(node: &NodeRecord) -> Self {
        let metric = |f: fn(&NodeMetrics) -> String| {
            node.metrics.as_ref().map(f).unwrap_or_else(|| "-".to_string())
        };

        Self {
            node_id: node.node_id.clone(),
            model_status: color_status(&node.model_status),
            sync_status: color_status(&node.sync_status),
            f1_score: metric(|m| format_score(m.f1_score)),
            accuracy: metric(|m| format_ratio(m.accuracy)),
            data_volume: metric(|m| m.data_volume.to_string()),
            last_sync: node
                .last_sync_time
                .as_deref()
                .map(format_timestamp)
                .unwrap_or_else(|| "never".to_string()),
        }
    }
}

/// Short form of an RFC 3339 timestamp
fn format_timestamp(raw: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// List all nodes
pub async fn list_nodes(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let nodes: Vec<NodeRecord> = client.get("nodes").await?;

    match format {
        OutputFormat::Json => print_json(&nodes)?,
        OutputFormat::Table => {
            if nodes.is_empty() {
                print_warning("No nodes registered");
                return Ok(());
            }
            let trained = nodes.iter().filter(|n| n.model_status == "trained").count();
            print_table(nodes.iter().map(NodeRow::from).collect());
            println!("\n{} of {} nodes trained", trained, nodes.len());
        }
    }

    Ok(())
}

/// Show one node with its full metrics
pub async fn show_node(client: &ApiClient, node_id: &str, format: OutputFormat) -> Result<()> {
    let node: NodeRecord = client.get(&format!("nodes/{}", node_id)).await?;

    match format {
        OutputFormat::Json => print_json(&node)?,
        OutputFormat::Table => {
            print_table(vec![NodeRow::from(&node)]);
            match &node.metrics {
                Some(m) => {
                    println!();
                    println!("Precision:   {}", format_ratio(m.precision));
                    println!("Recall:      {}", format_ratio(m.recall));
                    println!("AUC:         {}", format_score(m.auc));
                    println!("Fraud ratio: {}", format_ratio(m.fraud_ratio));
                }
                None => print_info("No metrics reported yet"),
            }
        }
    }

    Ok(())
}

/// Report training metrics on behalf of a node
pub async fn record_metrics(
    client: &ApiClient,
    node_id: &str,
    metrics: NodeMetrics,
    format: OutputFormat,
) -> Result<()> {
    let node: NodeRecord = client
        .post(&format!("nodes/{}/metrics", node_id), &MetricsRequest { metrics })
        .await?;

    match format {
        OutputFormat::Json => print_json(&node)?,
        OutputFormat::Table => {
            print_success(&format!("Metrics recorded for node {}", node.node_id));
            print_table(vec![NodeRow::from(&node)]);
        }
    }

    Ok(())
}

/// Update a node's model and/or sync status
pub async fn update_status(
    client: &ApiClient,
    node_id: &str,
    model_status: Option<String>,
    sync_status: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    if model_status.is_none() && sync_status.is_none() {
        anyhow::bail!("Specify --model and/or --sync");
    }

    let request = StatusRequest {
        model_status,
        sync_status,
    };
    let node: NodeRecord = client
        .post(&format!("nodes/{}/status", node_id), &request)
        .await?;

    match format {
        OutputFormat::Json => print_json(&node)?,
        OutputFormat::Table => {
            print_success(&format!(
                "Node {} is now {} / {}",
                node.node_id,
                color_status(&node.model_status),
                color_status(&node.sync_status)
            ));
        }
    }

    Ok(())
}

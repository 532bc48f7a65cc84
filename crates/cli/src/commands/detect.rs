//! Detection commands

use anyhow::{Context, Result};
use std::path::Path;
use tabled::Tabled;

use crate::client::{
    ApiClient, BatchReport, DetectRequest, DetectionResult, DetectionSettings, TransactionPayload,
};
use crate::output::{
    color_score, color_verdict, format_score, print_info, print_json, print_table, print_warning,
    OutputFormat,
};

/// Row for per-node predictions
#[derive(Tabled)]
struct PredictionRow {
    #[tabled(rename = "Node")]
    node_id: String,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Label")]
    label: String,
}

/// Row for batch results
#[derive(Tabled)]
struct BatchRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Score")]
    score: String,
    #[tabled(rename = "Decision")]
    decision: String,
    #[tabled(rename = "Arbitrated")]
    arbitrated: String,
    #[tabled(rename = "Error")]
    error: String,
}

/// Read a JSON file holding one transaction or a list of them
fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Score a single transaction
pub async fn detect(
    client: &ApiClient,
    transaction: TransactionPayload,
    format: OutputFormat,
) -> Result<()> {
    let result: DetectionResult = client.post("detect", &DetectRequest { transaction }).await?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Table => {
            let settings: Option<DetectionSettings> = client.get("settings").await.ok();
            print_detection(&result, settings.as_ref());
        }
    }

    Ok(())
}

/// Load a transaction from a JSON file
pub fn load_transaction(path: &Path) -> Result<TransactionPayload> {
    read_json(path)
}

fn print_detection(result: &DetectionResult, settings: Option<&DetectionSettings>) {
    print_table(
        result
            .predictions
            .iter()
            .map(|p| PredictionRow {
                node_id: p.node_id.clone(),
                score: format_score(p.confidence_score),
                label: color_verdict(&p.label),
            })
            .collect(),
    );

    let score = match settings {
        Some(s) => color_score(
            result.aggregated_score,
            s.ambiguous_band.low,
            s.ambiguous_band.high,
        ),
        None => format_score(result.aggregated_score),
    };
    println!();
    println!("Aggregated score: {}", score);

    if let Some(arbitration) = &result.arbitration {
        let rules = if arbitration.matched_rules.is_empty() {
            "none".to_string()
        } else {
            arbitration.matched_rules.join(", ")
        };
        print_info(&format!(
            "Arbitrated by rule evaluator ({}), matched rules: {}",
            color_verdict(&arbitration.decision),
            rules
        ));
    }

    for notice in &result.notices {
        match &notice.node_id {
            Some(node_id) => print_warning(&format!("Node {} skipped: {}", node_id, notice.reason)),
            None => print_warning(&format!("{}: {}", notice.kind, notice.reason)),
        }
    }

    println!("Decision: {}", color_verdict(&result.final_decision));
}

/// Score every transaction in a JSON array file
pub async fn detect_batch(client: &ApiClient, path: &Path, format: OutputFormat) -> Result<()> {
    let transactions: Vec<serde_json::Value> = read_json(path)?;
    let report: BatchReport = client.post("detect-batch", &transactions).await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            if report.results.is_empty() {
                print_warning("No transactions in batch");
                return Ok(());
            }

            let rows: Vec<BatchRow> = report
                .results
                .iter()
                .map(|item| match (&item.result, &item.error) {
                    (Some(result), _) => BatchRow {
                        index: item.index,
                        score: format_score(result.aggregated_score),
                        decision: color_verdict(&result.final_decision),
                        arbitrated: if result.arbitration.is_some() { "yes" } else { "no" }
                            .to_string(),
                        error: String::new(),
                    },
                    (None, error) => BatchRow {
                        index: item.index,
                        score: "-".to_string(),
                        decision: "-".to_string(),
                        arbitrated: "-".to_string(),
                        error: error
                            .as_ref()
                            .map(|e| e.code.clone())
                            .unwrap_or_default(),
                    },
                })
                .collect();
            print_table(rows);

            let failed = report.results.iter().filter(|i| i.error.is_some()).count();
            println!(
                "\nProcessed {} of {} transactions, {} failed",
                report.processed, report.submitted, failed
            );
            if report.processed < report.submitted {
                print_warning(&format!(
                    "{} transactions beyond the batch limit were ignored",
                    report.submitted - report.processed
                ));
            }
        }
    }

    Ok(())
}

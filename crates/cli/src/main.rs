//! Federated Fraud Aggregator CLI
//!
//! A command-line tool for inspecting prediction nodes, scoring
//! transactions and tuning the aggregator's runtime settings.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use client::{NodeMetrics, TransactionPayload};
use commands::{detect, nodes, settings};
use std::path::PathBuf;

/// Federated Fraud Aggregator CLI
#[derive(Parser)]
#[command(name = "fraudctl")]
#[command(author, version, about = "CLI for the Federated Fraud Aggregator", long_about = None)]
pub struct Cli {
    /// Aggregator API URL (can also be set via FRAUDCTL_API_URL env var)
    #[arg(long, env = "FRAUDCTL_API_URL", default_value = "http://localhost:4000")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect and update prediction nodes
    #[command(subcommand)]
    Nodes(NodeCommands),

    /// Score a single transaction
    Detect {
        /// JSON file holding the transaction (overrides the field flags)
        #[arg(long)]
        file: Option<PathBuf>,

        #[command(flatten)]
        transaction: TransactionArgs,
    },

    /// Score every transaction in a JSON array file
    DetectBatch {
        /// JSON file holding an array of transactions
        #[arg(long)]
        file: PathBuf,
    },

    /// View or change runtime detection settings
    #[command(subcommand)]
    Settings(SettingsCommands),
}

#[derive(Subcommand)]
pub enum NodeCommands {
    /// List all nodes
    List,

    /// Show one node
    Show {
        /// Node ID
        id: String,
    },

    /// Report training metrics for a node
    Metrics {
        /// Node ID
        id: String,

        #[arg(long)]
        accuracy: f64,

        #[arg(long)]
        precision: f64,

        #[arg(long)]
        recall: f64,

        #[arg(long)]
        f1: f64,

        #[arg(long)]
        auc: f64,

        /// Number of training samples
        #[arg(long)]
        data_volume: u64,

        /// Fraction of fraudulent samples
        #[arg(long)]
        fraud_ratio: f64,
    },

    /// Update a node's model and/or sync status
    Status {
        /// Node ID
        id: String,

        /// Model status (not_trained, training, trained, error)
        #[arg(long)]
        model: Option<String>,

        /// Sync status (not_synced, pending, synced, error)
        #[arg(long)]
        sync: Option<String>,
    },
}

#[derive(clap::Args)]
pub struct TransactionArgs {
    /// Transaction amount
    #[arg(long, required_unless_present = "file")]
    pub amount: Option<f64>,

    /// Origin balance before the transaction
    #[arg(long, default_value_t = 0.0)]
    pub oldbalance_org: f64,

    /// Origin balance after the transaction
    #[arg(long, default_value_t = 0.0)]
    pub newbalance_orig: f64,

    /// Destination balance before the transaction
    #[arg(long, default_value_t = 0.0)]
    pub oldbalance_dest: f64,

    /// Destination balance after the transaction
    #[arg(long, default_value_t = 0.0)]
    pub newbalance_dest: f64,

    /// Transaction type (PAYMENT, TRANSFER, CASH_OUT, CASH_IN, DEBIT)
    #[arg(long = "type", required_unless_present = "file")]
    pub kind: Option<String>,
}

impl TransactionArgs {
    fn into_payload(self) -> Option<TransactionPayload> {
        Some(TransactionPayload {
            amount: self.amount?,
            old_balance_origin: self.oldbalance_org,
            new_balance_origin: self.newbalance_orig,
            old_balance_dest: self.oldbalance_dest,
            new_balance_dest: self.newbalance_dest,
            kind: self.kind?,
        })
    }
}

#[derive(Subcommand)]
pub enum SettingsCommands {
    /// Show current settings
    Show,

    /// Change one or more settings
    Set {
        /// Lower bound of the ambiguous band
        #[arg(long)]
        low: Option<f64>,

        /// Upper bound of the ambiguous band
        #[arg(long)]
        high: Option<f64>,

        /// Weighting policy (equal, performance)
        #[arg(long)]
        policy: Option<String>,

        /// Enable or disable rule-based arbitration
        #[arg(long)]
        arbitration: Option<bool>,

        /// Weight of trained nodes without metrics
        #[arg(long)]
        missing_metrics_weight: Option<f64>,
    },
}

async fn run(cli: Cli) -> Result<()> {
    let client = client::ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Nodes(node_cmd) => match node_cmd {
            NodeCommands::List => nodes::list_nodes(&client, cli.format).await?,
            NodeCommands::Show { id } => nodes::show_node(&client, &id, cli.format).await?,
            NodeCommands::Metrics {
                id,
                accuracy,
                precision,
                recall,
                f1,
                auc,
                data_volume,
                fraud_ratio,
            } => {
                let metrics = NodeMetrics {
                    accuracy,
                    precision,
                    recall,
                    f1_score: f1,
                    auc,
                    data_volume,
                    fraud_ratio,
                };
                nodes::record_metrics(&client, &id, metrics, cli.format).await?;
            }
            NodeCommands::Status { id, model, sync } => {
                nodes::update_status(&client, &id, model, sync, cli.format).await?;
            }
        },
        Commands::Detect { file, transaction } => {
            let payload = match file {
                Some(path) => detect::load_transaction(&path)?,
                None => transaction
                    .into_payload()
                    .ok_or_else(|| anyhow::anyhow!("--amount and --type are required"))?,
            };
            detect::detect(&client, payload, cli.format).await?;
        }
        Commands::DetectBatch { file } => {
            detect::detect_batch(&client, &file, cli.format).await?;
        }
        Commands::Settings(settings_cmd) => match settings_cmd {
            SettingsCommands::Show => settings::show_settings(&client, cli.format).await?,
            SettingsCommands::Set {
                low,
                high,
                policy,
                arbitration,
                missing_metrics_weight,
            } => {
                let changes = settings::SettingsChanges {
                    low,
                    high,
                    policy,
                    arbitration,
                    missing_metrics_weight,
                };
                settings::set_settings(&client, changes, cli.format).await?;
            }
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

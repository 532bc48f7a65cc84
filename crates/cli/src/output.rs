//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print rows as a rounded table
pub fn print_table<T: Tabled>(rows: Vec<T>) {
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a score in `[0, 1]` with fixed precision
pub fn format_score(score: f64) -> String {
    format!("{:.4}", score)
}

/// Format a ratio as percentage
pub fn format_ratio(ratio: f64) -> String {
    format!("{:.1}%", ratio * 100.0)
}

/// Color node status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "trained" | "synced" | "healthy" => status.green().to_string(),
        "training" | "pending" | "degraded" => status.yellow().to_string(),
        "error" | "unhealthy" => status.red().to_string(),
        _ => status.dimmed().to_string(),
    }
}

/// Color a verdict; fraud stands out
pub fn color_verdict(verdict: &str) -> String {
    match verdict.to_lowercase().as_str() {
        "fraud" => verdict.red().bold().to_string(),
        "legitimate" => verdict.green().to_string(),
        _ => verdict.to_string(),
    }
}

/// Color a fraud score relative to the ambiguous band
pub fn color_score(score: f64, low: f64, high: f64) -> String {
    let formatted = format_score(score);
    if score > high {
        formatted.red().to_string()
    } else if score >= low {
        formatted.yellow().to_string()
    } else {
        formatted.green().to_string()
    }
}

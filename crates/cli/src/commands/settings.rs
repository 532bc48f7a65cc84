//! Runtime settings commands

use anyhow::Result;

use crate::client::{AmbiguousBand, ApiClient, DetectionSettings, SettingsUpdate};
use crate::output::{format_score, print_json, print_success, OutputFormat};

fn print_settings(settings: &DetectionSettings) {
    println!(
        "Ambiguous band:         [{}, {}]",
        format_score(settings.ambiguous_band.low),
        format_score(settings.ambiguous_band.high)
    );
    println!("Weighting policy:       {}", settings.weighting_policy);
    println!("Arbitration enabled:    {}", settings.arbitration_enabled);
    println!("Missing-metrics weight: {}", settings.missing_metrics_weight);
}

/// Show current detection settings
pub async fn show_settings(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let settings: DetectionSettings = client.get("settings").await?;

    match format {
        OutputFormat::Json => print_json(&settings)?,
        OutputFormat::Table => print_settings(&settings),
    }

    Ok(())
}

/// Changes requested on the command line
#[derive(Debug, Default)]
pub struct SettingsChanges {
    pub low: Option<f64>,
    pub high: Option<f64>,
    pub policy: Option<String>,
    pub arbitration: Option<bool>,
    pub missing_metrics_weight: Option<f64>,
}

impl SettingsChanges {
    /// Build the update; a lone band bound is completed from `current`
    fn into_update(self, current: &DetectionSettings) -> SettingsUpdate {
        let ambiguous_band = match (self.low, self.high) {
            (None, None) => None,
            (low, high) => Some(AmbiguousBand {
                low: low.unwrap_or(current.ambiguous_band.low),
                high: high.unwrap_or(current.ambiguous_band.high),
            }),
        };

        SettingsUpdate {
            ambiguous_band,
            weighting_policy: self.policy,
            arbitration_enabled: self.arbitration,
            missing_metrics_weight: self.missing_metrics_weight,
        }
    }
}

/// Apply a partial settings update
pub async fn set_settings(
    client: &ApiClient,
    changes: SettingsChanges,
    format: OutputFormat,
) -> Result<()> {
    let current: DetectionSettings = client.get("settings").await?;
    let update = changes.into_update(&current);

    let settings: DetectionSettings = client.put("settings", &update).await?;

    match format {
        OutputFormat::Json => print_json(&settings)?,
        OutputFormat::Table => {
            print_success("Settings updated");
            print_settings(&settings);
        }
    }

    Ok(())
}

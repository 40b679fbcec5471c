//! Output formatting for the CLI
//!
//! Results can be printed as human-readable text, JSON or YAML.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::crew::CrewOutput;

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Yaml,
    Human,
}

/// Output of a direct tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionOutput {
    pub image_path: String,
    pub report: String,
}

/// Health status for one component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub available: bool,
    pub message: String,
    pub details: Option<String>,
}

impl HealthStatus {
    pub fn available(message: impl Into<String>) -> Self {
        Self {
            available: true,
            message: message.into(),
            details: None,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            available: false,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    pub fn format_crew(&self, output: &CrewOutput) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(output)
                .context("Failed to serialize crew output to JSON"),
            OutputFormat::Yaml => {
                serde_yaml::to_string(output).context("Failed to serialize crew output to YAML")
            }
            OutputFormat::Human => {
                let mut text = String::new();
                for task in &output.tasks_output {
                    text.push_str(&format!("Task: {}\n", task.description));
                    text.push_str(&format!("Agent: {}\n", task.agent));
                }
                text.push_str(RULE);
                text.push_str("\n\nFinal Answer:\n");
                text.push_str(output.raw.trim_end());
                text.push('\n');
                Ok(text)
            }
        }
    }

    pub fn format_detection(&self, output: &DetectionOutput) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(output)
                .context("Failed to serialize detection output to JSON"),
            OutputFormat::Yaml => serde_yaml::to_string(output)
                .context("Failed to serialize detection output to YAML"),
            OutputFormat::Human => Ok(format!("{}\n", output.report)),
        }
    }

    pub fn format_health(&self, results: &BTreeMap<String, HealthStatus>) -> Result<String> {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(results)
                .context("Failed to serialize health status to JSON"),
            OutputFormat::Yaml => {
                serde_yaml::to_string(results).context("Failed to serialize health status to YAML")
            }
            OutputFormat::Human => Ok(self.format_health_human(results)),
        }
    }

    fn format_health_human(&self, results: &BTreeMap<String, HealthStatus>) -> String {
        let mut output = String::new();

        output.push_str("Health Status\n");
        output.push_str(RULE);
        output.push_str("\n\n");

        for (component, status) in results {
            let symbol = if status.available {
                "\u{2713}"
            } else {
                "\u{2717}"
            };

            output.push_str(&format!("{} {}\n", symbol, component));
            output.push_str(&format!(
                "  Status: {}\n",
                if status.available {
                    "Available"
                } else {
                    "Unavailable"
                }
            ));
            output.push_str(&format!("  Message: {}\n", status.message));
            if let Some(ref details) = status.details {
                output.push_str(&format!("  Details: {}\n", details));
            }
            output.push('\n');
        }

        output
    }
}

//! Subcommand handlers
//!
//! Each handler returns the process exit code. Errors are logged and mapped
//! to a non-zero code; results go to stdout.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

use super::commands::{DetectArgs, HealthArgs, RunArgs};
use super::output::{DetectionOutput, HealthStatus, OutputFormatter};
use crate::config::VisionConfig;
use crate::crew::{build_crew, image_inputs, AgentOptions};
use crate::llm::{check_llm_available, select_llm_client};
use crate::tools::{error_line, ObjectDetectionTool, ToolRegistry};
use crate::vision::{cached_weights, resolve_weights, WeightsSource, YoloV8Loader};

pub async fn handle_run(args: &RunArgs) -> i32 {
    match run(args).await {
        Ok(()) => 0,
        Err(e) => {
            error!("Run failed: {:#}", e);
            1
        }
    }
}

async fn run(args: &RunArgs) -> Result<()> {
    let mut config = VisionConfig::from_env();
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(yolo_model) = &args.yolo_model {
        config.yolo_model = yolo_model.clone();
    }
    if let Some(timeout) = args.timeout {
        config.request_timeout_secs = timeout;
    }
    config.validate().context("Invalid configuration")?;

    let selected = select_llm_client(&config)?;
    let options = AgentOptions {
        cache: !args.no_cache,
        ..AgentOptions::default()
    };
    let crew = build_crew(
        &config,
        selected.client,
        ToolRegistry::with_detection(&config),
        options,
    )?;

    let image_path = args.image.display().to_string();
    info!("Analyzing {}", image_path);
    let output = crew.kickoff(&image_inputs(&image_path)).await?;

    let formatter = OutputFormatter::new(args.format.into());
    print!("{}", formatter.format_crew(&output)?);
    Ok(())
}

pub async fn handle_detect(args: &DetectArgs) -> i32 {
    match detect(args).await {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            error!("Detection failed: {:#}", e);
            1
        }
    }
}

/// Returns whether the image was analyzed successfully
async fn detect(args: &DetectArgs) -> Result<bool> {
    let mut config = VisionConfig::from_env();
    if let Some(yolo_model) = &args.yolo_model {
        config.yolo_model = yolo_model.clone();
    }
    config.validate().context("Invalid configuration")?;

    let loader = YoloV8Loader::new(config.confidence_threshold, config.iou_threshold);
    let tool = ObjectDetectionTool::new(Arc::new(loader), config.yolo_model.clone());

    let image_path = args.image.display().to_string();
    let path = image_path.clone();
    let result = tokio::task::spawn_blocking(move || tool.try_run(&path))
        .await
        .context("Detection task panicked")?;

    let (report, succeeded) = match result {
        Ok(report) => (report, true),
        Err(e) => {
            error!("{:#}", e);
            (error_line(&e), false)
        }
    };

    let formatter = OutputFormatter::new(args.format.into());
    print!(
        "{}",
        formatter.format_detection(&DetectionOutput { image_path, report })?
    );
    Ok(succeeded)
}

pub async fn handle_health(args: &HealthArgs) -> i32 {
    let config = VisionConfig::from_env();
    let results = collect_health(&config).await;

    let formatter = OutputFormatter::new(args.format.into());
    match formatter.format_health(&results) {
        Ok(text) => print!("{}", text),
        Err(e) => {
            error!("Failed to format health status: {:#}", e);
            return 1;
        }
    }

    if results.values().all(|s| s.available) {
        0
    } else {
        1
    }
}

pub async fn collect_health(config: &VisionConfig) -> BTreeMap<String, HealthStatus> {
    let mut results = BTreeMap::new();
    results.insert("llm".to_string(), llm_health(config).await);
    results.insert("detector".to_string(), detector_health(&config.yolo_model));
    results
}

async fn llm_health(config: &VisionConfig) -> HealthStatus {
    match check_llm_available(config).await {
        Ok(true) => HealthStatus::available(format!("{} is reachable", config.model))
            .with_details(config.base_url.clone()),
        Ok(false) => HealthStatus::unavailable(format!("{} is not reachable", config.model))
            .with_details(config.base_url.clone()),
        Err(e) => HealthStatus::unavailable(format!("{:#}", e)),
    }
}

fn detector_health(identifier: &str) -> HealthStatus {
    let source = match resolve_weights(identifier) {
        Ok((_, source)) => source,
        Err(e) => return HealthStatus::unavailable(format!("{:#}", e)),
    };

    match (cached_weights(&source), &source) {
        (Some(path), _) => HealthStatus::available(format!("{} weights present", identifier))
            .with_details(path.display().to_string()),
        (None, WeightsSource::Hub { repo, filename }) => {
            HealthStatus::available(format!("{} weights not cached yet", identifier))
                .with_details(format!("{} will be downloaded from {} on first use", filename, repo))
        }
        (None, WeightsSource::Local(path)) => {
            HealthStatus::unavailable(format!("{} not found", path.display()))
        }
    }
}

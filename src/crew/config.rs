//! Agent persona and task text, read from YAML
//!
//! `agents.yaml` maps agent keys to `role`/`goal`/`backstory`; `tasks.yaml`
//! maps task keys to `description`/`expected_output`. When a file is absent
//! the built-in object-analysis defaults are used.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use super::error::CrewError;
use crate::config::ConfigError;

pub const OBJECT_ANALYST: &str = "object_analyst";
pub const DETECT_OBJECTS_TASK: &str = "detect_objects_task";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub role: String,
    pub goal: String,
    pub backstory: String,
}

impl AgentConfig {
    pub fn object_analyst() -> Self {
        Self {
            role: "Object Detection Analyst".to_string(),
            goal: "Identify and count the objects present in images using computer vision"
                .to_string(),
            backstory: "You are an expert in computer vision. You rely on the YOLOv8 object \
                detection model to find out what an image contains, and you report the objects \
                and their counts accurately."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    pub description: String,
    pub expected_output: String,
}

impl TaskConfig {
    pub fn detect_objects() -> Self {
        Self {
            description: "Analyze the image at {image_path} with the Object Detection Tool and \
                report which objects it contains."
                .to_string(),
            expected_output: "A list of the detected objects with the count of each object."
                .to_string(),
        }
    }
}

/// Reads `key` from the YAML map in `path`.
///
/// Returns `Ok(None)` when the file does not exist.
pub fn load_entry<T: DeserializeOwned>(path: &Path, key: &str) -> Result<Option<T>, CrewError> {
    if !path.exists() {
        debug!("{} not found, using built-in defaults", path.display());
        return Ok(None);
    }

    let file_error = |message: String| ConfigError::FileError {
        path: path.display().to_string(),
        message,
    };

    let content = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
    let mut entries: HashMap<String, T> =
        serde_yaml::from_str(&content).map_err(|e| file_error(e.to_string()))?;

    entries
        .remove(key)
        .map(Some)
        .ok_or_else(|| CrewError::MissingConfig {
            key: key.to_string(),
            path: path.display().to_string(),
        })
}

pub fn load_agent_config(path: &Path, key: &str) -> Result<AgentConfig, CrewError> {
    Ok(load_entry(path, key)?.unwrap_or_else(AgentConfig::object_analyst))
}

pub fn load_task_config(path: &Path, key: &str) -> Result<TaskConfig, CrewError> {
    Ok(load_entry(path, key)?.unwrap_or_else(TaskConfig::detect_objects))
}

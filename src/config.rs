//! Configuration management for visiontool
//!
//! Settings are loaded from environment variables with defaults. A `.env` file
//! in the working directory is honoured when the binary calls
//! [`load_dotenv`] before building the configuration.
//!
//! # Environment Variables
//!
//! - `MODEL`: LLM identifier in `provider/model` form - default: "ollama/llama3.2"
//! - `OLLAMA_BASE_URL`: LLM endpoint - default: "http://localhost:11434"
//! - `YOLO_MODEL`: detector identifier - default: "yolov8n.pt"
//! - `VISIONTOOL_CONFIDENCE`: detection confidence threshold - default: "0.25"
//! - `VISIONTOOL_IOU`: non-maximum suppression IoU threshold - default: "0.7"
//! - `VISIONTOOL_REQUEST_TIMEOUT`: LLM timeout in seconds - default: "120"
//! - `VISIONTOOL_CONFIG_DIR`: directory with `agents.yaml` / `tasks.yaml` - default: "config"
//! - `VISIONTOOL_LOG_LEVEL`: logging level - default: "info"
//!
//! # Example
//!
//! ```no_run
//! use visiontool::VisionConfig;
//!
//! visiontool::config::load_dotenv();
//! let config = VisionConfig::default();
//! config.validate().expect("Invalid configuration");
//! println!("{}", config);
//! ```

use genai::adapter::AdapterKind;
use std::env;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;

/// Default values for configuration
pub const DEFAULT_MODEL: &str = "ollama/llama3.2";
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";
pub const DEFAULT_YOLO_MODEL: &str = "yolov8n.pt";
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.7;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_CONFIG_DIR: &str = "config";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Provider prefix of `MODEL` is not recognised
    #[error("Invalid provider: {0}. Valid options: ollama, openai, anthropic, gemini, xai, groq, deepseek, cohere")]
    InvalidProvider(String),

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// Failed to parse configuration value
    #[error("Failed to parse {field}: {error}")]
    ParseError { field: String, error: String },

    /// Failed to read or parse a YAML configuration file
    #[error("Failed to load {path}: {message}")]
    FileError { path: String, message: String },
}

/// Loads a `.env` file from the working directory if one exists.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => debug!("Ignoring unreadable .env file: {}", e),
    }
}

/// Main configuration structure for visiontool
#[derive(Debug, Clone)]
pub struct VisionConfig {
    /// Full LLM identifier as given, e.g. `ollama/llama3.2`
    pub model: String,

    /// Endpoint of the LLM server
    pub base_url: String,

    /// Detector identifier (weights file or `yolov8{n,s,m,l,x}` name)
    pub yolo_model: String,

    /// Minimum class confidence for a detection to be reported
    pub confidence_threshold: f32,

    /// IoU above which overlapping boxes of one class are suppressed
    pub iou_threshold: f32,

    /// LLM request timeout in seconds
    pub request_timeout_secs: u64,

    /// Directory holding `agents.yaml` and `tasks.yaml`
    pub config_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for VisionConfig {
    /// Loads from environment variables, falling back to defaults for
    /// anything missing or unparsable.
    fn default() -> Self {
        let model = env::var("MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let base_url =
            env::var("OLLAMA_BASE_URL").unwrap_or_else(|_| DEFAULT_OLLAMA_BASE_URL.to_string());
        let yolo_model =
            env::var("YOLO_MODEL").unwrap_or_else(|_| DEFAULT_YOLO_MODEL.to_string());

        let confidence_threshold = env::var("VISIONTOOL_CONFIDENCE")
            .ok()
            .and_then(|v| v.parse::<f32>().ok())
            .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD);

        let iou_threshold = env::var("VISIONTOOL_IOU")
            .ok()
            .and_then(|v| v.parse::<f32>().ok())
            .unwrap_or(DEFAULT_IOU_THRESHOLD);

        let request_timeout_secs = env::var("VISIONTOOL_REQUEST_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        let config_dir = env::var("VISIONTOOL_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR));

        let log_level = env::var("VISIONTOOL_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        Self {
            model,
            base_url,
            yolo_model,
            confidence_threshold,
            iou_threshold,
            request_timeout_secs,
            config_dir,
            log_level,
        }
    }
}

impl VisionConfig {
    /// Same as [`Default::default`], spelled out for call sites that read
    /// the environment on purpose.
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Splits `MODEL` into provider and model name.
    ///
    /// `ollama/llama3.2` becomes `(Ollama, "llama3.2")`. An identifier without
    /// a `/` is treated as an Ollama model name.
    pub fn llm_target(&self) -> Result<(AdapterKind, String), ConfigError> {
        match self.model.split_once('/') {
            Some((provider, name)) => {
                let kind = AdapterKind::from_lower_str(&provider.to_lowercase())
                    .ok_or_else(|| ConfigError::InvalidProvider(provider.to_string()))?;
                if name.is_empty() {
                    return Err(ConfigError::ParseError {
                        field: "MODEL".to_string(),
                        error: format!("missing model name after '{}/'", provider),
                    });
                }
                Ok((kind, name.to_string()))
            }
            None => Ok((AdapterKind::Ollama, self.model.clone())),
        }
    }

    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the LLM identifier cannot be parsed or a
    /// numeric value is out of range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.llm_target()?;

        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(ConfigError::ValidationFailed(format!(
                "Confidence threshold must be within [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(ConfigError::ValidationFailed(format!(
                "IoU threshold must be within [0, 1], got {}",
                self.iou_threshold
            )));
        }

        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "Request timeout must be at least 1 second".to_string(),
            ));
        }

        if self.yolo_model.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "YOLO_MODEL must not be empty".to_string(),
            ));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    pub fn agents_file(&self) -> PathBuf {
        self.config_dir.join("agents.yaml")
    }

    pub fn tasks_file(&self) -> PathBuf {
        self.config_dir.join("tasks.yaml")
    }
}

impl fmt::Display for VisionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "visiontool Configuration:")?;
        writeln!(f, "  Model: {}", self.model)?;
        writeln!(f, "  Base URL: {}", self.base_url)?;
        writeln!(f, "  Detector: {}", self.yolo_model)?;
        writeln!(f, "  Confidence Threshold: {}", self.confidence_threshold)?;
        writeln!(f, "  IoU Threshold: {}", self.iou_threshold)?;
        writeln!(f, "  Request Timeout: {}s", self.request_timeout_secs)?;
        writeln!(f, "  Config Dir: {}", self.config_dir.display())?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}

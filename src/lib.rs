//! visiontool - object detection agent driven by a language model
//!
//! A single agent asks a language model (Ollama by default) to call an
//! object-detection tool on an image and summarize what it found.
//!
//! # Core Concepts
//!
//! - **Detection tool**: wraps a YOLOv8 detector, loaded once on first use,
//!   and renders class counts as text. Failures become an
//!   `Error analyzing image: ...` line instead of an error.
//! - **Agent**: persona plus tools plus an LLM client, with a bounded
//!   tool-calling loop.
//! - **Crew**: tasks run sequentially by their agents.
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use visiontool::crew::{build_crew, image_inputs, AgentOptions};
//! use visiontool::llm::select_llm_client;
//! use visiontool::tools::ToolRegistry;
//! use visiontool::VisionConfig;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = VisionConfig::from_env();
//! let llm = select_llm_client(&config)?.client;
//! let crew = build_crew(
//!     &config,
//!     llm,
//!     ToolRegistry::with_detection(&config),
//!     AgentOptions::default(),
//! )?;
//! let output = crew.kickoff(&image_inputs("street.jpg")).await?;
//! println!("{}", output);
//! # Ok(())
//! # }
//! ```
//!
//! # Project Structure
//!
//! - [`vision`]: YOLOv8 detector on candle
//! - [`tools`]: tool trait, registry, cache and the detection tool
//! - [`llm`]: LLM client trait with Ollama, genai and mock implementations
//! - [`crew`]: agent, task and crew composition
//! - [`config`]: environment configuration

pub mod cli;
pub mod config;
pub mod crew;
pub mod llm;
pub mod tools;
pub mod util;
pub mod vision;

pub use config::{ConfigError, VisionConfig};
pub use crew::{Agent, Crew, CrewError, CrewOutput, Process, Task};
pub use llm::{BackendError, LLMClient};
pub use tools::{ObjectDetectionTool, Tool};
pub use util::{init_from_env, init_logging, LoggingConfig};
pub use vision::{Detector, DetectorLoader};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

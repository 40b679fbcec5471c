use crate::config::ConfigError;
use crate::llm::BackendError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrewError {
    #[error("LLM request failed: {0}")]
    Llm(#[from] BackendError),

    #[error("Crew has no tasks")]
    NoTasks,

    #[error("Missing '{key}' in {path}")]
    MissingConfig { key: String, path: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

//! Agent, task and crew composition
//!
//! [`build_crew`] assembles the object-analysis crew: one agent holding the
//! detection tool and one task, run sequentially.

pub mod agent;
pub mod config;
#[allow(clippy::module_inception)]
pub mod crew;
pub mod error;
pub mod task;

pub use agent::{Agent, AgentOptions, DEFAULT_MAX_ITER};
pub use config::{AgentConfig, TaskConfig, DETECT_OBJECTS_TASK, OBJECT_ANALYST};
pub use crew::{Crew, CrewOutput, Process};
pub use error::CrewError;
pub use task::{interpolate, Task, TaskOutput};

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::config::VisionConfig;
use crate::llm::LLMClient;
use crate::tools::ToolRegistry;

/// Builds the object-analysis crew from the YAML files in the config dir
pub fn build_crew(
    config: &VisionConfig,
    llm: Arc<dyn LLMClient>,
    tools: ToolRegistry,
    options: AgentOptions,
) -> Result<Crew, CrewError> {
    let agent_config = config::load_agent_config(&config.agents_file(), OBJECT_ANALYST)?;
    let task_config = config::load_task_config(&config.tasks_file(), DETECT_OBJECTS_TASK)?;
    debug!(role = %agent_config.role.trim(), "Loaded agent configuration");

    let agent = Arc::new(Agent::with_options(agent_config, llm, tools, options));
    let task = Task::new(task_config, agent);
    Crew::new(vec![task], Process::Sequential)
}

/// Kickoff inputs for analyzing one image
pub fn image_inputs(image_path: &str) -> HashMap<String, String> {
    HashMap::from([("image_path".to_string(), image_path.to_string())])
}

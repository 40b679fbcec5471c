use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use super::agent::Agent;
use super::config::TaskConfig;
use super::error::CrewError;

/// A unit of work assigned to an agent
pub struct Task {
    description: String,
    expected_output: String,
    agent: Arc<Agent>,
}

/// Result of one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub description: String,
    pub expected_output: String,
    pub agent: String,
    pub raw: String,
}

impl Task {
    pub fn new(config: TaskConfig, agent: Arc<Agent>) -> Self {
        Self {
            description: config.description.trim().to_string(),
            expected_output: config.expected_output.trim().to_string(),
            agent,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Builds the user prompt handed to the agent
    pub fn prompt(
        &self,
        inputs: &HashMap<String, String>,
        context: Option<&str>,
    ) -> (String, String, String) {
        let description = interpolate(&self.description, inputs);
        let expected_output = interpolate(&self.expected_output, inputs);

        let mut prompt = format!(
            "Current Task: {}\n\nThis is the expected criteria for your final answer: {}\n\
             you MUST return the actual complete content as the final answer, not a summary.",
            description, expected_output
        );
        if let Some(context) = context.filter(|c| !c.trim().is_empty()) {
            prompt.push_str("\n\nThis is the context you're working with:\n");
            prompt.push_str(context);
        }
        prompt.push_str(
            "\n\nBegin! This is VERY important to you, use the tools available and give your \
             best Final Answer, your job depends on it!",
        );

        (prompt, description, expected_output)
    }

    pub async fn execute(
        &self,
        inputs: &HashMap<String, String>,
        context: Option<&str>,
    ) -> Result<TaskOutput, CrewError> {
        let (prompt, description, expected_output) = self.prompt(inputs, context);
        info!(agent = self.agent.role(), "Executing task: {}", description);

        let raw = self.agent.execute(&prompt).await?;

        Ok(TaskOutput {
            description,
            expected_output,
            agent: self.agent.role().to_string(),
            raw,
        })
    }
}

fn is_placeholder_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Replaces `{name}` with `inputs["name"]`. Unknown placeholders stay as written.
pub fn interpolate(template: &str, inputs: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };

        let key = &after[..end];
        match inputs.get(key) {
            Some(value) if is_placeholder_name(key) => {
                out.push_str(value);
                rest = &after[end + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::info;

use super::error::CrewError;
use super::task::{Task, TaskOutput};

/// How tasks are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Process {
    /// One after another; each task sees the previous task's output as context
    #[default]
    Sequential,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewOutput {
    /// Final answer of the last task
    pub raw: String,
    pub tasks_output: Vec<TaskOutput>,
}

impl fmt::Display for CrewOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

pub struct Crew {
    tasks: Vec<Task>,
    process: Process,
}

impl Crew {
    pub fn new(tasks: Vec<Task>, process: Process) -> Result<Self, CrewError> {
        if tasks.is_empty() {
            return Err(CrewError::NoTasks);
        }
        Ok(Self { tasks, process })
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn process(&self) -> Process {
        self.process
    }

    pub async fn kickoff(&self, inputs: &HashMap<String, String>) -> Result<CrewOutput, CrewError> {
        info!(
            "Crew kickoff: {} task(s), {:?} process",
            self.tasks.len(),
            self.process
        );

        let mut outputs: Vec<TaskOutput> = Vec::with_capacity(self.tasks.len());
        match self.process {
            Process::Sequential => {
                for task in &self.tasks {
                    let context = outputs.last().map(|o| o.raw.as_str());
                    let output = task.execute(inputs, context).await?;
                    outputs.push(output);
                }
            }
        }

        let raw = outputs.last().map(|o| o.raw.clone()).unwrap_or_default();
        info!("Crew finished");
        Ok(CrewOutput {
            raw,
            tasks_output: outputs,
        })
    }
}

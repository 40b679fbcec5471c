//! Tool registry
//!
//! Holds the tools an agent may call and describes them to the LLM.

use std::sync::Arc;

use super::object_detection::ObjectDetectionTool;
use super::trait_def::Tool;
use crate::config::VisionConfig;
use crate::llm::ToolDefinition;
use crate::vision::YoloV8Loader;

/// Registry of the tools available to one agent
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self { tools }
    }

    /// Registry with the YOLOv8 detection tool configured from `config`.
    /// The model itself is loaded on the tool's first invocation.
    pub fn with_detection(config: &VisionConfig) -> Self {
        let loader = YoloV8Loader::new(config.confidence_threshold, config.iou_threshold);
        let tool: Arc<dyn Tool> = Arc::new(ObjectDetectionTool::new(
            Arc::new(loader),
            config.yolo_model.clone(),
        ));
        Self::new(vec![tool])
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    /// Get all tools as ToolDefinition for LLMClient trait
    pub fn as_tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|tool| ToolDefinition {
                name: tool.function_name(),
                description: tool.description().to_string(),
                parameters: tool.schema(),
            })
            .collect()
    }

    /// Looks a tool up by its display name or its function name
    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .iter()
            .find(|t| t.name() == name || t.function_name() == name)
            .cloned()
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

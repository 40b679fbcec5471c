//! Tool-calling agent
//!
//! The agent sends the conversation to the LLM together with its tool
//! definitions. A reply without tool calls is the final answer. Tool calls
//! are executed in order and their results appended for the next turn. After
//! `max_iter` turns the model is asked for a final answer without tools.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::config::AgentConfig;
use super::error::CrewError;
use crate::llm::{ChatMessage, LLMClient, LLMRequest, ToolCall};
use crate::tools::{ToolRegistry, ToolSystem};

pub const DEFAULT_MAX_ITER: usize = 3;

const FORCE_FINAL_ANSWER: &str = "Now it's time you MUST give your absolute best final answer. \
You'll ignore all previous instructions, stop using any tools, and just return your absolute BEST Final answer.";

#[derive(Debug, Clone, Copy)]
pub struct AgentOptions {
    /// LLM turns allowed before a final answer is forced
    pub max_iter: usize,
    /// Reuse results of identical tool calls
    pub cache: bool,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            max_iter: DEFAULT_MAX_ITER,
            cache: true,
        }
    }
}

pub struct Agent {
    role: String,
    goal: String,
    backstory: String,
    llm: Arc<dyn LLMClient>,
    tools: ToolSystem,
    max_iter: usize,
}

impl Agent {
    pub fn new(config: AgentConfig, llm: Arc<dyn LLMClient>, tools: ToolRegistry) -> Self {
        Self::with_options(config, llm, tools, AgentOptions::default())
    }

    pub fn with_options(
        config: AgentConfig,
        llm: Arc<dyn LLMClient>,
        tools: ToolRegistry,
        options: AgentOptions,
    ) -> Self {
        Self {
            role: config.role.trim().to_string(),
            goal: config.goal.trim().to_string(),
            backstory: config.backstory.trim().to_string(),
            llm,
            tools: ToolSystem::with_cache(tools, options.cache),
            max_iter: options.max_iter.max(1),
        }
    }

    pub fn role(&self) -> &str {
        &self.role
    }

    pub fn max_iter(&self) -> usize {
        self.max_iter
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.tool_names()
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are {}. {}\nYour personal goal is: {}",
            self.role, self.backstory, self.goal
        )
    }

    /// Runs the tool-calling loop for one task prompt and returns the final answer
    pub async fn execute(&self, task_prompt: &str) -> Result<String, CrewError> {
        info!(agent = %self.role, llm = self.llm.name(), "Agent started task");
        let start = Instant::now();

        let mut messages = vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(task_prompt),
        ];
        let tools = self.tools.as_tool_definitions();

        for iteration in 1..=self.max_iter {
            debug!("Iteration {}/{}", iteration, self.max_iter);

            let request = LLMRequest::new(messages.clone()).with_tools(tools.clone());
            let response = self.llm.chat(request).await?;

            debug!(
                "LLM responded with {} tool calls in {:?}",
                response.tool_calls.len(),
                response.response_time
            );

            if !response.has_tool_calls() {
                info!(
                    agent = %self.role,
                    iterations = iteration,
                    elapsed = ?start.elapsed(),
                    "Agent finished task"
                );
                return Ok(response.content);
            }

            messages.push(ChatMessage::assistant_with_tools(
                &response.content,
                response.tool_calls.clone(),
            ));

            for call in &response.tool_calls {
                let output = self.run_tool(call).await;
                messages.push(ChatMessage::tool_response(call, output));
            }
        }

        warn!(
            agent = %self.role,
            "Reached max iterations ({}) without a final answer, forcing one",
            self.max_iter
        );
        messages.push(ChatMessage::user(FORCE_FINAL_ANSWER));
        let response = self.llm.chat(LLMRequest::new(messages)).await?;
        Ok(response.content)
    }

    /// Executes one tool call. Failures are returned as text so the model can
    /// correct itself.
    async fn run_tool(&self, call: &ToolCall) -> String {
        debug!("Executing tool: {} with call_id: {}", call.name, call.call_id);

        match self.tools.execute(&call.name, call.arguments.clone()).await {
            Ok(Value::String(text)) => text,
            Ok(other) => other.to_string(),
            Err(e) => {
                warn!("Tool execution failed, returning error to LLM: {}", e);
                json!({ "error": e.to_string() }).to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{BackendError, MessageRole, MockLLMClient, MockResponse};
    use crate::tools::Tool;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct StubDetectionTool {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Tool for StubDetectionTool {
        fn name(&self) -> &'static str {
            "Object Detection Tool"
        }

        fn description(&self) -> &'static str {
            "Detects objects"
        }

        fn schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "image_path": { "type": "string" } },
                "required": ["image_path"]
            })
        }

        async fn execute(&self, arguments: Value) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let path = arguments["image_path"]
                .as_str()
                .ok_or_else(|| anyhow::anyhow!("image_path is required"))?;
            Ok(json!(format!("Detected objects:\n- cat: 1 ({})", path)))
        }
    }

    fn agent_with(
        llm: Arc<MockLLMClient>,
        options: AgentOptions,
    ) -> (Agent, Arc<StubDetectionTool>) {
        let tool = Arc::new(StubDetectionTool::default());
        let dyn_tool: Arc<dyn Tool> = tool.clone();
        let agent = Agent::with_options(
            AgentConfig::object_analyst(),
            llm,
            ToolRegistry::new(vec![dyn_tool]),
            options,
        );
        (agent, tool)
    }

    #[tokio::test]
    async fn test_direct_final_answer() {
        let llm = Arc::new(MockLLMClient::new());
        llm.add_response(MockResponse::text("Nothing to do"));
        let (agent, tool) = agent_with(llm.clone(), AgentOptions::default());

        let answer = agent.execute("Describe the image").await.unwrap();

        assert_eq!(answer, "Nothing to do");
        assert_eq!(tool.calls.load(Ordering::SeqCst), 0);

        let requests = llm.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages[0].role, MessageRole::System);
        assert!(requests[0].messages[0].content.contains("Object Detection Analyst"));
        assert_eq!(requests[0].tools.len(), 1);
    }

    #[tokio::test]
    async fn test_tool_call_then_answer() {
        let llm = Arc::new(MockLLMClient::new());
        llm.add_responses(vec![
            MockResponse::with_tool_calls(
                "",
                vec![MockLLMClient::detect_objects_call("call_0", "cat.jpg")],
            ),
            MockResponse::text("There is one cat."),
        ]);
        let (agent, tool) = agent_with(llm.clone(), AgentOptions::default());

        let answer = agent.execute("Analyze cat.jpg").await.unwrap();

        assert_eq!(answer, "There is one cat.");
        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);

        let second = &llm.requests()[1];
        let tool_msg = second.messages.last().unwrap();
        assert_eq!(tool_msg.role, MessageRole::Tool);
        assert_eq!(tool_msg.tool_call_id.as_deref(), Some("call_0"));
        assert_eq!(tool_msg.content, "Detected objects:\n- cat: 1 (cat.jpg)");
    }

    #[tokio::test]
    async fn test_forces_final_answer_after_max_iter() {
        let llm = Arc::new(MockLLMClient::new());
        for i in 0..3 {
            llm.add_response(MockResponse::with_tool_calls(
                "",
                vec![MockLLMClient::detect_objects_call(format!("call_{i}"), format!("{i}.jpg"))],
            ));
        }
        llm.add_response(MockResponse::text("Best guess: cats"));
        let (agent, tool) = agent_with(llm.clone(), AgentOptions::default());

        let answer = agent.execute("Analyze").await.unwrap();

        assert_eq!(answer, "Best guess: cats");
        assert_eq!(tool.calls.load(Ordering::SeqCst), 3);

        let requests = llm.requests();
        assert_eq!(requests.len(), 4);
        let last = &requests[3];
        assert!(last.tools.is_empty());
        assert!(last.messages.last().unwrap().content.contains("final answer"));
    }

    #[tokio::test]
    async fn test_unknown_tool_reported_to_model() {
        let llm = Arc::new(MockLLMClient::new());
        llm.add_responses(vec![
            MockResponse::with_tool_calls(
                "",
                vec![ToolCall {
                    call_id: "call_0".to_string(),
                    name: "Segmentation Tool".to_string(),
                    arguments: json!({}),
                }],
            ),
            MockResponse::text("Sorry"),
        ]);
        let (agent, _) = agent_with(llm.clone(), AgentOptions::default());

        agent.execute("Analyze").await.unwrap();

        let tool_msg = llm.requests()[1].messages.last().unwrap().clone();
        assert!(tool_msg.content.contains("Unknown tool: Segmentation Tool"));
    }

    #[tokio::test]
    async fn test_bad_arguments_reported_to_model() {
        let llm = Arc::new(MockLLMClient::new());
        llm.add_responses(vec![
            MockResponse::with_tool_calls(
                "",
                vec![ToolCall {
                    call_id: "call_0".to_string(),
                    name: "Object Detection Tool".to_string(),
                    arguments: json!({ "path": "cat.jpg" }),
                }],
            ),
            MockResponse::text("Retry later"),
        ]);
        let (agent, _) = agent_with(llm.clone(), AgentOptions::default());

        assert_eq!(agent.execute("Analyze").await.unwrap(), "Retry later");

        let tool_msg = llm.requests()[1].messages.last().unwrap().clone();
        assert!(tool_msg.content.contains("error"));
    }

    #[tokio::test]
    async fn test_cache_skips_repeated_call() {
        let llm = Arc::new(MockLLMClient::new());
        llm.add_responses(vec![
            MockResponse::with_tool_calls(
                "",
                vec![MockLLMClient::detect_objects_call("call_0", "cat.jpg")],
            ),
            MockResponse::with_tool_calls(
                "",
                vec![MockLLMClient::detect_objects_call("call_1", "cat.jpg")],
            ),
            MockResponse::text("One cat"),
        ]);
        let (agent, tool) = agent_with(llm, AgentOptions::default());

        agent.execute("Analyze").await.unwrap();

        assert_eq!(tool.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_disabled_reruns_tool() {
        let llm = Arc::new(MockLLMClient::new());
        llm.add_responses(vec![
            MockResponse::with_tool_calls(
                "",
                vec![
                    MockLLMClient::detect_objects_call("call_0", "cat.jpg"),
                    MockLLMClient::detect_objects_call("call_1", "cat.jpg"),
                ],
            ),
            MockResponse::text("One cat"),
        ]);
        let options = AgentOptions {
            cache: false,
            ..AgentOptions::default()
        };
        let (agent, tool) = agent_with(llm, options);

        agent.execute("Analyze").await.unwrap();

        assert_eq!(tool.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_llm_error_propagates() {
        let llm = Arc::new(MockLLMClient::new());
        llm.add_response(MockResponse::error(BackendError::TimeoutError { seconds: 5 }));
        let (agent, _) = agent_with(llm, AgentOptions::default());

        let err = agent.execute("Analyze").await.unwrap_err();
        assert!(matches!(err, CrewError::Llm(BackendError::TimeoutError { seconds: 5 })));
    }
}

//! Native Ollama chat client
//!
//! Talks to the `/api/chat` endpoint of an Ollama server with tool calling
//! enabled. Ollama does not assign identifiers to tool calls, so calls are
//! numbered across the conversation (`call_0`, `call_1`, ...), continuing
//! after the calls already present in the request history.

use super::client::LLMClient;
use super::error::BackendError;
use super::types::{ChatMessage, LLMRequest, LLMResponse, MessageRole, ToolCall, ToolDefinition};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Ollama client for local LLM inference
pub struct OllamaClient {
    /// Server base URL, without trailing slash
    endpoint: String,
    model: String,
    http_client: Client,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let http_client =
            Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| BackendError::ConfigurationError {
                    message: format!("Failed to build HTTP client: {}", e),
                })?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            http_client,
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Checks that the server answers on `/api/tags`
    pub async fn health_check(&self) -> Result<bool, BackendError> {
        let url = format!("{}/api/tags", self.endpoint);
        debug!("Checking Ollama health at {}", url);

        match self
            .http_client
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(response) => {
                let is_healthy = response.status().is_success();
                if !is_healthy {
                    warn!(
                        "Ollama health check failed with status: {}",
                        response.status()
                    );
                }
                Ok(is_healthy)
            }
            Err(e) if e.is_timeout() || e.is_connect() => {
                warn!("Cannot reach Ollama at {}: {}", self.endpoint, e);
                Ok(false)
            }
            Err(e) => Err(BackendError::NetworkError {
                message: format!("Health check failed: {}", e),
            }),
        }
    }

    fn build_request(&self, request: &LLMRequest) -> OllamaChatRequest {
        let options = if request.temperature.is_some()
            || request.max_tokens.is_some()
            || request.stop_sequences.is_some()
        {
            Some(OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
                stop: request.stop_sequences.clone(),
            })
        } else {
            None
        };

        OllamaChatRequest {
            model: self.model.clone(),
            messages: request.messages.iter().map(convert_message).collect(),
            tools: request.tools.iter().map(convert_tool).collect(),
            stream: false,
            options,
        }
    }
}

fn convert_message(msg: &ChatMessage) -> OllamaMessage {
    let role = match msg.role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::Tool => "tool",
    };

    let tool_calls = msg.tool_calls.as_ref().map(|calls| {
        calls
            .iter()
            .map(|tc| OllamaToolCall {
                function: OllamaFunctionCall {
                    name: tc.name.clone(),
                    arguments: tc.arguments.clone(),
                },
            })
            .collect()
    });

    OllamaMessage {
        role: role.to_string(),
        content: msg.content.clone(),
        tool_calls,
        tool_name: msg.tool_name.clone(),
    }
}

fn convert_tool(tool: &ToolDefinition) -> OllamaTool {
    OllamaTool {
        kind: "function".to_string(),
        function: OllamaFunction {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

/// Number of tool calls the assistant already made in `messages`
fn prior_tool_calls(messages: &[ChatMessage]) -> usize {
    messages
        .iter()
        .filter_map(|m| m.tool_calls.as_ref())
        .map(Vec::len)
        .sum()
}

fn extract_tool_calls(message: &OllamaMessage, first_id: usize) -> Vec<ToolCall> {
    message
        .tool_calls
        .iter()
        .flatten()
        .enumerate()
        .map(|(idx, tc)| ToolCall {
            call_id: format!("call_{}", first_id + idx),
            name: tc.function.name.clone(),
            arguments: normalize_arguments(&tc.function.arguments),
        })
        .collect()
}

/// Some models return the arguments object serialized as a string.
fn normalize_arguments(arguments: &serde_json::Value) -> serde_json::Value {
    match arguments {
        serde_json::Value::String(raw) => {
            serde_json::from_str(raw).unwrap_or_else(|_| arguments.clone())
        }
        other => other.clone(),
    }
}

#[async_trait]
impl LLMClient for OllamaClient {
    async fn chat(&self, request: LLMRequest) -> Result<LLMResponse, BackendError> {
        let url = format!("{}/api/chat", self.endpoint);
        let body = self.build_request(&request);
        let first_call_id = prior_tool_calls(&request.messages);

        debug!(
            "Sending chat to Ollama: model={}, messages={}, tools={}",
            self.model,
            body.messages.len(),
            body.tools.len()
        );

        let start = Instant::now();

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    error!("Ollama request timed out after {:?}", self.timeout);
                    BackendError::TimeoutError {
                        seconds: self.timeout.as_secs(),
                    }
                } else if e.is_connect() {
                    error!("Cannot connect to Ollama at {}", self.endpoint);
                    BackendError::NetworkError {
                        message: format!("Connection failed: {}", e),
                    }
                } else {
                    error!("Ollama request error: {}", e);
                    BackendError::NetworkError {
                        message: format!("Request failed: {}", e),
                    }
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();

            error!("Ollama API returned error status {}: {}", status, body);

            if status.as_u16() == 404 && body.contains("model") {
                return Err(BackendError::ApiError {
                    message: format!(
                        "Model '{}' not found. Please pull it with: ollama pull {}",
                        self.model, self.model
                    ),
                    status_code: Some(404),
                });
            }

            return Err(BackendError::ApiError {
                message: format!("HTTP {}: {}", status, body),
                status_code: Some(status.as_u16()),
            });
        }

        let chat_response: OllamaChatResponse = response.json().await.map_err(|e| {
            error!("Failed to parse Ollama response: {}", e);
            BackendError::InvalidResponse {
                message: format!("JSON parse error: {}", e),
                raw_response: None,
            }
        })?;

        if !chat_response.done {
            warn!("Ollama response indicates incomplete generation");
        }

        let tool_calls = extract_tool_calls(&chat_response.message, first_call_id);

        info!(
            "Ollama chat completed in {:.2}s (model={}, tool_calls={})",
            start.elapsed().as_secs_f64(),
            self.model,
            tool_calls.len()
        );

        Ok(LLMResponse::with_tool_calls(
            chat_response.message.content,
            tool_calls,
            start.elapsed(),
        ))
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model_info(&self) -> Option<String> {
        Some(format!("{} @ {}", self.model, self.endpoint))
    }
}

impl fmt::Debug for OllamaClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OllamaClient")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Request body for `/api/chat`
#[derive(Debug, Clone, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<OllamaMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OllamaTool>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Clone, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OllamaToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaToolCall {
    function: OllamaFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OllamaFunctionCall {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
struct OllamaTool {
    #[serde(rename = "type")]
    kind: String,
    function: OllamaFunction,
}

#[derive(Debug, Clone, Serialize)]
struct OllamaFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

/// Response body of `/api/chat` with `stream: false`
#[derive(Debug, Clone, Deserialize)]
struct OllamaChatResponse {
    message: OllamaMessage,
    #[serde(default)]
    done: bool,
}

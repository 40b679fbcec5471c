//! LLM client abstraction layer
//!
//! A trait-based abstraction for chat with tool calling, so the agent can run
//! against a local Ollama server, a hosted provider through genai, or a
//! scripted mock in tests.

mod client;
mod error;
mod genai_client;
mod mock;
mod ollama;
mod selector;
mod types;

pub use client::LLMClient;
pub use error::BackendError;
pub use genai_client::GenAIClient;
pub use mock::{MockLLMClient, MockResponse};
pub use ollama::OllamaClient;
pub use selector::{check_llm_available, select_llm_client, SelectedClient};
pub use types::{ChatMessage, LLMRequest, LLMResponse, MessageRole, ToolCall, ToolDefinition};

use anyhow::{anyhow, Result};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::cache::ToolCache;
use super::registry::ToolRegistry;
use crate::llm::ToolDefinition;

/// Dispatches tool calls by name, memoizing successful results
pub struct ToolSystem {
    registry: ToolRegistry,
    cache: Option<ToolCache>,
}

impl ToolSystem {
    /// Tool system with result caching enabled
    pub fn new(registry: ToolRegistry) -> Self {
        Self::with_cache(registry, true)
    }

    pub fn with_cache(registry: ToolRegistry, cache_enabled: bool) -> Self {
        Self {
            registry,
            cache: cache_enabled.then(ToolCache::new),
        }
    }

    /// Execute a tool and return its JSON result. `tool_name` may be the
    /// display name or the function name sent to the LLM.
    pub async fn execute(&self, tool_name: &str, arguments: Value) -> Result<Value> {
        info!(tool = tool_name, args = ?arguments, "Executing tool");

        let tool = self
            .registry
            .get_tool(tool_name)
            .ok_or_else(|| anyhow!("Unknown tool: {}", tool_name))?;
        let cache_key = tool.name();

        if let Some(cached) = self.cache.as_ref().and_then(|c| c.get(cache_key, &arguments)) {
            debug!(tool = cache_key, "Tool result found in cache");
            return Ok(cached);
        }

        let result = tool.execute(arguments.clone()).await;

        match &result {
            Ok(output) => {
                let output_preview = serde_json::to_string(output).unwrap_or_default();
                let preview: String = output_preview.chars().take(200).collect();
                info!(tool = cache_key, "Tool execution completed");
                debug!(tool = cache_key, output_preview = %preview, "Tool output preview");

                if let Some(cache) = &self.cache {
                    if tool.is_cacheable(output) {
                        cache.insert(cache_key, &arguments, output.clone());
                    } else {
                        debug!(tool = cache_key, "Tool output not cacheable");
                    }
                }
            }
            Err(e) => {
                warn!(tool = cache_key, error = %e, "Tool execution failed");
            }
        }

        result
    }

    pub fn as_tool_definitions(&self) -> Vec<ToolDefinition> {
        self.registry.as_tool_definitions()
    }

    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    pub fn tool_names(&self) -> Vec<&str> {
        self.registry.tool_names()
    }

    pub fn tool_count(&self) -> usize {
        self.registry.len()
    }

    pub fn cache_size(&self) -> usize {
        self.cache.as_ref().map(ToolCache::len).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Echoes its `text` argument and counts invocations
    #[derive(Default)]
    struct EchoTool {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }

        fn description(&self) -> &'static str {
            "Echoes the input text"
        }

        fn schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            })
        }

        async fn execute(&self, arguments: Value) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let text = arguments["text"]
                .as_str()
                .ok_or_else(|| anyhow!("text is required"))?;
            Ok(json!(text))
        }

        fn is_cacheable(&self, output: &Value) -> bool {
            !output.as_str().unwrap_or_default().starts_with('!')
        }
    }

    fn system_with_echo(cache_enabled: bool) -> (ToolSystem, Arc<EchoTool>) {
        let echo = Arc::new(EchoTool::default());
        let tool: Arc<dyn Tool> = echo.clone();
        let registry = ToolRegistry::new(vec![tool]);
        (ToolSystem::with_cache(registry, cache_enabled), echo)
    }

    #[tokio::test]
    async fn test_tool_system_creation() {
        let (system, _) = system_with_echo(true);

        assert_eq!(system.tool_count(), 1);
        assert_eq!(system.cache_size(), 0);
        assert_eq!(system.tool_names(), vec!["echo"]);
    }

    #[tokio::test]
    async fn test_execute() {
        let (system, _) = system_with_echo(true);

        let result = system.execute("echo", json!({"text": "hi"})).await.unwrap();

        assert_eq!(result, json!("hi"));
    }

    #[tokio::test]
    async fn test_caching() {
        let (system, echo) = system_with_echo(true);
        let args = json!({"text": "cat"});

        let result1 = system.execute("echo", args.clone()).await.unwrap();
        assert_eq!(system.cache_size(), 1);

        let result2 = system.execute("echo", args).await.unwrap();

        assert_eq!(result1, result2);
        assert_eq!(system.cache_size(), 1);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_disabled() {
        let (system, echo) = system_with_echo(false);
        let args = json!({"text": "cat"});

        system.execute("echo", args.clone()).await.unwrap();
        system.execute("echo", args).await.unwrap();

        assert_eq!(system.cache_size(), 0);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failures_not_cached() {
        let (system, echo) = system_with_echo(true);

        assert!(system.execute("echo", json!({})).await.is_err());
        assert!(system.execute("echo", json!({})).await.is_err());

        assert_eq!(system.cache_size(), 0);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_uncacheable_output_runs_again() {
        let (system, echo) = system_with_echo(true);
        let args = json!({"text": "!retry"});

        system.execute("echo", args.clone()).await.unwrap();
        system.execute("echo", args).await.unwrap();

        assert_eq!(system.cache_size(), 0);
        assert_eq!(echo.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let (system, _) = system_with_echo(true);

        system.execute("echo", json!({"text": "a"})).await.unwrap();
        assert_eq!(system.cache_size(), 1);

        system.clear_cache();

        assert_eq!(system.cache_size(), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let (system, _) = system_with_echo(true);

        let result = system.execute("nonexistent", json!({})).await;

        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Unknown tool"));
    }

    #[tokio::test]
    async fn test_as_tool_definitions() {
        let (system, _) = system_with_echo(true);

        let definitions = system.as_tool_definitions();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].name, "echo");
        assert_eq!(definitions[0].parameters["required"], json!(["text"]));
    }
}

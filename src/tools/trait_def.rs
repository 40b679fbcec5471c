use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

/// A capability the agent can invoke through the LLM's tool-calling interface
#[async_trait]
pub trait Tool: Send + Sync {
    /// Human-readable name, used in prompts and logs
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema of the arguments object
    fn schema(&self) -> Value;
    async fn execute(&self, arguments: Value) -> Result<Value>;

    /// Name sent to the LLM as the function identifier
    fn function_name(&self) -> String {
        function_name(self.name())
    }

    /// Whether a successful `output` may be served from the result cache
    fn is_cacheable(&self, _output: &Value) -> bool {
        true
    }
}

/// Lowercases `name` and folds every run of characters outside
/// `[a-z0-9_-]` into a single underscore, as hosted tool-calling APIs
/// only accept `^[a-zA-Z0-9_-]+$`.
pub fn function_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.trim().chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
            out.push(c);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out
}

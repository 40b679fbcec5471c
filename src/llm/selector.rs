use crate::config::VisionConfig;
use crate::llm::{GenAIClient, LLMClient, OllamaClient};
use anyhow::{Context, Result};
use genai::adapter::AdapterKind;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct SelectedClient {
    pub client: Arc<dyn LLMClient>,
    pub provider: AdapterKind,
    pub description: String,
}

/// Builds the LLM client named by `MODEL`.
///
/// Ollama models go through the native client at `OLLAMA_BASE_URL`; every
/// other provider goes through genai with its default endpoint.
pub fn select_llm_client(config: &VisionConfig) -> Result<SelectedClient> {
    let (provider, model) = config.llm_target()?;
    let timeout = Duration::from_secs(config.request_timeout_secs);

    let selected = if provider == AdapterKind::Ollama {
        let client = OllamaClient::new(config.base_url.clone(), model.clone(), timeout)
            .context("Failed to initialize Ollama client")?;
        SelectedClient {
            client: Arc::new(client),
            provider,
            description: format!("Ollama ({} @ {})", model, config.base_url),
        }
    } else {
        let client = GenAIClient::new(provider, model.clone(), timeout)
            .with_context(|| format!("Failed to initialize {} client", provider.as_str()))?;
        SelectedClient {
            client: Arc::new(client),
            provider,
            description: format!("{} ({})", provider.as_str(), model),
        }
    };

    info!("Using LLM: {}", selected.description);
    Ok(selected)
}

/// Checks whether the LLM endpoint behind `config` is reachable.
/// Hosted providers are assumed reachable when their credentials are set.
pub async fn check_llm_available(config: &VisionConfig) -> Result<bool> {
    let (provider, model) = config.llm_target()?;

    if provider == AdapterKind::Ollama {
        let client = OllamaClient::new(config.base_url.clone(), model, Duration::from_secs(2))?;
        return Ok(client.health_check().await?);
    }

    Ok(match provider.default_key_env_name() {
        None => true,
        Some(env_var) => std::env::var(env_var).is_ok(),
    })
}

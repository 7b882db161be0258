//! Environment-driven construction of the clarifier's LLM client.

use super::anthropic::AnthropicService;
use super::LlmService;
use std::sync::Arc;

const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";

/// LLM configuration, read from environment variables
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub anthropic_api_key: Option<String>,
    /// Gateway base URL substituting for the public API endpoint.
    pub gateway: Option<String>,
    /// Model ID override.
    pub model: Option<String>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            gateway: std::env::var("LLM_GATEWAY").ok(),
            model: std::env::var("TASKPILOT_MODEL").ok(),
        }
    }
}

/// Build the shared clarifier client, or `None` when no credentials are
/// configured (the conversation subsystem then degrades gracefully).
pub fn build_service(config: &LlmConfig) -> Option<Arc<dyn LlmService>> {
    let api_key = config.anthropic_api_key.clone()?;
    let model = config.model.clone().unwrap_or_else(|| DEFAULT_MODEL.to_string());
    Some(Arc::new(AnthropicService::new(
        api_key,
        model,
        config.gateway.as_deref(),
    )))
}

//! LLM provider abstraction for the clarification dialog.
//!
//! One provider concern remains in this server: turning a vague user request
//! into a concrete task description. The trait seam keeps the conversation
//! manager testable without network access.

mod anthropic;
mod error;
mod registry;
mod types;

pub use anthropic::AnthropicService;
pub use error::{LlmError, LlmErrorKind};
pub use registry::{build_service, LlmConfig};
pub use types::{ChatRole, LlmMessage, LlmRequest, LlmResponse};

use async_trait::async_trait;

/// Client for making LLM requests.
#[async_trait]
pub trait LlmService: Send + Sync {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError>;

    fn model_id(&self) -> &str;
}

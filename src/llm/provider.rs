use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::errors::AgentResult;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse};

/// An OpenAI-compatible chat-completion endpoint.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Identifier used in logs.
    fn name(&self) -> &str;

    /// Sends one completion request. Must return `AgentError::Cancelled`
    /// promptly once `cancel` fires.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        cfg: &CallConfig,
        cancel: &CancellationToken,
    ) -> AgentResult<LlmResponse>;
}

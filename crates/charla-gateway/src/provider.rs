use async_trait::async_trait;

use charla_agent::provider::{AIProvider, ChatRequest, ChatResponse};
use charla_bots::Bot;
use charla_core::CharlaError;

/// Placeholder provider used when the deployment has not wired a real
/// AI backend. Concrete Gemini/OpenAI/Claude clients live outside the
/// engine and are injected into [`crate::app::AppState::build`].
pub struct UnconfiguredProvider;

#[async_trait]
impl AIProvider for UnconfiguredProvider {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn chat(&self, bot: &Bot, _req: &ChatRequest) -> Result<ChatResponse, CharlaError> {
        Err(CharlaError::Provider(format!(
            "no AI provider configured for bot {}",
            bot.id
        )))
    }
}

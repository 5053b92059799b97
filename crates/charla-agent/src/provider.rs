use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use charla_bots::Bot;
use charla_core::{CharlaError, MediaItem, UsageStats};

/// Tool definition sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool call extracted from the model response, paired with its
/// result by `id` across the assistant turn and the following
/// tool-response user turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// Request to an AI provider.
///
/// The system prompt is split so providers can place a cache
/// breakpoint after the stable block.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    /// Stable, cacheable system block.
    pub system_stable: String,
    /// Per-turn dynamic system block.
    pub system_dynamic: String,
    /// Full conversation in the provider's native transcript shape.
    pub messages: Vec<serde_json::Value>,
    pub tools: Vec<ToolDefinition>,
}

/// Response from an AI provider.
#[derive(Debug, Clone)]
pub struct ChatResponse {
    /// Assistant text, empty when the turn is tool calls only.
    pub text: String,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCall>,
    /// Provider-native raw content of the assistant turn, preserved so
    /// the transcript can be replayed faithfully.
    pub raw_content: serde_json::Value,
    pub usage: UsageStats,
}

/// Result of a multimodal analysis call.
#[derive(Debug, Clone)]
pub struct Analysis {
    pub text: String,
    pub usage: UsageStats,
}

/// On-demand interpretation of a single attachment.
#[async_trait]
pub trait MultimodalInterpreter: Send + Sync {
    async fn analyze(
        &self,
        bot: &Bot,
        media: &MediaItem,
        intent: &str,
    ) -> Result<Analysis, CharlaError>;
}

/// The one capability the core sees of a concrete AI backend.
/// Gemini/OpenAI/Claude wire formats live outside the engine.
#[async_trait]
pub trait AIProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn chat(&self, bot: &Bot, req: &ChatRequest) -> Result<ChatResponse, CharlaError>;

    /// Providers that also interpret media advertise it here; the
    /// executor uses this for `trigger_multimodal_analysis`.
    fn as_multimodal(&self) -> Option<&dyn MultimodalInterpreter> {
        None
    }
}

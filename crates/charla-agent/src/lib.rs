pub mod cost;
pub mod events;
pub mod executor;
pub mod multimodal;
pub mod prompt;
pub mod provider;
pub mod redact;
pub mod tools;

pub use events::{EventSink, ExecutionEvent, LogEventSink};
pub use executor::{BotInput, ConversationExecutor, ExecutionOutcome, FinalAction};
pub use provider::{AIProvider, Analysis, ChatRequest, ChatResponse, MultimodalInterpreter, ToolCall, ToolDefinition};
pub use tools::{NativeToolCaller, NativeToolRegistry, ToolMeta};

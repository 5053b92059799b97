//! The AI↔tools loop.
//!
//! Bounded at 10 iterations. Each round asks the provider for a turn,
//! accounts its cost, and either finishes with text or dispatches the
//! requested tool calls — MCP first, then native, then a synthesized
//! "tool not found" error. All results of one round are grouped into a
//! single tool-response user turn, which some providers require.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use charla_bots::Bot;
use charla_core::types::extract_mindset;
use charla_core::{CharlaError, ClientContext, ExecutionCost, MediaItem, MediaState, Mindset, ToolValue};
use charla_mcp::McpGateway;

use crate::cost::CostAccumulator;
use crate::events::{EventSink, ExecutionEvent};
use crate::provider::{AIProvider, ChatRequest, ToolCall, ToolDefinition};
use crate::redact::{redact_text, redact_tool_payload};
use crate::tools::{NativeToolCaller, ToolMeta};

/// Hard bound on AI↔tool rounds per execution.
pub const MAX_ITERATIONS: usize = 10;

/// Deterministic result when the model requests analysis but the
/// provider has no multimodal capability.
const MULTIMODAL_UNAVAILABLE: &str = "multimodal analysis unavailable";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalAction {
    /// Session continues; the orchestrator arms its waiting timers.
    Continue,
    /// The model ended the conversation; the session is deleted.
    Terminate,
}

/// Everything the executor needs for one conversation turn.
pub struct BotInput {
    pub bot: Bot,
    pub client: ClientContext,
    pub session_key: String,
    /// Enriched user text (multimodal annotations already stitched in).
    pub text: String,
    /// Prior turns in the provider-native transcript shape.
    pub history: Vec<Value>,
    pub system_stable: String,
    pub system_dynamic: String,
    /// Resolved timezone offset injected into native tool metadata.
    pub timezone: String,
}

pub struct ExecutionOutcome {
    pub reply: String,
    pub final_action: FinalAction,
    pub costs: Vec<ExecutionCost>,
    /// Turns appended during this execution (the user turn included),
    /// ready to be folded into the session history.
    pub transcript: Vec<Value>,
    pub mindset: Option<Mindset>,
}

pub struct ConversationExecutor {
    provider: Arc<dyn AIProvider>,
    mcp: Arc<McpGateway>,
    native: Option<Arc<dyn NativeToolCaller>>,
    events: Arc<dyn EventSink>,
}

impl ConversationExecutor {
    pub fn new(
        provider: Arc<dyn AIProvider>,
        mcp: Arc<McpGateway>,
        native: Option<Arc<dyn NativeToolCaller>>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            provider,
            mcp,
            native,
            events,
        }
    }

    #[instrument(skip(self, input), fields(bot_id = %input.bot.id, session = %input.session_key))]
    pub async fn execute(&self, input: BotInput) -> Result<ExecutionOutcome, CharlaError> {
        let costs = CostAccumulator::new();
        let tester = input.client.tester;

        let mut tools: Vec<ToolDefinition> = self
            .mcp
            .get_bot_tools(&input.bot.id)
            .await
            .map_err(|e| CharlaError::Tool(e.to_string()))?
            .into_iter()
            .map(|t| ToolDefinition {
                name: t.name,
                description: t.description,
                input_schema: t.input_schema,
            })
            .collect();
        if let Some(native) = &self.native {
            tools.extend(native.definitions());
        }

        let history_len = input.history.len();
        let mut messages = input.history.clone();
        messages.push(json!({ "role": "user", "content": input.text }));

        let mut final_action = FinalAction::Continue;
        let mut farewell: Option<String> = None;
        let mut last_text: Option<String> = None;

        for iteration in 0..MAX_ITERATIONS {
            self.events.record(ExecutionEvent {
                kind: "ai_request",
                bot_id: input.bot.id.clone(),
                session_key: input.session_key.clone(),
                payload: json!({
                    "iteration": iteration,
                    "model": input.bot.model,
                    "input": redact_text(&input.text, tester),
                    "system": redact_text(&input.system_stable, tester),
                }),
            });

            let request = ChatRequest {
                model: input.bot.model.clone(),
                system_stable: input.system_stable.clone(),
                system_dynamic: input.system_dynamic.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
            };
            let response = self.provider.chat(&input.bot, &request).await?;

            costs.add(&input.bot.id, &input.bot.model, &response.usage);
            self.events.record(ExecutionEvent {
                kind: "ai_reply",
                bot_id: input.bot.id.clone(),
                session_key: input.session_key.clone(),
                payload: json!({
                    "iteration": iteration,
                    "input_tokens": response.usage.input_tokens,
                    "output_tokens": response.usage.output_tokens,
                    "cached_tokens": response.usage.cached_tokens,
                    "cost_usd": response.usage.cost_usd,
                    "tool_calls": response.tool_calls.len(),
                }),
            });

            if !response.text.trim().is_empty() {
                last_text = Some(response.text.clone());
            }

            if response.tool_calls.is_empty() {
                debug!(iteration, "loop complete, no more tool calls");
                // The closing assistant turn belongs to the history too.
                messages.push(json!({ "role": "assistant", "content": response.raw_content }));
                break;
            }

            // Preserve the provider-native assistant turn so tool_use
            // ids replay faithfully.
            messages.push(json!({ "role": "assistant", "content": response.raw_content }));

            let mut result_blocks = Vec::with_capacity(response.tool_calls.len());
            for call in &response.tool_calls {
                let (mut result, is_native) = self.dispatch_tool(&input, call).await;

                match result.get_str("action") {
                    Some("terminate_session") => {
                        final_action = FinalAction::Terminate;
                        farewell = result.get_str("farewell_message").map(String::from);
                        info!(tool = %call.name, "terminate_session action");
                    }
                    Some("trigger_multimodal_analysis") => {
                        result = self.run_multimodal_analysis(&input, &result, &costs).await;
                    }
                    _ => {}
                }

                self.events.record(ExecutionEvent {
                    kind: "tool_call",
                    bot_id: input.bot.id.clone(),
                    session_key: input.session_key.clone(),
                    payload: json!({
                        "tool": call.name,
                        "args": if tester { call.args.clone() } else { redact_tool_payload(&call.args, is_native) },
                        "result": if tester {
                            Value::from(result.clone())
                        } else {
                            redact_tool_payload(&Value::from(result.clone()), is_native)
                        },
                    }),
                });

                result_blocks.push(json!({
                    "type": "tool_result",
                    "tool_use_id": call.id,
                    "content": Value::from(result).to_string(),
                }));
            }

            // One user turn carries all of this round's results.
            messages.push(json!({ "role": "user", "content": result_blocks }));

            if final_action == FinalAction::Terminate {
                break;
            }

            if iteration == MAX_ITERATIONS - 1 {
                warn!(max = MAX_ITERATIONS, "tool loop hit maximum iterations");
            }
        }

        // Farewell wins, then the last assistant text.
        let reply = farewell.or(last_text).unwrap_or_default();
        let (reply, mindset) = extract_mindset(&reply);

        Ok(ExecutionOutcome {
            reply,
            final_action,
            costs: costs.into_costs(),
            transcript: messages.split_off(history_len),
            mindset,
        })
    }

    /// Route one call: bot's MCP server map → native registry →
    /// synthesized not-found error.
    async fn dispatch_tool(&self, input: &BotInput, call: &ToolCall) -> (ToolValue, bool) {
        match self.mcp.server_for_tool(&input.bot.id, &call.name) {
            Ok(Some(server_id)) => {
                let outcome = self
                    .mcp
                    .call_tool(&input.bot.id, &server_id, &call.name, call.args.clone())
                    .await;
                let value = match outcome {
                    Ok(result) if !result.is_error => parse_tool_content(&result.content),
                    Ok(result) => ToolValue::error(result.content),
                    Err(e) => ToolValue::error(e.to_string()),
                };
                (value, false)
            }
            Ok(None) | Err(_) => match &self.native {
                Some(native) if native.has_tool(&call.name) => {
                    let meta = ToolMeta {
                        timezone: input.timezone.clone(),
                        country: input.client.country.clone(),
                        session_key: input.session_key.clone(),
                    };
                    let args = ToolValue::from(call.args.clone());
                    match native.call(&call.name, args, &meta).await {
                        Ok(value) => (value, true),
                        Err(e) => (ToolValue::error(e.to_string()), true),
                    }
                }
                _ => (ToolValue::error("tool not found"), false),
            },
        }
    }

    /// `trigger_multimodal_analysis`: read the referenced file, ask the
    /// provider (when it is also a multimodal interpreter) and
    /// substitute the tool result with `{analysis, usage}`.
    async fn run_multimodal_analysis(
        &self,
        input: &BotInput,
        action: &ToolValue,
        costs: &CostAccumulator,
    ) -> ToolValue {
        let Some(interpreter) = self.provider.as_multimodal() else {
            return ToolValue::error(MULTIMODAL_UNAVAILABLE);
        };

        let path = action.get_str("path").unwrap_or_default();
        let intent = action.get_str("intent").unwrap_or("describe the content");
        let data = match tokio::fs::read(path).await {
            Ok(data) => data,
            Err(e) => return ToolValue::error(format!("could not read {path}: {e}")),
        };
        let media = MediaItem {
            data,
            mime: action.get_str("mime_type").unwrap_or("application/octet-stream").to_string(),
            filename: action.get_str("filename").unwrap_or(path).to_string(),
            state: MediaState::Analyzed,
        };

        match interpreter.analyze(&input.bot, &media, intent).await {
            Ok(analysis) => {
                costs.add(&input.bot.id, &input.bot.model, &analysis.usage);
                ToolValue::from(json!({
                    "analysis": analysis.text,
                    "usage": {
                        "input_tokens": analysis.usage.input_tokens,
                        "output_tokens": analysis.usage.output_tokens,
                    }
                }))
            }
            Err(e) => ToolValue::error(format!("analysis failed: {e}")),
        }
    }
}

/// Tool output is JSON more often than not; fall back to a plain string.
fn parse_tool_content(content: &str) -> ToolValue {
    serde_json::from_str::<Value>(content)
        .map(ToolValue::from)
        .unwrap_or_else(|_| ToolValue::String(content.to_string()))
}

use async_trait::async_trait;

use charla_core::{CharlaError, ToolValue};

use super::{NativeTool, ToolMeta};

/// Lets the model close a conversation deliberately.
///
/// Returns the `terminate_session` action the executor acts on; the
/// optional farewell becomes the final reply.
pub struct EndChatTool;

#[async_trait]
impl NativeTool for EndChatTool {
    fn name(&self) -> &str {
        "end_chat"
    }

    fn description(&self) -> &str {
        "End the current conversation when the user says goodbye or the task is complete. \
         Optionally send a short farewell message."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "farewell_message": {
                    "type": "string",
                    "description": "Short goodbye to send before closing."
                }
            }
        })
    }

    async fn execute(&self, args: ToolValue, _meta: &ToolMeta) -> Result<ToolValue, CharlaError> {
        let mut result = serde_json::json!({ "action": "terminate_session" });
        if let Some(farewell) = args.get_str("farewell_message") {
            result["farewell_message"] = serde_json::Value::String(farewell.to_string());
        }
        Ok(ToolValue::from(result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_terminate_action() {
        let result = EndChatTool
            .execute(
                ToolValue::from(serde_json::json!({"farewell_message": "bye"})),
                &ToolMeta::default(),
            )
            .await
            .unwrap();
        assert_eq!(result.get_str("action"), Some("terminate_session"));
        assert_eq!(result.get_str("farewell_message"), Some("bye"));
    }
}

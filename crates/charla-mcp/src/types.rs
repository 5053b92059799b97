use serde::{Deserialize, Serialize};

/// A tool exposed by an MCP server, as returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the tool's arguments, passed through verbatim.
    #[serde(rename = "inputSchema", default)]
    pub input_schema: serde_json::Value,
}

/// Result of a `tools/call`, flattened to the text content the model
/// consumes plus the raw frame for faithful replay.
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    pub content: String,
    pub is_error: bool,
    pub raw: serde_json::Value,
}

impl ToolCallResult {
    /// Parse an MCP `tools/call` result frame.
    ///
    /// Text blocks are concatenated; non-text blocks are preserved only
    /// in `raw`.
    pub fn from_frame(frame: serde_json::Value) -> Self {
        let is_error = frame
            .get("isError")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let content = frame
            .get("content")
            .and_then(|v| v.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| {
                        (b.get("type").and_then(|t| t.as_str()) == Some("text"))
                            .then(|| b.get("text").and_then(|t| t.as_str()).unwrap_or(""))
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();
        Self {
            content,
            is_error,
            raw: frame,
        }
    }
}

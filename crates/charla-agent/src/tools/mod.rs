//! Native tool registry.
//!
//! Native tools run in-process. Their results may carry an `action`
//! key that triggers system-side effects in the executor
//! (`terminate_session`, `trigger_multimodal_analysis`); any other
//! action is passed through to the model untouched.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use charla_core::{CharlaError, ToolValue};

use crate::provider::ToolDefinition;

/// Call-site metadata injected into every native tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolMeta {
    /// Resolved timezone offset string (client → channel → default).
    pub timezone: String,
    pub country: Option<String>,
    pub session_key: String,
}

/// One native tool implementation.
#[async_trait]
pub trait NativeTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;
    async fn execute(&self, args: ToolValue, meta: &ToolMeta) -> Result<ToolValue, CharlaError>;
}

/// Dispatcher the executor consults after the MCP map.
#[async_trait]
pub trait NativeToolCaller: Send + Sync {
    fn has_tool(&self, name: &str) -> bool;
    fn definitions(&self) -> Vec<ToolDefinition>;
    async fn call(
        &self,
        name: &str,
        args: ToolValue,
        meta: &ToolMeta,
    ) -> Result<ToolValue, CharlaError>;
}

/// Plain map-backed registry.
#[derive(Default)]
pub struct NativeToolRegistry {
    tools: HashMap<String, Arc<dyn NativeTool>>,
}

impl NativeToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn NativeTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }
}

#[async_trait]
impl NativeToolCaller for NativeToolRegistry {
    fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    async fn call(
        &self,
        name: &str,
        args: ToolValue,
        meta: &ToolMeta,
    ) -> Result<ToolValue, CharlaError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| CharlaError::Tool(format!("tool not found: {name}")))?;
        tool.execute(args, meta).await
    }
}

pub mod end_chat;

#[cfg(test)]
mod tests {
    use super::*;

    struct ClockTool;

    #[async_trait]
    impl NativeTool for ClockTool {
        fn name(&self) -> &str {
            "current_time"
        }
        fn description(&self) -> &str {
            "Current local time for the conversation."
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(
            &self,
            _args: ToolValue,
            meta: &ToolMeta,
        ) -> Result<ToolValue, CharlaError> {
            Ok(ToolValue::from(serde_json::json!({
                "time": "12:00",
                "timezone": meta.timezone,
            })))
        }
    }

    #[tokio::test]
    async fn registry_dispatches_with_meta() {
        let mut registry = NativeToolRegistry::new();
        registry.register(Arc::new(ClockTool));
        assert!(registry.has_tool("current_time"));
        assert!(!registry.has_tool("nope"));

        let meta = ToolMeta {
            timezone: "-03:00".into(),
            ..Default::default()
        };
        let result = registry
            .call("current_time", ToolValue::Null, &meta)
            .await
            .unwrap();
        assert_eq!(result.get_str("timezone"), Some("-03:00"));

        let err = registry.call("nope", ToolValue::Null, &meta).await;
        assert!(err.is_err());
    }
}

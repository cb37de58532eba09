use crate::error::{Result, ToolError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Whether running a tool changes state outside the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolEffect {
    ReadOnly,
    SideEffecting,
}

impl ToolEffect {
    pub fn is_side_effecting(self) -> bool {
        matches!(self, Self::SideEffecting)
    }
}

#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
    pub effect: ToolEffect,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn spec(&self) -> ToolSpec;
    async fn execute(&self, arguments: serde_json::Value) -> Result<serde_json::Value>;
}

pub fn to_llm_tool_def(tool: &dyn Tool) -> ob_llm::ToolDefinition {
    let spec = tool.spec();
    ob_llm::ToolDefinition {
        name: spec.name,
        description: spec.description,
        parameters: spec.parameters_schema,
    }
}

pub(crate) fn require_object(
    args: &serde_json::Value,
) -> Result<&serde_json::Map<String, serde_json::Value>> {
    args.as_object().ok_or_else(|| {
        ToolError::InvalidArguments(format!("arguments must be a JSON object, got {args}"))
    })
}

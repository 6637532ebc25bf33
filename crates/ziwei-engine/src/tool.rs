use std::time::Duration;

use async_trait::async_trait;

use ziwei_core::ids::ConversationId;
use ziwei_core::tools::{ToolDefinition, ToolResult};
use ziwei_store::ConversationStore;

/// Context available to a handler during execution.
pub struct ToolContext {
    pub conversation_id: ConversationId,
    pub store: ConversationStore,
}

/// Trait implemented by each tool.
///
/// `validate` normalizes raw arguments (defaults, coercions) and rejects
/// calls that cannot run. `execute` only ever sees validated arguments.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;

    fn validate(&self, args: serde_json::Value) -> Result<serde_json::Value, ToolError> {
        Ok(args)
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolResult, ToolError>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters_schema: self.parameters_schema(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("execution failed: {0}")]
    ExecutionFailed(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl ToolError {
    /// Convert into the error payload shown to the end user.
    pub fn into_result(self) -> ToolResult {
        match self {
            Self::InvalidArguments(msg) => ToolResult::failure(msg),
            Self::ExecutionFailed(msg) => ToolResult::failure(msg),
            Self::Timeout(d) => ToolResult::failure(format!(
                "The tool took too long to respond (over {}s). Please try again.",
                d.as_secs()
            )),
        }
    }
}

/// Fetch a required string argument, trimmed and non-empty.
pub fn required_str<'a>(args: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing required argument: {key}")))
}

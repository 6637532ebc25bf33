use async_trait::async_trait;
use serde_json::Value;

use ziwei_core::tools::ToolResult;

use crate::chart::{find_palace, PALACES};
use crate::tool::{required_str, ToolContext, ToolError, ToolHandler};

pub struct ExplainPalaceTool;

#[async_trait]
impl ToolHandler for ExplainPalaceTool {
    fn name(&self) -> &str {
        "explain_palace"
    }

    fn description(&self) -> &str {
        "Explain what one of the twelve palaces of a Zi Wei Dou Shu chart governs."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["palace_name"],
            "properties": {
                "palace_name": {
                    "type": "string",
                    "description": "Palace name in English (e.g. career) or Chinese (e.g. 官禄宫)"
                }
            }
        })
    }

    fn validate(&self, args: Value) -> Result<Value, ToolError> {
        required_str(&args, "palace_name")?;
        Ok(args)
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let name = required_str(&args, "palace_name")?;

        let Some(palace) = find_palace(name) else {
            let known: Vec<&str> = PALACES.iter().map(|p| p.key).collect();
            return Ok(ToolResult::failure(format!(
                "\"{name}\" is not one of the twelve palaces. Known palaces: {}.",
                known.join(", ")
            )));
        };

        Ok(
            ToolResult::success(format!("{} ({}): {}", palace.label, palace.key, palace.summary))
                .with_field("palace", Value::from(palace.key)),
        )
    }
}

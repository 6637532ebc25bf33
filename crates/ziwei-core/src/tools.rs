use serde::{Deserialize, Serialize};

/// Tool definition handed to the generation step.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: serde_json::Value,
}

/// Result of a dispatched tool call: `{result, error?, <extra fields>}`.
///
/// Errors are data. The text in `result` is shown to the end user through the
/// model, so it must read as a plain explanation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub result: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub error: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ToolResult {
    pub fn success(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            error: false,
            extra: serde_json::Map::new(),
        }
    }

    pub fn failure(result: impl Into<String>) -> Self {
        Self {
            result: result.into(),
            error: true,
            extra: serde_json::Map::new(),
        }
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::failure(format!("No such tool: {name}"))
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub fn is_error(&self) -> bool {
        self.error
    }

    pub fn to_value(&self) -> serde_json::Value {
        let mut obj = self.extra.clone();
        obj.insert("result".into(), serde_json::Value::String(self.result.clone()));
        if self.error {
            obj.insert("error".into(), serde_json::Value::Bool(true));
        }
        serde_json::Value::Object(obj)
    }
}

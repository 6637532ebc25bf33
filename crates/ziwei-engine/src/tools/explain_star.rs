use async_trait::async_trait;
use serde_json::Value;

use ziwei_core::tools::ToolResult;

use crate::tool::{required_str, ToolContext, ToolError, ToolHandler};

struct StarInfo {
    key: &'static str,
    label: &'static str,
    summary: &'static str,
}

/// The fourteen major stars.
const STARS: [StarInfo; 14] = [
    StarInfo { key: "ziwei", label: "紫微", summary: "The emperor star. Leadership, dignity and a need for respect." },
    StarInfo { key: "tianji", label: "天机", summary: "The strategist. Quick thinking, planning and restlessness." },
    StarInfo { key: "taiyang", label: "太阳", summary: "The sun. Generosity, visibility and a drive to serve others." },
    StarInfo { key: "wuqu", label: "武曲", summary: "The general of wealth. Decisiveness, discipline and financial skill." },
    StarInfo { key: "tiantong", label: "天同", summary: "The child. Contentment, kindness and a love of comfort." },
    StarInfo { key: "lianzhen", label: "廉贞", summary: "The official. Intensity, principle and complicated passions." },
    StarInfo { key: "tianfu", label: "天府", summary: "The treasury. Stability, prudence and the ability to preserve resources." },
    StarInfo { key: "taiyin", label: "太阴", summary: "The moon. Sensitivity, refinement and quiet accumulation." },
    StarInfo { key: "tanlang", label: "贪狼", summary: "The wolf. Desire, charm and many talents." },
    StarInfo { key: "jumen", label: "巨门", summary: "The gate. Speech, analysis and a tendency toward disputes." },
    StarInfo { key: "tianxiang", label: "天相", summary: "The minister. Fairness, diplomacy and support of others." },
    StarInfo { key: "tianliang", label: "天梁", summary: "The elder. Protection, wisdom and moral authority." },
    StarInfo { key: "qisha", label: "七杀", summary: "The marshal. Courage, independence and sudden change." },
    StarInfo { key: "pojun", label: "破军", summary: "The vanguard. Breaking the old to build the new." },
];

fn find_star(name: &str) -> Option<&'static StarInfo> {
    let normalized: String = name
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    let normalized = normalized.strip_suffix("星").unwrap_or(normalized.as_str());
    STARS
        .iter()
        .find(|s| s.key == normalized || s.label == normalized)
}

pub struct ExplainStarTool;

#[async_trait]
impl ToolHandler for ExplainStarTool {
    fn name(&self) -> &str {
        "explain_star"
    }

    fn description(&self) -> &str {
        "Explain the meaning of one of the fourteen major stars in Zi Wei Dou Shu."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["star_name"],
            "properties": {
                "star_name": {
                    "type": "string",
                    "description": "Star name in pinyin (e.g. tanlang) or Chinese (e.g. 贪狼)"
                }
            }
        })
    }

    fn validate(&self, args: Value) -> Result<Value, ToolError> {
        required_str(&args, "star_name")?;
        Ok(args)
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let name = required_str(&args, "star_name")?;

        match find_star(name) {
            Some(star) => Ok(ToolResult::success(format!(
                "{} ({}): {}",
                star.label, star.key, star.summary
            ))
            .with_field("star", Value::from(star.key))),
            None => Ok(ToolResult::failure(format!(
                "\"{name}\" is not one of the fourteen major stars."
            ))),
        }
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use tracing::debug;

use ziwei_core::tools::ToolResult;

use crate::chart::{CalendarType, ChartCalculator, ChartRequest, Gender, PalaceLayout};
use crate::timeslot::{self, SLOT_COUNT};
use crate::tool::{required_str, ToolContext, ToolError, ToolHandler};

pub struct GenerateChartTool {
    calculator: Arc<dyn ChartCalculator>,
}

impl GenerateChartTool {
    pub fn new() -> Self {
        Self::with_calculator(Arc::new(PalaceLayout))
    }

    pub fn with_calculator(calculator: Arc<dyn ChartCalculator>) -> Self {
        Self { calculator }
    }
}

impl Default for GenerateChartTool {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_date(raw: &str) -> Result<NaiveDate, ToolError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y/%m/%d"))
        .map_err(|_| {
            ToolError::InvalidArguments(format!(
                "I couldn't read the birth date \"{raw}\". Please give it as YYYY-MM-DD."
            ))
        })
}

/// Accept integers and numeric strings, since models emit both.
fn integer_arg(args: &Value, key: &str) -> Result<Option<i64>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .map(Some)
            .ok_or_else(|| ToolError::InvalidArguments(format!("{key} must be a whole number"))),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ToolError::InvalidArguments(format!("{key} must be a whole number"))),
        Some(_) => Err(ToolError::InvalidArguments(format!(
            "{key} must be a whole number"
        ))),
    }
}

fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[async_trait]
impl ToolHandler for GenerateChartTool {
    fn name(&self) -> &str {
        "generate_chart"
    }

    fn description(&self) -> &str {
        "Generate a Zi Wei Dou Shu birth chart from a birth date and hour. \
         The chart is shown to the user and kept for follow-up questions."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["birth_date", "birth_hour"],
            "properties": {
                "birth_date": {
                    "type": "string",
                    "description": "Birth date as YYYY-MM-DD"
                },
                "birth_hour": {
                    "type": "integer",
                    "minimum": 0,
                    "maximum": 23,
                    "description": "Hour of birth on a 24-hour clock"
                },
                "time_index": {
                    "type": "integer",
                    "minimum": 0,
                    "maximum": 12,
                    "description": "Explicit time slot (0 = early zi, 12 = late zi). Overrides birth_hour."
                },
                "gender": {
                    "type": "string",
                    "enum": ["male", "female"],
                    "description": "Defaults to female"
                },
                "calendar_type": {
                    "type": "string",
                    "enum": ["solar", "lunar"],
                    "description": "Calendar of birth_date. Defaults to solar"
                }
            }
        })
    }

    fn validate(&self, args: Value) -> Result<Value, ToolError> {
        let birth_date = parse_date(required_str(&args, "birth_date")?)?;

        let birth_hour = integer_arg(&args, "birth_hour")?
            .ok_or_else(|| ToolError::InvalidArguments("Missing required argument: birth_hour".into()))?;
        let birth_hour = u8::try_from(birth_hour)
            .ok()
            .filter(|h| *h < 24)
            .ok_or_else(|| {
                ToolError::InvalidArguments(format!(
                    "The birth hour {birth_hour} is not valid. Please use an hour from 0 to 23."
                ))
            })?;

        let time_index = match integer_arg(&args, "time_index")? {
            Some(i) => u8::try_from(i)
                .ok()
                .filter(|i| *i < SLOT_COUNT)
                .ok_or_else(|| {
                    ToolError::InvalidArguments(format!(
                        "time_index {i} is not valid. Use a slot from 0 to 12."
                    ))
                })?,
            None => timeslot::slot_for_hour(birth_hour).ok_or_else(|| {
                ToolError::InvalidArguments(format!("The birth hour {birth_hour} is not valid."))
            })?,
        };

        let gender = match optional_str(&args, "gender") {
            Some(raw) => Gender::parse(raw).ok_or_else(|| {
                ToolError::InvalidArguments(format!(
                    "Unrecognized gender \"{raw}\". Use male or female."
                ))
            })?,
            None => Gender::default(),
        };

        let calendar_type = match optional_str(&args, "calendar_type") {
            Some(raw) => CalendarType::parse(raw).ok_or_else(|| {
                ToolError::InvalidArguments(format!(
                    "Unrecognized calendar type \"{raw}\". Use solar or lunar."
                ))
            })?,
            None => CalendarType::default(),
        };

        let request = ChartRequest {
            birth_date,
            birth_hour,
            time_index,
            gender,
            calendar_type,
        };
        serde_json::to_value(request).map_err(|e| ToolError::InvalidArguments(e.to_string()))
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let request: ChartRequest = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidArguments(e.to_string()))?;

        let chart = self
            .calculator
            .calculate(&request)
            .map_err(ToolError::ExecutionFailed)?;
        let artifact = serde_json::to_value(&chart)
            .map_err(|e| ToolError::ExecutionFailed(format!("chart serialization: {e}")))?;

        if !ctx.store.set_derived_state(&ctx.conversation_id, artifact) {
            return Err(ToolError::ExecutionFailed(
                "This conversation has expired, so the chart could not be saved. Please start a new conversation.".into(),
            ));
        }

        debug!(
            conversation_id = %ctx.conversation_id,
            time_index = request.time_index,
            "chart stored"
        );

        Ok(ToolResult::success(format!(
            "Chart generated for {} ({}, {}). The life palace sits in the {} branch.",
            request.birth_date,
            chart.time_slot.label,
            chart.time_slot.range,
            chart.life_palace_branch
        ))
        .with_field("time_index", Value::from(request.time_index))
        .with_field("life_palace_branch", Value::from(chart.life_palace_branch)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ziwei_store::{ConversationStore, DEFAULT_TTL};

    fn ctx() -> ToolContext {
        let store = ConversationStore::new(DEFAULT_TTL);
        let conversation_id = store.get_or_create(None).id;
        ToolContext {
            conversation_id,
            store,
        }
    }

    fn validate(args: Value) -> Result<ChartRequest, ToolError> {
        let v = GenerateChartTool::new().validate(args)?;
        Ok(serde_json::from_value(v).unwrap())
    }

    #[test]
    fn hour_zero_is_late_zi() {
        let req = validate(serde_json::json!({"birth_date": "1990-05-17", "birth_hour": 0})).unwrap();
        assert_eq!(req.time_index, 12);
    }

    #[test]
    fn hour_thirteen_is_slot_seven() {
        let req = validate(serde_json::json!({"birth_date": "1990-05-17", "birth_hour": 13})).unwrap();
        assert_eq!(req.time_index, 7);
    }

    #[test]
    fn omitted_optionals_use_defaults() {
        let req = validate(serde_json::json!({"birth_date": "1990-05-17", "birth_hour": 9})).unwrap();
        assert_eq!(req.gender, Gender::Female);
        assert_eq!(req.calendar_type, CalendarType::Solar);
    }

    #[test]
    fn string_hour_and_explicit_slot() {
        let req = validate(serde_json::json!({
            "birth_date": "1990/05/17",
            "birth_hour": "0",
            "time_index": 0,
            "gender": "male",
            "calendar_type": "lunar"
        }))
        .unwrap();
        assert_eq!(req.birth_hour, 0);
        assert_eq!(req.time_index, 0);
        assert_eq!(req.gender, Gender::Male);
        assert_eq!(req.calendar_type, CalendarType::Lunar);
    }

    #[test]
    fn invalid_arguments_are_explained() {
        let err = validate(serde_json::json!({"birth_hour": 3})).unwrap_err();
        assert!(err.to_string().contains("birth_date"));

        let err = validate(serde_json::json!({"birth_date": "17 May", "birth_hour": 3})).unwrap_err();
        assert!(err.to_string().contains("YYYY-MM-DD"));

        let err = validate(serde_json::json!({"birth_date": "1990-05-17", "birth_hour": 24})).unwrap_err();
        assert!(err.to_string().contains("0 to 23"));

        let err = validate(serde_json::json!({"birth_date": "1990-05-17"})).unwrap_err();
        assert!(err.to_string().contains("birth_hour"));

        let err = validate(serde_json::json!({
            "birth_date": "1990-05-17", "birth_hour": 3, "gender": "robot"
        }))
        .unwrap_err();
        assert!(err.to_string().contains("robot"));
    }

    #[tokio::test]
    async fn execute_writes_derived_state() {
        let tool = GenerateChartTool::new();
        let ctx = ctx();
        let args = tool
            .validate(serde_json::json!({"birth_date": "1990-05-17", "birth_hour": 13}))
            .unwrap();

        let result = tool.execute(args, &ctx).await.unwrap();
        assert!(!result.is_error());
        assert_eq!(result.extra["time_index"], 7);

        let artifact = ctx.store.derived_state(&ctx.conversation_id).unwrap();
        assert_eq!(artifact["timeSlot"]["index"], 7);
        assert_eq!(artifact["birthDate"], "1990-05-17");
        assert_eq!(ctx.store.derived_version(&ctx.conversation_id), Some(1));
    }

    #[tokio::test]
    async fn just_after_midnight_reports_late_zi_range() {
        let tool = GenerateChartTool::new();
        let ctx = ctx();
        let args = tool
            .validate(serde_json::json!({"birth_date": "1990-05-17", "birth_hour": 0}))
            .unwrap();

        let result = tool.execute(args, &ctx).await.unwrap();
        assert!(result.result.contains("晚子时"));
        assert!(result.result.contains("23:00-01:00"));
    }

    #[tokio::test]
    async fn execute_on_unknown_conversation_fails_as_data() {
        let tool = GenerateChartTool::new();
        let ctx = ToolContext {
            conversation_id: ziwei_core::ids::ConversationId::new(),
            store: ConversationStore::new(DEFAULT_TTL),
        };
        let args = tool
            .validate(serde_json::json!({"birth_date": "1990-05-17", "birth_hour": 13}))
            .unwrap();

        let err = tool.execute(args, &ctx).await.unwrap_err();
        assert!(err.into_result().result.contains("expired"));
    }
}

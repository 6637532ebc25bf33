//! Offline generator for local runs.
//!
//! Echoes the user, and asks for a chart when the message contains a birth
//! date such as `1990-05-17 13:00`.

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::stream;

use ziwei_core::errors::GenerationError;
use ziwei_core::generation::{GenerationEvent, GenerationRequest, GenerationStream, Generator};
use ziwei_core::messages::{Part, Role};

pub struct EchoGenerator;

fn find_birth_data(text: &str) -> Option<(NaiveDate, u8)> {
    let mut date = None;
    let mut hour = None;
    for token in text.split_whitespace() {
        let token = token.trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '-' && c != ':');
        if date.is_none() {
            date = NaiveDate::parse_from_str(token, "%Y-%m-%d").ok();
        }
        if hour.is_none() {
            if let Some((h, _)) = token.split_once(':') {
                hour = h.parse::<u8>().ok().filter(|h| *h < 24);
            }
        }
    }
    date.map(|d| (d, hour.unwrap_or(12)))
}

fn word_chunks(text: &str) -> Vec<GenerationEvent> {
    let mut events: Vec<GenerationEvent> = text
        .split_inclusive(' ')
        .map(GenerationEvent::text)
        .collect();
    events.push(GenerationEvent::Done);
    events
}

#[async_trait]
impl Generator for EchoGenerator {
    fn name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationStream, GenerationError> {
        let Some(last) = request.history.last() else {
            return Ok(Box::pin(stream::iter(vec![GenerationEvent::Done])));
        };

        // After a tool round, summarize what the tools returned.
        let responses: Vec<String> = last
            .parts
            .iter()
            .filter_map(|p| match p {
                Part::FunctionResponse(r) => r.response["result"].as_str().map(str::to_string),
                _ => None,
            })
            .collect();
        if !responses.is_empty() {
            return Ok(Box::pin(stream::iter(word_chunks(&responses.join(" ")))));
        }

        let text = last.text_content();
        let has_chart_tool = request.tools.iter().any(|t| t.name == "generate_chart");
        if last.role == Role::User && has_chart_tool {
            if let Some((date, hour)) = find_birth_data(&text) {
                return Ok(Box::pin(stream::iter(vec![
                    GenerationEvent::tool_call(
                        "generate_chart",
                        serde_json::json!({
                            "birth_date": date.format("%Y-%m-%d").to_string(),
                            "birth_hour": hour,
                        }),
                    ),
                    GenerationEvent::Done,
                ])));
            }
        }

        Ok(Box::pin(stream::iter(word_chunks(&format!("You said: {text}")))))
    }
}

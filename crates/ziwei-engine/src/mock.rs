use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;

use ziwei_core::errors::GenerationError;
use ziwei_core::generation::{GenerationEvent, GenerationRequest, GenerationStream, Generator};

/// Pre-programmed responses for deterministic testing without a model.
pub enum ScriptedResponse {
    /// Yield a sequence of events.
    Stream(Vec<GenerationEvent>),
    /// Yield the events, then never finish.
    Stall(Vec<GenerationEvent>),
    /// Return an error from the generate() call itself.
    Error(GenerationError),
    /// Wait a duration, then yield the inner response.
    Delay(Duration, Box<ScriptedResponse>),
}

impl ScriptedResponse {
    /// A single text delta followed by Done.
    pub fn text(text: &str) -> Self {
        Self::Stream(vec![GenerationEvent::text(text), GenerationEvent::Done])
    }

    /// One delta per chunk, then Done.
    pub fn chunks(chunks: &[&str]) -> Self {
        let mut events: Vec<GenerationEvent> =
            chunks.iter().map(|c| GenerationEvent::text(*c)).collect();
        events.push(GenerationEvent::Done);
        Self::Stream(events)
    }

    /// A single tool call followed by Done.
    pub fn tool_call(name: &str, args: serde_json::Value) -> Self {
        Self::Stream(vec![GenerationEvent::tool_call(name, args), GenerationEvent::Done])
    }

    /// A stream that ends with an error event.
    pub fn stream_error(error: GenerationError) -> Self {
        Self::Stream(vec![GenerationEvent::Error { error }])
    }

    pub fn delayed(delay: Duration, inner: ScriptedResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Generator that returns scripted responses in order and records every
/// request it saw.
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue another response behind the existing ones.
    pub fn push(&self, response: ScriptedResponse) {
        self.responses.lock().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationStream, GenerationError> {
        let idx = {
            let mut requests = self.requests.lock();
            requests.push(request.clone());
            requests.len() - 1
        };

        let Some(mut current) = self.responses.lock().pop_front() else {
            return Err(GenerationError::Unavailable(format!(
                "ScriptedGenerator: no response configured for call {idx}"
            )));
        };

        // Unroll nested delays iteratively to avoid recursive async.
        loop {
            match current {
                ScriptedResponse::Stream(events) => return Ok(Box::pin(stream::iter(events))),
                ScriptedResponse::Stall(events) => {
                    return Ok(Box::pin(stream::iter(events).chain(stream::pending())))
                }
                ScriptedResponse::Error(e) => return Err(e),
                ScriptedResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}

//! Contract between the gateway and the external generation step.
//!
//! A generator turns a conversation history into a lazy, finite,
//! non-restartable stream of [`GenerationEvent`]s. The consumer drains it and
//! frames the events; cancelling means dropping the stream.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::errors::GenerationError;
use crate::ids::ConversationId;
use crate::messages::{FunctionCall, Message};
use crate::tools::ToolDefinition;

/// Events emitted by one generation pass. Contract:
///
/// (TextDelta | ToolCall)* → (Done | Error)
///
/// A stream that ends without a terminal event is treated as `Done`.
#[derive(Clone, Debug, PartialEq)]
pub enum GenerationEvent {
    TextDelta { delta: String },
    ToolCall(FunctionCall),
    Done,
    Error { error: GenerationError },
}

impl GenerationEvent {
    pub fn text(delta: impl Into<String>) -> Self {
        Self::TextDelta {
            delta: delta.into(),
        }
    }

    pub fn tool_call(name: impl Into<String>, args: serde_json::Value) -> Self {
        Self::ToolCall(FunctionCall {
            name: name.into(),
            args,
        })
    }
}

/// Everything a generator sees for one pass.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
    pub conversation_id: ConversationId,
    pub history: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
}

pub type GenerationStream = Pin<Box<dyn Stream<Item = GenerationEvent> + Send>>;

/// Implemented by whatever produces model output (a hosted model client, a
/// scripted test double, a local echo).
#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GenerationStream, GenerationError>;
}

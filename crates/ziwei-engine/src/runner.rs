use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use ziwei_core::errors::TransportError;
use ziwei_core::events::{EventSink, GatewayEvent};
use ziwei_core::generation::{GenerationEvent, GenerationRequest, Generator};
use ziwei_core::ids::{ConversationId, MessageId};
use ziwei_core::messages::{FunctionCall, Part, Role};
use ziwei_store::ConversationStore;

use crate::dispatcher::Dispatcher;
use crate::error::EngineError;

pub const DEFAULT_MAX_TOOL_ROUNDS: u32 = 8;

/// Configuration for the turn runner.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Generation passes that may end in tool calls before the turn is stopped.
    pub max_tool_rounds: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: DEFAULT_MAX_TOOL_ROUNDS,
        }
    }
}

/// Result of a completed turn.
#[derive(Debug)]
pub struct TurnOutcome {
    pub message_id: MessageId,
    pub tool_rounds: u32,
}

/// What one generation pass produced.
struct Pass {
    parts: Vec<Part>,
    calls: Vec<FunctionCall>,
}

/// Drives one turn: generate → stream tokens → dispatch tool calls → repeat
/// until the generator answers without tools.
///
/// History is committed as it is produced. Cancelling or losing the
/// connection stops the turn but never rolls anything back.
pub struct TurnRunner {
    generator: Arc<dyn Generator>,
    dispatcher: Dispatcher,
    store: ConversationStore,
    config: RunnerConfig,
}

impl TurnRunner {
    pub fn new(
        generator: Arc<dyn Generator>,
        dispatcher: Dispatcher,
        store: ConversationStore,
        config: RunnerConfig,
    ) -> Self {
        Self {
            generator,
            dispatcher,
            store,
            config,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// Run a turn and report any recoverable failure to the client as an
    /// `error` event. Returns the outcome when the turn completed.
    pub async fn run(
        &self,
        conversation_id: &ConversationId,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Option<TurnOutcome> {
        match self.run_turn(conversation_id, sink, cancel).await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                match &e {
                    EngineError::Transport(_) => {
                        warn!(conversation_id = %conversation_id, "connection closed mid-turn, output dropped");
                    }
                    EngineError::Cancelled => {
                        info!(conversation_id = %conversation_id, "turn cancelled");
                    }
                    EngineError::Generation(g) => {
                        warn!(
                            conversation_id = %conversation_id,
                            generator = self.generator.name(),
                            kind = g.error_kind(),
                            error = %g,
                            "generation failed"
                        );
                    }
                    other => {
                        warn!(conversation_id = %conversation_id, error = %other, "turn failed");
                    }
                }
                if let Some(message) = e.client_message() {
                    if sink.send(GatewayEvent::error(message)).await.is_err() {
                        warn!(conversation_id = %conversation_id, "error event dropped, connection closed");
                    }
                }
                None
            }
        }
    }

    #[instrument(
        skip(self, sink, cancel),
        fields(conversation_id = %conversation_id, generator = self.generator.name())
    )]
    pub async fn run_turn(
        &self,
        conversation_id: &ConversationId,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, EngineError> {
        let mut rounds = 0u32;

        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            if sink.is_closed() {
                return Err(TransportError::Closed.into());
            }

            let pass = self.generate_pass(conversation_id, sink, cancel).await?;

            if pass.calls.is_empty() {
                let message = self
                    .store
                    .append_message(conversation_id, Role::Model, pass.parts)
                    .ok_or_else(|| EngineError::UnknownConversation(conversation_id.to_string()))?;
                sink.send(GatewayEvent::MessageEnd {
                    message_id: message.id.clone(),
                })
                .await?;
                debug!(rounds, "turn complete");
                return Ok(TurnOutcome {
                    message_id: message.id,
                    tool_rounds: rounds,
                });
            }

            rounds += 1;
            if rounds > self.config.max_tool_rounds {
                return Err(EngineError::MaxToolRoundsExceeded(self.config.max_tool_rounds));
            }

            sink.send(GatewayEvent::FunctionCalling).await?;
            self.store
                .append_message(conversation_id, Role::Model, pass.parts)
                .ok_or_else(|| EngineError::UnknownConversation(conversation_id.to_string()))?;

            for call in pass.calls {
                self.dispatch_call(conversation_id, call, sink).await?;
            }
        }
    }

    /// Drain one generation stream, forwarding text as it arrives. Parts keep
    /// arrival order, so text before a tool call stays before it.
    async fn generate_pass(
        &self,
        conversation_id: &ConversationId,
        sink: &dyn EventSink,
        cancel: &CancellationToken,
    ) -> Result<Pass, EngineError> {
        let request = GenerationRequest {
            conversation_id: conversation_id.clone(),
            history: self.store.history(conversation_id),
            tools: self.dispatcher.definitions(),
        };
        if request.history.is_empty() {
            return Err(EngineError::UnknownConversation(conversation_id.to_string()));
        }

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            result = self.generator.generate(&request) => result?,
        };

        let mut parts = Vec::new();
        let mut calls = Vec::new();
        let mut text = String::new();

        loop {
            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                event = stream.next() => event,
            };

            match event {
                None | Some(GenerationEvent::Done) => break,
                Some(GenerationEvent::TextDelta { delta }) => {
                    if delta.is_empty() {
                        continue;
                    }
                    text.push_str(&delta);
                    sink.send(GatewayEvent::MessageToken { content: delta }).await?;
                }
                Some(GenerationEvent::ToolCall(call)) => {
                    if !text.is_empty() {
                        parts.push(Part::text(std::mem::take(&mut text)));
                    }
                    parts.push(Part::FunctionCall(call.clone()));
                    calls.push(call);
                }
                Some(GenerationEvent::Error { error }) => return Err(error.into()),
            }
        }

        if !text.is_empty() || parts.is_empty() {
            parts.push(Part::text(text));
        }
        Ok(Pass { parts, calls })
    }

    async fn dispatch_call(
        &self,
        conversation_id: &ConversationId,
        call: FunctionCall,
        sink: &dyn EventSink,
    ) -> Result<(), EngineError> {
        let dispatched = self
            .dispatcher
            .dispatch_tracked(&call.name, call.args, conversation_id)
            .await;

        self.store
            .append_message(
                conversation_id,
                Role::User,
                vec![Part::function_response(call.name, dispatched.result.to_value())],
            )
            .ok_or_else(|| EngineError::UnknownConversation(conversation_id.to_string()))?;

        if let Some(chart_data) = dispatched.artifact {
            sink.send(GatewayEvent::ChartUpdate { chart_data }).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use ziwei_core::errors::{GenerationError, TransportError};
    use ziwei_store::DEFAULT_TTL;

    use crate::mock::{ScriptedGenerator, ScriptedResponse};
    use crate::tools::create_default_registry;

    /// Sink that records events and can be closed.
    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<GatewayEvent>>,
        closed: AtomicBool,
    }

    impl RecordingSink {
        fn types(&self) -> Vec<&'static str> {
            self.events.lock().iter().map(|e| e.event_type()).collect()
        }

        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl EventSink for RecordingSink {
        async fn send(&self, event: GatewayEvent) -> Result<(), TransportError> {
            if self.is_closed() {
                return Err(TransportError::Closed);
            }
            self.events.lock().push(event);
            Ok(())
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    fn setup(responses: Vec<ScriptedResponse>) -> (TurnRunner, Arc<ScriptedGenerator>, ConversationId) {
        let store = ConversationStore::new(DEFAULT_TTL);
        let dispatcher = Dispatcher::new(Arc::new(create_default_registry()), store.clone());
        let generator = Arc::new(ScriptedGenerator::new(responses));
        let id = store.get_or_create(None).id;
        store.append_message(&id, Role::User, vec![Part::text("hello")]);
        let runner = TurnRunner::new(generator.clone(), dispatcher, store, RunnerConfig::default());
        (runner, generator, id)
    }

    #[tokio::test]
    async fn text_turn_streams_tokens_and_ends() {
        let (runner, _, id) = setup(vec![ScriptedResponse::chunks(&["Hel", "lo", "!"])]);
        let sink = RecordingSink::default();

        let outcome = runner
            .run_turn(&id, &sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.tool_rounds, 0);

        assert_eq!(
            sink.types(),
            vec!["message_token", "message_token", "message_token", "message_end"]
        );
        let history = runner.store().history(&id);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Model);
        assert_eq!(history[1].text_content(), "Hello!");
        assert_eq!(history[1].id, outcome.message_id);

        match sink.events.lock().last().unwrap() {
            GatewayEvent::MessageEnd { message_id } => assert_eq!(*message_id, outcome.message_id),
            other => panic!("unexpected {other:?}"),
        };
    }

    #[tokio::test]
    async fn chart_tool_round_emits_chart_update() {
        let (runner, generator, id) = setup(vec![
            ScriptedResponse::Stream(vec![
                GenerationEvent::text("Let me look. "),
                GenerationEvent::tool_call(
                    "generate_chart",
                    serde_json::json!({"birth_date": "1990-05-17", "birth_hour": 13}),
                ),
                GenerationEvent::Done,
            ]),
            ScriptedResponse::text("Here is your chart."),
        ]);
        let sink = RecordingSink::default();

        let outcome = runner
            .run_turn(&id, &sink, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.tool_rounds, 1);
        assert_eq!(
            sink.types(),
            vec![
                "message_token",
                "function_calling",
                "chart_update",
                "message_token",
                "message_end"
            ]
        );

        // user, model(text + call), user(function response), model(text)
        let history = runner.store().history(&id);
        assert_eq!(history.len(), 4);
        assert!(matches!(history[1].parts[0], Part::Text { .. }));
        assert!(matches!(history[1].parts[1], Part::FunctionCall(_)));
        match &history[2].parts[0] {
            Part::FunctionResponse(r) => {
                assert_eq!(r.name, "generate_chart");
                assert_eq!(r.response["time_index"], 7);
            }
            other => panic!("unexpected {other:?}"),
        }

        // The second pass saw the tool result.
        assert_eq!(generator.requests()[1].history.len(), 3);
        assert_eq!(generator.requests()[0].tools.len(), 3);
    }

    #[tokio::test]
    async fn closed_sink_stops_before_generating() {
        let (runner, generator, id) = setup(vec![ScriptedResponse::text("unseen")]);
        let sink = RecordingSink::default();
        sink.close();

        let err = runner
            .run_turn(&id, &sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Transport(TransportError::Closed)));
        assert_eq!(generator.call_count(), 0);
        assert_eq!(runner.store().history(&id).len(), 1);
    }

    #[tokio::test]
    async fn lookup_tool_emits_no_chart_update() {
        let (runner, _, id) = setup(vec![
            ScriptedResponse::tool_call("explain_star", serde_json::json!({"star_name": "ziwei"})),
            ScriptedResponse::text("done"),
        ]);
        let sink = RecordingSink::default();
        runner
            .run_turn(&id, &sink, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!sink.types().contains(&"chart_update"));
    }

    #[tokio::test]
    async fn unknown_tool_does_not_abort_turn() {
        let (runner, _, id) = setup(vec![
            ScriptedResponse::tool_call("summon", serde_json::json!({})),
            ScriptedResponse::text("Sorry, I can't do that."),
        ]);
        let sink = RecordingSink::default();
        runner
            .run_turn(&id, &sink, &CancellationToken::new())
            .await
            .unwrap();

        let history = runner.store().history(&id);
        match &history[2].parts[0] {
            Part::FunctionResponse(r) => {
                assert_eq!(r.response["error"], true);
                assert_eq!(r.response["result"], "No such tool: summon");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(sink.types().last(), Some(&"message_end"));
    }

    #[tokio::test]
    async fn tool_round_cap() {
        let responses = (0..6)
            .map(|_| ScriptedResponse::tool_call("explain_star", serde_json::json!({"star_name": "pojun"})))
            .collect();
        let (runner, _, id) = setup(responses);
        let runner = TurnRunner {
            config: RunnerConfig { max_tool_rounds: 2 },
            ..runner
        };
        let sink = RecordingSink::default();

        let err = runner
            .run_turn(&id, &sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::MaxToolRoundsExceeded(2)));

        // run() reports the same failure as an error event.
        let sink = RecordingSink::default();
        let outcome = runner.run(&id, &sink, &CancellationToken::new()).await;
        assert!(outcome.is_none());
        assert_eq!(sink.types().last(), Some(&"error"));
        match sink.events.lock().last().unwrap() {
            GatewayEvent::Error { error } => assert!(error.contains("too many tool calls")),
            other => panic!("unexpected {other:?}"),
        };
    }

    #[tokio::test]
    async fn generation_error_becomes_error_event() {
        let (runner, _, id) = setup(vec![ScriptedResponse::stream_error(GenerationError::Stream(
            "connection reset".into(),
        ))]);
        let sink = RecordingSink::default();
        assert!(runner.run(&id, &sink, &CancellationToken::new()).await.is_none());

        match &sink.events.lock()[0] {
            GatewayEvent::Error { error } => assert!(error.contains("connection reset")),
            other => panic!("unexpected {other:?}"),
        }
        // The user message stays committed.
        assert_eq!(runner.store().history(&id).len(), 1);
    }

    #[tokio::test]
    async fn closed_sink_stops_turn_without_rollback() {
        let (runner, _, id) = setup(vec![
            ScriptedResponse::tool_call(
                "generate_chart",
                serde_json::json!({"birth_date": "1990-05-17", "birth_hour": 0}),
            ),
            ScriptedResponse::text("never delivered"),
        ]);
        let sink = RecordingSink::default();
        sink.close();

        let err = runner
            .run_turn(&id, &sink, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Transport(TransportError::Closed)));
        assert!(runner.store().history(&id).len() >= 1);

        // run() logs and sends nothing.
        assert!(runner.run(&id, &sink, &CancellationToken::new()).await.is_none());
        assert!(sink.types().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_stalled_generation() {
        let (runner, _, id) = setup(vec![ScriptedResponse::Stall(vec![GenerationEvent::text(
            "partial",
        )])]);
        let sink = RecordingSink::default();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });

        let err = runner.run_turn(&id, &sink, &cancel).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(sink.types(), vec!["message_token"]);
        // Only the user message: the partial reply was never committed.
        assert_eq!(runner.store().history(&id).len(), 1);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let (runner, generator, id) = setup(vec![ScriptedResponse::text("unused")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = runner
            .run_turn(&id, &RecordingSink::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert_eq!(generator.call_count(), 0);
    }

    #[tokio::test]
    async fn unknown_conversation() {
        let (runner, _, _) = setup(vec![ScriptedResponse::text("unused")]);
        let err = runner
            .run_turn(&ConversationId::new(), &RecordingSink::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownConversation(_)));
    }
}

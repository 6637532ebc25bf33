use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, Instrument};

use ziwei_core::messages::{Part, Role};
use ziwei_engine::TurnRunner;
use ziwei_store::ConversationStore;

use crate::error::RouteError;
use crate::transport::{Accepted, InboundHandler, InboundMessage, Transport};

/// Chat handling for an inbound message: commit the user message, then run
/// the turn in the background and stream it down the session's transport.
pub struct ChatHandler {
    store: ConversationStore,
    runner: Arc<TurnRunner>,
}

impl ChatHandler {
    pub fn new(store: ConversationStore, runner: Arc<TurnRunner>) -> Self {
        Self { store, runner }
    }
}

#[async_trait]
impl InboundHandler for ChatHandler {
    async fn handle(
        &self,
        transport: Arc<Transport>,
        message: InboundMessage,
    ) -> Result<Accepted, RouteError> {
        let query = message.query.trim();
        if query.is_empty() {
            return Err(RouteError::InvalidRequest("query is required".into()));
        }

        let guard = transport
            .begin_turn()
            .ok_or_else(|| RouteError::TurnInProgress(transport.session_id().clone()))?;

        let resolved = self.store.get_or_create(message.conversation_id.as_ref());
        let conversation_id = resolved.id;
        self.store
            .append_message(&conversation_id, Role::User, vec![Part::text(query)])
            .ok_or_else(|| RouteError::UnknownConversation(conversation_id.clone()))?;

        debug!(
            session_id = %transport.session_id(),
            conversation_id = %conversation_id,
            is_new = resolved.is_new,
            "message accepted"
        );

        let runner = Arc::clone(&self.runner);
        let turn_conversation = conversation_id.clone();
        let span = tracing::info_span!(
            "turn",
            session_id = %transport.session_id(),
            conversation_id = %conversation_id
        );
        tokio::spawn(
            async move {
                let transport = guard.transport();
                let cancel = transport.cancel_token().child_token();
                runner
                    .run(&turn_conversation, &**transport, &cancel)
                    .await;
                drop(guard);
            }
            .instrument(span),
        );

        Ok(Accepted {
            conversation_id,
            is_new: resolved.is_new,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    use ziwei_core::events::Frame;
    use ziwei_core::generation::GenerationEvent;
    use ziwei_core::ids::{ConversationId, SessionId};
    use ziwei_engine::mock::{ScriptedGenerator, ScriptedResponse};
    use ziwei_engine::tools::create_default_registry;
    use ziwei_engine::{Dispatcher, RunnerConfig};
    use ziwei_store::DEFAULT_TTL;

    use crate::transport::ChannelConnection;

    fn setup(
        responses: Vec<ScriptedResponse>,
    ) -> (Arc<Transport>, mpsc::Receiver<Frame>, ConversationStore) {
        let store = ConversationStore::new(DEFAULT_TTL);
        let dispatcher = Dispatcher::new(Arc::new(create_default_registry()), store.clone());
        let runner = Arc::new(TurnRunner::new(
            Arc::new(ScriptedGenerator::new(responses)),
            dispatcher,
            store.clone(),
            RunnerConfig::default(),
        ));
        let handler = Arc::new(ChatHandler::new(store.clone(), runner));
        let (tx, rx) = mpsc::channel(64);
        let transport = Arc::new(Transport::new(
            SessionId::new(),
            Box::new(ChannelConnection::new(tx)),
            handler,
        ));
        (transport, rx, store)
    }

    fn message(conversation_id: Option<ConversationId>, query: &str) -> InboundMessage {
        InboundMessage {
            conversation_id,
            query: query.into(),
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<Frame>) -> &'static str {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .event
    }

    async fn wait_turn_finished(transport: &Transport) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while transport.turn_active() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn new_conversation_then_follow_up() {
        let (transport, mut rx, store) = setup(vec![
            ScriptedResponse::text("Hi!"),
            ScriptedResponse::text("Again!"),
        ]);

        let first = transport
            .handle_inbound_message(message(None, "hello"))
            .await
            .unwrap();
        assert!(first.is_new);
        let history = store.history(&first.conversation_id);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].text_content(), "hello");

        assert_eq!(next_event(&mut rx).await, "message_token");
        assert_eq!(next_event(&mut rx).await, "message_end");
        wait_turn_finished(&transport).await;

        let second = transport
            .handle_inbound_message(message(Some(first.conversation_id.clone()), "more"))
            .await
            .unwrap();
        assert!(!second.is_new);
        assert_eq!(second.conversation_id, first.conversation_id);

        let history = store.history(&first.conversation_id);
        assert_eq!(history[0].text_content(), "hello");
        assert_eq!(history[2].text_content(), "more");
    }

    #[tokio::test]
    async fn second_message_while_streaming_is_rejected() {
        let (transport, mut rx, _) = setup(vec![ScriptedResponse::Stall(vec![
            GenerationEvent::text("thinking"),
        ])]);

        transport
            .handle_inbound_message(message(None, "hello"))
            .await
            .unwrap();
        assert_eq!(next_event(&mut rx).await, "message_token");

        let err = transport
            .handle_inbound_message(message(None, "again"))
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::TurnInProgress(_)));

        // Closing the session cancels the stalled turn and frees the slot.
        transport.close().await;
        wait_turn_finished(&transport).await;
    }

    #[tokio::test]
    async fn blank_query_rejected() {
        let (transport, _rx, store) = setup(vec![]);
        let err = transport
            .handle_inbound_message(message(None, "   "))
            .await
            .unwrap_err();
        assert!(matches!(err, RouteError::InvalidRequest(_)));
        assert!(store.is_empty());
        assert!(!transport.turn_active());
    }
}

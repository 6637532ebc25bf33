use async_trait::async_trait;
use serde_json::json;

use crate::errors::TransportError;
use crate::ids::{MessageId, SessionId};

/// Events pushed down a session's streaming connection.
///
/// Ordered and delivered at most once. Nothing is replayed on reconnect.
#[derive(Clone, Debug, PartialEq)]
pub enum GatewayEvent {
    Connected { session_id: SessionId },
    /// The generation step requested a tool call.
    FunctionCalling,
    MessageToken { content: String },
    /// A tool call produced a new artifact. Replaces any prior one.
    ChartUpdate { chart_data: serde_json::Value },
    MessageEnd { message_id: MessageId },
    /// Recoverable fault. The connection stays open.
    Error { error: String },
}

impl GatewayEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::FunctionCalling => "function_calling",
            Self::MessageToken { .. } => "message_token",
            Self::ChartUpdate { .. } => "chart_update",
            Self::MessageEnd { .. } => "message_end",
            Self::Error { .. } => "error",
        }
    }

    pub fn payload(&self) -> serde_json::Value {
        match self {
            Self::Connected { session_id } => json!({
                "status": "connected",
                "sessionId": session_id,
            }),
            Self::FunctionCalling => json!({}),
            Self::MessageToken { content } => json!({ "content": content }),
            Self::ChartUpdate { chart_data } => json!({ "chartData": chart_data }),
            Self::MessageEnd { message_id } => json!({ "message_id": message_id }),
            Self::Error { error } => json!({ "error": error }),
        }
    }

    pub fn to_frame(&self) -> Frame {
        Frame {
            event: self.event_type(),
            data: self.payload().to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            error: message.into(),
        }
    }
}

/// A fully serialized event, ready to be written as one unit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub event: &'static str,
    pub data: String,
}

/// Destination for gateway events. Implemented by the per-session transport.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: GatewayEvent) -> Result<(), TransportError>;
    fn is_closed(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connected_frame_carries_session_id() {
        let sid = SessionId::from_raw("sess_1");
        let frame = GatewayEvent::Connected { session_id: sid }.to_frame();
        assert_eq!(frame.event, "connected");
        let data: serde_json::Value = serde_json::from_str(&frame.data).unwrap();
        assert_eq!(data["status"], "connected");
        assert_eq!(data["sessionId"], "sess_1");
    }

    #[test]
    fn function_calling_has_empty_payload() {
        let frame = GatewayEvent::FunctionCalling.to_frame();
        assert_eq!(frame.event, "function_calling");
        assert_eq!(frame.data, "{}");
    }

    #[test]
    fn token_and_end_payloads() {
        let frame = GatewayEvent::MessageToken {
            content: "Hel".into(),
        }
        .to_frame();
        assert_eq!(frame.event, "message_token");
        assert_eq!(frame.data, r#"{"content":"Hel"}"#);

        let frame = GatewayEvent::MessageEnd {
            message_id: MessageId::from_raw("msg_9"),
        }
        .to_frame();
        assert_eq!(frame.event, "message_end");
        assert_eq!(frame.data, r#"{"message_id":"msg_9"}"#);
    }

    #[test]
    fn chart_update_wraps_artifact() {
        let event = GatewayEvent::ChartUpdate {
            chart_data: json!({"palaces": []}),
        };
        let data = event.payload();
        assert!(data["chartData"]["palaces"].is_array());
        assert_eq!(event.event_type(), "chart_update");
    }

    #[test]
    fn error_event() {
        let event = GatewayEvent::error("generation unavailable");
        assert_eq!(event.event_type(), "error");
        assert_eq!(event.payload()["error"], "generation unavailable");
    }
}

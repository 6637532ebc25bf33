//! HTTP request and response bodies.

use serde::{Deserialize, Serialize};

use ziwei_core::ids::{ConversationId, SessionId};
use ziwei_core::messages::Message;

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SseQuery {
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Body of `POST /message`. An empty `conversationId` means "start a new one".
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub query: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedResponse {
    pub status: &'static str,
    pub session_id: SessionId,
    pub conversation_id: ConversationId,
    pub is_new: bool,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub conversation_id: ConversationId,
    pub messages: Vec<Message>,
}

#[derive(Clone, Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
    pub conversations: usize,
}

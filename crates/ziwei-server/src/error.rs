use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use ziwei_core::ids::{ConversationId, SessionId};

/// Failures reported to the out-of-band caller. All are client-recoverable.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("unknown or expired session: {0}")]
    UnknownSession(SessionId),

    #[error("unknown or expired conversation: {0}")]
    UnknownConversation(ConversationId),

    #[error("a reply is still streaming for session {0}")]
    TurnInProgress(SessionId),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl RouteError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UnknownSession(_) | Self::UnknownConversation(_) => StatusCode::NOT_FOUND,
            Self::TurnInProgress(_) => StatusCode::CONFLICT,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownSession(_) => "SESSION_EXPIRED",
            Self::UnknownConversation(_) => "CONVERSATION_EXPIRED",
            Self::TurnInProgress(_) => "TURN_IN_PROGRESS",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }

    fn client_message(&self) -> String {
        match self {
            Self::UnknownSession(_) => "Session expired. Please reconnect.".into(),
            Self::UnknownConversation(_) => {
                "Conversation expired. Please start a new conversation.".into()
            }
            Self::TurnInProgress(_) => {
                "Please wait for the current reply to finish.".into()
            }
            Self::InvalidRequest(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.client_message(),
            "code": self.code(),
        });
        (self.status(), Json(body)).into_response()
    }
}

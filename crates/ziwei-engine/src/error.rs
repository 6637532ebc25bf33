use ziwei_core::errors::{GenerationError, TransportError};

/// Why a turn ended early.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("unknown conversation: {0}")]
    UnknownConversation(String),

    #[error("turn cancelled")]
    Cancelled,

    #[error("max tool rounds exceeded: {0}")]
    MaxToolRoundsExceeded(u32),
}

impl EngineError {
    /// Message sent to the client in an `error` event, if one should be sent.
    pub fn client_message(&self) -> Option<String> {
        match self {
            Self::Generation(GenerationError::Cancelled) | Self::Cancelled => None,
            Self::Transport(_) => None,
            Self::Generation(e) => Some(format!("The assistant is unavailable right now: {e}")),
            Self::UnknownConversation(_) => {
                Some("This conversation has expired. Please start a new one.".into())
            }
            Self::MaxToolRoundsExceeded(n) => Some(format!(
                "The assistant requested too many tool calls ({n} rounds) and was stopped."
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_and_closed_are_silent() {
        assert!(EngineError::Cancelled.client_message().is_none());
        assert!(EngineError::Transport(TransportError::Closed)
            .client_message()
            .is_none());
        assert!(EngineError::Generation(GenerationError::Cancelled)
            .client_message()
            .is_none());
    }

    #[test]
    fn recoverable_errors_have_messages() {
        let msg = EngineError::MaxToolRoundsExceeded(8).client_message().unwrap();
        assert!(msg.contains('8'));
        let msg = EngineError::Generation(GenerationError::Unavailable("down".into()))
            .client_message()
            .unwrap();
        assert!(msg.contains("down"));
    }
}

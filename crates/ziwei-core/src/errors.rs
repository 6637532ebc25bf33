/// The underlying connection of a transport is gone.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,
}

/// Failures of the external generation step.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GenerationError {
    #[error("generator unavailable: {0}")]
    Unavailable(String),
    #[error("stream failed: {0}")]
    Stream(String),
    #[error("cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::Stream(_) => "stream",
            Self::Cancelled => "cancelled",
        }
    }
}

use std::sync::Arc;

use tracing::warn;

use ziwei_core::ids::SessionId;

use crate::error::RouteError;
use crate::registry::SessionRegistry;
use crate::transport::{Accepted, InboundMessage};

/// Addresses out-of-band requests to the transport of their session. Does
/// not look at message contents.
#[derive(Clone)]
pub struct MessageRouter {
    registry: Arc<SessionRegistry>,
}

impl MessageRouter {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub async fn route(
        &self,
        session_id: &SessionId,
        message: InboundMessage,
    ) -> Result<Accepted, RouteError> {
        let transport = self.registry.lookup(session_id).inspect_err(|_| {
            warn!(session_id = %session_id, "message for unknown session");
        })?;
        transport.handle_inbound_message(message).await
    }
}

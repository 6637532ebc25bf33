//! Side A: the long-lived SSE stream a session lives on.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use ziwei_core::events::{Frame, GatewayEvent};
use ziwei_core::ids::SessionId;

use crate::registry::SessionRegistry;
use crate::server::AppState;
use crate::transport::{ChannelConnection, Transport};
use crate::wire::SseQuery;

/// Unregisters the session when the response body is dropped, which is how
/// a client disconnect surfaces.
struct SessionGuard {
    registry: Arc<SessionRegistry>,
    transport: Arc<Transport>,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let registry = Arc::clone(&self.registry);
        let transport = Arc::clone(&self.transport);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if registry.unregister_transport(&transport).await {
                        debug!(session_id = %transport.session_id(), "client disconnected");
                    }
                });
            }
            Err(_) => warn!(session_id = %transport.session_id(), "no runtime to close session"),
        }
    }
}

fn to_sse_event(frame: Frame) -> Event {
    Event::default().event(frame.event).data(frame.data)
}

/// GET /sse: open a session and stream its events.
pub async fn sse_handler(
    State(state): State<AppState>,
    Query(query): Query<SseQuery>,
) -> impl IntoResponse {
    let session_id =
        SessionId::parse_optional(query.session_id.as_deref()).unwrap_or_default();

    let (tx, rx) = mpsc::channel::<Frame>(state.config.send_queue);
    let transport = Arc::new(Transport::new(
        session_id.clone(),
        Box::new(ChannelConnection::new(tx)),
        Arc::clone(&state.handler),
    ));

    state.registry.register(Arc::clone(&transport)).await;
    if transport
        .send(GatewayEvent::Connected {
            session_id: session_id.clone(),
        })
        .await
        .is_err()
    {
        warn!(session_id = %session_id, "connected event dropped");
    }

    let guard = SessionGuard {
        registry: Arc::clone(&state.registry),
        transport,
    };
    let stream = ReceiverStream::new(rx).map(move |frame| {
        let _guard = &guard;
        Ok::<_, Infallible>(to_sse_event(frame))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(state.config.keep_alive))
}

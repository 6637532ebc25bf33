//! Per-session streaming transport.
//!
//! A transport is `Open` until `close()` (or a failed write) moves it to
//! `Closed`, which is terminal. Writes hold the connection lock for the whole
//! frame, so a concurrent close either waits for the frame or finds the
//! connection already gone; no frame is ever half-written.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use ziwei_core::errors::TransportError;
use ziwei_core::events::{EventSink, Frame, GatewayEvent};
use ziwei_core::ids::{ConversationId, SessionId};

use crate::error::RouteError;

/// The underlying connection resource of a transport.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Write one complete frame.
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// False once the peer is gone.
    fn is_open(&self) -> bool;
}

/// Connection backed by the queue that feeds an SSE response body.
pub struct ChannelConnection {
    tx: mpsc::Sender<Frame>,
}

impl ChannelConnection {
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl Connection for ChannelConnection {
    async fn write_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.tx.send(frame).await.map_err(|_| TransportError::Closed)
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// A client request delivered out-of-band for one session.
#[derive(Clone, Debug)]
pub struct InboundMessage {
    pub conversation_id: Option<ConversationId>,
    pub query: String,
}

/// Result reported back to the out-of-band caller.
#[derive(Clone, Debug, PartialEq)]
pub struct Accepted {
    pub conversation_id: ConversationId,
    pub is_new: bool,
}

/// Interprets inbound messages for a transport.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    async fn handle(
        &self,
        transport: Arc<Transport>,
        message: InboundMessage,
    ) -> Result<Accepted, RouteError>;
}

pub struct Transport {
    session_id: SessionId,
    connection: Mutex<Option<Box<dyn Connection>>>,
    closed: AtomicBool,
    cancel: CancellationToken,
    turn_active: AtomicBool,
    handler: Arc<dyn InboundHandler>,
}

impl Transport {
    pub fn new(
        session_id: SessionId,
        connection: Box<dyn Connection>,
        handler: Arc<dyn InboundHandler>,
    ) -> Self {
        Self {
            session_id,
            connection: Mutex::new(Some(connection)),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            turn_active: AtomicBool::new(false),
            handler,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Frame and write one event.
    pub async fn send(&self, event: GatewayEvent) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        let mut conn = self.connection.lock().await;
        let Some(connection) = conn.as_mut() else {
            return Err(TransportError::Closed);
        };

        // A stalled peer must not hold the lock past close(). Dropping the
        // pending write is safe because a frame is enqueued whole or not at all.
        let frame = event.to_frame();
        let written = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(TransportError::Closed),
            result = connection.write_frame(frame) => result,
        };
        if let Err(e) = written {
            debug!(session_id = %self.session_id, "write failed, closing transport");
            self.closed.store(true, Ordering::Release);
            self.cancel.cancel();
            conn.take();
            return Err(e);
        }
        Ok(())
    }

    /// Close the transport. Safe to call any number of times, concurrently
    /// with `send`; the connection is released exactly once.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.cancel.cancel();
        let released = self.connection.lock().await.take();
        if released.is_some() {
            info!(session_id = %self.session_id, "session closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// False when closed or the peer has gone away without a clean close.
    pub fn is_alive(&self) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.connection.try_lock() {
            Ok(conn) => conn.as_ref().is_some_and(|c| c.is_open()),
            // A write is in flight.
            Err(_) => true,
        }
    }

    /// Cancelled when the transport closes.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Claim the single turn slot of this session.
    pub fn begin_turn(self: &Arc<Self>) -> Option<TurnGuard> {
        self.turn_active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TurnGuard {
                transport: Arc::clone(self),
            })
    }

    pub fn turn_active(&self) -> bool {
        self.turn_active.load(Ordering::Acquire)
    }

    /// Entry point used by the router.
    pub async fn handle_inbound_message(
        self: &Arc<Self>,
        message: InboundMessage,
    ) -> Result<Accepted, RouteError> {
        self.handler.handle(Arc::clone(self), message).await
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("session_id", &self.session_id)
            .field("closed", &self.is_closed())
            .field("turn_active", &self.turn_active())
            .finish_non_exhaustive()
    }
}

/// Releases the turn slot on drop.
pub struct TurnGuard {
    transport: Arc<Transport>,
}

impl TurnGuard {
    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.transport.turn_active.store(false, Ordering::Release);
    }
}

#[async_trait]
impl EventSink for Transport {
    async fn send(&self, event: GatewayEvent) -> Result<(), TransportError> {
        Transport::send(self, event).await
    }

    fn is_closed(&self) -> bool {
        Transport::is_closed(self)
    }
}

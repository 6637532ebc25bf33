use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use ziwei_core::ids::SessionId;

use crate::error::RouteError;
use crate::transport::Transport;

/// Open sessions keyed by session id. At most one transport per id.
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Transport>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Register a transport under its session id. A transport already
    /// registered under that id is replaced and closed.
    pub async fn register(&self, transport: Arc<Transport>) -> SessionId {
        let id = transport.session_id().clone();
        let previous = self.sessions.insert(id.clone(), Arc::clone(&transport));

        if let Some(previous) = previous {
            if !Arc::ptr_eq(&previous, &transport) {
                info!(session_id = %id, "session replaced, closing previous transport");
                previous.close().await;
            }
        }
        info!(session_id = %id, sessions = self.sessions.len(), "session opened");
        id
    }

    pub fn lookup(&self, id: &SessionId) -> Result<Arc<Transport>, RouteError> {
        self.sessions
            .get(id)
            .map(|t| Arc::clone(t.value()))
            .ok_or_else(|| RouteError::UnknownSession(id.clone()))
    }

    /// Remove and close. Unknown ids are a no-op.
    pub async fn unregister(&self, id: &SessionId) -> bool {
        match self.sessions.remove(id) {
            Some((_, transport)) => {
                transport.close().await;
                true
            }
            None => false,
        }
    }

    /// Remove `transport` only if it is still the one registered for its id.
    /// Used when a connection ends, so it cannot evict its replacement.
    pub async fn unregister_transport(&self, transport: &Arc<Transport>) -> bool {
        let removed = self
            .sessions
            .remove_if(transport.session_id(), |_, current| Arc::ptr_eq(current, transport));
        transport.close().await;
        removed.is_some()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    /// Unregister transports whose connection has gone away.
    pub async fn cleanup_closed(&self) -> usize {
        let dead: Vec<Arc<Transport>> = self
            .sessions
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut removed = 0;
        for transport in dead {
            if self.unregister_transport(&transport).await {
                removed += 1;
                debug!(session_id = %transport.session_id(), "cleaned up dead session");
            }
        }
        removed
    }

    /// Close every session. Used on shutdown.
    pub async fn close_all(&self) -> usize {
        let ids: Vec<SessionId> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let mut closed = 0;
        for id in ids {
            if self.unregister(&id).await {
                closed += 1;
            }
        }
        closed
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Start a background task that periodically removes dead sessions.
pub fn start_cleanup_task(
    registry: Arc<SessionRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = registry.cleanup_closed().await;
            if removed > 0 {
                warn!(removed, "removed sessions whose client vanished");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    use crate::transport::tests::{counting_transport, NoopHandler};
    use crate::transport::ChannelConnection;

    #[tokio::test]
    async fn register_lookup_unregister() {
        let registry = SessionRegistry::new();
        let (transport, _, released) = counting_transport();

        let id = registry.register(transport.clone()).await;
        assert_eq!(&id, transport.session_id());
        assert_eq!(registry.count(), 1);
        assert!(Arc::ptr_eq(&registry.lookup(&id).unwrap(), &transport));

        assert!(registry.unregister(&id).await);
        assert_eq!(registry.count(), 0);
        assert!(transport.is_closed());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let registry = SessionRegistry::new();
        let (transport, _, released) = counting_transport();
        let id = registry.register(transport).await;

        assert!(registry.unregister(&id).await);
        assert!(!registry.unregister(&id).await);
        assert!(!registry.unregister(&SessionId::new()).await);
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lookup_miss_is_unknown_session() {
        let registry = SessionRegistry::new();
        let err = registry.lookup(&SessionId::from_raw("sess_gone")).unwrap_err();
        assert!(matches!(err, RouteError::UnknownSession(_)));
    }

    #[tokio::test]
    async fn duplicate_id_replaces_and_closes_previous() {
        let registry = SessionRegistry::new();
        let (first, _, first_released) = counting_transport();
        let id = registry.register(first.clone()).await;

        let (tx, _rx) = mpsc::channel(4);
        let second = Arc::new(Transport::new(
            id.clone(),
            Box::new(ChannelConnection::new(tx)),
            Arc::new(NoopHandler),
        ));
        registry.register(second.clone()).await;

        assert_eq!(registry.count(), 1);
        assert!(first.is_closed());
        assert_eq!(first_released.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&registry.lookup(&id).unwrap(), &second));

        // The replaced transport ending must not remove its successor.
        assert!(!registry.unregister_transport(&first).await);
        assert!(Arc::ptr_eq(&registry.lookup(&id).unwrap(), &second));
    }

    #[tokio::test]
    async fn concurrent_register_unregister_keeps_one_transport_per_id() {
        let registry = Arc::new(SessionRegistry::new());
        let id = SessionId::new();

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let registry = registry.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    if i % 3 == 0 {
                        registry.unregister(&id).await;
                    } else {
                        let (tx, _rx) = mpsc::channel(1);
                        let t = Arc::new(Transport::new(
                            id,
                            Box::new(ChannelConnection::new(tx)),
                            Arc::new(NoopHandler),
                        ));
                        registry.register(t).await;
                    }
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }
        assert!(registry.count() <= 1);
    }

    #[tokio::test]
    async fn cleanup_removes_vanished_clients() {
        let registry = SessionRegistry::new();
        let (tx, rx) = mpsc::channel(4);
        let dead = Arc::new(Transport::new(
            SessionId::new(),
            Box::new(ChannelConnection::new(tx)),
            Arc::new(NoopHandler),
        ));
        let (alive, _, _) = counting_transport();
        registry.register(dead.clone()).await;
        registry.register(alive.clone()).await;

        drop(rx);
        assert_eq!(registry.cleanup_closed().await, 1);
        assert_eq!(registry.count(), 1);
        assert!(registry.lookup(alive.session_id()).is_ok());
        assert!(dead.is_closed());
    }

    #[tokio::test]
    async fn close_all() {
        let registry = SessionRegistry::new();
        for _ in 0..3 {
            let (t, _, _) = counting_transport();
            registry.register(t).await;
        }
        assert_eq!(registry.close_all().await, 3);
        assert_eq!(registry.count(), 0);
    }
}

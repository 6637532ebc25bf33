use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use ziwei_core::generation::Generator;
use ziwei_core::ids::{ConversationId, SessionId};
use ziwei_engine::tools::create_default_registry;
use ziwei_engine::{Dispatcher, RunnerConfig, TurnRunner};
use ziwei_store::{start_sweep_task, ConversationMirror, ConversationStore};

use crate::error::RouteError;
use crate::handler::ChatHandler;
use crate::registry::{self, SessionRegistry};
use crate::router::MessageRouter;
use crate::sse::sse_handler;
use crate::transport::{InboundHandler, InboundMessage};
use crate::wire::{AcceptedResponse, HealthResponse, HistoryResponse, MessageRequest};

/// Gateway configuration.
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub port: u16,
    pub bind_address: String,
    /// Frames buffered per connection before writes wait.
    pub send_queue: usize,
    pub conversation_ttl: Duration,
    pub sweep_interval: Duration,
    pub session_cleanup_interval: Duration,
    pub keep_alive: Duration,
    pub tool_timeout: Duration,
    pub max_tool_rounds: u32,
    /// SQLite file for the persistence mirror. None disables mirroring.
    pub mirror_path: Option<PathBuf>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: 9092,
            bind_address: "0.0.0.0".into(),
            send_queue: 256,
            conversation_ttl: ziwei_store::DEFAULT_TTL,
            sweep_interval: Duration::from_secs(60 * 60),
            session_cleanup_interval: Duration::from_secs(60),
            keep_alive: Duration::from_secs(15),
            tool_timeout: ziwei_engine::dispatcher::DEFAULT_TOOL_TIMEOUT,
            max_tool_rounds: ziwei_engine::runner::DEFAULT_MAX_TOOL_ROUNDS,
            mirror_path: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("sweep interval ({sweep:?}) must not exceed the conversation TTL ({ttl:?})")]
    SweepExceedsTtl { sweep: Duration, ttl: Duration },
}

impl GatewayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("conversation_ttl", self.conversation_ttl),
            ("sweep_interval", self.sweep_interval),
            ("session_cleanup_interval", self.session_cleanup_interval),
            ("keep_alive", self.keep_alive),
            ("tool_timeout", self.tool_timeout),
        ];
        for (name, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.send_queue == 0 {
            return Err(ConfigError::Zero("send_queue"));
        }
        if self.max_tool_rounds == 0 {
            return Err(ConfigError::Zero("max_tool_rounds"));
        }
        if self.sweep_interval > self.conversation_ttl {
            return Err(ConfigError::SweepExceedsTtl {
                sweep: self.sweep_interval,
                ttl: self.conversation_ttl,
            });
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("bind failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub registry: Arc<SessionRegistry>,
    pub router: MessageRouter,
    pub store: ConversationStore,
    pub handler: Arc<dyn InboundHandler>,
}

impl AppState {
    /// Wire the gateway components around a generator.
    pub fn new(
        config: GatewayConfig,
        generator: Arc<dyn Generator>,
        mirror: Option<Arc<dyn ConversationMirror>>,
    ) -> Self {
        let store = match mirror {
            Some(mirror) => ConversationStore::with_mirror(config.conversation_ttl, mirror),
            None => ConversationStore::new(config.conversation_ttl),
        };

        let dispatcher = Dispatcher::new(Arc::new(create_default_registry()), store.clone())
            .with_tool_timeout(config.tool_timeout);
        let runner = Arc::new(TurnRunner::new(
            generator,
            dispatcher,
            store.clone(),
            RunnerConfig {
                max_tool_rounds: config.max_tool_rounds,
            },
        ));

        let registry = Arc::new(SessionRegistry::new());
        Self {
            config: Arc::new(config),
            router: MessageRouter::new(Arc::clone(&registry)),
            registry,
            handler: Arc::new(ChatHandler::new(store.clone(), runner)),
            store,
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/sse", get(sse_handler))
        .route("/message", post(message_handler))
        .route("/sessions/{session_id}", delete(close_session_handler))
        .route(
            "/conversations/{conversation_id}/messages",
            get(history_handler),
        )
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Create and start the server. Returns a handle to shut it down.
pub async fn start(
    config: GatewayConfig,
    generator: Arc<dyn Generator>,
    mirror: Option<Arc<dyn ConversationMirror>>,
) -> Result<ServerHandle, ServerError> {
    config.validate()?;

    let state = AppState::new(config, generator, mirror);
    let config = Arc::clone(&state.config);

    let sweep = start_sweep_task(state.store.clone(), config.sweep_interval);
    let cleanup = registry::start_cleanup_task(
        Arc::clone(&state.registry),
        config.session_cleanup_interval,
    );

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    info!(
        port = local_addr.port(),
        ttl_secs = config.conversation_ttl.as_secs(),
        "gateway started"
    );

    let shutdown = CancellationToken::new();
    let router = build_router(state.clone());
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(server_shutdown.cancelled_owned())
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        state,
        shutdown,
        server,
        background: vec![sweep, cleanup],
    })
}

/// Handle returned by `start()`. Keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    state: AppState,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
    background: Vec<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Close every session, stop accepting connections and wait for the
    /// server task to finish.
    pub async fn shutdown(self) {
        let closed = self.state.registry.close_all().await;
        info!(sessions = closed, "shutting down");
        self.shutdown.cancel();
        for task in &self.background {
            task.abort();
        }
        if tokio::time::timeout(Duration::from_secs(5), self.server)
            .await
            .is_err()
        {
            tracing::warn!("server did not stop within 5s");
        }
    }
}

/// POST /message: side B of a session.
async fn message_handler(
    State(state): State<AppState>,
    payload: Result<Json<MessageRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<AcceptedResponse>), RouteError> {
    let Json(request) = payload.map_err(|e| RouteError::InvalidRequest(e.body_text()))?;

    let session_id = SessionId::parse_optional(request.session_id.as_deref())
        .ok_or_else(|| RouteError::InvalidRequest("sessionId is required".into()))?;

    let message = InboundMessage {
        conversation_id: ConversationId::parse_optional(request.conversation_id.as_deref()),
        query: request.query,
    };

    let accepted = state.router.route(&session_id, message).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(AcceptedResponse {
            status: "accepted",
            session_id,
            conversation_id: accepted.conversation_id,
            is_new: accepted.is_new,
        }),
    ))
}

/// DELETE /sessions/{session_id}
async fn close_session_handler(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> StatusCode {
    state.registry.unregister(&SessionId::from_raw(session_id)).await;
    StatusCode::NO_CONTENT
}

/// GET /conversations/{conversation_id}/messages
async fn history_handler(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Json<HistoryResponse> {
    let conversation_id = ConversationId::from_raw(conversation_id);
    let messages = state.store.history(&conversation_id);
    Json(HistoryResponse {
        conversation_id,
        messages,
    })
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        sessions: state.registry.count(),
        conversations: state.store.len(),
    })
}

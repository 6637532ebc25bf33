use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument, warn};

use ziwei_core::ids::ConversationId;
use ziwei_core::tools::{ToolDefinition, ToolResult};
use ziwei_store::ConversationStore;

use crate::registry::ToolRegistry;
use crate::tool::{ToolContext, ToolError};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// A tool result plus the artifact the call wrote, if it wrote one.
#[derive(Clone, Debug)]
pub struct Dispatched {
    pub result: ToolResult,
    pub artifact: Option<serde_json::Value>,
}

impl Dispatched {
    fn without_artifact(result: ToolResult) -> Self {
        Self {
            result,
            artifact: None,
        }
    }
}

/// Resolves named tool calls against the registry.
///
/// Calls for the same conversation are serialized on that conversation's
/// dispatch lock; calls for different conversations run in parallel.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    store: ConversationStore,
    tool_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, store: ConversationStore) -> Self {
        Self {
            registry,
            store,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.registry.definitions()
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run one tool call. Never fails: unknown tools, bad arguments, handler
    /// errors and timeouts all come back as error payloads.
    pub async fn dispatch(
        &self,
        name: &str,
        args: serde_json::Value,
        conversation_id: &ConversationId,
    ) -> ToolResult {
        self.dispatch_tracked(name, args, conversation_id).await.result
    }

    /// Like `dispatch`, and also returns the artifact this call wrote. The
    /// artifact version is compared under the dispatch lock, so a write by a
    /// concurrent call on the same conversation is never attributed here.
    #[instrument(skip(self, args), fields(conversation_id = %conversation_id, tool = name))]
    pub async fn dispatch_tracked(
        &self,
        name: &str,
        args: serde_json::Value,
        conversation_id: &ConversationId,
    ) -> Dispatched {
        let Some(tool) = self.registry.get(name) else {
            warn!("unknown tool requested");
            return Dispatched::without_artifact(ToolResult::unknown_tool(name));
        };

        let args = match tool.validate(args) {
            Ok(args) => args,
            Err(e) => {
                debug!(error = %e, "tool arguments rejected");
                return Dispatched::without_artifact(e.into_result());
            }
        };

        let lock = self.store.dispatch_lock(conversation_id);
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let ctx = ToolContext {
            conversation_id: conversation_id.clone(),
            store: self.store.clone(),
        };

        let version_before = self.store.derived_version(conversation_id);
        let start = Instant::now();
        let outcome = tokio::time::timeout(self.tool_timeout, tool.execute(args, &ctx)).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => e.into_result(),
            Err(_) => {
                warn!(
                    timeout_secs = self.tool_timeout.as_secs(),
                    "tool timed out"
                );
                ToolError::Timeout(self.tool_timeout).into_result()
            }
        };

        let artifact = if self.store.derived_version(conversation_id) > version_before {
            self.store.derived_state(conversation_id)
        } else {
            None
        };

        debug!(
            duration_ms,
            is_error = result.is_error(),
            wrote_artifact = artifact.is_some(),
            "tool dispatched"
        );
        Dispatched { result, artifact }
    }
}

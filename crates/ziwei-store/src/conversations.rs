//! In-memory conversation store.
//!
//! Each conversation lives behind its own lock; the map only hands out
//! `Arc`s to entries, so unrelated conversations never contend. Eviction takes
//! the same per-conversation lock before removing an entry and marks it
//! evicted, so a caller that fetched the entry just before the sweep sees it
//! as unknown instead of writing into a detached conversation.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use ziwei_core::ids::ConversationId;
use ziwei_core::messages::{Message, Part, Role};

use crate::mirror::ConversationMirror;

/// Reference time-to-live for idle conversations.
pub const DEFAULT_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Point-in-time copy of a conversation.
#[derive(Clone, Debug)]
pub struct ConversationSnapshot {
    pub id: ConversationId,
    pub history: Vec<Message>,
    pub derived_state: Option<serde_json::Value>,
    pub derived_version: u64,
    pub created_at: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

/// Result of [`ConversationStore::get_or_create`].
#[derive(Clone, Debug)]
pub struct Resolved {
    pub id: ConversationId,
    pub conversation: ConversationSnapshot,
    pub is_new: bool,
}

struct Conversation {
    id: ConversationId,
    history: Vec<Message>,
    derived_state: Option<serde_json::Value>,
    derived_version: u64,
    created_at: DateTime<Utc>,
    last_access: DateTime<Utc>,
    evicted: bool,
}

impl Conversation {
    fn new(id: ConversationId) -> Self {
        let now = Utc::now();
        Self {
            id,
            history: Vec::new(),
            derived_state: None,
            derived_version: 0,
            created_at: now,
            last_access: now,
            evicted: false,
        }
    }

    fn touch(&mut self) {
        self.last_access = Utc::now();
    }

    fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            id: self.id.clone(),
            history: self.history.clone(),
            derived_state: self.derived_state.clone(),
            derived_version: self.derived_version,
            created_at: self.created_at,
            last_access: self.last_access,
        }
    }
}

struct Entry {
    state: Mutex<Conversation>,
    dispatch_lock: Arc<tokio::sync::Mutex<()>>,
}

impl Entry {
    fn new(id: ConversationId) -> Self {
        Self {
            state: Mutex::new(Conversation::new(id)),
            dispatch_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }
}

struct StoreInner {
    conversations: DashMap<ConversationId, Arc<Entry>>,
    ttl: chrono::Duration,
    mirror: Option<Arc<dyn ConversationMirror>>,
}

/// Shared handle to the conversation table. Cloning is cheap.
#[derive(Clone)]
pub struct ConversationStore {
    inner: Arc<StoreInner>,
}

impl ConversationStore {
    pub fn new(ttl: Duration) -> Self {
        Self::build(ttl, None)
    }

    pub fn with_mirror(ttl: Duration, mirror: Arc<dyn ConversationMirror>) -> Self {
        Self::build(ttl, Some(mirror))
    }

    fn build(ttl: Duration, mirror: Option<Arc<dyn ConversationMirror>>) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            inner: Arc::new(StoreInner {
                conversations: DashMap::new(),
                ttl,
                mirror,
            }),
        }
    }

    fn entry(&self, id: &ConversationId) -> Option<Arc<Entry>> {
        self.inner.conversations.get(id).map(|e| Arc::clone(e.value()))
    }

    /// Return the conversation for `id` if it is known; otherwise allocate a
    /// fresh id and an empty conversation. Never fails.
    pub fn get_or_create(&self, id: Option<&ConversationId>) -> Resolved {
        if let Some(entry) = id.and_then(|id| self.entry(id)) {
            let mut conv = entry.state.lock();
            if !conv.evicted {
                conv.touch();
                return Resolved {
                    id: conv.id.clone(),
                    conversation: conv.snapshot(),
                    is_new: false,
                };
            }
        }

        let new_id = ConversationId::new();
        let entry = Arc::new(Entry::new(new_id.clone()));
        let conversation = entry.state.lock().snapshot();
        self.inner.conversations.insert(new_id.clone(), entry);
        debug!(conversation_id = %new_id, "conversation created");

        Resolved {
            id: new_id,
            conversation,
            is_new: true,
        }
    }

    /// Append a message. Returns `None` (and logs) if the conversation is
    /// unknown; call [`get_or_create`](Self::get_or_create) first.
    pub fn append_message(
        &self,
        id: &ConversationId,
        role: Role,
        parts: Vec<Part>,
    ) -> Option<Message> {
        let Some(entry) = self.entry(id) else {
            warn!(conversation_id = %id, "append to unknown conversation");
            return None;
        };

        let mut conv = entry.state.lock();
        if conv.evicted {
            warn!(conversation_id = %id, "append to evicted conversation");
            return None;
        }

        let message = Message::new(role, parts);
        conv.history.push(message.clone());
        conv.touch();

        if let Some(mirror) = &self.inner.mirror {
            mirror.message_appended(id, conv.history.len() - 1, &message);
        }

        Some(message)
    }

    /// Full history in append order. Empty for unknown ids.
    pub fn history(&self, id: &ConversationId) -> Vec<Message> {
        let Some(entry) = self.entry(id) else {
            return Vec::new();
        };
        let mut conv = entry.state.lock();
        if conv.evicted {
            return Vec::new();
        }
        conv.touch();
        conv.history.clone()
    }

    /// Replace the derived artifact wholesale. Returns false for unknown ids.
    pub fn set_derived_state(&self, id: &ConversationId, artifact: serde_json::Value) -> bool {
        let Some(entry) = self.entry(id) else {
            warn!(conversation_id = %id, "derived state write to unknown conversation");
            return false;
        };

        let mut conv = entry.state.lock();
        if conv.evicted {
            return false;
        }

        conv.derived_version += 1;
        if let Some(mirror) = &self.inner.mirror {
            mirror.derived_state_updated(id, conv.derived_version, &artifact);
        }
        conv.derived_state = Some(artifact);
        conv.touch();
        true
    }

    pub fn derived_state(&self, id: &ConversationId) -> Option<serde_json::Value> {
        let entry = self.entry(id)?;
        let mut conv = entry.state.lock();
        if conv.evicted {
            return None;
        }
        conv.touch();
        conv.derived_state.clone()
    }

    /// Number of artifact writes so far. Used to detect that a tool call
    /// produced a new artifact.
    pub fn derived_version(&self, id: &ConversationId) -> Option<u64> {
        let entry = self.entry(id)?;
        let conv = entry.state.lock();
        (!conv.evicted).then_some(conv.derived_version)
    }

    /// Lock that serializes tool dispatch within one conversation.
    pub fn dispatch_lock(&self, id: &ConversationId) -> Option<Arc<tokio::sync::Mutex<()>>> {
        self.entry(id).map(|e| Arc::clone(&e.dispatch_lock))
    }

    pub fn contains(&self, id: &ConversationId) -> bool {
        self.inner.conversations.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.conversations.is_empty()
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.inner.ttl
    }

    /// Remove every conversation idle for longer than the TTL as of `now`.
    /// Returns the number removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let ttl = self.inner.ttl;
        let candidates: Vec<ConversationId> = self
            .inner
            .conversations
            .iter()
            .map(|e| e.key().clone())
            .collect();

        let mut removed = 0;
        for id in candidates {
            let evicted = self.inner.conversations.remove_if(&id, |_, entry| {
                let mut conv = entry.state.lock();
                if now.signed_duration_since(conv.last_access) > ttl {
                    conv.evicted = true;
                    true
                } else {
                    false
                }
            });
            if evicted.is_some() {
                removed += 1;
                debug!(conversation_id = %id, "conversation evicted");
            }
        }

        if removed > 0 {
            info!(removed, remaining = self.len(), "expired conversations swept");
        }
        removed
    }

    #[cfg(test)]
    fn backdate(&self, id: &ConversationId, by: chrono::Duration) {
        if let Some(entry) = self.entry(id) {
            let mut conv = entry.state.lock();
            conv.last_access -= by;
        }
    }
}

/// Start a background task that evicts expired conversations on a fixed interval.
pub fn start_sweep_task(
    store: ConversationStore,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // consume first immediate tick
        loop {
            ticker.tick().await;
            store.sweep_expired(Utc::now());
        }
    })
}

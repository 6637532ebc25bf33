//! Optional write-behind persistence for conversations.
//!
//! The in-memory store stays authoritative. A mirror only observes writes;
//! it never feeds data back into live conversations.

use std::thread::JoinHandle;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use ziwei_core::ids::{ConversationId, MessageId};
use ziwei_core::messages::{Message, Part, Role};

use crate::database::Database;
use crate::error::StoreError;

/// Observer of conversation writes. Called while the conversation lock is
/// held, so implementations must not block.
pub trait ConversationMirror: Send + Sync {
    fn message_appended(&self, conversation_id: &ConversationId, sequence: usize, message: &Message);

    fn derived_state_updated(
        &self,
        conversation_id: &ConversationId,
        version: u64,
        artifact: &serde_json::Value,
    );
}

enum MirrorOp {
    Message {
        conversation_id: ConversationId,
        sequence: usize,
        message: Message,
    },
    Artifact {
        conversation_id: ConversationId,
        version: u64,
        artifact: serde_json::Value,
    },
}

/// Mirror that queues writes to a dedicated SQLite writer thread.
///
/// Dropping every clone of the mirror closes the queue; the writer drains
/// what is left and exits.
#[derive(Clone)]
pub struct SqliteMirror {
    tx: mpsc::UnboundedSender<MirrorOp>,
}

impl SqliteMirror {
    pub fn spawn(db: Database) -> Result<(Self, JoinHandle<()>), StoreError> {
        let (tx, mut rx) = mpsc::unbounded_channel::<MirrorOp>();

        let handle = std::thread::Builder::new()
            .name("ziwei-mirror".into())
            .spawn(move || {
                while let Some(op) = rx.blocking_recv() {
                    if let Err(e) = apply(&db, op) {
                        warn!(error = %e, "mirror write failed");
                    }
                }
                debug!("mirror writer stopped");
            })
            .map_err(|e| StoreError::Io(format!("spawn mirror thread: {e}")))?;

        Ok((Self { tx }, handle))
    }

    fn enqueue(&self, op: MirrorOp) {
        if self.tx.send(op).is_err() {
            warn!("mirror writer gone, dropping write");
        }
    }
}

impl ConversationMirror for SqliteMirror {
    fn message_appended(&self, conversation_id: &ConversationId, sequence: usize, message: &Message) {
        self.enqueue(MirrorOp::Message {
            conversation_id: conversation_id.clone(),
            sequence,
            message: message.clone(),
        });
    }

    fn derived_state_updated(
        &self,
        conversation_id: &ConversationId,
        version: u64,
        artifact: &serde_json::Value,
    ) {
        self.enqueue(MirrorOp::Artifact {
            conversation_id: conversation_id.clone(),
            version,
            artifact: artifact.clone(),
        });
    }
}

fn apply(db: &Database, op: MirrorOp) -> Result<(), StoreError> {
    db.with_conn(|conn| {
        match op {
            MirrorOp::Message {
                conversation_id,
                sequence,
                message,
            } => {
                let parts = serde_json::to_string(&message.parts)?;
                conn.execute(
                    "INSERT OR REPLACE INTO messages (id, conversation_id, sequence, role, parts, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    rusqlite::params![
                        message.id.as_str(),
                        conversation_id.as_str(),
                        sequence as i64,
                        message.role.as_str(),
                        parts,
                        message.created_at.to_rfc3339(),
                    ],
                )?;
            }
            MirrorOp::Artifact {
                conversation_id,
                version,
                artifact,
            } => {
                conn.execute(
                    "INSERT INTO artifacts (conversation_id, version, data, updated_at)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(conversation_id) DO UPDATE SET
                        version = excluded.version,
                        data = excluded.data,
                        updated_at = excluded.updated_at",
                    rusqlite::params![
                        conversation_id.as_str(),
                        version as i64,
                        artifact.to_string(),
                        chrono::Utc::now().to_rfc3339(),
                    ],
                )?;
            }
        }
        Ok(())
    })
}

/// A mirrored artifact row.
#[derive(Clone, Debug, Serialize)]
pub struct MirroredArtifact {
    pub version: u64,
    pub data: serde_json::Value,
}

impl Database {
    /// Messages mirrored for a conversation, in append order.
    pub fn mirrored_messages(&self, conversation_id: &ConversationId) -> Result<Vec<Message>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, role, parts, created_at FROM messages
                 WHERE conversation_id = ?1 ORDER BY sequence ASC",
            )?;
            let rows = stmt
                .query_map([conversation_id.as_str()], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            rows.into_iter()
                .map(|(id, role, parts, created_at)| {
                    let role: Role = role.parse().map_err(StoreError::Database)?;
                    let parts: Vec<Part> = serde_json::from_str(&parts)?;
                    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
                        .map_err(|e| StoreError::Database(format!("created_at: {e}")))?
                        .with_timezone(&chrono::Utc);
                    Ok(Message {
                        id: MessageId::from_raw(id),
                        role,
                        parts,
                        created_at,
                    })
                })
                .collect()
        })
    }

    pub fn mirrored_artifact(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<MirroredArtifact>, StoreError> {
        self.with_conn(|conn| {
            let row = conn.query_row(
                "SELECT version, data FROM artifacts WHERE conversation_id = ?1",
                [conversation_id.as_str()],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            );
            match row {
                Ok((version, data)) => Ok(Some(MirroredArtifact {
                    version: version as u64,
                    data: serde_json::from_str(&data)?,
                })),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }
}

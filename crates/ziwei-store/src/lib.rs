pub mod conversations;
pub mod database;
pub mod error;
pub mod mirror;
pub mod schema;

pub use conversations::{
    start_sweep_task, ConversationSnapshot, ConversationStore, Resolved, DEFAULT_TTL,
};
pub use database::Database;
pub use error::StoreError;
pub use mirror::{ConversationMirror, SqliteMirror};

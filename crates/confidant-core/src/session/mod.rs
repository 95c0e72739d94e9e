//! Conversation sessions — durable SQLite log plus per-session cache.
//!
//! Each session is keyed by `"<channel>:<chat_id>"`. The log in
//! `~/.confidant/confidant.db` is the source of truth after a restart; the
//! cache holds a bounded suffix of it.

pub mod log;
pub mod store;

pub use log::{decode_row, encode_content, Decoded, DurableLog, Fidelity, StoredRow};
pub use store::{ConversationStore, Session, SessionGuard, DEFAULT_HYDRATE_LIMIT};

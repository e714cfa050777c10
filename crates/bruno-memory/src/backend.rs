//! Memory backend trait for pluggable storage.
//!
//! `MemoryBackend` is the contract every storage engine satisfies, so callers
//! can hold a `&dyn MemoryBackend` without caring which engine sits behind it.
//!
//! # Example
//!
//! ```no_run
//! use bruno_config::SqliteConfig;
//! use bruno_memory::{MemoryBackend, SqliteMemoryBackend};
//! use bruno_types::Message;
//!
//! let backend = SqliteMemoryBackend::new(SqliteConfig::in_memory());
//! backend.connect()?;
//!
//! fn remember(backend: &dyn MemoryBackend) -> bruno_memory::Result<()> {
//!     backend.store_message(&Message::user("conv-1", "hello"))
//! }
//! remember(&backend)?;
//! # Ok::<(), bruno_memory::MemoryError>(())
//! ```

use serde::{Deserialize, Serialize};

use bruno_types::{ConversationContext, MemoryEntry, MemoryQuery, Message, Metadata, Session};

use crate::error::Result;

/// Per-user counts reported by [`MemoryBackend::get_statistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStatistics {
    /// Messages authored by the user.
    pub message_count: u64,
    /// Memory entries owned by the user, expired ones included.
    pub memory_count: u64,
    /// Sessions of the user that are still active.
    pub active_sessions: u64,
    /// Distinct conversations the user has messages in.
    pub conversation_count: u64,
}

/// Trait for memory storage backends.
///
/// Every operation except [`connect`](Self::connect),
/// [`disconnect`](Self::disconnect) and
/// [`health_check`](Self::health_check) requires a connected backend and
/// fails with a connection error otherwise.
///
/// # Thread Safety
///
/// Implementations are `Send + Sync`, but calls on one instance are not
/// required to run concurrently. Writes are serialized.
pub trait MemoryBackend: Send + Sync {
    /// Open storage and bring the schema up to date. Idempotent while
    /// connected.
    fn connect(&self) -> Result<()>;

    /// Release storage. Never fails; safe to call repeatedly.
    fn disconnect(&self);

    /// True only when connected and a trivial probe succeeds.
    fn health_check(&self) -> bool;

    /// Insert or fully replace a message by id.
    fn store_message(&self, message: &Message) -> Result<()>;

    /// Messages of a conversation, oldest first. `limit` keeps the earliest
    /// `limit` messages.
    fn retrieve_messages(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>>;

    /// Messages whose content matches `query`, optionally for one user.
    ///
    /// Full-text engines match `query` as a phrase of whole tokens, so
    /// punctuation and partial words may only match where the engine falls
    /// back to substring search.
    fn search_messages(
        &self,
        query: &str,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>>;

    /// Insert or fully replace a memory entry by id.
    fn store_memory(&self, entry: &MemoryEntry) -> Result<()>;

    /// Unexpired entries matching every populated field of `query`, ordered
    /// by importance, then recency, then id.
    fn retrieve_memories(&self, query: &MemoryQuery) -> Result<Vec<MemoryEntry>>;

    /// Remove a memory entry. Returns whether it existed.
    fn delete_memory(&self, memory_id: &str) -> Result<bool>;

    /// Remove a conversation's messages, optionally keeping system messages.
    /// Returns the number removed.
    fn clear_history(&self, conversation_id: &str, keep_system: bool) -> Result<usize>;

    /// Start a new active session with a fresh conversation id.
    fn create_session(&self, user_id: &str, metadata: Option<Metadata>) -> Result<Session>;

    fn get_session(&self, session_id: &str) -> Result<Option<Session>>;

    /// Mark a session inactive. Returns whether it existed.
    fn end_session(&self, session_id: &str) -> Result<bool>;

    /// Recent messages of a conversation plus what is known about the user.
    fn get_context(
        &self,
        conversation_id: &str,
        user_id: Option<&str>,
    ) -> Result<ConversationContext>;

    fn get_statistics(&self, user_id: &str) -> Result<MemoryStatistics>;
}

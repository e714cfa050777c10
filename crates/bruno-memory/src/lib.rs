//! Persistent conversational memory storage.
//!
//! This crate stores conversation messages, derived memory entries, user
//! sessions and a small user registry. SQLite is the engine; the
//! [`MemoryBackend`] trait is the contract any other engine would satisfy.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  SqliteMemoryBackend                                                    │
//! │  - Single SQLite file (or :memory:) behind a mutex                      │
//! │  - users, sessions, messages, memory_entries tables                     │
//! │  - Versioned schema tracked in schema_info                              │
//! │  - FTS5 shadow tables with substring fallback                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use bruno_config::SqliteConfig;
//! use bruno_memory::{MemoryBackend, SqliteMemoryBackend};
//! use bruno_types::{MemoryEntry, MemoryQuery, MemoryType, Message};
//!
//! let backend = SqliteMemoryBackend::new(SqliteConfig::new().with_database("memory.db"));
//! backend.connect()?;
//!
//! let session = backend.create_session("user-1", None)?;
//! backend.store_message(&Message::user(&session.conversation_id, "I love green tea"))?;
//!
//! let entry = MemoryEntry::new("user-1", MemoryType::Preference, "likes green tea")
//!     .with_importance(0.8)
//!     .with_tag("drinks");
//! backend.store_memory(&entry)?;
//!
//! let found = backend.retrieve_memories(&MemoryQuery::for_user("user-1").with_tag("drinks"))?;
//! assert_eq!(found.len(), 1);
//! # Ok::<(), bruno_memory::MemoryError>(())
//! ```

pub mod backend;
pub mod codec;
pub mod error;
pub mod migration;
pub mod query;
pub mod retry;
pub mod schema;
pub mod store;
pub mod validation;

pub use backend::{MemoryBackend, MemoryStatistics};
pub use error::{ErrorKind, MemoryError, Result};
pub use migration::{AddColumn, Migration, MigrationManager, SchemaReport};
pub use query::{FtsSearch, MemoryFilter, Predicate, SqlQuery, SubstringSearch, TextSearch};
pub use retry::RetryPolicy;
pub use schema::{LATEST_VERSION, SchemaCatalog};
pub use store::SqliteMemoryBackend;
pub use validation::ValidationError;

//! SQLite storage engine.
//!
//! [`SqliteMemoryBackend`] owns a single connection behind a mutex. It moves
//! through three states: disconnected, connected, and failed. A failed
//! connect is terminal for the instance; callers build a new backend.
//!
//! Operations are grouped by entity:
//!
//! - `message_ops`: store, retrieve, search and clear conversation messages
//! - `memory_ops`: store, filter, delete and purge memory entries
//! - `session_ops`: create, end, renew and list sessions
//! - `context_ops`: user registry, conversation context and statistics

mod context_ops;
mod memory_ops;
mod message_ops;
mod session_ops;

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags, Transaction};
use tracing::{debug, info, warn};

use bruno_config::SqliteConfig;
use bruno_types::{ConversationContext, MemoryEntry, MemoryQuery, Message, Metadata, Session};

use crate::backend::{MemoryBackend, MemoryStatistics};
use crate::error::{MemoryError, Result};
use crate::migration::{MigrationManager, SchemaReport, table_exists};
use crate::query::{TextSearch, text_search_for};
use crate::retry::RetryPolicy;
use crate::schema::{FTS_TABLES, SchemaCatalog};

// ─────────────────────────────────────────────────────────────────────────────
// Connection State
// ─────────────────────────────────────────────────────────────────────────────

/// A live connection and the text search strategy chosen for it.
pub(crate) struct Connected {
    pub(crate) conn: Connection,
    pub(crate) search: Box<dyn TextSearch>,
}

enum ConnectionState {
    Disconnected,
    Connected(Connected),
    Failed,
}

impl ConnectionState {
    fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connected(_) => "connected",
            Self::Failed => "failed",
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────────────────

/// Memory backend backed by SQLite.
///
/// Uses WAL mode by default and full-text search through FTS5 when the
/// engine supports it, falling back to substring matching otherwise.
pub struct SqliteMemoryBackend {
    config: SqliteConfig,
    retry: RetryPolicy,
    state: Mutex<ConnectionState>,
}

impl std::fmt::Debug for SqliteMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteMemoryBackend")
            .field("database", &self.config.database())
            .field("state", &self.state.lock().name())
            .finish_non_exhaustive()
    }
}

impl SqliteMemoryBackend {
    /// Create a disconnected backend. Nothing is opened until
    /// [`connect`](MemoryBackend::connect).
    pub fn new(config: SqliteConfig) -> Self {
        let retry = RetryPolicy::from_config(&config.backend);
        Self {
            config,
            retry,
            state: Mutex::new(ConnectionState::Disconnected),
        }
    }

    /// Create and connect a backend for the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let backend = Self::new(SqliteConfig::new().with_database(path.as_ref()));
        backend.connect()?;
        Ok(backend)
    }

    /// Create and connect a private in-memory backend (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let backend = Self::new(SqliteConfig::in_memory());
        backend.connect()?;
        Ok(backend)
    }

    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.state.lock(), ConnectionState::Connected(_))
    }

    /// Name of the active text search strategy, if connected.
    pub fn text_search(&self) -> Option<&'static str> {
        match &*self.state.lock() {
            ConnectionState::Connected(c) => Some(c.search.name()),
            _ => None,
        }
    }

    /// Whether searches go through the full-text index.
    pub fn fts_active(&self) -> bool {
        self.text_search() == Some("fts5")
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connection Lifecycle
    // ─────────────────────────────────────────────────────────────────────────

    fn connect_inner(&self) -> Result<()> {
        let mut state = self.state.lock();
        match &*state {
            ConnectionState::Connected(_) => return Ok(()),
            ConnectionState::Failed => {
                return Err(MemoryError::connection(
                    "backend is unusable after a failed connect",
                ));
            }
            ConnectionState::Disconnected => {}
        }

        match self.establish() {
            Ok(connected) => {
                info!(
                    database = %self.config.database().display(),
                    search = connected.search.name(),
                    "Memory backend connected"
                );
                *state = ConnectionState::Connected(connected);
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Memory backend failed to connect");
                *state = ConnectionState::Failed;
                Err(e)
            }
        }
    }

    fn establish(&self) -> Result<Connected> {
        let mut conn = self.open_connection()?;

        let fts_wanted = self.config.fts_enabled();
        let fts_supported = fts_wanted && fts5_compiled(&conn);
        if fts_wanted && !fts_supported {
            warn!("FTS5 is not available in this SQLite build, using substring search");
        }

        let manager = MigrationManager::for_catalog(&SchemaCatalog::new(fts_supported));
        let applied = manager.migrate(&mut conn)?;
        if !applied.is_empty() {
            info!(versions = ?applied, "Schema migrated");
        }

        let fts_ready = fts_supported && fts_tables_present(&conn)?;
        if fts_supported && !fts_ready {
            warn!("Full-text tables are missing, using substring search");
        }

        Ok(Connected {
            conn,
            search: text_search_for(fts_ready),
        })
    }

    fn open_connection(&self) -> Result<Connection> {
        let conn = if self.config.is_in_memory() {
            Connection::open_in_memory()
                .map_err(|e| MemoryError::connection_with("failed to open in-memory database", e))?
        } else {
            let path = self.config.database();
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    MemoryError::connection(format!(
                        "failed to create directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
            Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
            )
            .map_err(|e| {
                MemoryError::connection_with(format!("failed to open {}", path.display()), e)
            })?
        };

        conn.busy_timeout(self.config.busy_timeout())
            .map_err(|e| MemoryError::connection_with("failed to set busy timeout", e))?;
        for (name, value) in self.config.pragmas() {
            conn.pragma_update(None, name, &value).map_err(|e| {
                MemoryError::connection_with(format!("failed to set pragma {name}"), e)
            })?;
        }

        Ok(conn)
    }

    fn disconnect_inner(&self) {
        let mut state = self.state.lock();
        if let ConnectionState::Connected(_) = &*state {
            *state = ConnectionState::Disconnected;
            info!("Memory backend disconnected");
        }
    }

    fn health_check_inner(&self) -> bool {
        match &*self.state.lock() {
            ConnectionState::Connected(c) => c
                .conn
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .is_ok(),
            _ => false,
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connection Access
    // ─────────────────────────────────────────────────────────────────────────

    /// Run `f` against the live connection.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connected) -> Result<T>) -> Result<T> {
        match &*self.state.lock() {
            ConnectionState::Connected(connected) => f(connected),
            other => Err(MemoryError::connection(format!(
                "backend is {}",
                other.name()
            ))),
        }
    }

    /// Run `f` inside a transaction, committing on success.
    ///
    /// Any error rolls the transaction back when it is dropped.
    pub(crate) fn with_transaction<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>, &dyn TextSearch) -> Result<T>,
    ) -> Result<T> {
        match &mut *self.state.lock() {
            ConnectionState::Connected(connected) => {
                let tx = connected.conn.transaction()?;
                let value = f(&tx, connected.search.as_ref())?;
                tx.commit()?;
                Ok(value)
            }
            other => Err(MemoryError::connection(format!(
                "backend is {}",
                other.name()
            ))),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Schema
    // ─────────────────────────────────────────────────────────────────────────

    fn migration_manager(&self, connected: &Connected) -> MigrationManager {
        let fts = connected.search.name() == "fts5";
        MigrationManager::for_catalog(&SchemaCatalog::new(fts))
    }

    /// Version currently recorded in the database.
    pub fn schema_version(&self) -> Result<Option<String>> {
        self.with_conn(|c| self.migration_manager(c).current_version(&c.conn))
    }

    /// Inspect required tables and indexes.
    pub fn validate_schema(&self) -> Result<SchemaReport> {
        self.with_conn(|c| Ok(self.migration_manager(c).validate(&c.conn)))
    }
}

fn fts5_compiled(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT sqlite_compileoption_used('ENABLE_FTS5')",
        [],
        |row| row.get::<_, bool>(0),
    )
    .unwrap_or_else(|e| {
        debug!(error = %e, "Could not probe for FTS5");
        false
    })
}

fn fts_tables_present(conn: &Connection) -> Result<bool> {
    for table in FTS_TABLES {
        if !table_exists(conn, table)? {
            return Ok(false);
        }
    }
    Ok(true)
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryBackend Implementation
// ─────────────────────────────────────────────────────────────────────────────

impl MemoryBackend for SqliteMemoryBackend {
    fn connect(&self) -> Result<()> {
        self.connect_inner()
    }

    fn disconnect(&self) {
        self.disconnect_inner();
    }

    fn health_check(&self) -> bool {
        self.health_check_inner()
    }

    fn store_message(&self, message: &Message) -> Result<()> {
        SqliteMemoryBackend::store_message(self, message)
    }

    fn retrieve_messages(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>> {
        SqliteMemoryBackend::retrieve_messages(self, conversation_id, limit)
    }

    fn search_messages(
        &self,
        query: &str,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        SqliteMemoryBackend::search_messages(self, query, user_id, limit)
    }

    fn store_memory(&self, entry: &MemoryEntry) -> Result<()> {
        SqliteMemoryBackend::store_memory(self, entry)
    }

    fn retrieve_memories(&self, query: &MemoryQuery) -> Result<Vec<MemoryEntry>> {
        SqliteMemoryBackend::retrieve_memories(self, query)
    }

    fn delete_memory(&self, memory_id: &str) -> Result<bool> {
        SqliteMemoryBackend::delete_memory(self, memory_id)
    }

    fn clear_history(&self, conversation_id: &str, keep_system: bool) -> Result<usize> {
        SqliteMemoryBackend::clear_history(self, conversation_id, keep_system)
    }

    fn create_session(&self, user_id: &str, metadata: Option<Metadata>) -> Result<Session> {
        SqliteMemoryBackend::create_session(self, user_id, metadata)
    }

    fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        SqliteMemoryBackend::get_session(self, session_id)
    }

    fn end_session(&self, session_id: &str) -> Result<bool> {
        SqliteMemoryBackend::end_session(self, session_id)
    }

    fn get_context(
        &self,
        conversation_id: &str,
        user_id: Option<&str>,
    ) -> Result<ConversationContext> {
        SqliteMemoryBackend::get_context(self, conversation_id, user_id)
    }

    fn get_statistics(&self, user_id: &str) -> Result<MemoryStatistics> {
        SqliteMemoryBackend::get_statistics(self, user_id)
    }
}

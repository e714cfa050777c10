//! Versioned schema catalog.
//!
//! Each version carries the complete, cumulative DDL needed to bring an
//! empty database to that version. Every statement uses `IF NOT EXISTS`, so
//! re-running a version's definitions against a database that already has
//! them is harmless.

use crate::migration::{AddColumn, Migration};

// ─────────────────────────────────────────────────────────────────────────────
// Versions
// ─────────────────────────────────────────────────────────────────────────────

/// Initial layout: the four core tables plus their primary lookup indexes.
pub const VERSION_1_0: &str = "1.0.0";

/// Secondary indexes and optional full-text shadow tables.
pub const VERSION_1_1: &str = "1.1.0";

/// Audit columns on `users` and `schema_info`.
pub const VERSION_1_2: &str = "1.2.0";

/// Newest version this build knows about.
pub const LATEST_VERSION: &str = VERSION_1_2;

const VERSIONS: [&str; 3] = [VERSION_1_0, VERSION_1_1, VERSION_1_2];

/// Tables that must exist in a valid database.
pub const REQUIRED_TABLES: [&str; 5] = [
    "users",
    "sessions",
    "messages",
    "memory_entries",
    "schema_info",
];

/// Indexes that must exist in a valid database.
pub const REQUIRED_INDEXES: [&str; 4] = [
    "idx_messages_conversation_id",
    "idx_messages_user_id",
    "idx_sessions_user_id",
    "idx_memory_entries_user_id",
];

/// Full-text shadow tables, present only when full-text search is enabled.
pub const FTS_TABLES: [&str; 2] = ["messages_fts", "memory_entries_fts"];

// ─────────────────────────────────────────────────────────────────────────────
// DDL
// ─────────────────────────────────────────────────────────────────────────────

/// Version tracking table. Created before any migration is applied.
///
/// Tables created before 1.2.0 lack the audit columns; that version adds
/// them.
pub const SCHEMA_INFO_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_info (
    version TEXT PRIMARY KEY,
    applied_at TEXT NOT NULL,
    description TEXT,
    created_at TEXT,
    updated_at TEXT
)
"#;

const USERS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY,
    username TEXT,
    email TEXT,
    metadata TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    last_active TEXT
)
"#;

const SESSIONS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    session_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT,
    metadata TEXT,
    is_active BOOLEAN NOT NULL DEFAULT 1,
    FOREIGN KEY (user_id) REFERENCES users(user_id) ON DELETE CASCADE
)
"#;

const MESSAGES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    conversation_id TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    message_type TEXT,
    metadata TEXT,
    user_id TEXT,
    parent_id TEXT,
    tokens INTEGER,
    model TEXT,
    finish_reason TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT,
    FOREIGN KEY (parent_id) REFERENCES messages(id) ON DELETE SET NULL
)
"#;

// No foreign key on conversation_id: sessions.conversation_id is not unique,
// and SQLite rejects inserts against a non-unique parent key.
const MEMORY_ENTRIES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS memory_entries (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    memory_type TEXT NOT NULL,
    importance REAL NOT NULL DEFAULT 0.5,
    timestamp TEXT NOT NULL,
    user_id TEXT NOT NULL,
    conversation_id TEXT,
    tags TEXT,
    metadata TEXT,
    embedding TEXT,
    expires_at TEXT,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT,
    FOREIGN KEY (user_id) REFERENCES users(user_id) ON DELETE CASCADE
)
"#;

const PRIMARY_INDEXES_DDL: [&str; 9] = [
    "CREATE INDEX IF NOT EXISTS idx_messages_conversation_id ON messages(conversation_id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_user_id ON messages(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_messages_timestamp ON messages(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_user_id ON sessions(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_conversation_id ON sessions(conversation_id)",
    "CREATE INDEX IF NOT EXISTS idx_memory_entries_user_id ON memory_entries(user_id)",
    "CREATE INDEX IF NOT EXISTS idx_memory_entries_conversation_id ON memory_entries(conversation_id)",
    "CREATE INDEX IF NOT EXISTS idx_memory_entries_memory_type ON memory_entries(memory_type)",
    "CREATE INDEX IF NOT EXISTS idx_memory_entries_importance ON memory_entries(importance)",
];

const SECONDARY_INDEXES_DDL: [&str; 9] = [
    "CREATE INDEX IF NOT EXISTS idx_messages_role ON messages(role)",
    "CREATE INDEX IF NOT EXISTS idx_messages_parent_id ON messages(parent_id)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_is_active ON sessions(is_active)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_created_at ON sessions(created_at)",
    "CREATE INDEX IF NOT EXISTS idx_memory_entries_timestamp ON memory_entries(timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_memory_entries_expires_at ON memory_entries(expires_at)",
    "CREATE INDEX IF NOT EXISTS idx_users_username ON users(username)",
    "CREATE INDEX IF NOT EXISTS idx_users_email ON users(email)",
    "CREATE INDEX IF NOT EXISTS idx_users_last_active ON users(last_active)",
];

// Plain (not external-content) FTS5 tables kept in sync by triggers. The
// backfill statements index rows that predate the shadow tables.
const FTS_DDL: [&str; 10] = [
    r#"
    CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
        message_id UNINDEXED,
        user_id UNINDEXED,
        content
    )
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS messages_fts_insert AFTER INSERT ON messages BEGIN
        INSERT INTO messages_fts (message_id, user_id, content)
        VALUES (new.id, new.user_id, new.content);
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS messages_fts_delete AFTER DELETE ON messages BEGIN
        DELETE FROM messages_fts WHERE message_id = old.id;
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS messages_fts_update AFTER UPDATE ON messages BEGIN
        UPDATE messages_fts
        SET message_id = new.id, user_id = new.user_id, content = new.content
        WHERE message_id = old.id;
    END
    "#,
    r#"
    INSERT INTO messages_fts (message_id, user_id, content)
    SELECT id, user_id, content FROM messages
    WHERE id NOT IN (SELECT message_id FROM messages_fts)
    "#,
    r#"
    CREATE VIRTUAL TABLE IF NOT EXISTS memory_entries_fts USING fts5(
        memory_id UNINDEXED,
        user_id UNINDEXED,
        content,
        tags
    )
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS memory_entries_fts_insert AFTER INSERT ON memory_entries BEGIN
        INSERT INTO memory_entries_fts (memory_id, user_id, content, tags)
        VALUES (new.id, new.user_id, new.content, new.tags);
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS memory_entries_fts_delete AFTER DELETE ON memory_entries BEGIN
        DELETE FROM memory_entries_fts WHERE memory_id = old.id;
    END
    "#,
    r#"
    CREATE TRIGGER IF NOT EXISTS memory_entries_fts_update AFTER UPDATE ON memory_entries BEGIN
        UPDATE memory_entries_fts
        SET memory_id = new.id, user_id = new.user_id, content = new.content, tags = new.tags
        WHERE memory_id = old.id;
    END
    "#,
    r#"
    INSERT INTO memory_entries_fts (memory_id, user_id, content, tags)
    SELECT id, user_id, content, tags FROM memory_entries
    WHERE id NOT IN (SELECT memory_id FROM memory_entries_fts)
    "#,
];

// (table, column, type, backfill for existing rows)
const AUDIT_COLUMNS: [(&str, &str, &str, &str); 3] = [
    ("users", "updated_at", "TEXT", "COALESCE(last_active, created_at)"),
    ("schema_info", "created_at", "TEXT", "applied_at"),
    ("schema_info", "updated_at", "TEXT", "applied_at"),
];

// Sync triggers first; once their shadow table is gone they break every drop
// of the base table. Then children before parents for the foreign keys.
const TEARDOWN_DDL: [&str; 12] = [
    "DROP TRIGGER IF EXISTS messages_fts_insert",
    "DROP TRIGGER IF EXISTS messages_fts_delete",
    "DROP TRIGGER IF EXISTS messages_fts_update",
    "DROP TRIGGER IF EXISTS memory_entries_fts_insert",
    "DROP TRIGGER IF EXISTS memory_entries_fts_delete",
    "DROP TRIGGER IF EXISTS memory_entries_fts_update",
    "DROP TABLE IF EXISTS messages_fts",
    "DROP TABLE IF EXISTS memory_entries_fts",
    "DROP TABLE IF EXISTS memory_entries",
    "DROP TABLE IF EXISTS messages",
    "DROP TABLE IF EXISTS sessions",
    "DROP TABLE IF EXISTS users",
];

// ─────────────────────────────────────────────────────────────────────────────
// Catalog
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable mapping from schema version to its DDL.
///
/// The full-text flag decides whether the newest version includes the
/// shadow tables and their triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaCatalog {
    fts_enabled: bool,
}

impl SchemaCatalog {
    pub fn new(fts_enabled: bool) -> Self {
        Self { fts_enabled }
    }

    pub fn fts_enabled(&self) -> bool {
        self.fts_enabled
    }

    /// Known versions, oldest first.
    pub fn versions(&self) -> &'static [&'static str] {
        &VERSIONS
    }

    pub fn latest_version(&self) -> &'static str {
        LATEST_VERSION
    }

    /// Short human-readable summary of a version.
    pub fn description(&self, version: &str) -> Option<&'static str> {
        match version {
            VERSION_1_0 => Some("Initial schema with users, sessions, messages and memory entries"),
            VERSION_1_1 => Some("Secondary indexes and full-text search tables"),
            VERSION_1_2 => Some("Audit columns on users and schema_info"),
            _ => None,
        }
    }

    /// Ordered DDL that builds an empty database up to `version`.
    ///
    /// Returns `None` for unknown versions.
    pub fn definitions(&self, version: &str) -> Option<Vec<&'static str>> {
        let mut statements = vec![USERS_DDL, SESSIONS_DDL, MESSAGES_DDL, MEMORY_ENTRIES_DDL];
        statements.extend(PRIMARY_INDEXES_DDL);

        match version {
            VERSION_1_0 => {}
            VERSION_1_1 | VERSION_1_2 => {
                statements.extend(SECONDARY_INDEXES_DDL);
                if self.fts_enabled {
                    statements.extend(FTS_DDL);
                }
            }
            _ => return None,
        }

        Some(statements)
    }

    /// Columns that `version` adds to tables created by earlier versions.
    ///
    /// Applied after [`SchemaCatalog::definitions`], and only where missing.
    pub fn columns(&self, version: &str) -> Option<Vec<AddColumn>> {
        let added: &[_] = match version {
            VERSION_1_0 | VERSION_1_1 => &[],
            VERSION_1_2 => &AUDIT_COLUMNS,
            _ => return None,
        };
        Some(
            added
                .iter()
                .map(|&(table, column, definition, backfill)| AddColumn {
                    table: table.to_string(),
                    column: column.to_string(),
                    definition: definition.to_string(),
                    backfill: Some(backfill.to_string()),
                })
                .collect(),
        )
    }

    /// Ordered DDL that removes everything `definitions` creates.
    ///
    /// Shadow tables are always dropped so a catalog built without full-text
    /// search still cleans up a database created with it.
    pub fn teardown(&self, version: &str) -> Option<Vec<&'static str>> {
        VERSIONS
            .contains(&version)
            .then(|| TEARDOWN_DDL.to_vec())
    }

    /// One migration per known version, oldest first.
    pub fn migrations(&self) -> Vec<Migration> {
        VERSIONS
            .iter()
            .filter_map(|&version| {
                Some(Migration {
                    version: version.to_string(),
                    description: self.description(version)?.to_string(),
                    up: self.definitions(version)?.into_iter().map(String::from).collect(),
                    columns: self.columns(version)?,
                    down: self.teardown(version)?.into_iter().map(String::from).collect(),
                })
            })
            .collect()
    }
}

impl Default for SchemaCatalog {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_versions_are_ordered() {
        let catalog = SchemaCatalog::default();
        assert_eq!(catalog.versions(), &[VERSION_1_0, VERSION_1_1, VERSION_1_2]);
        assert_eq!(catalog.latest_version(), VERSION_1_2);
        assert!(catalog.definitions("9.9.9").is_none());
        assert!(catalog.columns("9.9.9").is_none());
        assert!(catalog.description("9.9.9").is_none());
    }

    #[test]
    fn test_definitions_are_cumulative() {
        let catalog = SchemaCatalog::new(false);
        let v1 = catalog.definitions(VERSION_1_0).unwrap();
        let v11 = catalog.definitions(VERSION_1_1).unwrap();
        assert!(v11.len() > v1.len());
        assert_eq!(&v11[..v1.len()], &v1[..]);
    }

    #[test]
    fn test_fts_flag_controls_shadow_tables() {
        let with = SchemaCatalog::new(true).definitions(VERSION_1_1).unwrap();
        let without = SchemaCatalog::new(false).definitions(VERSION_1_1).unwrap();
        assert!(with.iter().any(|s| s.contains("messages_fts")));
        assert!(!without.iter().any(|s| s.contains("_fts")));

        let v1 = SchemaCatalog::new(true).definitions(VERSION_1_0).unwrap();
        assert!(!v1.iter().any(|s| s.contains("_fts")));
    }

    #[test]
    fn test_statements_are_idempotent() {
        let catalog = SchemaCatalog::default();
        for stmt in catalog.definitions(LATEST_VERSION).unwrap() {
            assert!(
                stmt.contains("IF NOT EXISTS") || stmt.contains("NOT IN (SELECT"),
                "not idempotent: {stmt}"
            );
        }
    }

    #[test]
    fn test_migrations_cover_every_version() {
        let migrations = SchemaCatalog::default().migrations();
        assert_eq!(migrations.len(), 3);
        assert_eq!(migrations[2].version, LATEST_VERSION);
        assert!(!migrations[2].down.is_empty());
    }

    #[test]
    fn test_audit_columns_arrive_in_newest_version() {
        let catalog = SchemaCatalog::default();
        assert!(catalog.columns(VERSION_1_0).unwrap().is_empty());
        assert!(catalog.columns(VERSION_1_1).unwrap().is_empty());

        let added = catalog.columns(VERSION_1_2).unwrap();
        let names: Vec<_> = added
            .iter()
            .map(|c| format!("{}.{}", c.table, c.column))
            .collect();
        assert_eq!(
            names,
            ["users.updated_at", "schema_info.created_at", "schema_info.updated_at"]
        );
        // Earlier versions are left as they were.
        assert_eq!(
            catalog.definitions(VERSION_1_1),
            catalog.definitions(VERSION_1_2)
        );
    }

    #[test]
    fn test_ddl_executes_on_sqlite() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA_INFO_DDL).unwrap();
        let catalog = SchemaCatalog::default();
        for stmt in catalog.definitions(LATEST_VERSION).unwrap() {
            conn.execute_batch(stmt).unwrap();
        }
        // Second pass must be a no-op.
        for stmt in catalog.definitions(LATEST_VERSION).unwrap() {
            conn.execute_batch(stmt).unwrap();
        }
        conn.execute_batch(
            "INSERT INTO users (user_id) VALUES ('u1');
             INSERT INTO messages (id, conversation_id, role, content, timestamp)
             VALUES ('m1', 'c1', 'user', 'hello', '2024-01-01T00:00:00Z');",
        )
        .unwrap();

        for stmt in catalog.teardown(LATEST_VERSION).unwrap() {
            conn.execute_batch(stmt).unwrap();
        }
        let left: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'trigger')
                 AND name != 'schema_info'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(left, 0);
    }
}

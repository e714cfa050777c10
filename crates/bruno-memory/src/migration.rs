//! Schema version tracking and migration.
//!
//! The manager owns an ordered list of [`Migration`]s and records applied
//! versions in the `schema_info` table. Only forward migration to the newest
//! version and rollback to an empty database are supported.

use std::collections::BTreeMap;

use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::codec::encode_timestamp;
use crate::error::{MemoryError, Result};
use crate::schema::{REQUIRED_INDEXES, REQUIRED_TABLES, SCHEMA_INFO_DDL, SchemaCatalog};

/// A single schema version and the statements that move to and from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: String,
    pub description: String,
    /// Cumulative DDL building an empty database up to this version.
    pub up: Vec<String>,
    /// Columns added after `up`, skipped where already present.
    pub columns: Vec<AddColumn>,
    /// DDL returning a database at this version to empty.
    pub down: Vec<String>,
}

/// A column added to a table that may predate it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddColumn {
    pub table: String,
    pub column: String,
    /// Column type and constraints, as written after the name.
    pub definition: String,
    /// SQL expression filling the new column on existing rows.
    pub backfill: Option<String>,
}

impl AddColumn {
    fn apply(&self, conn: &Connection) -> rusqlite::Result<bool> {
        if column_exists(conn, &self.table, &self.column)? {
            return Ok(false);
        }
        conn.execute_batch(&format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            self.table, self.column, self.definition
        ))?;
        if let Some(expr) = &self.backfill {
            conn.execute_batch(&format!(
                "UPDATE {table} SET {column} = {expr} WHERE {column} IS NULL",
                table = self.table,
                column = self.column,
            ))?;
        }
        Ok(true)
    }
}

/// Result of [`MigrationManager::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SchemaReport {
    /// True when every required table exists. Missing indexes are reported
    /// but do not invalidate the schema.
    pub valid: bool,
    pub version: Option<String>,
    pub tables: BTreeMap<String, bool>,
    pub indexes: BTreeMap<String, bool>,
    /// Set when inspection itself failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Applies and tracks schema migrations.
#[derive(Debug, Clone)]
pub struct MigrationManager {
    migrations: Vec<Migration>,
}

impl MigrationManager {
    /// Build a manager from migrations ordered oldest first.
    pub fn new(migrations: Vec<Migration>) -> Self {
        Self { migrations }
    }

    /// Build a manager covering every version in `catalog`.
    pub fn for_catalog(catalog: &SchemaCatalog) -> Self {
        Self::new(catalog.migrations())
    }

    pub fn migrations(&self) -> &[Migration] {
        &self.migrations
    }

    pub fn latest_version(&self) -> Option<&str> {
        self.migrations.last().map(|m| m.version.as_str())
    }

    fn find(&self, version: &str) -> Option<&Migration> {
        self.migrations.iter().find(|m| m.version == version)
    }

    /// Most recently applied version, or `None` for a fresh database.
    ///
    /// A missing tracking table is not an error.
    pub fn current_version(&self, conn: &Connection) -> Result<Option<String>> {
        if !table_exists(conn, "schema_info")
            .map_err(|e| MemoryError::migration_with("failed to inspect schema", e))?
        {
            return Ok(None);
        }

        conn.query_row(
            "SELECT version FROM schema_info ORDER BY applied_at DESC, rowid DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| MemoryError::migration_with("failed to read schema version", e))
    }

    pub fn needs_migration(&self, conn: &Connection) -> Result<bool> {
        Ok(!self.plan(conn)?.is_empty())
    }

    /// Migrations needed to reach the newest version.
    ///
    /// Definitions are cumulative, so the plan is either empty or holds only
    /// the newest migration. A database stamped with a version this manager
    /// does not know is refused rather than silently re-stamped.
    pub fn plan(&self, conn: &Connection) -> Result<Vec<&Migration>> {
        let Some(latest) = self.migrations.last() else {
            return Ok(Vec::new());
        };

        match self.current_version(conn)? {
            Some(current) if current == latest.version => Ok(Vec::new()),
            Some(current) if self.find(&current).is_none() => Err(MemoryError::migration(
                format!("database schema version {current} is not known to this build"),
            )),
            _ => Ok(vec![latest]),
        }
    }

    /// Apply `plan` in a single transaction.
    ///
    /// Either every statement and version stamp commits or none does. A
    /// version that is already recorded is logged and skipped.
    pub fn apply(&self, conn: &mut Connection, plan: &[&Migration]) -> Result<()> {
        if plan.is_empty() {
            return Ok(());
        }

        let tx = conn
            .transaction()
            .map_err(|e| MemoryError::migration_with("failed to begin migration", e))?;

        tx.execute_batch(SCHEMA_INFO_DDL)
            .map_err(|e| MemoryError::migration_with("failed to create schema_info", e))?;

        for migration in plan {
            info!(version = %migration.version, "Applying schema migration");
            for statement in &migration.up {
                tx.execute_batch(statement).map_err(|e| {
                    MemoryError::migration_with(
                        format!("migration {} failed", migration.version),
                        e,
                    )
                })?;
            }
            for column in &migration.columns {
                let added = column.apply(&tx).map_err(|e| {
                    MemoryError::migration_with(
                        format!(
                            "migration {} failed adding {}.{}",
                            migration.version, column.table, column.column
                        ),
                        e,
                    )
                })?;
                if added {
                    debug!(table = %column.table, column = %column.column, "Added column");
                }
            }

            let stamped = stamp_version(&tx, migration);
            match stamped {
                Ok(_) => {}
                Err(e) if is_constraint_violation(&e) => {
                    warn!(version = %migration.version, "Schema version already recorded");
                }
                Err(e) => {
                    return Err(MemoryError::migration_with(
                        format!("failed to record version {}", migration.version),
                        e,
                    ));
                }
            }
        }

        tx.commit()
            .map_err(|e| MemoryError::migration_with("failed to commit migration", e))?;
        Ok(())
    }

    /// Bring the database up to the newest version.
    ///
    /// Returns the versions that were applied (empty when already current).
    pub fn migrate(&self, conn: &mut Connection) -> Result<Vec<String>> {
        let plan = self.plan(conn)?;
        if plan.is_empty() {
            debug!("Schema up to date");
            return Ok(Vec::new());
        }

        let applied = plan.iter().map(|m| m.version.clone()).collect();
        self.apply(conn, &plan)?;
        Ok(applied)
    }

    /// Roll back to `target`.
    ///
    /// Only `None` (or an empty string), meaning an empty database, is
    /// supported. Rolling back to the current version is a no-op.
    pub fn rollback(&self, conn: &mut Connection, target: Option<&str>) -> Result<()> {
        let target = target.filter(|t| !t.is_empty());
        let Some(current) = self.current_version(conn)? else {
            return Err(MemoryError::migration("no schema version to roll back from"));
        };

        if target == Some(current.as_str()) {
            return Ok(());
        }
        if let Some(target) = target {
            return Err(MemoryError::migration(format!(
                "rollback from {current} to {target} is not supported"
            )));
        }

        let migration = self.find(&current).ok_or_else(|| {
            MemoryError::migration(format!("no rollback available for version {current}"))
        })?;

        let tx = conn
            .transaction()
            .map_err(|e| MemoryError::migration_with("failed to begin rollback", e))?;
        for statement in &migration.down {
            tx.execute_batch(statement).map_err(|e| {
                MemoryError::migration_with(format!("rollback of {current} failed"), e)
            })?;
        }
        tx.execute_batch("DROP TABLE IF EXISTS schema_info")
            .map_err(|e| MemoryError::migration_with("failed to drop schema_info", e))?;
        tx.commit()
            .map_err(|e| MemoryError::migration_with("failed to commit rollback", e))?;

        info!(from = %current, "Schema rolled back to empty");
        Ok(())
    }

    /// Report which required tables and indexes exist. Never fails:
    /// inspection errors land in [`SchemaReport::error`].
    pub fn validate(&self, conn: &Connection) -> SchemaReport {
        match self.inspect(conn) {
            Ok(report) => report,
            Err(e) => SchemaReport {
                error: Some(e.to_string()),
                ..SchemaReport::default()
            },
        }
    }

    fn inspect(&self, conn: &Connection) -> Result<SchemaReport> {
        let mut tables = BTreeMap::new();
        for table in REQUIRED_TABLES {
            tables.insert(table.to_string(), table_exists(conn, table)?);
        }

        let mut indexes = BTreeMap::new();
        for index in REQUIRED_INDEXES {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1)",
                [index],
                |row| row.get(0),
            )?;
            indexes.insert(index.to_string(), exists);
        }

        Ok(SchemaReport {
            valid: tables.values().all(|&v| v),
            version: self.current_version(conn)?,
            tables,
            indexes,
            error: None,
        })
    }
}

// Older tracking tables have no audit columns until 1.2.0 adds them.
fn stamp_version(conn: &Connection, migration: &Migration) -> rusqlite::Result<usize> {
    let now = encode_timestamp(&bruno_types::now());
    if column_exists(conn, "schema_info", "created_at")? {
        conn.execute(
            "INSERT INTO schema_info (version, applied_at, description, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?2, ?2)",
            params![migration.version, now, migration.description],
        )
    } else {
        conn.execute(
            "INSERT INTO schema_info (version, applied_at, description) VALUES (?1, ?2, ?3)",
            params![migration.version, now, migration.description],
        )
    }
}

fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM pragma_table_info(?1) WHERE name = ?2)",
        [table, column],
        |row| row.get(0),
    )
}

pub(crate) fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
        [name],
        |row| row.get(0),
    )
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{LATEST_VERSION, VERSION_1_0, VERSION_1_1, VERSION_1_2};

    fn manager() -> MigrationManager {
        MigrationManager::for_catalog(&SchemaCatalog::default())
    }

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn
    }

    #[test]
    fn test_fresh_database_has_no_version() {
        let conn = conn();
        let manager = manager();
        assert_eq!(manager.current_version(&conn).unwrap(), None);
        assert!(manager.needs_migration(&conn).unwrap());

        let plan = manager.plan(&conn).unwrap();
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].version, LATEST_VERSION);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let mut conn = conn();
        let manager = manager();

        assert_eq!(manager.migrate(&mut conn).unwrap(), vec![LATEST_VERSION]);
        assert!(manager.migrate(&mut conn).unwrap().is_empty());
        assert_eq!(
            manager.current_version(&conn).unwrap().as_deref(),
            Some(LATEST_VERSION)
        );
        assert!(!manager.needs_migration(&conn).unwrap());
    }

    #[test]
    fn test_upgrade_from_older_version() {
        let mut conn = conn();
        let manager = manager();
        let v1 = manager.find(VERSION_1_0).unwrap();
        manager.apply(&mut conn, &[v1]).unwrap();
        assert_eq!(
            manager.current_version(&conn).unwrap().as_deref(),
            Some(VERSION_1_0)
        );

        assert_eq!(manager.migrate(&mut conn).unwrap(), vec![VERSION_1_2]);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_info", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_upgrade_adds_audit_columns() {
        let mut conn = conn();
        let manager = manager();
        // A database built by a release that stopped at 1.1.0, with the
        // tracking table of that era.
        conn.execute_batch(
            "CREATE TABLE schema_info (
                version TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL,
                description TEXT
            )",
        )
        .unwrap();
        let v11 = manager.find(VERSION_1_1).unwrap();
        manager.apply(&mut conn, &[v11]).unwrap();
        assert!(!column_exists(&conn, "users", "updated_at").unwrap());
        conn.execute(
            "INSERT INTO users (user_id, created_at) VALUES ('u1', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        assert_eq!(manager.migrate(&mut conn).unwrap(), vec![VERSION_1_2]);

        let updated_at: Option<String> = conn
            .query_row("SELECT updated_at FROM users WHERE user_id = 'u1'", [], |r| {
                r.get(0)
            })
            .unwrap();
        assert_eq!(updated_at.as_deref(), Some("2024-01-01T00:00:00Z"));

        let unstamped: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM schema_info WHERE created_at IS NULL OR updated_at IS NULL",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(unstamped, 0);
    }

    #[test]
    fn test_fresh_database_has_audit_columns() {
        let mut conn = conn();
        manager().migrate(&mut conn).unwrap();
        for (table, column) in [
            ("users", "created_at"),
            ("users", "updated_at"),
            ("schema_info", "created_at"),
            ("schema_info", "updated_at"),
        ] {
            assert!(column_exists(&conn, table, column).unwrap(), "{table}.{column}");
        }
    }

    #[test]
    fn test_reapplying_recorded_version_is_tolerated() {
        let mut conn = conn();
        let manager = manager();
        manager.migrate(&mut conn).unwrap();

        let latest = manager.find(LATEST_VERSION).unwrap();
        manager.apply(&mut conn, &[latest]).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_info", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_unknown_version_is_refused() {
        let mut conn = conn();
        let manager = manager();
        manager.migrate(&mut conn).unwrap();
        conn.execute(
            "INSERT INTO schema_info (version, applied_at) VALUES ('9.0.0', '9999-01-01T00:00:00Z')",
            [],
        )
        .unwrap();

        let err = manager.plan(&conn).unwrap_err();
        assert!(matches!(err, MemoryError::Migration { .. }));
    }

    #[test]
    fn test_failed_migration_leaves_no_trace() {
        let mut conn = conn();
        let broken = MigrationManager::new(vec![Migration {
            version: "1.0.0".into(),
            description: "broken".into(),
            up: vec![
                "CREATE TABLE IF NOT EXISTS users (user_id TEXT PRIMARY KEY)".into(),
                "CREATE TABLE nonsense (".into(),
            ],
            columns: vec![],
            down: vec![],
        }]);

        let err = broken.migrate(&mut conn).unwrap_err();
        assert!(matches!(err, MemoryError::Migration { .. }));
        assert!(!table_exists(&conn, "users").unwrap());
        assert!(!table_exists(&conn, "schema_info").unwrap());
    }

    #[test]
    fn test_rollback_to_empty() {
        let mut conn = conn();
        let manager = manager();
        assert!(SchemaCatalog::default().fts_enabled());
        manager.migrate(&mut conn).unwrap();
        conn.execute_batch(
            "INSERT INTO users (user_id) VALUES ('u1');
             INSERT INTO messages (id, conversation_id, role, content, timestamp)
             VALUES ('m1', 'c1', 'user', 'hello', '2024-01-01T00:00:00Z');
             INSERT INTO memory_entries (id, content, memory_type, timestamp, user_id)
             VALUES ('e1', 'likes tea', 'fact', '2024-01-01T00:00:00Z', 'u1');",
        )
        .unwrap();

        manager.rollback(&mut conn, None).unwrap();

        assert_eq!(manager.current_version(&conn).unwrap(), None);
        for table in REQUIRED_TABLES.iter().chain(&crate::schema::FTS_TABLES) {
            assert!(!table_exists(&conn, table).unwrap(), "{table} survived");
        }
        let triggers: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'trigger'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(triggers, 0);
    }

    #[test]
    fn test_rollback_targets() {
        let mut conn = conn();
        let manager = manager();

        let err = manager.rollback(&mut conn, None).unwrap_err();
        assert!(matches!(err, MemoryError::Migration { .. }));

        manager.migrate(&mut conn).unwrap();
        assert!(table_exists(&conn, "messages_fts").unwrap());
        manager.rollback(&mut conn, Some(LATEST_VERSION)).unwrap();
        assert!(manager.rollback(&mut conn, Some(VERSION_1_0)).is_err());

        manager.rollback(&mut conn, Some("")).unwrap();
        assert_eq!(manager.current_version(&conn).unwrap(), None);

        // Empty again, so the schema can be rebuilt.
        assert_eq!(manager.migrate(&mut conn).unwrap(), vec![LATEST_VERSION]);
    }

    #[test]
    fn test_validate_reports() {
        let mut conn = conn();
        let manager = manager();

        let before = manager.validate(&conn);
        assert!(!before.valid);
        assert!(before.error.is_none());
        assert_eq!(before.tables.get("messages"), Some(&false));

        manager.migrate(&mut conn).unwrap();
        let after = manager.validate(&conn);
        assert!(after.valid);
        assert_eq!(after.version.as_deref(), Some(LATEST_VERSION));
        assert!(after.tables.values().all(|&v| v));
        assert!(after.indexes.values().all(|&v| v));

        conn.execute_batch("DROP INDEX idx_messages_user_id").unwrap();
        let degraded = manager.validate(&conn);
        assert!(degraded.valid);
        assert_eq!(degraded.indexes.get("idx_messages_user_id"), Some(&false));
    }
}

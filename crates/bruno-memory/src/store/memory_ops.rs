//! Memory entry operations.

use rusqlite::{OptionalExtension, params};
use tracing::{debug, info};

use bruno_types::{MemoryEntry, MemoryQuery};

use crate::codec::{MEMORY_COLUMNS, MemoryRow, encode_timestamp, select_list};
use crate::error::Result;
use crate::query::MemoryFilter;
use crate::validation::{validate_memory_entry, validate_memory_query};

use super::SqliteMemoryBackend;
use super::context_ops::touch_user;

const UPSERT_MEMORY: &str = r#"
INSERT INTO memory_entries (id, content, memory_type, importance, timestamp, user_id,
                            conversation_id, tags, metadata, embedding, expires_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
ON CONFLICT(id) DO UPDATE SET
    content = excluded.content,
    memory_type = excluded.memory_type,
    importance = excluded.importance,
    timestamp = excluded.timestamp,
    user_id = excluded.user_id,
    conversation_id = excluded.conversation_id,
    tags = excluded.tags,
    metadata = excluded.metadata,
    embedding = excluded.embedding,
    expires_at = excluded.expires_at,
    updated_at = CURRENT_TIMESTAMP
"#;

impl SqliteMemoryBackend {
    /// Insert a memory entry, or fully replace the stored entry with the
    /// same id. The owning user is registered if unknown.
    pub fn store_memory(&self, entry: &MemoryEntry) -> Result<()> {
        validate_memory_entry(entry)?;
        let row = MemoryRow::encode(entry)?;

        self.with_transaction(|tx, _| {
            touch_user(tx, &row.user_id)?;
            tx.execute(
                UPSERT_MEMORY,
                params![
                    row.id,
                    row.content,
                    row.memory_type,
                    row.importance,
                    row.timestamp,
                    row.user_id,
                    row.conversation_id,
                    row.tags,
                    row.metadata,
                    row.embedding,
                    row.expires_at,
                ],
            )?;
            Ok(())
        })?;

        debug!(memory_id = %entry.id, user_id = %entry.user_id, "Stored memory");
        Ok(())
    }

    /// Get a memory entry by id, expired or not.
    pub fn get_memory(&self, memory_id: &str) -> Result<Option<MemoryEntry>> {
        self.with_conn(|c| {
            let sql = format!(
                "SELECT {} FROM memory_entries WHERE id = ?1",
                select_list(&MEMORY_COLUMNS, None)
            );
            c.conn
                .query_row(&sql, params![memory_id], MemoryRow::from_row)
                .optional()?
                .map(MemoryRow::decode)
                .transpose()
        })
    }

    /// Unexpired entries matching every populated field of `query`.
    ///
    /// Ordered by importance, then timestamp, both descending, then id.
    pub fn retrieve_memories(&self, query: &MemoryQuery) -> Result<Vec<MemoryEntry>> {
        validate_memory_query(query)?;
        let filter = MemoryFilter::from_query(query, &bruno_types::now());

        let entries = self.with_conn(|c| {
            let sql = filter.to_sql(c.search.as_ref());
            let mut stmt = c.conn.prepare(&sql.sql)?;
            let mut rows = stmt.query(sql.params())?;

            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(MemoryRow::from_row(row)?.decode()?);
            }
            Ok(entries)
        })?;

        debug!(found = entries.len(), "Retrieved memories");
        Ok(entries)
    }

    /// Delete a memory entry by id. Returns whether it existed.
    pub fn delete_memory(&self, memory_id: &str) -> Result<bool> {
        let rows_affected = self.with_transaction(|tx, _| {
            Ok(tx.execute(
                "DELETE FROM memory_entries WHERE id = ?1",
                params![memory_id],
            )?)
        })?;

        if rows_affected > 0 {
            debug!(memory_id, "Deleted memory");
        }
        Ok(rows_affected > 0)
    }

    /// Delete every entry whose expiry has passed. Returns how many were
    /// removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = encode_timestamp(&bruno_types::now());
        let removed = self.with_transaction(|tx, _| {
            Ok(tx.execute(
                "DELETE FROM memory_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                params![now],
            )?)
        })?;

        if removed > 0 {
            info!(removed, "Purged expired memories");
        }
        Ok(removed)
    }
}

//! Message operations.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use bruno_types::Message;

use crate::codec::{MESSAGE_COLUMNS, MessageRow, select_list};
use crate::error::Result;
use crate::query::to_i64;
use crate::validation::{validate_conversation_id, validate_message, validate_search};

use super::SqliteMemoryBackend;

// Every stored field is overwritten on conflict so a re-store fully replaces
// the row without the delete that would null children's parent_id.
const UPSERT_MESSAGE: &str = r#"
INSERT INTO messages (id, conversation_id, role, content, timestamp, message_type,
                      metadata, user_id, parent_id, tokens, model, finish_reason)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
ON CONFLICT(id) DO UPDATE SET
    conversation_id = excluded.conversation_id,
    role = excluded.role,
    content = excluded.content,
    timestamp = excluded.timestamp,
    message_type = excluded.message_type,
    metadata = excluded.metadata,
    user_id = excluded.user_id,
    parent_id = excluded.parent_id,
    tokens = excluded.tokens,
    model = excluded.model,
    finish_reason = excluded.finish_reason,
    updated_at = CURRENT_TIMESTAMP
"#;

impl SqliteMemoryBackend {
    /// Insert a message, or fully replace the stored message with the same id.
    pub fn store_message(&self, message: &Message) -> Result<()> {
        validate_message(message)?;
        let row = MessageRow::encode(message)?;

        self.with_transaction(|tx, _| {
            tx.execute(
                UPSERT_MESSAGE,
                params![
                    row.id,
                    row.conversation_id,
                    row.role,
                    row.content,
                    row.timestamp,
                    row.message_type,
                    row.metadata,
                    row.user_id,
                    row.parent_id,
                    row.tokens,
                    row.model,
                    row.finish_reason,
                ],
            )?;
            Ok(())
        })?;

        debug!(message_id = %message.id, conversation_id = %message.conversation_id, "Stored message");
        Ok(())
    }

    /// Get a message by id.
    pub fn get_message(&self, message_id: &str) -> Result<Option<Message>> {
        self.with_conn(|c| {
            let sql = format!(
                "SELECT {} FROM messages WHERE id = ?1",
                select_list(&MESSAGE_COLUMNS, None)
            );
            c.conn
                .query_row(&sql, params![message_id], MessageRow::from_row)
                .optional()?
                .map(MessageRow::decode)
                .transpose()
        })
    }

    /// Messages of a conversation, oldest first.
    ///
    /// With a limit, the earliest `limit` messages are returned.
    pub fn retrieve_messages(
        &self,
        conversation_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>> {
        validate_conversation_id(conversation_id)?;
        self.with_conn(|c| conversation_messages(&c.conn, conversation_id, limit))
    }

    /// Messages whose content matches `query`.
    ///
    /// With full-text search active, `query` is matched as a phrase of whole
    /// tokens and results are ranked by relevance. Otherwise it is matched as
    /// a case-insensitive substring and results are newest first.
    pub fn search_messages(
        &self,
        query: &str,
        user_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Message>> {
        validate_search(query, limit)?;

        let messages = self.with_conn(|c| {
            let sql = c.search.message_search(query.trim(), user_id, limit);
            let mut stmt = c.conn.prepare(&sql.sql)?;
            let mut rows = stmt.query(sql.params())?;

            let mut messages = Vec::new();
            while let Some(row) = rows.next()? {
                messages.push(MessageRow::from_row(row)?.decode()?);
            }
            Ok(messages)
        })?;

        debug!(query, found = messages.len(), "Searched messages");
        Ok(messages)
    }

    /// Delete a message by id. Returns whether it existed.
    ///
    /// Replies to the deleted message keep their content; their parent link
    /// is cleared.
    pub fn delete_message(&self, message_id: &str) -> Result<bool> {
        let rows_affected = self.with_transaction(|tx, _| {
            Ok(tx.execute("DELETE FROM messages WHERE id = ?1", params![message_id])?)
        })?;

        if rows_affected > 0 {
            debug!(message_id, "Deleted message");
        }
        Ok(rows_affected > 0)
    }

    /// Remove a conversation's messages. Returns how many were removed.
    ///
    /// With `keep_system`, messages with the system role survive.
    pub fn clear_history(&self, conversation_id: &str, keep_system: bool) -> Result<usize> {
        validate_conversation_id(conversation_id)?;

        let removed = self.with_transaction(|tx, _| {
            let removed = if keep_system {
                tx.execute(
                    "DELETE FROM messages WHERE conversation_id = ?1 AND role != 'system'",
                    params![conversation_id],
                )?
            } else {
                tx.execute(
                    "DELETE FROM messages WHERE conversation_id = ?1",
                    params![conversation_id],
                )?
            };
            Ok(removed)
        })?;

        debug!(conversation_id, removed, keep_system, "Cleared history");
        Ok(removed)
    }
}

/// Messages of a conversation in ascending time order, earliest `limit` kept.
pub(crate) fn conversation_messages(
    conn: &Connection,
    conversation_id: &str,
    limit: Option<usize>,
) -> Result<Vec<Message>> {
    let sql = format!(
        "SELECT {} FROM messages WHERE conversation_id = ?1 \
         ORDER BY timestamp ASC, id ASC LIMIT ?2",
        select_list(&MESSAGE_COLUMNS, None)
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![conversation_id, limit.map_or(-1, to_i64)])?;

    let mut messages = Vec::new();
    while let Some(row) = rows.next()? {
        messages.push(MessageRow::from_row(row)?.decode()?);
    }
    Ok(messages)
}

/// The most recent `limit` messages of a conversation, oldest first.
pub(crate) fn recent_messages(
    conn: &Connection,
    conversation_id: &str,
    limit: usize,
) -> Result<Vec<Message>> {
    let columns = select_list(&MESSAGE_COLUMNS, None);
    let sql = format!(
        "SELECT {columns} FROM (\
             SELECT {columns} FROM messages WHERE conversation_id = ?1 \
             ORDER BY timestamp DESC, id DESC LIMIT ?2\
         ) ORDER BY timestamp ASC, id ASC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![conversation_id, to_i64(limit)])?;

    let mut messages = Vec::new();
    while let Some(row) = rows.next()? {
        messages.push(MessageRow::from_row(row)?.decode()?);
    }
    Ok(messages)
}

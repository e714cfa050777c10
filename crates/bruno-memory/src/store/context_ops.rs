//! User registry, conversation context and statistics.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use bruno_types::{ConversationContext, Metadata, UserContext};

use crate::backend::MemoryStatistics;
use crate::codec::{USER_COLUMNS, UserRow, encode_timestamp, select_list};
use crate::error::Result;
use crate::validation::{validate_conversation_id, validate_user_id};

use super::SqliteMemoryBackend;
use super::message_ops::{conversation_messages, recent_messages};

/// Register `user_id` if unknown and mark it active now.
pub(crate) fn touch_user(conn: &Connection, user_id: &str) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO users (user_id, last_active, updated_at) VALUES (?1, ?2, ?2)
        ON CONFLICT(user_id) DO UPDATE SET
            last_active = excluded.last_active,
            updated_at = excluded.updated_at
        "#,
        params![user_id, encode_timestamp(&bruno_types::now())],
    )?;
    Ok(())
}

fn load_user(conn: &Connection, user_id: &str) -> Result<Option<UserContext>> {
    let sql = format!(
        "SELECT {} FROM users WHERE user_id = ?1",
        select_list(&USER_COLUMNS, None)
    );
    conn.query_row(&sql, params![user_id], UserRow::from_row)
        .optional()?
        .map(UserRow::decode)
        .transpose()
}

fn count(conn: &Connection, sql: &str, user_id: &str) -> Result<u64> {
    let n: i64 = conn.query_row(sql, params![user_id], |row| row.get(0))?;
    Ok(u64::try_from(n).unwrap_or_default())
}

impl SqliteMemoryBackend {
    /// Insert or update a user's profile and mark it active now.
    pub fn upsert_user(&self, user: &UserContext) -> Result<()> {
        validate_user_id(&user.user_id)?;
        let mut row = UserRow::encode(user)?;
        row.last_active = Some(encode_timestamp(&bruno_types::now()));

        self.with_transaction(|tx, _| {
            tx.execute(
                r#"
                INSERT INTO users (user_id, username, email, metadata, last_active, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                ON CONFLICT(user_id) DO UPDATE SET
                    username = excluded.username,
                    email = excluded.email,
                    metadata = excluded.metadata,
                    last_active = excluded.last_active,
                    updated_at = excluded.updated_at
                "#,
                params![
                    row.user_id,
                    row.username,
                    row.email,
                    row.metadata,
                    row.last_active,
                ],
            )?;
            Ok(())
        })?;

        debug!(user_id = %user.user_id, "Upserted user");
        Ok(())
    }

    /// Get a registered user by id.
    pub fn get_user(&self, user_id: &str) -> Result<Option<UserContext>> {
        self.with_conn(|c| load_user(&c.conn, user_id))
    }

    /// Messages of a conversation plus what is known about `user_id`.
    ///
    /// With a configured context window only the most recent messages are
    /// included, still oldest first. An unregistered user yields a bare
    /// context carrying just the id.
    pub fn get_context(
        &self,
        conversation_id: &str,
        user_id: Option<&str>,
    ) -> Result<ConversationContext> {
        validate_conversation_id(conversation_id)?;
        let window = self.config().context_message_limit;

        self.with_conn(|c| {
            let messages = match window {
                Some(limit) => recent_messages(&c.conn, conversation_id, limit)?,
                None => conversation_messages(&c.conn, conversation_id, None)?,
            };

            let user_context = match user_id {
                Some(id) => Some(load_user(&c.conn, id)?.unwrap_or_else(|| UserContext::new(id))),
                None => None,
            };

            Ok(ConversationContext {
                conversation_id: conversation_id.to_string(),
                messages,
                user_context,
                metadata: Metadata::new(),
            })
        })
    }

    /// Per-user counts. Unknown users get all zeros.
    pub fn get_statistics(&self, user_id: &str) -> Result<MemoryStatistics> {
        validate_user_id(user_id)?;

        self.with_conn(|c| {
            Ok(MemoryStatistics {
                message_count: count(
                    &c.conn,
                    "SELECT COUNT(*) FROM messages WHERE user_id = ?1",
                    user_id,
                )?,
                memory_count: count(
                    &c.conn,
                    "SELECT COUNT(*) FROM memory_entries WHERE user_id = ?1",
                    user_id,
                )?,
                active_sessions: count(
                    &c.conn,
                    "SELECT COUNT(*) FROM sessions WHERE user_id = ?1 AND is_active = 1",
                    user_id,
                )?,
                conversation_count: count(
                    &c.conn,
                    "SELECT COUNT(DISTINCT conversation_id) FROM messages WHERE user_id = ?1",
                    user_id,
                )?,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::store::tests::create_test_backend;
    use bruno_config::SqliteConfig;
    use bruno_types::{MemoryEntry, MemoryType, Message};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    #[test]
    fn test_upsert_and_get_user() {
        let backend = create_test_backend();
        let user = UserContext::new("u1")
            .with_username("ada")
            .with_metadata("tz", json!("UTC"));
        backend.upsert_user(&user).unwrap();

        let stored = backend.get_user("u1").unwrap().unwrap();
        assert_eq!(stored.username.as_deref(), Some("ada"));
        assert_eq!(stored.metadata.get("tz"), Some(&json!("UTC")));
        assert!(stored.last_active.is_some());

        backend
            .upsert_user(&UserContext::new("u1").with_email("ada@example.com"))
            .unwrap();
        let updated = backend.get_user("u1").unwrap().unwrap();
        assert_eq!(updated.username, None);
        assert_eq!(updated.email.as_deref(), Some("ada@example.com"));
    }

    fn audit_columns(backend: &SqliteMemoryBackend, user_id: &str) -> (String, Option<String>) {
        backend
            .with_conn(|c| {
                Ok(c.conn.query_row(
                    "SELECT created_at, updated_at FROM users WHERE user_id = ?1",
                    params![user_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?)
            })
            .unwrap()
    }

    #[test]
    fn test_user_writes_stamp_updated_at() {
        let backend = create_test_backend();
        backend.upsert_user(&UserContext::new("u1")).unwrap();
        let (created, first) = audit_columns(&backend, "u1");
        assert!(!created.is_empty());
        let first = first.expect("updated_at set on insert");

        std::thread::sleep(std::time::Duration::from_millis(5));
        backend
            .store_memory(&MemoryEntry::new("u1", MemoryType::Fact, "x"))
            .unwrap();
        let (_, touched) = audit_columns(&backend, "u1");
        assert!(touched.expect("updated_at set on touch") > first);

        // Auto-registration stamps new users too.
        backend.create_session("u2", None).unwrap();
        assert!(audit_columns(&backend, "u2").1.is_some());
    }

    #[test]
    fn test_touch_keeps_profile() {
        let backend = create_test_backend();
        backend
            .upsert_user(&UserContext::new("u1").with_username("ada"))
            .unwrap();
        backend
            .store_memory(&MemoryEntry::new("u1", MemoryType::Fact, "x"))
            .unwrap();

        let user = backend.get_user("u1").unwrap().unwrap();
        assert_eq!(user.username.as_deref(), Some("ada"));
    }

    #[test]
    fn test_context_includes_user() {
        let backend = create_test_backend();
        backend.upsert_user(&UserContext::new("u1").with_username("ada")).unwrap();
        backend.store_message(&Message::user("c1", "hi").with_user("u1")).unwrap();

        let ctx = backend.get_context("c1", Some("u1")).unwrap();
        assert_eq!(ctx.conversation_id, "c1");
        assert_eq!(ctx.messages.len(), 1);
        assert_eq!(
            ctx.user_context.unwrap().username.as_deref(),
            Some("ada")
        );

        let anon = backend.get_context("c1", Some("stranger")).unwrap();
        assert_eq!(anon.user_context, Some(UserContext::new("stranger")));

        let none = backend.get_context("empty", None).unwrap();
        assert!(none.messages.is_empty());
        assert!(none.user_context.is_none());
    }

    #[test]
    fn test_context_window() {
        let backend =
            SqliteMemoryBackend::new(SqliteConfig::in_memory().with_context_message_limit(2));
        backend.connect().unwrap();
        for secs in 0..4 {
            let msg = Message::user("c1", format!("m{secs}"))
                .with_timestamp(Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap());
            backend.store_message(&msg).unwrap();
        }

        let ctx = backend.get_context("c1", None).unwrap();
        let contents: Vec<_> = ctx.messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m2", "m3"]);
    }

    #[test]
    fn test_statistics() {
        let backend = create_test_backend();
        backend.store_message(&Message::user("c1", "a").with_user("u1")).unwrap();
        backend.store_message(&Message::user("c1", "b").with_user("u1")).unwrap();
        backend.store_message(&Message::user("c2", "c").with_user("u1")).unwrap();
        backend.store_message(&Message::user("c3", "d").with_user("u2")).unwrap();
        backend
            .store_memory(&MemoryEntry::new("u1", MemoryType::Fact, "m"))
            .unwrap();
        let s1 = backend.create_session("u1", None).unwrap();
        backend.create_session("u1", None).unwrap();
        backend.end_session(&s1.session_id).unwrap();

        let stats = backend.get_statistics("u1").unwrap();
        assert_eq!(
            stats,
            MemoryStatistics {
                message_count: 3,
                memory_count: 1,
                active_sessions: 1,
                conversation_count: 2,
            }
        );
        assert_eq!(
            backend.get_statistics("nobody").unwrap(),
            MemoryStatistics::default()
        );
    }
}

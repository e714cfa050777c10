//! Session operations.

use rusqlite::{OptionalExtension, params};
use tracing::debug;

use bruno_types::{Metadata, Session};

use crate::codec::{SESSION_COLUMNS, SessionRow, encode_timestamp, select_list};
use crate::error::Result;
use crate::validation::{validate_session_id, validate_user_id};

use super::SqliteMemoryBackend;
use super::context_ops::touch_user;

impl SqliteMemoryBackend {
    /// Start a new active session for `user_id`.
    ///
    /// The session gets fresh session and conversation ids. The user is
    /// registered if unknown.
    pub fn create_session(&self, user_id: &str, metadata: Option<Metadata>) -> Result<Session> {
        validate_user_id(user_id)?;
        let session = Session::new(user_id).with_metadata(metadata.unwrap_or_default());
        let row = SessionRow::encode(&session)?;

        self.with_transaction(|tx, _| {
            touch_user(tx, &row.user_id)?;
            tx.execute(
                r#"
                INSERT INTO sessions (session_id, user_id, conversation_id, created_at,
                                      updated_at, metadata, is_active)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![
                    row.session_id,
                    row.user_id,
                    row.conversation_id,
                    row.created_at,
                    row.updated_at,
                    row.metadata,
                    row.is_active,
                ],
            )?;
            Ok(())
        })?;

        debug!(session_id = %session.session_id, user_id, "Created session");
        Ok(session)
    }

    /// Get a session by id.
    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        self.with_conn(|c| {
            let sql = format!(
                "SELECT {} FROM sessions WHERE session_id = ?1",
                select_list(&SESSION_COLUMNS, None)
            );
            c.conn
                .query_row(&sql, params![session_id], SessionRow::from_row)
                .optional()?
                .map(SessionRow::decode)
                .transpose()
        })
    }

    /// Mark a session inactive. Returns whether it existed.
    pub fn end_session(&self, session_id: &str) -> Result<bool> {
        self.set_session_active(session_id, false)
    }

    /// Mark a session active again. Returns whether it existed.
    pub fn renew_session(&self, session_id: &str) -> Result<bool> {
        self.set_session_active(session_id, true)
    }

    fn set_session_active(&self, session_id: &str, active: bool) -> Result<bool> {
        validate_session_id(session_id)?;
        let now = encode_timestamp(&bruno_types::now());

        let rows_affected = self.with_transaction(|tx, _| {
            Ok(tx.execute(
                "UPDATE sessions SET is_active = ?2, updated_at = ?3 WHERE session_id = ?1",
                params![session_id, active, now],
            )?)
        })?;

        if rows_affected > 0 {
            debug!(session_id, active, "Updated session");
        }
        Ok(rows_affected > 0)
    }

    /// Sessions of a user, newest first.
    pub fn list_sessions(&self, user_id: &str, active_only: bool) -> Result<Vec<Session>> {
        validate_user_id(user_id)?;

        self.with_conn(|c| {
            let sql = format!(
                "SELECT {} FROM sessions WHERE user_id = ?1 AND (?2 = 0 OR is_active = 1) \
                 ORDER BY created_at DESC, session_id ASC",
                select_list(&SESSION_COLUMNS, None)
            );
            let mut stmt = c.conn.prepare(&sql)?;
            let mut rows = stmt.query(params![user_id, active_only])?;

            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(SessionRow::from_row(row)?.decode()?);
            }
            Ok(sessions)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::tests::create_test_backend;
    use serde_json::json;

    #[test]
    fn test_create_and_get_session() {
        let backend = create_test_backend();
        let mut meta = Metadata::new();
        meta.insert("client".into(), json!("cli"));

        let session = backend.create_session("u1", Some(meta.clone())).unwrap();
        assert!(session.is_active);
        assert_eq!(session.metadata, meta);

        let fetched = backend.get_session(&session.session_id).unwrap().unwrap();
        assert_eq!(fetched, session);
        assert!(backend.get_session("missing").unwrap().is_none());
        assert!(backend.get_user("u1").unwrap().is_some());
    }

    #[test]
    fn test_sessions_get_distinct_conversations() {
        let backend = create_test_backend();
        let a = backend.create_session("u1", None).unwrap();
        let b = backend.create_session("u1", None).unwrap();
        assert_ne!(a.session_id, b.session_id);
        assert_ne!(a.conversation_id, b.conversation_id);
    }

    #[test]
    fn test_create_session_requires_user() {
        let backend = create_test_backend();
        let err = backend.create_session("", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_end_and_renew_session() {
        let backend = create_test_backend();
        let session = backend.create_session("u1", None).unwrap();

        assert!(backend.end_session(&session.session_id).unwrap());
        let ended = backend.get_session(&session.session_id).unwrap().unwrap();
        assert!(!ended.is_active);
        assert!(ended.updated_at.is_some());

        assert!(backend.renew_session(&session.session_id).unwrap());
        assert!(backend.get_session(&session.session_id).unwrap().unwrap().is_active);

        assert!(!backend.end_session("missing").unwrap());
    }

    #[test]
    fn test_list_sessions() {
        let backend = create_test_backend();
        let first = backend.create_session("u1", None).unwrap();
        let second = backend.create_session("u1", None).unwrap();
        backend.create_session("u2", None).unwrap();
        backend.end_session(&first.session_id).unwrap();

        let all = backend.list_sessions("u1", false).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].session_id, second.session_id);

        let active = backend.list_sessions("u1", true).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, second.session_id);
    }
}

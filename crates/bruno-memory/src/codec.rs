//! Row encoding for domain entities.
//!
//! Nested fields are stored as JSON text and timestamps as RFC 3339 UTC with
//! nanosecond precision. The fixed-width timestamp form makes lexicographic
//! comparison in SQL agree with chronological order.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::Row;

use bruno_types::{
    MemoryEntry, MemoryType, Message, MessageType, Metadata, Role, Session, Timestamp, UserContext,
};

use crate::error::{MemoryError, Result};

// ─────────────────────────────────────────────────────────────────────────────
// Scalar Codecs
// ─────────────────────────────────────────────────────────────────────────────

pub fn encode_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Decode a stored timestamp.
///
/// Values without an offset, including SQLite's `CURRENT_TIMESTAMP` form,
/// are read as UTC.
pub fn decode_timestamp(s: &str) -> Result<Timestamp> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Ok(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| MemoryError::InvalidData(format!("Invalid timestamp: {s}")))
}

fn decode_optional_timestamp(s: Option<String>) -> Result<Option<Timestamp>> {
    s.as_deref().map(decode_timestamp).transpose()
}

/// Empty metadata is stored as NULL.
pub fn encode_metadata(metadata: &Metadata) -> Result<Option<String>> {
    if metadata.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(metadata)?))
}

pub fn decode_metadata(s: Option<String>) -> Result<Metadata> {
    match s.as_deref() {
        None | Some("") => Ok(Metadata::new()),
        Some(json) => Ok(serde_json::from_str(json)?),
    }
}

/// Tags are always stored as a JSON array, `[]` when empty, so `json_each`
/// works on every row.
pub fn encode_tags(tags: &[String]) -> Result<String> {
    Ok(serde_json::to_string(tags)?)
}

pub fn decode_tags(s: Option<String>) -> Result<Vec<String>> {
    match s.as_deref() {
        None | Some("") => Ok(Vec::new()),
        Some(json) => Ok(serde_json::from_str(json)?),
    }
}

pub fn encode_embedding(embedding: Option<&[f32]>) -> Result<Option<String>> {
    embedding
        .map(serde_json::to_string)
        .transpose()
        .map_err(Into::into)
}

pub fn decode_embedding(s: Option<String>) -> Result<Option<Vec<f32>>> {
    s.as_deref()
        .filter(|json| !json.is_empty())
        .map(serde_json::from_str)
        .transpose()
        .map_err(Into::into)
}

// ─────────────────────────────────────────────────────────────────────────────
// Message Rows
// ─────────────────────────────────────────────────────────────────────────────

/// Columns read and written for a message, in row order.
pub const MESSAGE_COLUMNS: [&str; 12] = [
    "id",
    "conversation_id",
    "role",
    "content",
    "timestamp",
    "message_type",
    "metadata",
    "user_id",
    "parent_id",
    "tokens",
    "model",
    "finish_reason",
];

/// Flat storage form of a [`Message`].
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub timestamp: String,
    pub message_type: Option<String>,
    pub metadata: Option<String>,
    pub user_id: Option<String>,
    pub parent_id: Option<String>,
    pub tokens: Option<u32>,
    pub model: Option<String>,
    pub finish_reason: Option<String>,
}

impl MessageRow {
    pub fn encode(message: &Message) -> Result<Self> {
        Ok(Self {
            id: message.id.clone(),
            conversation_id: message.conversation_id.clone(),
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
            timestamp: encode_timestamp(&message.timestamp),
            message_type: message.message_type.map(|t| t.as_str().to_string()),
            metadata: encode_metadata(&message.metadata)?,
            user_id: message.user_id.clone(),
            parent_id: message.parent_id.clone(),
            tokens: message.tokens,
            model: message.model.clone(),
            finish_reason: message.finish_reason.clone(),
        })
    }

    /// Read a row selected with [`MESSAGE_COLUMNS`] order.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            role: row.get(2)?,
            content: row.get(3)?,
            timestamp: row.get(4)?,
            message_type: row.get(5)?,
            metadata: row.get(6)?,
            user_id: row.get(7)?,
            parent_id: row.get(8)?,
            tokens: row.get(9)?,
            model: row.get(10)?,
            finish_reason: row.get(11)?,
        })
    }

    pub fn decode(self) -> Result<Message> {
        let role = Role::parse(&self.role)
            .ok_or_else(|| MemoryError::InvalidData(format!("Invalid role: {}", self.role)))?;
        let message_type = self
            .message_type
            .map(|t| {
                MessageType::parse(&t)
                    .ok_or_else(|| MemoryError::InvalidData(format!("Invalid message type: {t}")))
            })
            .transpose()?;

        Ok(Message {
            id: self.id,
            conversation_id: self.conversation_id,
            role,
            content: self.content,
            timestamp: decode_timestamp(&self.timestamp)?,
            message_type,
            metadata: decode_metadata(self.metadata)?,
            user_id: self.user_id,
            parent_id: self.parent_id,
            tokens: self.tokens,
            model: self.model,
            finish_reason: self.finish_reason,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Rows
// ─────────────────────────────────────────────────────────────────────────────

/// Columns read and written for a memory entry, in row order.
pub const MEMORY_COLUMNS: [&str; 11] = [
    "id",
    "content",
    "memory_type",
    "importance",
    "timestamp",
    "user_id",
    "conversation_id",
    "tags",
    "metadata",
    "embedding",
    "expires_at",
];

/// Flat storage form of a [`MemoryEntry`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryRow {
    pub id: String,
    pub content: String,
    pub memory_type: String,
    pub importance: f64,
    pub timestamp: String,
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub tags: Option<String>,
    pub metadata: Option<String>,
    pub embedding: Option<String>,
    pub expires_at: Option<String>,
}

impl MemoryRow {
    pub fn encode(entry: &MemoryEntry) -> Result<Self> {
        Ok(Self {
            id: entry.id.clone(),
            content: entry.content.clone(),
            memory_type: entry.memory_type.as_str().to_string(),
            importance: entry.importance,
            timestamp: encode_timestamp(&entry.timestamp),
            user_id: entry.user_id.clone(),
            conversation_id: entry.conversation_id.clone(),
            tags: Some(encode_tags(&entry.tags)?),
            metadata: encode_metadata(&entry.metadata)?,
            embedding: encode_embedding(entry.embedding.as_deref())?,
            expires_at: entry.expires_at.as_ref().map(encode_timestamp),
        })
    }

    /// Read a row selected with [`MEMORY_COLUMNS`] order.
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            content: row.get(1)?,
            memory_type: row.get(2)?,
            importance: row.get(3)?,
            timestamp: row.get(4)?,
            user_id: row.get(5)?,
            conversation_id: row.get(6)?,
            tags: row.get(7)?,
            metadata: row.get(8)?,
            embedding: row.get(9)?,
            expires_at: row.get(10)?,
        })
    }

    pub fn decode(self) -> Result<MemoryEntry> {
        let memory_type = MemoryType::parse(&self.memory_type).ok_or_else(|| {
            MemoryError::InvalidData(format!("Invalid memory type: {}", self.memory_type))
        })?;

        Ok(MemoryEntry {
            id: self.id,
            content: self.content,
            memory_type,
            importance: self.importance,
            timestamp: decode_timestamp(&self.timestamp)?,
            user_id: self.user_id,
            conversation_id: self.conversation_id,
            tags: decode_tags(self.tags)?,
            metadata: decode_metadata(self.metadata)?,
            embedding: decode_embedding(self.embedding)?,
            expires_at: decode_optional_timestamp(self.expires_at)?,
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session and User Rows
// ─────────────────────────────────────────────────────────────────────────────

pub const SESSION_COLUMNS: [&str; 7] = [
    "session_id",
    "user_id",
    "conversation_id",
    "created_at",
    "updated_at",
    "metadata",
    "is_active",
];

/// Flat storage form of a [`Session`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRow {
    pub session_id: String,
    pub user_id: String,
    pub conversation_id: String,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub metadata: Option<String>,
    pub is_active: bool,
}

impl SessionRow {
    pub fn encode(session: &Session) -> Result<Self> {
        Ok(Self {
            session_id: session.session_id.clone(),
            user_id: session.user_id.clone(),
            conversation_id: session.conversation_id.clone(),
            created_at: encode_timestamp(&session.created_at),
            updated_at: session.updated_at.as_ref().map(encode_timestamp),
            metadata: encode_metadata(&session.metadata)?,
            is_active: session.is_active,
        })
    }

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            session_id: row.get(0)?,
            user_id: row.get(1)?,
            conversation_id: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
            metadata: row.get(5)?,
            is_active: row.get(6)?,
        })
    }

    pub fn decode(self) -> Result<Session> {
        Ok(Session {
            session_id: self.session_id,
            user_id: self.user_id,
            conversation_id: self.conversation_id,
            created_at: decode_timestamp(&self.created_at)?,
            updated_at: decode_optional_timestamp(self.updated_at)?,
            metadata: decode_metadata(self.metadata)?,
            is_active: self.is_active,
        })
    }
}

pub const USER_COLUMNS: [&str; 5] = ["user_id", "username", "email", "metadata", "last_active"];

/// Flat storage form of a [`UserContext`].
#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub user_id: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub metadata: Option<String>,
    pub last_active: Option<String>,
}

impl UserRow {
    pub fn encode(user: &UserContext) -> Result<Self> {
        Ok(Self {
            user_id: user.user_id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            metadata: encode_metadata(&user.metadata)?,
            last_active: user.last_active.as_ref().map(encode_timestamp),
        })
    }

    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            user_id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            metadata: row.get(3)?,
            last_active: row.get(4)?,
        })
    }

    pub fn decode(self) -> Result<UserContext> {
        Ok(UserContext {
            user_id: self.user_id,
            username: self.username,
            email: self.email,
            metadata: decode_metadata(self.metadata)?,
            last_active: decode_optional_timestamp(self.last_active)?,
        })
    }
}

/// Comma-separated column list, optionally qualified with a table alias.
pub fn select_list(columns: &[&str], alias: Option<&str>) -> String {
    match alias {
        Some(alias) => columns
            .iter()
            .map(|c| format!("{alias}.{c}"))
            .collect::<Vec<_>>()
            .join(", "),
        None => columns.join(", "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    #[test]
    fn test_timestamp_round_trip_is_exact() {
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let encoded = encode_timestamp(&ts);
        assert_eq!(encoded, "2023-11-14T22:13:20.123456789Z");
        assert_eq!(decode_timestamp(&encoded).unwrap(), ts);
    }

    #[test]
    fn test_timestamp_encoding_sorts_chronologically() {
        let a = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let b = a + Duration::milliseconds(5);
        let c = a + Duration::seconds(10);
        assert!(encode_timestamp(&a) < encode_timestamp(&b));
        assert!(encode_timestamp(&b) < encode_timestamp(&c));
    }

    #[test]
    fn test_decode_legacy_timestamps() {
        let naive = decode_timestamp("2024-01-02 03:04:05").unwrap();
        assert_eq!(naive, Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());

        let iso = decode_timestamp("2024-01-02T03:04:05.5").unwrap();
        assert_eq!(iso.timestamp_subsec_millis(), 500);

        let offset = decode_timestamp("2024-01-02T05:04:05+02:00").unwrap();
        assert_eq!(offset, Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());

        assert!(matches!(
            decode_timestamp("yesterday"),
            Err(MemoryError::InvalidData(_))
        ));
    }

    #[test]
    fn test_empty_metadata_is_null() {
        assert_eq!(encode_metadata(&Metadata::new()).unwrap(), None);
        assert!(decode_metadata(None).unwrap().is_empty());

        let mut meta = Metadata::new();
        meta.insert("k".into(), json!({"nested": [1, 2]}));
        let encoded = encode_metadata(&meta).unwrap();
        assert_eq!(decode_metadata(encoded).unwrap(), meta);
    }

    #[test]
    fn test_tags_always_json_array() {
        assert_eq!(encode_tags(&[]).unwrap(), "[]");
        assert!(decode_tags(None).unwrap().is_empty());
        assert!(decode_tags(Some("not json".into())).is_err());
    }

    #[test]
    fn test_message_row_round_trip() {
        let message = Message::assistant("c1", "hi there")
            .with_id("m1")
            .with_user("u1")
            .with_parent("m0")
            .with_message_type(MessageType::Text)
            .with_metadata("source", json!("test"))
            .with_generation("model-x", 42, "stop");

        let row = MessageRow::encode(&message).unwrap();
        assert_eq!(row.role, "assistant");
        assert_eq!(row.decode().unwrap(), message);
    }

    #[test]
    fn test_message_row_rejects_unknown_role() {
        let mut row = MessageRow::encode(&Message::user("c1", "x")).unwrap();
        row.role = "narrator".into();
        assert!(matches!(row.decode(), Err(MemoryError::InvalidData(_))));
    }

    #[test]
    fn test_memory_row_round_trip() {
        let entry = MemoryEntry::new("u1", MemoryType::Preference, "prefers dark mode")
            .with_importance(0.8)
            .with_conversation("c1")
            .with_tag("ui")
            .with_tag("settings")
            .with_embedding(vec![0.25, -1.5, 3.0])
            .with_expiry(Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap());

        let row = MemoryRow::encode(&entry).unwrap();
        assert_eq!(row.tags.as_deref(), Some(r#"["ui","settings"]"#));
        assert_eq!(row.metadata, None);
        assert_eq!(row.decode().unwrap(), entry);
    }

    #[test]
    fn test_session_and_user_rows() {
        let session = Session::new("u1");
        let decoded = SessionRow::encode(&session).unwrap().decode().unwrap();
        assert_eq!(decoded, session);

        let user = UserContext::new("u1")
            .with_username("ada")
            .with_email("ada@example.com");
        let decoded = UserRow::encode(&user).unwrap().decode().unwrap();
        assert_eq!(decoded, user);
    }

    #[test]
    fn test_select_list() {
        assert_eq!(select_list(&["a", "b"], None), "a, b");
        assert_eq!(select_list(&["a", "b"], Some("m")), "m.a, m.b");
    }
}

//! Validation of caller-supplied entities.
//!
//! Every check here runs before any I/O, so a failure always points at the
//! caller's data and never at the engine.

use std::ops::RangeInclusive;

use bruno_types::{MemoryEntry, MemoryQuery, Message, Timestamp};
use chrono::Datelike;

/// Largest accepted message or memory content, in bytes.
pub const MAX_CONTENT_BYTES: usize = 1024 * 1024;

/// Years whose stored timestamps sort in time order as text.
pub const TIMESTAMP_YEARS: RangeInclusive<i32> = 0..=9999;

// ─────────────────────────────────────────────────────────────────────────────
// Validation Error
// ─────────────────────────────────────────────────────────────────────────────

/// Specific validation error types for memory data.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("message ID is required")]
    MissingMessageId,

    #[error("conversation ID is required")]
    MissingConversationId,

    #[error("memory entry ID is required")]
    MissingMemoryId,

    #[error("user ID is required")]
    MissingUserId,

    #[error("session ID is required")]
    MissingSessionId,

    #[error("content is empty")]
    EmptyContent,

    #[error("content is {len} bytes, limit is {max}")]
    ContentTooLarge { len: usize, max: usize },

    #[error("content contains NUL bytes")]
    NulInContent,

    /// Importance outside `[0.0, 1.0]` (or NaN).
    #[error("importance {0} is out of range [0.0, 1.0]")]
    ImportanceOutOfRange(f64),

    #[error("embedding contains {count} invalid values (NaN or Inf)")]
    InvalidEmbeddingValues { count: usize },

    #[error("{field} year {year} is outside 0..=9999")]
    TimestampOutOfRange { field: &'static str, year: i32 },

    #[error("search query is empty")]
    EmptyQuery,

    #[error("limit must be at least 1")]
    ZeroLimit,
}

// ─────────────────────────────────────────────────────────────────────────────
// Entity Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Validate content shared by messages and memory entries.
pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    if content.len() > MAX_CONTENT_BYTES {
        return Err(ValidationError::ContentTooLarge {
            len: content.len(),
            max: MAX_CONTENT_BYTES,
        });
    }
    if content.contains('\0') {
        return Err(ValidationError::NulInContent);
    }
    Ok(())
}

/// Validate a message before storing it.
pub fn validate_message(message: &Message) -> Result<(), ValidationError> {
    if message.id.is_empty() {
        return Err(ValidationError::MissingMessageId);
    }
    if message.conversation_id.is_empty() {
        return Err(ValidationError::MissingConversationId);
    }
    validate_timestamp("timestamp", &message.timestamp)?;
    validate_content(&message.content)
}

/// Validate a memory entry before storing it.
pub fn validate_memory_entry(entry: &MemoryEntry) -> Result<(), ValidationError> {
    if entry.id.is_empty() {
        return Err(ValidationError::MissingMemoryId);
    }
    validate_content(&entry.content)?;
    validate_user_id(&entry.user_id)?;
    validate_importance(entry.importance)?;
    validate_timestamp("timestamp", &entry.timestamp)?;
    if let Some(expires_at) = &entry.expires_at {
        validate_timestamp("expires_at", expires_at)?;
    }

    if let Some(embedding) = &entry.embedding {
        let count = embedding.iter().filter(|v| !v.is_finite()).count();
        if count > 0 {
            return Err(ValidationError::InvalidEmbeddingValues { count });
        }
    }

    Ok(())
}

/// Stored timestamps are compared as text, which only follows time order
/// for four-digit years.
pub fn validate_timestamp(field: &'static str, ts: &Timestamp) -> Result<(), ValidationError> {
    let year = ts.year();
    if TIMESTAMP_YEARS.contains(&year) {
        Ok(())
    } else {
        Err(ValidationError::TimestampOutOfRange { field, year })
    }
}

/// Range bounds of a memory query must be storable timestamps.
pub fn validate_memory_query(query: &MemoryQuery) -> Result<(), ValidationError> {
    if let Some(start) = &query.start {
        validate_timestamp("start", start)?;
    }
    if let Some(end) = &query.end {
        validate_timestamp("end", end)?;
    }
    Ok(())
}

/// Importance must lie in `[0.0, 1.0]`.
pub fn validate_importance(importance: f64) -> Result<(), ValidationError> {
    if (0.0..=1.0).contains(&importance) {
        Ok(())
    } else {
        Err(ValidationError::ImportanceOutOfRange(importance))
    }
}

pub fn validate_user_id(user_id: &str) -> Result<(), ValidationError> {
    if user_id.is_empty() {
        return Err(ValidationError::MissingUserId);
    }
    Ok(())
}

pub fn validate_conversation_id(conversation_id: &str) -> Result<(), ValidationError> {
    if conversation_id.is_empty() {
        return Err(ValidationError::MissingConversationId);
    }
    Ok(())
}

pub fn validate_session_id(session_id: &str) -> Result<(), ValidationError> {
    if session_id.is_empty() {
        return Err(ValidationError::MissingSessionId);
    }
    Ok(())
}

/// Validate a message search request.
pub fn validate_search(query: &str, limit: usize) -> Result<(), ValidationError> {
    if query.trim().is_empty() {
        return Err(ValidationError::EmptyQuery);
    }
    if limit == 0 {
        return Err(ValidationError::ZeroLimit);
    }
    Ok(())
}

//! Memory entry and memory query types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;
use crate::{Id, Metadata, Timestamp, new_id, now};

/// Importance assigned to entries that do not specify one.
pub const DEFAULT_IMPORTANCE: f64 = 0.5;

/// Category of a derived memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    /// Something that happened in a conversation.
    Episodic,
    /// General knowledge extracted from conversations.
    Semantic,
    /// How-to knowledge.
    Procedural,
    /// A stated user preference.
    Preference,
    /// A discrete fact about the user or world.
    Fact,
}

impl MemoryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
            Self::Preference => "preference",
            Self::Fact => "fact",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "episodic" => Some(Self::Episodic),
            "semantic" => Some(Self::Semantic),
            "procedural" => Some(Self::Procedural),
            "preference" => Some(Self::Preference),
            "fact" => Some(Self::Fact),
            _ => None,
        }
    }
}

impl fmt::Display for MemoryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| ParseEnumError::new("memory type", s))
    }
}

/// A derived memory about a user.
///
/// Entries past their `expires_at` are kept in storage but excluded from
/// retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: Id,
    pub content: String,
    pub memory_type: MemoryType,
    /// Relevance weight in `[0.0, 1.0]`.
    pub importance: f64,
    pub timestamp: Timestamp,
    pub user_id: Id,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<Id>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Metadata::is_empty", default)]
    pub metadata: Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
}

impl MemoryEntry {
    /// Create a new entry with a generated id and default importance.
    pub fn new(user_id: impl Into<Id>, memory_type: MemoryType, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            content: content.into(),
            memory_type,
            importance: DEFAULT_IMPORTANCE,
            timestamp: now(),
            user_id: user_id.into(),
            conversation_id: None,
            tags: Vec::new(),
            metadata: Metadata::new(),
            embedding: None,
            expires_at: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<Id>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<Id>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_expiry(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Whether the entry has expired as of `at`.
    pub fn is_expired_at(&self, at: Timestamp) -> bool {
        self.expires_at.is_some_and(|exp| exp <= at)
    }
}

/// Structured filter for memory retrieval.
///
/// Every populated field narrows the result set; an empty query matches all
/// unexpired entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryQuery {
    pub user_id: Option<Id>,
    pub conversation_id: Option<Id>,
    /// Accept any of these types (empty = all types).
    pub memory_types: Vec<MemoryType>,
    pub min_importance: Option<f64>,
    /// Entry must carry every one of these tags.
    pub tags: Vec<String>,
    /// Free-text filter on content.
    pub query_text: Option<String>,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    pub limit: Option<usize>,
}

impl MemoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Query scoped to a single user.
    pub fn for_user(user_id: impl Into<Id>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<Id>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_memory_type(mut self, memory_type: MemoryType) -> Self {
        self.memory_types.push(memory_type);
        self
    }

    pub fn with_min_importance(mut self, min: f64) -> Self {
        self.min_importance = Some(min);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.query_text = Some(text.into());
        self
    }

    /// Restrict to entries timestamped within `[start, end]`.
    pub fn between(mut self, start: Timestamp, end: Timestamp) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn since(mut self, start: Timestamp) -> Self {
        self.start = Some(start);
        self
    }

    pub fn until(mut self, end: Timestamp) -> Self {
        self.end = Some(end);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

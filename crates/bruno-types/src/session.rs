//! User session type.

use serde::{Deserialize, Serialize};

use crate::{Id, Metadata, Timestamp, new_id, now};

/// A user session bound 1:1 to a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Id,
    pub user_id: Id,
    /// Conversation generated for this session at creation.
    pub conversation_id: Id,
    pub created_at: Timestamp,
    pub updated_at: Option<Timestamp>,
    #[serde(skip_serializing_if = "Metadata::is_empty", default)]
    pub metadata: Metadata,
    pub is_active: bool,
}

impl Session {
    /// Create a new active session with fresh session and conversation ids.
    pub fn new(user_id: impl Into<Id>) -> Self {
        Self {
            session_id: new_id(),
            user_id: user_id.into(),
            conversation_id: new_id(),
            created_at: now(),
            updated_at: None,
            metadata: Metadata::new(),
            is_active: true,
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }
}

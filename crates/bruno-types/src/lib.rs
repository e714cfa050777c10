//! Shared types for the bruno-memory storage layer.
//!
//! These are the entities every storage engine persists: conversation
//! [`Message`]s, derived [`MemoryEntry`] records, and user [`Session`]s,
//! plus the [`MemoryQuery`] used to filter memory retrieval.

pub mod context;
pub mod error;
pub mod memory;
pub mod message;
pub mod session;

use chrono::{DateTime, Utc};

pub use context::{ConversationContext, UserContext};
pub use error::ParseEnumError;
pub use memory::{MemoryEntry, MemoryQuery, MemoryType};
pub use message::{Message, MessageType, Role};
pub use session::Session;

/// Opaque string identifier.
pub type Id = String;

/// UTC instant used for every timestamp in the system.
pub type Timestamp = DateTime<Utc>;

/// Free-form key/value metadata attached to entities.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Generate a fresh random identifier.
pub fn new_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}

/// Current UTC time.
pub fn now() -> Timestamp {
    Utc::now()
}

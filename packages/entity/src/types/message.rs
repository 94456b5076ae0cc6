use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::utils::lenient_timestamp;

/// A chat message inside one live-class room.
///
/// Server-assigned ids are positive. Entries that only exist locally while
/// a send is in flight carry a negative placeholder id, see
/// [`ChatMessage::is_pending`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message identifier
    pub id: i64,

    /// Live class owning this message
    #[serde(rename = "live_class_id")]
    pub room_id: i64,

    /// Sender
    #[serde(rename = "user_id")]
    pub author_id: i64,

    /// Text content
    #[serde(rename = "message")]
    pub body: String,

    /// Creation time, for display only
    #[serde(with = "lenient_timestamp")]
    pub created_at: DateTime<Utc>,

    /// Whether the sender is an instructor/admin
    #[serde(rename = "is_admin", default)]
    pub from_instructor: bool,
}

impl ChatMessage {
    /// True for optimistic entries that the server has not confirmed.
    pub fn is_pending(&self) -> bool {
        self.id < 0
    }

    /// Builds a message from a wire record, stamping the room the record
    /// was received for when the record does not name one.
    ///
    /// Returns `None` when the record explicitly belongs to another room.
    pub fn from_record(record: MessageRecord, room_id: i64) -> Option<Self> {
        match record.live_class_id {
            Some(other) if other != room_id => None,
            _ => Some(Self {
                id: record.id,
                room_id,
                author_id: record.user_id,
                body: record.message,
                created_at: record.created_at,
                from_instructor: record.is_admin,
            }),
        }
    }
}

/// Message as it appears on the wire.
///
/// History responses carry `live_class_id`; live frames omit it and add
/// `is_admin`. Both decode into this record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_class_id: Option<i64>,

    pub user_id: i64,

    pub message: String,

    #[serde(with = "lenient_timestamp")]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub is_admin: bool,
}

use async_trait::async_trait;
use classchat_entity::ChatMessage;

use crate::error::ChatError;

/// One-shot loader for a room's recorded messages.
///
/// Implementations return an empty vector when the room has no history
/// and reserve errors for genuine failures; [`ChatError::SessionExpired`]
/// signals that the credential was rejected.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn fetch_history(&self, room_id: i64) -> Result<Vec<ChatMessage>, ChatError>;
}

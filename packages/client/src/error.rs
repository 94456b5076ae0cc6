//! Error type shared by the history loader, transport and session.

use serde::Deserialize;

/// Chat client errors
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Session expired, sign in again")]
    SessionExpired,

    #[error("Not connected to the chat room")]
    NotConnected,

    #[error("Transport is already open or connecting")]
    AlreadyOpen,

    #[error("No room is attached")]
    NoRoom,

    #[error("Message body is empty")]
    EmptyMessage,

    #[error("Room {0} is not available to this role")]
    RoomUnavailable(i64),

    #[error("HTTP error {status}: {detail}")]
    Http { status: u16, detail: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Credential unavailable: {0}")]
    Credential(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// User-visible condition a [`ChatError`] maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCondition {
    /// Prompt for a new sign-in
    SessionExpired,
    /// Disable input until the room is reopened
    TransportUnavailable,
    /// Reject the user's input
    InvalidInput,
    Other,
}

impl ChatError {
    pub fn condition(&self) -> ErrorCondition {
        match self {
            ChatError::SessionExpired | ChatError::Credential(_) => ErrorCondition::SessionExpired,
            ChatError::NotConnected
            | ChatError::NoRoom
            | ChatError::Network(_)
            | ChatError::WebSocket(_)
            | ChatError::Http { .. } => ErrorCondition::TransportUnavailable,
            ChatError::EmptyMessage | ChatError::RoomUnavailable(_) => ErrorCondition::InvalidInput,
            ChatError::AlreadyOpen
            | ChatError::Serialization(_)
            | ChatError::InvalidUrl(_)
            | ChatError::Config(_) => ErrorCondition::Other,
        }
    }

    /// Whether the UI should offer a retry. Any failed response counts
    /// except 401, which surfaces as [`ChatError::SessionExpired`].
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ChatError::Network(_) | ChatError::WebSocket(_) | ChatError::NotConnected | ChatError::Http { .. }
        )
    }

    /// Builds an error from a non-success HTTP response body.
    ///
    /// The backend reports failures as `{"detail": "..."}`; anything else is
    /// kept verbatim.
    pub(crate) fn from_response(status: u16, body: &str) -> Self {
        if status == 401 {
            return ChatError::SessionExpired;
        }

        #[derive(Deserialize)]
        struct ErrorBody {
            detail: serde_json::Value,
        }

        let detail = match serde_json::from_str::<ErrorBody>(body) {
            Ok(ErrorBody { detail: serde_json::Value::String(s) }) => s,
            Ok(ErrorBody { detail }) => detail.to_string(),
            Err(_) => body.to_string(),
        };

        ChatError::Http { status, detail }
    }
}

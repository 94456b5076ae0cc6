//! REST access to the tutoring backend: room listing and chat history.
//!
//! Every request carries `Authorization: Bearer <token>` taken from the
//! injected [`CredentialProvider`] at request time.

use async_trait::async_trait;
use classchat_entity::{ChatMessage, LiveClass, MessageRecord, Role};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::config::{ClientConfig, join_path};
use crate::credentials::CredentialProvider;
use crate::error::ChatError;
use crate::history::HistorySource;
use crate::role::RoleExt;

/// HTTP client for the chat-related REST endpoints
#[derive(Clone)]
pub struct ChatApi {
    client: Client,
    base_url: Url,
    credentials: Arc<dyn CredentialProvider>,
}

impl ChatApi {
    /// Create a new API client
    ///
    /// # Arguments
    /// * `config` - Client configuration (base URL, timeout, user agent)
    /// * `credentials` - Source of the bearer token
    pub fn new(config: &ClientConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self, ChatError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .pool_max_idle_per_host(4)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self { client, base_url: config.api_base_url.clone(), credentials })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Authenticated GET, decoding a JSON body on success.
    async fn get<R>(&self, path: &str) -> Result<R, ChatError>
    where
        R: DeserializeOwned,
    {
        let url = join_path(&self.base_url, path)?;
        let token = self.credentials.bearer_token()?;

        debug!("GET {}", url);
        let response = self.client.get(url).bearer_auth(token).send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(response.json::<R>().await?)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(ChatError::from_response(status.as_u16(), &body))
        }
    }

    /// Rooms visible to `role`, unfiltered by schedule.
    ///
    /// Participants get the classes of the courses they are enrolled in,
    /// broadcasters get every class. Apply [`crate::role::scope_rooms`] to
    /// narrow the list to what the role may attach to.
    pub async fn list_rooms(&self, role: Role) -> Result<Vec<LiveClass>, ChatError> {
        self.get::<Vec<LiveClass>>(role.rooms_path()).await
    }

    /// Previously recorded messages of a room, oldest first.
    ///
    /// A room without history (404 or an empty list) yields an empty vector.
    pub async fn fetch_history(&self, room_id: i64) -> Result<Vec<ChatMessage>, ChatError> {
        let records = match self.get::<Vec<MessageRecord>>(&format!("chat/{room_id}/messages")).await {
            Ok(records) => records,
            Err(ChatError::Http { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                debug!(room_id, "No history for room");
                return Ok(Vec::new());
            },
            Err(e) => return Err(e),
        };

        let total = records.len();
        let messages: Vec<ChatMessage> = records
            .into_iter()
            .filter_map(|record| ChatMessage::from_record(record, room_id))
            .collect();

        if messages.len() != total {
            warn!(room_id, dropped = total - messages.len(), "History contained messages for other rooms");
        }

        Ok(messages)
    }
}

#[async_trait]
impl HistorySource for ChatApi {
    async fn fetch_history(&self, room_id: i64) -> Result<Vec<ChatMessage>, ChatError> {
        ChatApi::fetch_history(self, room_id).await
    }
}

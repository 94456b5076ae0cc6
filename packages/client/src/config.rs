//! Client configuration

use std::time::Duration;
use url::Url;

use crate::error::ChatError;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";

/// Chat client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API
    pub api_base_url: Url,
    /// Base URL for WebSocket connections. Derived from the API URL when unset.
    pub ws_base_url: Option<Url>,
    /// HTTP client timeout in seconds
    pub timeout_secs: u64,
    /// User agent string
    pub user_agent: String,
    /// How long a pending message may wait for its server echo before the
    /// echo is treated as a separate message
    pub echo_window_secs: u64,
}

impl Default for ClientConfig {
    #[allow(clippy::unwrap_used)]
    fn default() -> Self {
        Self {
            api_base_url: Url::parse(DEFAULT_API_URL).unwrap(),
            ws_base_url: None,
            timeout_secs: 30,
            user_agent: concat!("classchat/", env!("CARGO_PKG_VERSION")).to_string(),
            echo_window_secs: 30,
        }
    }
}

impl ClientConfig {
    pub fn new(api_base_url: Url) -> Self {
        Self { api_base_url, ..Self::default() }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn echo_window(&self) -> Duration {
        Duration::from_secs(self.echo_window_secs)
    }

    /// WebSocket base URL: the configured one, or the API URL with its
    /// scheme switched to `ws`/`wss`.
    pub fn websocket_base(&self) -> Result<Url, ChatError> {
        if let Some(url) = &self.ws_base_url {
            return Ok(url.clone());
        }

        let scheme = match self.api_base_url.scheme() {
            "https" => "wss",
            _ => "ws",
        };

        let mut url = self.api_base_url.clone();
        url.set_scheme(scheme)
            .map_err(|_| ChatError::Config(format!("cannot derive websocket URL from {}", self.api_base_url)))?;
        Ok(url)
    }
}

/// Joins `path` onto `base` while keeping any path prefix `base` already has.
pub(crate) fn join_path(base: &Url, path: &str) -> Result<Url, ChatError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    Ok(base.join(path.trim_start_matches('/'))?)
}

//! Bearer credential access.
//!
//! The history loader and the transport never read a token store directly;
//! they are handed a [`CredentialProvider`] and ask it for the current
//! token each time they authenticate.

use std::sync::RwLock;

use crate::error::ChatError;

/// Supplies the bearer token for the signed-in user.
pub trait CredentialProvider: Send + Sync {
    /// Current bearer token.
    fn bearer_token(&self) -> Result<String, ChatError>;

    /// Called when the backend rejects the token as expired or invalid.
    fn invalidate(&self) {}
}

/// Token held in memory, cleared on invalidation.
#[derive(Debug, Default)]
pub struct StaticCredentials {
    token: RwLock<Option<String>>,
}

impl StaticCredentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: RwLock::new(Some(token.into())) }
    }

    /// Replaces the token, e.g. after a fresh sign-in.
    pub fn set_token(&self, token: impl Into<String>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = Some(token.into());
        }
    }

    pub fn has_token(&self) -> bool {
        self.token.read().map(|guard| guard.is_some()).unwrap_or(false)
    }
}

impl CredentialProvider for StaticCredentials {
    fn bearer_token(&self) -> Result<String, ChatError> {
        self.token
            .read()
            .map_err(|_| ChatError::Credential("token store poisoned".to_string()))?
            .clone()
            .ok_or_else(|| ChatError::Credential("no access token".to_string()))
    }

    fn invalidate(&self) {
        if let Ok(mut guard) = self.token.write() {
            *guard = None;
        }
    }
}

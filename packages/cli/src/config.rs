//! Settings file and command-line overrides.
//!
//! ```toml
//! [server]
//! api_url = "https://tutor.example.com/api"
//! timeout_secs = 20
//!
//! [user]
//! id = 42
//! role = "student"
//!
//! [auth]
//! token_file = "~/.config/classchat/token"
//! ```

use anyhow::{Context, Result, anyhow, bail};
use classchat_client::ClientConfig;
use classchat_entity::{Role, UserIdentity};
use serde::Deserialize;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use url::Url;

pub const TOKEN_ENV: &str = "CLASSCHAT_TOKEN";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub server: ServerSection,
    pub user: UserSection,
    pub auth: AuthSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub api_url: Option<Url>,
    /// Only needed when the WebSocket endpoint lives elsewhere
    pub ws_url: Option<Url>,
    pub timeout_secs: Option<u64>,
    pub echo_window_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UserSection {
    pub id: Option<i64>,
    pub role: Option<Role>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthSection {
    pub token: Option<String>,
    pub token_file: Option<PathBuf>,
}

/// Values given on the command line; each one wins over the file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub api_url: Option<Url>,
    pub user_id: Option<i64>,
    pub role: Option<Role>,
    pub token: Option<String>,
}

impl AppConfig {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("classchat").join("config.toml"))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        Self::from_toml(&contents).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Read the file at `path`, or the default location when it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(path),
                _ => Ok(Self::default()),
            },
        }
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(url) = overrides.api_url {
            self.server.api_url = Some(url);
        }
        if let Some(id) = overrides.user_id {
            self.user.id = Some(id);
        }
        if let Some(role) = overrides.role {
            self.user.role = Some(role);
        }
        if let Some(token) = overrides.token {
            self.auth.token = Some(token);
        }
    }

    pub fn client_config(&self) -> ClientConfig {
        let mut config = match &self.server.api_url {
            Some(url) => ClientConfig::new(url.clone()),
            None => ClientConfig::default(),
        };
        config.ws_base_url = self.server.ws_url.clone();
        if let Some(timeout) = self.server.timeout_secs {
            config.timeout_secs = timeout;
        }
        if let Some(window) = self.server.echo_window_secs {
            config.echo_window_secs = window;
        }
        config
    }

    pub fn identity(&self) -> Result<UserIdentity> {
        let id = self.user.id.ok_or_else(|| anyhow!("No user id configured, set [user] id or pass --user-id"))?;
        let role = self.user.role.unwrap_or(Role::Participant);
        Ok(UserIdentity::new(id, role))
    }

    /// The access token: inline value first, then the token file.
    pub fn token(&self) -> Result<String> {
        if let Some(token) = self.auth.token.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
            return Ok(token.to_string());
        }

        if let Some(path) = &self.auth.token_file {
            let path = expand_home(path);
            let mut contents = String::new();
            File::open(&path)
                .and_then(|mut file| file.read_to_string(&mut contents))
                .with_context(|| format!("Failed to read token file {}", path.display()))?;

            let token = contents.trim();
            if token.is_empty() {
                bail!("Token file {} is empty", path.display());
            }
            return Ok(token.to_string());
        }

        bail!("No access token, set {TOKEN_ENV} or [auth] token/token_file")
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir().map(|home| home.join(rest)).unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

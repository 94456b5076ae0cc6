use anyhow::Result;
use clap::{Parser, Subcommand};
use classchat_client::{ChatApi, StaticCredentials};
use classchat_entity::Role;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

mod commands;
mod config;
mod logging;

use config::{AppConfig, Overrides, TOKEN_ENV};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Config file [default: <config dir>/classchat/config.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Base URL of the tutoring backend
    #[arg(long, global = true)]
    api_url: Option<Url>,

    /// Your user id
    #[arg(long, global = true)]
    user_id: Option<i64>,

    /// participant (student) or broadcaster (instructor)
    #[arg(long, global = true)]
    role: Option<Role>,

    /// Access token
    #[arg(long, global = true, env = TOKEN_ENV, hide_env_values = true)]
    token: Option<String>,

    /// Write logs to stderr instead of the log file
    #[arg(long, global = true)]
    log_stderr: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the classes you can chat in
    Rooms,
    /// Open the chat of a class
    Join {
        room_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(cli.log_stderr)?;

    let mut config = AppConfig::load(cli.config.as_deref())?;
    config.apply(Overrides {
        api_url: cli.api_url,
        user_id: cli.user_id,
        role: cli.role,
        token: cli.token,
    });

    let identity = config.identity()?;
    let credentials = Arc::new(StaticCredentials::new(config.token()?));
    let client_config = config.client_config();
    let api = ChatApi::new(&client_config, credentials.clone())?;

    tracing::info!(user_id = identity.id, role = %identity.role, api = %client_config.api_base_url, "Starting");

    match cli.command {
        Commands::Rooms => commands::rooms(&api, identity).await,
        Commands::Join { room_id } => commands::join(api, client_config, credentials, identity, room_id).await,
    }
}

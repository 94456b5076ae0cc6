use anyhow::Result;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_FILTER: &str = "classchat=info,classchat_client=info";

pub fn log_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("classchat")
        .join("logs")
}

/// Install the global subscriber.
///
/// Logs go to a daily rolling file so they never interleave with the chat
/// on stdout; `to_stderr` sends them to stderr instead. Keep the returned
/// guard alive until exit or buffered lines are lost.
pub fn init(to_stderr: bool) -> Result<WorkerGuard> {
    let (writer, guard) = if to_stderr {
        tracing_appender::non_blocking(std::io::stderr())
    } else {
        let dir = log_dir();
        std::fs::create_dir_all(&dir)?;
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "classchat.log"))
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(to_stderr))
        .try_init()?;

    Ok(guard)
}

use anyhow::{Context, Result, bail};
use chrono::{Local, Utc};
use classchat_client::{
    ChatApi, ChatError, ChatMessage, ChatSession, ClientConfig, CredentialProvider, ErrorCondition, LiveClass,
    SessionUpdate, UserIdentity, scope_rooms,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

/// One line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Quit,
    Reconnect,
    Retry,
    Who,
    Help,
    Unknown(String),
    Message(String),
}

impl Input {
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        // "//text" sends a message starting with a slash
        if let Some(escaped) = trimmed.strip_prefix("//") {
            return Some(Input::Message(format!("/{escaped}")));
        }

        let Some(command) = trimmed.strip_prefix('/') else {
            return Some(Input::Message(trimmed.to_string()));
        };

        Some(match command.to_ascii_lowercase().as_str() {
            "quit" | "q" | "exit" => Input::Quit,
            "reconnect" => Input::Reconnect,
            "retry" => Input::Retry,
            "who" => Input::Who,
            "help" | "?" => Input::Help,
            _ => Input::Unknown(command.to_string()),
        })
    }
}

const HELP: &str = "Commands: /quit, /reconnect, /retry (history), /who (participants), //text to send a leading slash";

pub async fn rooms(api: &ChatApi, identity: UserIdentity) -> Result<()> {
    let listed = api.list_rooms(identity.role).await.context("Failed to list rooms")?;
    let now = Utc::now();
    let rooms = scope_rooms(identity.role, listed, now);

    if rooms.is_empty() {
        println!("No rooms available");
        return Ok(());
    }

    for room in &rooms {
        println!(
            "{:>6}  {:<8}  {} - {}  {}",
            room.id,
            room.status_at(now).to_string(),
            room.starts_at.with_timezone(&Local).format("%Y-%m-%d %H:%M"),
            room.ends_at.with_timezone(&Local).format("%H:%M"),
            room.title,
        );
    }
    Ok(())
}

/// Prints each message once, by id. History can land in front of
/// messages already shown, and an echo that replaces one of our shown
/// placeholders is not printed again.
struct Printer {
    identity: UserIdentity,
    shown: HashSet<i64>,
    /// Shown placeholders still waiting for their echo
    placeholders: Vec<(i64, String)>,
}

impl Printer {
    fn new(identity: UserIdentity) -> Self {
        Self { identity, shown: HashSet::new(), placeholders: Vec::new() }
    }

    fn reset(&mut self) {
        self.shown.clear();
        self.placeholders.clear();
    }

    fn flush(&mut self, messages: &[ChatMessage]) {
        for line in self.unseen(messages) {
            println!("{line}");
        }
    }

    /// Lines for messages not printed yet, in store order.
    fn unseen(&mut self, messages: &[ChatMessage]) -> Vec<String> {
        let present: HashSet<i64> = messages.iter().map(|m| m.id).collect();
        let mut replaced = Vec::new();
        self.placeholders.retain(|(id, body)| {
            if present.contains(id) {
                true
            } else {
                replaced.push(body.clone());
                false
            }
        });

        let mut lines = Vec::new();
        for message in messages {
            if !self.shown.insert(message.id) {
                continue;
            }
            if message.is_pending() {
                self.placeholders.push((message.id, message.body.clone()));
            } else if message.author_id == self.identity.id {
                if let Some(pos) = replaced.iter().position(|body| *body == message.body) {
                    replaced.swap_remove(pos);
                    continue;
                }
            }
            lines.push(self.format(message));
        }
        lines
    }

    fn format(&self, message: &ChatMessage) -> String {
        let time = message.created_at.with_timezone(&Local).format("%H:%M");
        let author = if message.author_id == self.identity.id {
            "you".to_string()
        } else if message.from_instructor {
            format!("instructor {}", message.author_id)
        } else {
            format!("user {}", message.author_id)
        };
        let pending = if message.is_pending() { " (sending)" } else { "" };
        format!("[{time}] {author}: {}{pending}", message.body)
    }
}

async fn find_room(api: &ChatApi, identity: UserIdentity, room_id: i64) -> Result<LiveClass> {
    let rooms = api.list_rooms(identity.role).await.context("Failed to list rooms")?;
    match rooms.into_iter().find(|room| room.id == room_id) {
        Some(room) => Ok(room),
        None => bail!("Room {room_id} is not one of your classes"),
    }
}

pub async fn join(
    api: ChatApi,
    config: ClientConfig,
    credentials: Arc<dyn CredentialProvider>,
    identity: UserIdentity,
    room_id: i64,
) -> Result<()> {
    let room = find_room(&api, identity, room_id).await?;
    let mut session = ChatSession::new(identity, config, credentials, Arc::new(api));

    session.attach(&room).with_context(|| format!("Cannot join \"{}\"", room.title))?;
    println!("-- joining \"{}\" ({}) as {} --", room.title, room.status_at(Utc::now()), identity.role);

    let mut printer = Printer::new(identity);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Input closed");
                    break;
                };
                let Some(input) = Input::parse(&line) else { continue };

                match input {
                    Input::Quit => break,
                    Input::Help => println!("{HELP}"),
                    Input::Unknown(command) => println!("-- unknown command /{command}. {HELP} --"),
                    Input::Reconnect => {
                        session.reattach()?;
                        printer.reset();
                        println!("-- reconnecting --");
                    },
                    Input::Retry => session.retry_history()?,
                    Input::Who => match session.active_participants() {
                        Some(ids) if ids.is_empty() => println!("-- nobody has written yet --"),
                        Some(ids) => {
                            let ids: Vec<String> = ids.iter().map(i64::to_string).collect();
                            println!("-- participants: {} --", ids.join(", "));
                        },
                        None => println!("-- only instructors can list participants --"),
                    },
                    Input::Message(body) => match session.send(&body) {
                        Ok(_) => printer.flush(session.messages()),
                        Err(e) => report_send_error(&e),
                    },
                }
            },
            update = session.next_update() => {
                let Some(update) = update else { break };

                match update {
                    SessionUpdate::HistoryLoaded { count, .. } => {
                        printer.flush(session.messages());
                        if count == 0 {
                            println!("-- no earlier messages --");
                        }
                    },
                    SessionUpdate::MessagesChanged { .. } => printer.flush(session.messages()),
                    SessionUpdate::Connected { .. } => println!("-- connected, type /help for commands --"),
                    SessionUpdate::HistoryFailed { error, .. } => {
                        println!("-- could not load history: {error}. Type /retry --");
                    },
                    SessionUpdate::Disconnected { reason, .. } => {
                        println!("-- disconnected: {reason}. Type /reconnect to rejoin --");
                    },
                    SessionUpdate::SessionExpired => {
                        bail!("Session expired. Update your access token and start classchat again");
                    },
                }
            },
        }
    }

    session.detach();
    Ok(())
}

fn report_send_error(error: &ChatError) {
    warn!("Send failed: {}", error);
    match error.condition() {
        ErrorCondition::TransportUnavailable => println!("-- not connected, message not sent. Type /reconnect --"),
        _ => println!("-- message not sent: {error} --"),
    }
}

//! Room attachment: history, transport and store for the selected room.
//!
//! A [`ChatSession`] attaches to one room at a time. Selecting a room
//! closes the previous transport, starts the history fetch and opens a new
//! connection. History tasks and transport callbacks never touch the store
//! themselves; they post events to a channel that the owner drains with
//! [`ChatSession::next_update`], so every store mutation happens on the
//! owning task.

use classchat_entity::{ChatMessage, LiveClass, UserIdentity};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::credentials::CredentialProvider;
use crate::error::ChatError;
use crate::history::HistorySource;
use crate::role::{RoleExt, RolePolicy};
use crate::store::{MessageStore, SendOutcome};
use crate::transport::{ChatTransport, CloseReason, TransportState};

/// Where the current attachment stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentPhase {
    Detached,
    LoadingHistory,
    Listening,
    Disconnected,
}

/// What changed, for the view to render.
#[derive(Debug)]
pub enum SessionUpdate {
    /// History landed and the store is seeded
    HistoryLoaded { room_id: i64, count: usize },
    /// History could not be loaded; the store is unchanged
    HistoryFailed { room_id: i64, error: ChatError },
    /// The live connection is open
    Connected { room_id: i64 },
    /// The visible message list changed
    MessagesChanged { room_id: i64 },
    /// The live connection ended
    Disconnected { room_id: i64, reason: CloseReason },
    /// The credential was rejected; sign in again
    SessionExpired,
}

#[derive(Debug)]
enum SessionEvent {
    History {
        room_id: i64,
        generation: u64,
        result: Result<Vec<ChatMessage>, ChatError>,
    },
    Opened { room_id: i64, generation: u64 },
    Message { room_id: i64, generation: u64, message: ChatMessage },
    Closed { room_id: i64, generation: u64, reason: CloseReason },
}

impl SessionEvent {
    fn key(&self) -> (i64, u64) {
        match self {
            SessionEvent::History { room_id, generation, .. }
            | SessionEvent::Opened { room_id, generation }
            | SessionEvent::Message { room_id, generation, .. }
            | SessionEvent::Closed { room_id, generation, .. } => (*room_id, *generation),
        }
    }
}

struct Attachment {
    room_id: i64,
    generation: u64,
    phase: AttachmentPhase,
    store: MessageStore,
    transport: ChatTransport,
    history_task: Option<JoinHandle<()>>,
}

impl Drop for Attachment {
    fn drop(&mut self) {
        self.transport.close();
        if let Some(task) = self.history_task.take() {
            task.abort();
        }
    }
}

/// Chat session for one user, attached to at most one room.
pub struct ChatSession {
    identity: UserIdentity,
    policy: RolePolicy,
    config: ClientConfig,
    credentials: Arc<dyn CredentialProvider>,
    history: Arc<dyn HistorySource>,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    generation: u64,
    attachment: Option<Attachment>,
}

impl ChatSession {
    pub fn new(
        identity: UserIdentity,
        config: ClientConfig,
        credentials: Arc<dyn CredentialProvider>,
        history: Arc<dyn HistorySource>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        Self {
            identity,
            policy: identity.role.policy(),
            config,
            credentials,
            history,
            events_tx,
            events_rx,
            generation: 0,
            attachment: None,
        }
    }

    pub fn identity(&self) -> UserIdentity {
        self.identity
    }

    pub fn policy(&self) -> RolePolicy {
        self.policy
    }

    /// Attach to `room` after checking it is in this role's scope.
    pub fn attach(&mut self, room: &LiveClass) -> Result<(), ChatError> {
        if !self.policy.room_scope.admits(room, chrono::Utc::now()) {
            return Err(ChatError::RoomUnavailable(room.id));
        }
        self.select_room(room.id)
    }

    /// Attach to `room_id`, replacing any current attachment.
    ///
    /// The previous transport is closed before the new one opens, and any
    /// of its pending events are discarded when they surface.
    pub fn select_room(&mut self, room_id: i64) -> Result<(), ChatError> {
        self.detach();

        let ws_base = self.config.websocket_base()?;
        self.generation += 1;
        let generation = self.generation;

        let mut transport = ChatTransport::new(room_id, ws_base, Arc::clone(&self.credentials));

        let tx = self.events_tx.clone();
        transport.on_open(move || {
            let _ = tx.send(SessionEvent::Opened { room_id, generation });
        });
        let tx = self.events_tx.clone();
        transport.on_message(move |message| {
            let _ = tx.send(SessionEvent::Message { room_id, generation, message });
        });
        let tx = self.events_tx.clone();
        transport.on_close(move |reason| {
            let _ = tx.send(SessionEvent::Closed { room_id, generation, reason });
        });

        transport.open()?;

        let history_task = self.spawn_history(room_id, generation);
        info!(room_id, generation, role = %self.identity.role, "Attached to room");

        self.attachment = Some(Attachment {
            room_id,
            generation,
            phase: AttachmentPhase::LoadingHistory,
            store: MessageStore::with_echo_window(room_id, self.config.echo_window()),
            transport,
            history_task: Some(history_task),
        });
        Ok(())
    }

    /// Drop the current attachment, closing its transport synchronously.
    pub fn detach(&mut self) {
        if let Some(attachment) = self.attachment.take() {
            info!(room_id = attachment.room_id, "Detached from room");
        }
    }

    /// Reconnect to the current room with a fresh store and history.
    pub fn reattach(&mut self) -> Result<(), ChatError> {
        let room_id = self.room_id().ok_or(ChatError::NoRoom)?;
        self.select_room(room_id)
    }

    /// Re-issue the history fetch after a failure.
    pub fn retry_history(&mut self) -> Result<(), ChatError> {
        let (room_id, generation, needs_fetch) = match &self.attachment {
            Some(a) => (a.room_id, a.generation, a.history_task.is_none() && !a.store.is_seeded()),
            None => return Err(ChatError::NoRoom),
        };

        if needs_fetch {
            let task = self.spawn_history(room_id, generation);
            if let Some(attachment) = self.attachment.as_mut() {
                attachment.history_task = Some(task);
            }
        }
        Ok(())
    }

    fn spawn_history(&self, room_id: i64, generation: u64) -> JoinHandle<()> {
        let history = Arc::clone(&self.history);
        let tx = self.events_tx.clone();

        tokio::spawn(async move {
            let result = history.fetch_history(room_id).await;
            let _ = tx.send(SessionEvent::History { room_id, generation, result });
        })
    }

    /// Send `body` to the attached room.
    ///
    /// Roles with optimistic echo show the message at once and get its
    /// placeholder id back; the placeholder is removed again if the
    /// transport refuses the send.
    pub fn send(&mut self, body: &str) -> Result<Option<i64>, ChatError> {
        if body.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let attachment = self.attachment.as_mut().ok_or(ChatError::NoRoom)?;

        if !self.policy.optimistic_echo {
            attachment.transport.send(body)?;
            return Ok(None);
        }

        let placeholder = attachment.store.insert_optimistic(body, self.identity.id);
        match attachment.transport.send(body) {
            Ok(()) => {
                attachment.store.reconcile_or_rollback(placeholder, SendOutcome::Sent);
                Ok(Some(placeholder))
            },
            Err(e) => {
                attachment.store.reconcile_or_rollback(placeholder, SendOutcome::Failed);
                Err(e)
            },
        }
    }

    /// Wait for the next change worth rendering.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            let event = self.events_rx.recv().await?;
            if let Some(update) = self.apply(event) {
                return Some(update);
            }
        }
    }

    fn apply(&mut self, event: SessionEvent) -> Option<SessionUpdate> {
        let (room_id, generation) = event.key();
        let attachment = match self.attachment.as_mut() {
            Some(a) if a.room_id == room_id && a.generation == generation => a,
            _ => {
                debug!(room_id, generation, "Discarding event for a previous attachment");
                return None;
            },
        };

        match event {
            SessionEvent::History { result, .. } => {
                attachment.history_task = None;
                match result {
                    Ok(history) => {
                        let count = history.len();
                        attachment.store.seed(history);
                        if attachment.phase == AttachmentPhase::LoadingHistory {
                            attachment.phase = AttachmentPhase::Listening;
                        }
                        debug!(room_id, count, "History loaded");
                        Some(SessionUpdate::HistoryLoaded { room_id, count })
                    },
                    Err(ChatError::SessionExpired) => self.expire(),
                    Err(error) => {
                        warn!(room_id, "History fetch failed: {}", error);
                        Some(SessionUpdate::HistoryFailed { room_id, error })
                    },
                }
            },
            SessionEvent::Opened { .. } => Some(SessionUpdate::Connected { room_id }),
            SessionEvent::Message { message, .. } => attachment
                .store
                .merge_incoming(message)
                .is_visible_change()
                .then_some(SessionUpdate::MessagesChanged { room_id }),
            SessionEvent::Closed { reason, .. } => {
                attachment.phase = AttachmentPhase::Disconnected;
                if reason == CloseReason::Unauthorized {
                    return self.expire();
                }
                Some(SessionUpdate::Disconnected { room_id, reason })
            },
        }
    }

    fn expire(&mut self) -> Option<SessionUpdate> {
        warn!("Credential rejected, session expired");
        self.credentials.invalidate();
        if let Some(attachment) = self.attachment.as_mut() {
            attachment.transport.close();
            attachment.phase = AttachmentPhase::Disconnected;
        }
        Some(SessionUpdate::SessionExpired)
    }

    pub fn room_id(&self) -> Option<i64> {
        self.attachment.as_ref().map(|a| a.room_id)
    }

    pub fn phase(&self) -> AttachmentPhase {
        self.attachment.as_ref().map_or(AttachmentPhase::Detached, |a| a.phase)
    }

    pub fn transport_state(&self) -> TransportState {
        self.attachment.as_ref().map_or(TransportState::Idle, |a| a.transport.state())
    }

    /// Messages of the attached room in display order.
    pub fn messages(&self) -> &[ChatMessage] {
        match &self.attachment {
            Some(attachment) => attachment.store.messages(),
            None => &[],
        }
    }

    pub fn store(&self) -> Option<&MessageStore> {
        self.attachment.as_ref().map(|a| &a.store)
    }

    /// Distinct authors seen in the room, for roles that track them.
    pub fn active_participants(&self) -> Option<BTreeSet<i64>> {
        if !self.policy.track_participants {
            return None;
        }
        Some(self.attachment.as_ref().map(|a| a.store.participants()).unwrap_or_default())
    }
}

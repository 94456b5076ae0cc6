//! Ordered, de-duplicated message collection for one attached room.
//!
//! Display order is arrival order: the history batch as returned by the
//! backend, then live messages in the order the connection delivered them.
//! Nothing is ever re-sorted by timestamp.
//!
//! Live messages that arrive before history has been seeded are held in a
//! buffer and appended once [`MessageStore::seed`] runs, so history always
//! precedes live traffic.

use chrono::Utc;
use classchat_entity::ChatMessage;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Result of delivering a send to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent,
    Failed,
}

/// What [`MessageStore::merge_incoming`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Appended to the visible list
    Appended,
    /// Replaced the pending placeholder with this id in place
    Reconciled { placeholder_id: i64 },
    /// Held until history is seeded
    Buffered,
    /// Already present, dropped
    Duplicate,
    /// Belongs to another room, dropped
    Rejected,
}

impl MergeOutcome {
    /// Whether the visible list changed.
    pub fn is_visible_change(&self) -> bool {
        matches!(self, MergeOutcome::Appended | MergeOutcome::Reconciled { .. })
    }
}

#[derive(Debug)]
pub struct MessageStore {
    room_id: i64,
    entries: Vec<ChatMessage>,
    ids: HashSet<i64>,
    seeded: bool,
    buffered: Vec<ChatMessage>,
    /// Placeholder id -> when it was inserted
    pending: HashMap<i64, Instant>,
    next_placeholder: i64,
    echo_window: Duration,
}

impl MessageStore {
    pub fn new(room_id: i64) -> Self {
        Self::with_echo_window(room_id, Duration::from_secs(30))
    }

    pub fn with_echo_window(room_id: i64, echo_window: Duration) -> Self {
        Self {
            room_id,
            entries: Vec::new(),
            ids: HashSet::new(),
            seeded: false,
            buffered: Vec::new(),
            pending: HashMap::new(),
            next_placeholder: -1,
            echo_window,
        }
    }

    pub fn room_id(&self) -> i64 {
        self.room_id
    }

    /// Initializes the store from the room's history.
    ///
    /// Only the first call has an effect. Placeholders inserted before the
    /// history landed are kept after it, then buffered live messages are
    /// merged in receipt order.
    pub fn seed(&mut self, history: Vec<ChatMessage>) {
        if self.seeded {
            warn!(room_id = self.room_id, "History already seeded, ignoring {} messages", history.len());
            return;
        }

        let local = std::mem::take(&mut self.entries);
        self.ids.clear();

        for msg in history {
            if msg.room_id != self.room_id {
                warn!(room_id = self.room_id, other = msg.room_id, "Dropping history message for another room");
                continue;
            }
            if self.ids.insert(msg.id) {
                self.entries.push(msg);
            }
        }

        for msg in local {
            if self.ids.insert(msg.id) {
                self.entries.push(msg);
            }
        }

        self.seeded = true;

        let buffered = std::mem::take(&mut self.buffered);
        debug!(
            room_id = self.room_id,
            history = self.entries.len(),
            buffered = buffered.len(),
            "Seeded message store"
        );
        for msg in buffered {
            self.merge_incoming(msg);
        }
    }

    /// Merges a server message, ignoring ids that are already present.
    pub fn merge_incoming(&mut self, msg: ChatMessage) -> MergeOutcome {
        if msg.room_id != self.room_id {
            warn!(room_id = self.room_id, other = msg.room_id, id = msg.id, "Dropping message for another room");
            return MergeOutcome::Rejected;
        }

        if !self.seeded {
            if self.buffered.iter().any(|m| m.id == msg.id) {
                return MergeOutcome::Duplicate;
            }
            self.buffered.push(msg);
            return MergeOutcome::Buffered;
        }

        if self.ids.contains(&msg.id) {
            debug!(room_id = self.room_id, id = msg.id, "Duplicate message dropped");
            return MergeOutcome::Duplicate;
        }

        if let Some(placeholder_id) = self.matching_placeholder(&msg) {
            if let Some(slot) = self.entries.iter_mut().find(|m| m.id == placeholder_id) {
                self.pending.remove(&placeholder_id);
                self.ids.remove(&placeholder_id);
                self.ids.insert(msg.id);
                *slot = msg;
                return MergeOutcome::Reconciled { placeholder_id };
            }
        }

        self.ids.insert(msg.id);
        self.entries.push(msg);
        MergeOutcome::Appended
    }

    /// Shows an outgoing message before the server confirms it.
    ///
    /// Returns the placeholder id, always negative.
    pub fn insert_optimistic(&mut self, body: &str, author_id: i64) -> i64 {
        let id = self.next_placeholder;
        self.next_placeholder -= 1;

        self.entries.push(ChatMessage {
            id,
            room_id: self.room_id,
            author_id,
            body: body.to_string(),
            created_at: Utc::now(),
            from_instructor: false,
        });
        self.ids.insert(id);
        self.pending.insert(id, Instant::now());
        id
    }

    /// Settles a placeholder after a send attempt.
    ///
    /// A failed send removes exactly that placeholder. A successful send
    /// leaves it in place until the echo replaces it. Returns whether an
    /// entry was removed.
    pub fn reconcile_or_rollback(&mut self, placeholder_id: i64, outcome: SendOutcome) -> bool {
        match outcome {
            SendOutcome::Sent => false,
            SendOutcome::Failed => {
                if self.pending.remove(&placeholder_id).is_none() {
                    return false;
                }
                self.ids.remove(&placeholder_id);
                self.entries.retain(|m| m.id != placeholder_id);
                true
            },
        }
    }

    fn matching_placeholder(&self, msg: &ChatMessage) -> Option<i64> {
        self.entries
            .iter()
            .filter(|m| m.is_pending() && m.author_id == msg.author_id && m.body == msg.body)
            .find(|m| {
                self.pending
                    .get(&m.id)
                    .is_some_and(|inserted| inserted.elapsed() < self.echo_window)
            })
            .map(|m| m.id)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Number of live messages waiting for history.
    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// Distinct authors of server-confirmed messages.
    pub fn participants(&self) -> BTreeSet<i64> {
        self.entries
            .iter()
            .filter(|m| !m.is_pending())
            .map(|m| m.author_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ROOM: i64 = 5;

    fn msg(id: i64, author_id: i64, body: &str) -> ChatMessage {
        ChatMessage {
            id,
            room_id: ROOM,
            author_id,
            body: body.to_string(),
            created_at: Utc::now(),
            from_instructor: false,
        }
    }

    fn ids(store: &MessageStore) -> Vec<i64> {
        store.messages().iter().map(|m| m.id).collect()
    }

    #[test]
    fn test_duplicate_ids_merge_once() {
        let mut store = MessageStore::new(ROOM);
        store.seed(Vec::new());

        assert_eq!(store.merge_incoming(msg(1, 2, "hello")), MergeOutcome::Appended);
        assert_eq!(store.merge_incoming(msg(1, 2, "hello")), MergeOutcome::Duplicate);
        assert_eq!(store.merge_incoming(msg(1, 2, "edited")), MergeOutcome::Duplicate);

        assert_eq!(store.len(), 1);
        assert_eq!(store.messages()[0].body, "hello");
    }

    #[test]
    fn test_history_precedes_live() {
        let mut store = MessageStore::new(ROOM);
        store.seed(vec![msg(1, 2, "a"), msg(2, 3, "b")]);
        store.merge_incoming(msg(3, 2, "c"));

        assert_eq!(ids(&store), vec![1, 2, 3]);
    }

    #[test]
    fn test_live_before_history_is_buffered() {
        let mut store = MessageStore::new(ROOM);

        assert_eq!(store.merge_incoming(msg(3, 2, "c")), MergeOutcome::Buffered);
        assert_eq!(store.merge_incoming(msg(3, 2, "c")), MergeOutcome::Duplicate);
        assert!(store.is_empty());
        assert_eq!(store.buffered_len(), 1);

        store.seed(vec![msg(1, 2, "a"), msg(2, 3, "b")]);

        assert_eq!(ids(&store), vec![1, 2, 3]);
        assert_eq!(store.buffered_len(), 0);
    }

    #[test]
    fn test_buffered_message_already_in_history() {
        let mut store = MessageStore::new(ROOM);
        store.merge_incoming(msg(2, 3, "b"));
        store.merge_incoming(msg(4, 3, "d"));
        store.seed(vec![msg(1, 2, "a"), msg(2, 3, "b")]);

        assert_eq!(ids(&store), vec![1, 2, 4]);
    }

    #[test]
    fn test_seed_only_once() {
        let mut store = MessageStore::new(ROOM);
        store.seed(vec![msg(1, 2, "a")]);
        store.seed(vec![msg(7, 2, "x"), msg(8, 2, "y")]);

        assert_eq!(ids(&store), vec![1]);
    }

    #[test]
    fn test_seed_dedupes_history() {
        let mut store = MessageStore::new(ROOM);
        store.seed(vec![msg(1, 2, "a"), msg(1, 2, "a again"), msg(2, 2, "b")]);

        assert_eq!(ids(&store), vec![1, 2]);
        assert_eq!(store.messages()[0].body, "a");
    }

    #[test]
    fn test_other_room_rejected() {
        let mut store = MessageStore::new(ROOM);
        store.seed(Vec::new());

        let mut foreign = msg(1, 2, "elsewhere");
        foreign.room_id = ROOM + 1;
        assert_eq!(store.merge_incoming(foreign), MergeOutcome::Rejected);
        assert!(store.is_empty());
    }

    #[test]
    fn test_optimistic_rollback_removes_only_placeholder() {
        let mut store = MessageStore::new(ROOM);
        store.seed(vec![msg(1, 3, "hello"), msg(2, 7, "hello")]);

        let placeholder = store.insert_optimistic("hello", 7);
        assert!(placeholder < 0);
        assert_eq!(store.len(), 3);

        assert!(store.reconcile_or_rollback(placeholder, SendOutcome::Failed));
        assert_eq!(ids(&store), vec![1, 2]);

        // Unknown and server ids are never removed.
        assert!(!store.reconcile_or_rollback(placeholder, SendOutcome::Failed));
        assert!(!store.reconcile_or_rollback(2, SendOutcome::Failed));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_sent_keeps_placeholder() {
        let mut store = MessageStore::new(ROOM);
        store.seed(Vec::new());

        let placeholder = store.insert_optimistic("question", 7);
        assert!(!store.reconcile_or_rollback(placeholder, SendOutcome::Sent));
        assert_eq!(ids(&store), vec![placeholder]);
        assert!(store.messages()[0].is_pending());
    }

    #[test]
    fn test_placeholders_are_distinct() {
        let mut store = MessageStore::new(ROOM);
        let a = store.insert_optimistic("one", 7);
        let b = store.insert_optimistic("two", 7);
        assert_ne!(a, b);
        assert!(a < 0 && b < 0);
    }

    #[test]
    fn test_echo_replaces_placeholder_in_place() {
        let mut store = MessageStore::new(ROOM);
        store.seed(vec![msg(1, 3, "earlier")]);

        let placeholder = store.insert_optimistic("my answer", 7);
        store.merge_incoming(msg(2, 3, "someone else"));

        let outcome = store.merge_incoming(msg(40, 7, "my answer"));
        assert_eq!(outcome, MergeOutcome::Reconciled { placeholder_id: placeholder });
        assert_eq!(ids(&store), vec![1, 40, 2]);
        assert!(store.messages().iter().all(|m| !m.is_pending()));

        // A second identical message from the same author is a new message.
        assert_eq!(store.merge_incoming(msg(41, 7, "my answer")), MergeOutcome::Appended);
    }

    #[test]
    fn test_echo_outside_window_is_appended() {
        let mut store = MessageStore::with_echo_window(ROOM, Duration::ZERO);
        store.seed(Vec::new());

        let placeholder = store.insert_optimistic("late", 7);
        assert_eq!(store.merge_incoming(msg(9, 7, "late")), MergeOutcome::Appended);
        assert_eq!(ids(&store), vec![placeholder, 9]);
    }

    #[test]
    fn test_placeholder_survives_seed() {
        let mut store = MessageStore::new(ROOM);
        let placeholder = store.insert_optimistic("early bird", 7);
        store.merge_incoming(msg(5, 7, "early bird"));

        store.seed(vec![msg(1, 2, "a")]);

        // The buffered echo reconciles the placeholder once history lands.
        assert_eq!(ids(&store), vec![1, 5]);
        assert!(!store.messages().iter().any(|m| m.id == placeholder));
    }

    #[test]
    fn test_participants_ignore_pending() {
        let mut store = MessageStore::new(ROOM);
        store.seed(vec![msg(1, 2, "a"), msg(2, 3, "b"), msg(3, 2, "c")]);
        store.insert_optimistic("pending", 99);

        assert_eq!(store.participants().into_iter().collect::<Vec<_>>(), vec![2, 3]);
    }
}

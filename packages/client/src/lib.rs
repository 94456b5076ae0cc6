//! Live-class chat client
//!
//! Real-time chat for scheduled live classes: a one-shot history fetch over
//! HTTP, a per-room WebSocket for live traffic, and an ordered,
//! de-duplicated message store that merges the two.
//!
//! [`ChatSession`] ties the pieces together for one user. Students
//! ([`Role::Participant`]) see only live rooms and get optimistic echo of
//! their own messages; instructors ([`Role::Broadcaster`]) see every room,
//! wait for the server echo, and can list the room's active participants.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod config;
pub mod credentials;
pub mod error;
pub mod history;
pub mod http_client;
pub mod role;
pub mod session;
pub mod store;
pub mod transport;

pub use config::ClientConfig;
pub use credentials::{CredentialProvider, StaticCredentials};
pub use error::{ChatError, ErrorCondition};
pub use history::HistorySource;
pub use http_client::ChatApi;
pub use role::{RoleExt, RolePolicy, RoomScope, scope_rooms};
pub use session::{AttachmentPhase, ChatSession, SessionUpdate};
pub use store::{MergeOutcome, MessageStore, SendOutcome};
pub use transport::{ChatTransport, CloseReason, TransportState};

// Re-export commonly used types from classchat_entity
pub use classchat_entity::{ChatMessage, LiveClass, Role, RoomStatus, UserIdentity};

pub mod identity;
pub mod live_class;
pub mod message;

pub use identity::{Role, UserIdentity};
pub use live_class::{LiveClass, RoomStatus};
pub use message::{ChatMessage, MessageRecord};

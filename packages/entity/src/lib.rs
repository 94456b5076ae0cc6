//! Entity types shared by the live-class chat client.
//!
//! Everything here is plain data: the wire records the tutoring backend
//! sends, plus the small amount of derived state (room status, roles) that
//! the client needs to decide what to show.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

pub mod types;
pub mod utils;

pub use types::*;
pub use utils::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::lenient_timestamp;

/// A scheduled live class. Each one owns a single chat room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveClass {
    /// Live class ID, also the chat room ID
    pub id: i64,

    /// Display title
    pub title: String,

    /// Course this class belongs to
    pub course_id: i64,

    /// Scheduled start
    #[serde(with = "lenient_timestamp")]
    pub starts_at: DateTime<Utc>,

    /// Scheduled end
    #[serde(with = "lenient_timestamp")]
    pub ends_at: DateTime<Utc>,

    /// Video meeting link
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meeting_url: Option<String>,

    /// Server's view of liveness at response time. Informational only,
    /// status is always derived locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_live: Option<bool>,
}

/// Where a room sits on its schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Upcoming,
    Live,
    Ended,
}

impl LiveClass {
    /// Status of the room at `now`. Both schedule bounds are inclusive.
    pub fn status_at(&self, now: DateTime<Utc>) -> RoomStatus {
        if self.starts_at > now {
            RoomStatus::Upcoming
        } else if now <= self.ends_at {
            RoomStatus::Live
        } else {
            RoomStatus::Ended
        }
    }

    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.status_at(now) == RoomStatus::Live
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomStatus::Upcoming => write!(f, "upcoming"),
            RoomStatus::Live => write!(f, "live"),
            RoomStatus::Ended => write!(f, "ended"),
        }
    }
}

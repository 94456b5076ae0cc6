//! Role-specific behavior of a chat session.
//!
//! Students and instructors share one session implementation; the
//! differences are captured in a [`RolePolicy`].

use chrono::{DateTime, Utc};
use classchat_entity::{LiveClass, Role};

/// Which rooms a role may attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomScope {
    /// Only rooms that are live right now
    LiveOnly,
    /// Every room regardless of schedule
    All,
}

impl RoomScope {
    pub fn admits(&self, room: &LiveClass, now: DateTime<Utc>) -> bool {
        match self {
            RoomScope::LiveOnly => room.is_live_at(now),
            RoomScope::All => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolePolicy {
    pub room_scope: RoomScope,
    /// Show outgoing messages before the server echoes them
    pub optimistic_echo: bool,
    /// Track the distinct authors seen in the room
    pub track_participants: bool,
}

pub trait RoleExt {
    fn policy(&self) -> RolePolicy;

    /// Room listing endpoint for this role.
    fn rooms_path(&self) -> &'static str;
}

impl RoleExt for Role {
    fn policy(&self) -> RolePolicy {
        match self {
            Role::Participant => RolePolicy {
                room_scope: RoomScope::LiveOnly,
                optimistic_echo: true,
                track_participants: false,
            },
            Role::Broadcaster => RolePolicy {
                room_scope: RoomScope::All,
                optimistic_echo: false,
                track_participants: true,
            },
        }
    }

    fn rooms_path(&self) -> &'static str {
        match self {
            Role::Participant => "live-classes/me",
            Role::Broadcaster => "live-classes/",
        }
    }
}

/// Filters `rooms` down to the ones `role` may attach to at `now`,
/// keeping their order.
pub fn scope_rooms(role: Role, rooms: Vec<LiveClass>, now: DateTime<Utc>) -> Vec<LiveClass> {
    let scope = role.policy().room_scope;
    rooms.into_iter().filter(|room| scope.admits(room, now)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn room(id: i64, starts_in: Duration, length: Duration, now: DateTime<Utc>) -> LiveClass {
        LiveClass {
            id,
            title: format!("Class {id}"),
            course_id: 1,
            starts_at: now + starts_in,
            ends_at: now + starts_in + length,
            meeting_url: None,
            is_live: None,
        }
    }

    #[test]
    fn test_role_scoping() {
        let now = Utc::now();
        let rooms = vec![
            room(1, Duration::minutes(-10), Duration::hours(1), now),
            room(2, Duration::hours(2), Duration::hours(1), now),
        ];

        let participant: Vec<i64> =
            scope_rooms(Role::Participant, rooms.clone(), now).iter().map(|r| r.id).collect();
        let broadcaster: Vec<i64> =
            scope_rooms(Role::Broadcaster, rooms, now).iter().map(|r| r.id).collect();

        assert_eq!(participant, vec![1]);
        assert_eq!(broadcaster, vec![1, 2]);
    }

    #[test]
    fn test_ended_rooms_only_for_broadcaster() {
        let now = Utc::now();
        let rooms = vec![room(3, Duration::hours(-3), Duration::hours(1), now)];

        assert!(scope_rooms(Role::Participant, rooms.clone(), now).is_empty());
        assert_eq!(scope_rooms(Role::Broadcaster, rooms, now).len(), 1);
    }

    #[test]
    fn test_policies() {
        let student = Role::Participant.policy();
        assert!(student.optimistic_echo);
        assert!(!student.track_participants);

        let instructor = Role::Broadcaster.policy();
        assert!(!instructor.optimistic_echo);
        assert!(instructor.track_participants);
        assert_eq!(instructor.room_scope, RoomScope::All);
    }
}

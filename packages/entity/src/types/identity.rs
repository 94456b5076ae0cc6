use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Chat role of the current user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Student, limited to live rooms
    #[serde(alias = "student")]
    Participant,
    /// Instructor or admin, sees every room
    #[serde(alias = "instructor", alias = "admin")]
    Broadcaster,
}

/// The signed-in user as reported by the session provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: i64,
    pub role: Role,
}

impl UserIdentity {
    pub fn new(id: i64, role: Role) -> Self {
        Self { id, role }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Participant => write!(f, "participant"),
            Role::Broadcaster => write!(f, "broadcaster"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "participant" | "student" => Ok(Role::Participant),
            "broadcaster" | "instructor" | "admin" => Ok(Role::Broadcaster),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

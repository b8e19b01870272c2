/// Group domain types
use crate::types::{GroupId, JoinCode, SongId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A shared group playlist that members contribute source playlists to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,

    pub name: String,

    /// Creator; the only member allowed to delete the group
    pub owner_id: UserId,

    pub join_code: JoinCode,

    /// Persisted arrangement of song ids. A snapshot, reconciled on every read.
    pub sort_order: Option<Vec<SongId>>,

    /// When `sort_order` was last produced
    pub sorted_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
}

impl Group {
    /// Whether a persisted, non-empty arrangement exists
    pub fn has_sort_order(&self) -> bool {
        self.sort_order.as_ref().is_some_and(|v| !v.is_empty())
    }
}

/// Input for creating a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateGroup {
    pub name: String,
    pub owner_id: UserId,
}

impl CreateGroup {
    pub fn new(name: impl Into<String>, owner_id: UserId) -> Self {
        Self {
            name: name.into(),
            owner_id,
        }
    }
}

/// Group membership
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub group_id: GroupId,
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
}

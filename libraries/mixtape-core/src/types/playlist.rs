/// Playlist domain types
use crate::types::{GroupId, Platform, PlaylistId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A source playlist imported into a group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    pub id: PlaylistId,

    pub group_id: GroupId,

    /// Platform the songs were imported from
    pub platform: Platform,

    pub name: String,

    /// Contributing member
    pub added_by: Option<UserId>,

    /// Rank among the group's playlists (lower first, `None` last)
    pub smart_sorted_order: Option<i64>,

    pub created_at: DateTime<Utc>,
}

/// Input for adding an imported playlist to a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePlaylist {
    pub group_id: GroupId,
    pub platform: Platform,
    pub name: String,
    pub added_by: Option<UserId>,
}

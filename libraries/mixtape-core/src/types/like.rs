/// Likes are set membership facts, not counters
use crate::types::{SongId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Like {
    pub song_id: SongId,
    pub user_id: UserId,
}

/// Like count for one song plus whether the viewing user is among them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LikeSummary {
    pub song_id: SongId,
    pub count: usize,
    pub liked_by_me: bool,
}

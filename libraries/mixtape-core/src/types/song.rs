/// Song domain types
use crate::types::{PlaylistId, SongId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub id: SongId,

    pub playlist_id: PlaylistId,

    pub title: String,

    pub artist: String,

    /// Identifier on the playlist's source platform
    pub external_id: Option<String>,

    /// Position inside the source playlist (0-indexed)
    pub position: i64,

    /// Rank within the playlist (lower first, `None` last)
    pub smart_sorted_order: Option<i64>,
}

/// A song row as produced by the import job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedSong {
    pub title: String,
    pub artist: String,
    pub external_id: Option<String>,
    pub position: i64,
}

impl ImportedSong {
    pub fn new(title: impl Into<String>, artist: impl Into<String>, position: i64) -> Self {
        Self {
            title: title.into(),
            artist: artist.into(),
            external_id: None,
            position,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }
}

//! Storage trait for the persistent store collaborator
//!
//! Row-level access control is enforced by the store itself; the engine only
//! relies on the filter/order guarantees documented on each method.

use crate::error::Result;
use crate::types::{
    CreateGroup, CreatePlaylist, Group, GroupId, ImportedSong, JoinCode, Like, Member, Playlist,
    PlaylistId, Song, SongId, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait GroupStorage: Send + Sync {
    // ========================================================================
    // Groups
    // ========================================================================

    /// Create a group with a fresh join code; the owner becomes a member
    async fn create_group(&self, group: CreateGroup) -> Result<Group>;

    /// Get group by ID
    async fn get_group(&self, id: &GroupId) -> Result<Option<Group>>;

    /// Look a group up by its join code
    async fn find_group_by_code(&self, code: &JoinCode) -> Result<Option<Group>>;

    /// Delete a group and everything in it. Only the owner may do this.
    async fn delete_group(&self, id: &GroupId, requested_by: &UserId) -> Result<()>;

    /// Replace the persisted sort-order vector (`None` clears it)
    async fn set_sort_order(
        &self,
        id: &GroupId,
        order: Option<Vec<SongId>>,
        sorted_at: Option<DateTime<Utc>>,
    ) -> Result<Group>;

    // ========================================================================
    // Members
    // ========================================================================

    /// Add a member; adding an existing member returns the existing row
    async fn add_member(&self, group_id: &GroupId, user_id: &UserId) -> Result<Member>;

    /// Members ordered by join time
    async fn list_members(&self, group_id: &GroupId) -> Result<Vec<Member>>;

    // ========================================================================
    // Playlists and songs
    // ========================================================================

    /// Store an imported playlist together with its song rows
    async fn add_playlist(
        &self,
        playlist: CreatePlaylist,
        songs: Vec<ImportedSong>,
    ) -> Result<(Playlist, Vec<Song>)>;

    /// Get playlist by ID
    async fn get_playlist(&self, id: &PlaylistId) -> Result<Option<Playlist>>;

    /// Playlists of a group ordered by creation time
    async fn list_playlists(&self, group_id: &GroupId) -> Result<Vec<Playlist>>;

    /// Remove a playlist and its songs
    async fn remove_playlist(&self, id: &PlaylistId) -> Result<()>;

    /// Songs of a playlist ordered by `position`
    async fn list_songs(&self, playlist_id: &PlaylistId) -> Result<Vec<Song>>;

    /// Set a playlist's rank among the group's playlists
    async fn set_playlist_rank(&self, id: &PlaylistId, rank: Option<i64>) -> Result<()>;

    /// Set a song's rank within its playlist
    async fn set_song_rank(&self, id: &SongId, rank: Option<i64>) -> Result<()>;

    /// Clear every playlist and song rank in a group
    async fn clear_ranks(&self, group_id: &GroupId) -> Result<()>;

    // ========================================================================
    // Likes
    // ========================================================================

    /// Record a like (idempotent)
    async fn like(&self, song_id: &SongId, user_id: &UserId) -> Result<()>;

    /// Remove a like (idempotent)
    async fn unlike(&self, song_id: &SongId, user_id: &UserId) -> Result<()>;

    /// All likes on songs of a group
    async fn list_likes(&self, group_id: &GroupId) -> Result<Vec<Like>>;
}

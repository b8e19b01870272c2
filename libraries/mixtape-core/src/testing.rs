//! In-memory `GroupStorage` for tests
//!
//! Creation timestamps advance by one millisecond per row so ordering by
//! creation time is deterministic. `fail_writes` makes every mutating call
//! return a storage error, which is how callers exercise rollback paths.

use crate::error::{MixtapeError, Result};
use crate::storage::GroupStorage;
use crate::types::{
    CreateGroup, CreatePlaylist, Group, GroupId, ImportedSong, JoinCode, Like, Member, Playlist,
    PlaylistId, Song, SongId, UserId,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Default)]
struct Inner {
    groups: Vec<Group>,
    members: Vec<Member>,
    playlists: Vec<Playlist>,
    songs: Vec<Song>,
    likes: Vec<Like>,
    ticks: i64,
}

impl Inner {
    fn tick(&mut self, epoch: DateTime<Utc>) -> DateTime<Utc> {
        self.ticks += 1;
        epoch + Duration::milliseconds(self.ticks)
    }

    fn group_song_ids(&self, group_id: &GroupId) -> Vec<SongId> {
        let playlists: Vec<&PlaylistId> = self
            .playlists
            .iter()
            .filter(|p| &p.group_id == group_id)
            .map(|p| &p.id)
            .collect();
        self.songs
            .iter()
            .filter(|s| playlists.contains(&&s.playlist_id))
            .map(|s| s.id.clone())
            .collect()
    }
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    epoch: DateTime<Utc>,
    fail_writes: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            epoch: Utc::now(),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make every mutating call fail until switched off again
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Insert a group with a known id, bypassing join code generation
    pub fn insert_group(&self, id: &str, name: &str, owner: &str) -> Group {
        let mut inner = self.lock();
        let created_at = inner.tick(self.epoch);
        let group = Group {
            id: GroupId::new(id),
            name: name.to_string(),
            owner_id: UserId::new(owner),
            join_code: JoinCode::random(),
            sort_order: None,
            sorted_at: None,
            created_at,
        };
        inner.groups.push(group.clone());
        group
    }

    /// Insert a playlist with a known id and rank
    pub fn insert_playlist(
        &self,
        id: &str,
        group_id: &str,
        platform: crate::types::Platform,
        rank: Option<i64>,
    ) -> Playlist {
        let mut inner = self.lock();
        let created_at = inner.tick(self.epoch);
        let playlist = Playlist {
            id: PlaylistId::new(id),
            group_id: GroupId::new(group_id),
            platform,
            name: id.to_string(),
            added_by: None,
            smart_sorted_order: rank,
            created_at,
        };
        inner.playlists.push(playlist.clone());
        playlist
    }

    /// Insert a song with a known id
    pub fn insert_song(
        &self,
        id: &str,
        playlist_id: &str,
        position: i64,
        external_id: Option<&str>,
    ) -> Song {
        let song = Song {
            id: SongId::new(id),
            playlist_id: PlaylistId::new(playlist_id),
            title: format!("Title {id}"),
            artist: format!("Artist {id}"),
            external_id: external_id.map(str::to_string),
            position,
            smart_sorted_order: None,
        };
        self.lock().songs.push(song.clone());
        song
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(MixtapeError::storage("write rejected by test store"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl GroupStorage for MemoryStore {
    async fn create_group(&self, group: CreateGroup) -> Result<Group> {
        self.check_writable()?;
        let mut inner = self.lock();
        let created_at = inner.tick(self.epoch);
        let mut code = JoinCode::random();
        while inner.groups.iter().any(|g| g.join_code == code) {
            code = JoinCode::random();
        }
        let created = Group {
            id: GroupId::generate(),
            name: group.name,
            owner_id: group.owner_id.clone(),
            join_code: code,
            sort_order: None,
            sorted_at: None,
            created_at,
        };
        inner.members.push(Member {
            group_id: created.id.clone(),
            user_id: group.owner_id,
            joined_at: created_at,
        });
        inner.groups.push(created.clone());
        Ok(created)
    }

    async fn get_group(&self, id: &GroupId) -> Result<Option<Group>> {
        Ok(self.lock().groups.iter().find(|g| &g.id == id).cloned())
    }

    async fn find_group_by_code(&self, code: &JoinCode) -> Result<Option<Group>> {
        Ok(self
            .lock()
            .groups
            .iter()
            .find(|g| &g.join_code == code)
            .cloned())
    }

    async fn delete_group(&self, id: &GroupId, requested_by: &UserId) -> Result<()> {
        self.check_writable()?;
        let mut inner = self.lock();
        let group = inner
            .groups
            .iter()
            .find(|g| &g.id == id)
            .ok_or_else(|| MixtapeError::not_found("group", id.as_str()))?;
        if &group.owner_id != requested_by {
            return Err(MixtapeError::validation("Only the owner can delete a group"));
        }
        let song_ids = inner.group_song_ids(id);
        inner.groups.retain(|g| &g.id != id);
        inner.members.retain(|m| &m.group_id != id);
        inner.playlists.retain(|p| &p.group_id != id);
        inner.songs.retain(|s| !song_ids.contains(&s.id));
        inner.likes.retain(|l| !song_ids.contains(&l.song_id));
        Ok(())
    }

    async fn set_sort_order(
        &self,
        id: &GroupId,
        order: Option<Vec<SongId>>,
        sorted_at: Option<DateTime<Utc>>,
    ) -> Result<Group> {
        self.check_writable()?;
        let mut inner = self.lock();
        let group = inner
            .groups
            .iter_mut()
            .find(|g| &g.id == id)
            .ok_or_else(|| MixtapeError::not_found("group", id.as_str()))?;
        group.sort_order = order;
        group.sorted_at = sorted_at;
        Ok(group.clone())
    }

    async fn add_member(&self, group_id: &GroupId, user_id: &UserId) -> Result<Member> {
        self.check_writable()?;
        let mut inner = self.lock();
        if !inner.groups.iter().any(|g| &g.id == group_id) {
            return Err(MixtapeError::not_found("group", group_id.as_str()));
        }
        if let Some(existing) = inner
            .members
            .iter()
            .find(|m| &m.group_id == group_id && &m.user_id == user_id)
        {
            return Ok(existing.clone());
        }
        let joined_at = inner.tick(self.epoch);
        let member = Member {
            group_id: group_id.clone(),
            user_id: user_id.clone(),
            joined_at,
        };
        inner.members.push(member.clone());
        Ok(member)
    }

    async fn list_members(&self, group_id: &GroupId) -> Result<Vec<Member>> {
        Ok(self
            .lock()
            .members
            .iter()
            .filter(|m| &m.group_id == group_id)
            .cloned()
            .collect())
    }

    async fn add_playlist(
        &self,
        playlist: CreatePlaylist,
        songs: Vec<ImportedSong>,
    ) -> Result<(Playlist, Vec<Song>)> {
        self.check_writable()?;
        let mut inner = self.lock();
        let created_at = inner.tick(self.epoch);
        let created = Playlist {
            id: PlaylistId::generate(),
            group_id: playlist.group_id,
            platform: playlist.platform,
            name: playlist.name,
            added_by: playlist.added_by,
            smart_sorted_order: None,
            created_at,
        };
        let mut rows: Vec<Song> = songs
            .into_iter()
            .map(|s| Song {
                id: SongId::generate(),
                playlist_id: created.id.clone(),
                title: s.title,
                artist: s.artist,
                external_id: s.external_id,
                position: s.position,
                smart_sorted_order: None,
            })
            .collect();
        rows.sort_by_key(|s| s.position);
        inner.playlists.push(created.clone());
        inner.songs.extend(rows.iter().cloned());
        Ok((created, rows))
    }

    async fn get_playlist(&self, id: &PlaylistId) -> Result<Option<Playlist>> {
        Ok(self.lock().playlists.iter().find(|p| &p.id == id).cloned())
    }

    async fn list_playlists(&self, group_id: &GroupId) -> Result<Vec<Playlist>> {
        let mut playlists: Vec<Playlist> = self
            .lock()
            .playlists
            .iter()
            .filter(|p| &p.group_id == group_id)
            .cloned()
            .collect();
        playlists.sort_by_key(|p| p.created_at);
        Ok(playlists)
    }

    async fn remove_playlist(&self, id: &PlaylistId) -> Result<()> {
        self.check_writable()?;
        let mut inner = self.lock();
        let removed: Vec<SongId> = inner
            .songs
            .iter()
            .filter(|s| &s.playlist_id == id)
            .map(|s| s.id.clone())
            .collect();
        inner.playlists.retain(|p| &p.id != id);
        inner.songs.retain(|s| &s.playlist_id != id);
        inner.likes.retain(|l| !removed.contains(&l.song_id));
        Ok(())
    }

    async fn list_songs(&self, playlist_id: &PlaylistId) -> Result<Vec<Song>> {
        let mut songs: Vec<Song> = self
            .lock()
            .songs
            .iter()
            .filter(|s| &s.playlist_id == playlist_id)
            .cloned()
            .collect();
        songs.sort_by_key(|s| s.position);
        Ok(songs)
    }

    async fn set_playlist_rank(&self, id: &PlaylistId, rank: Option<i64>) -> Result<()> {
        self.check_writable()?;
        let mut inner = self.lock();
        let playlist = inner
            .playlists
            .iter_mut()
            .find(|p| &p.id == id)
            .ok_or_else(|| MixtapeError::not_found("playlist", id.as_str()))?;
        playlist.smart_sorted_order = rank;
        Ok(())
    }

    async fn set_song_rank(&self, id: &SongId, rank: Option<i64>) -> Result<()> {
        self.check_writable()?;
        let mut inner = self.lock();
        let song = inner
            .songs
            .iter_mut()
            .find(|s| &s.id == id)
            .ok_or_else(|| MixtapeError::not_found("song", id.as_str()))?;
        song.smart_sorted_order = rank;
        Ok(())
    }

    async fn clear_ranks(&self, group_id: &GroupId) -> Result<()> {
        self.check_writable()?;
        let mut inner = self.lock();
        let song_ids = inner.group_song_ids(group_id);
        for playlist in inner.playlists.iter_mut().filter(|p| &p.group_id == group_id) {
            playlist.smart_sorted_order = None;
        }
        for song in inner.songs.iter_mut().filter(|s| song_ids.contains(&s.id)) {
            song.smart_sorted_order = None;
        }
        Ok(())
    }

    async fn like(&self, song_id: &SongId, user_id: &UserId) -> Result<()> {
        self.check_writable()?;
        let mut inner = self.lock();
        let like = Like {
            song_id: song_id.clone(),
            user_id: user_id.clone(),
        };
        if !inner.likes.contains(&like) {
            inner.likes.push(like);
        }
        Ok(())
    }

    async fn unlike(&self, song_id: &SongId, user_id: &UserId) -> Result<()> {
        self.check_writable()?;
        self.lock()
            .likes
            .retain(|l| !(&l.song_id == song_id && &l.user_id == user_id));
        Ok(())
    }

    async fn list_likes(&self, group_id: &GroupId) -> Result<Vec<Like>> {
        let inner = self.lock();
        let song_ids = inner.group_song_ids(group_id);
        Ok(inner
            .likes
            .iter()
            .filter(|l| song_ids.contains(&l.song_id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Platform;

    #[tokio::test]
    async fn likes_are_idempotent() {
        let store = MemoryStore::new();
        store.insert_group("g", "Group", "owner");
        store.insert_playlist("p", "g", Platform::Spotify, None);
        store.insert_song("s", "p", 0, None);

        let song = SongId::new("s");
        let user = UserId::new("u");
        store.like(&song, &user).await.unwrap();
        store.like(&song, &user).await.unwrap();
        assert_eq!(store.list_likes(&GroupId::new("g")).await.unwrap().len(), 1);

        store.unlike(&song, &user).await.unwrap();
        store.unlike(&song, &user).await.unwrap();
        assert!(store.list_likes(&GroupId::new("g")).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_writes_leave_state_untouched() {
        let store = MemoryStore::new();
        store.insert_group("g", "Group", "owner");
        store.fail_writes(true);

        let result = store
            .set_sort_order(&GroupId::new("g"), Some(vec![SongId::new("x")]), None)
            .await;
        assert!(result.is_err());

        let group = store.get_group(&GroupId::new("g")).await.unwrap().unwrap();
        assert!(group.sort_order.is_none());
    }

    #[tokio::test]
    async fn only_owner_deletes() {
        let store = MemoryStore::new();
        store.insert_group("g", "Group", "owner");

        let err = store
            .delete_group(&GroupId::new("g"), &UserId::new("guest"))
            .await
            .unwrap_err();
        assert!(matches!(err, MixtapeError::ValidationFailed(_)));

        store
            .delete_group(&GroupId::new("g"), &UserId::new("owner"))
            .await
            .unwrap();
        assert!(store.get_group(&GroupId::new("g")).await.unwrap().is_none());
    }
}

use crate::error::StorageError;
use crate::{groups, likes, members, playlists, songs};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use mixtape_core::storage::GroupStorage;
use mixtape_core::types::{
    CreateGroup, CreatePlaylist, Group, GroupId, ImportedSong, JoinCode, Like, Member, Playlist,
    PlaylistId, Song, SongId, UserId,
};
use mixtape_core::{Clock, Result, SystemClock};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{debug, info};

/// Join code generation attempts before giving up
const MAX_CODE_ATTEMPTS: u32 = 8;

type CodeGenerator = Arc<dyn Fn() -> JoinCode + Send + Sync>;

/// `SQLite`-backed group store
pub struct SqliteStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
    codes: CodeGenerator,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
            codes: Arc::new(JoinCode::random),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace join code generation, e.g. to force collisions in tests
    pub fn with_code_generator(
        mut self,
        generate: impl Fn() -> JoinCode + Send + Sync + 'static,
    ) -> Self {
        self.codes = Arc::new(generate);
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Current time at the precision timestamps are stored with
    fn now(&self) -> DateTime<Utc> {
        self.clock.now().trunc_subsecs(6)
    }

    async fn try_create_group(&self, group: &Group) -> crate::Result<()> {
        let mut tx = self.pool.begin().await?;
        groups::insert(&mut tx, group).await?;
        members::add(&mut tx, &group.id, &group.owner_id, &group.created_at).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl GroupStorage for SqliteStore {
    // Groups
    async fn create_group(&self, group: CreateGroup) -> Result<Group> {
        let created_at = self.now();

        for attempt in 1..=MAX_CODE_ATTEMPTS {
            let candidate = Group {
                id: GroupId::generate(),
                name: group.name.clone(),
                owner_id: group.owner_id.clone(),
                join_code: (self.codes)(),
                sort_order: None,
                sorted_at: None,
                created_at,
            };

            match self.try_create_group(&candidate).await {
                Ok(()) => {
                    info!(group_id = %candidate.id, code = %candidate.join_code, "Group created");
                    return Ok(candidate);
                }
                Err(e) if e.is_unique_violation() => {
                    debug!(attempt, code = %candidate.join_code, "Join code taken, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(StorageError::CodeSpaceExhausted(MAX_CODE_ATTEMPTS).into())
    }

    async fn get_group(&self, id: &GroupId) -> Result<Option<Group>> {
        Ok(groups::get_by_id(&self.pool, id).await?)
    }

    async fn find_group_by_code(&self, code: &JoinCode) -> Result<Option<Group>> {
        Ok(groups::get_by_code(&self.pool, code).await?)
    }

    async fn delete_group(&self, id: &GroupId, requested_by: &UserId) -> Result<()> {
        groups::delete(&self.pool, id, requested_by).await?;
        info!(group_id = %id, "Group deleted");
        Ok(())
    }

    async fn set_sort_order(
        &self,
        id: &GroupId,
        order: Option<Vec<SongId>>,
        sorted_at: Option<DateTime<Utc>>,
    ) -> Result<Group> {
        let sorted_at = sorted_at.map(|t| t.trunc_subsecs(6));
        Ok(groups::set_sort_order(&self.pool, id, order.as_deref(), sorted_at.as_ref()).await?)
    }

    // Members
    async fn add_member(&self, group_id: &GroupId, user_id: &UserId) -> Result<Member> {
        if !groups::exists(&self.pool, group_id).await? {
            return Err(StorageError::not_found("group", group_id.as_str()).into());
        }
        let mut conn = self.pool.acquire().await.map_err(StorageError::from)?;
        Ok(members::add(&mut conn, group_id, user_id, &self.now()).await?)
    }

    async fn list_members(&self, group_id: &GroupId) -> Result<Vec<Member>> {
        Ok(members::list(&self.pool, group_id).await?)
    }

    // Playlists and songs
    async fn add_playlist(
        &self,
        playlist: CreatePlaylist,
        imported: Vec<ImportedSong>,
    ) -> Result<(Playlist, Vec<Song>)> {
        if !groups::exists(&self.pool, &playlist.group_id).await? {
            return Err(StorageError::not_found("group", playlist.group_id.as_str()).into());
        }

        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;
        let created = playlists::insert(&mut tx, playlist, self.now()).await?;
        let rows = songs::insert_many(&mut tx, &created.id, imported).await?;
        tx.commit().await.map_err(StorageError::from)?;

        info!(
            playlist_id = %created.id,
            group_id = %created.group_id,
            songs = rows.len(),
            "Playlist stored"
        );
        Ok((created, rows))
    }

    async fn get_playlist(&self, id: &PlaylistId) -> Result<Option<Playlist>> {
        Ok(playlists::get_by_id(&self.pool, id).await?)
    }

    async fn list_playlists(&self, group_id: &GroupId) -> Result<Vec<Playlist>> {
        Ok(playlists::list_by_group(&self.pool, group_id).await?)
    }

    async fn remove_playlist(&self, id: &PlaylistId) -> Result<()> {
        Ok(playlists::delete(&self.pool, id).await?)
    }

    async fn list_songs(&self, playlist_id: &PlaylistId) -> Result<Vec<Song>> {
        Ok(songs::list_by_playlist(&self.pool, playlist_id).await?)
    }

    async fn set_playlist_rank(&self, id: &PlaylistId, rank: Option<i64>) -> Result<()> {
        Ok(playlists::set_rank(&self.pool, id, rank).await?)
    }

    async fn set_song_rank(&self, id: &SongId, rank: Option<i64>) -> Result<()> {
        Ok(songs::set_rank(&self.pool, id, rank).await?)
    }

    async fn clear_ranks(&self, group_id: &GroupId) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(StorageError::from)?;
        playlists::clear_ranks(&mut tx, group_id).await?;
        songs::clear_ranks(&mut tx, group_id).await?;
        tx.commit().await.map_err(StorageError::from)?;
        Ok(())
    }

    // Likes
    async fn like(&self, song_id: &SongId, user_id: &UserId) -> Result<()> {
        Ok(likes::add(&self.pool, song_id, user_id, &self.now()).await?)
    }

    async fn unlike(&self, song_id: &SongId, user_id: &UserId) -> Result<()> {
        Ok(likes::remove(&self.pool, song_id, user_id).await?)
    }

    async fn list_likes(&self, group_id: &GroupId) -> Result<Vec<Like>> {
        Ok(likes::list_by_group(&self.pool, group_id).await?)
    }
}

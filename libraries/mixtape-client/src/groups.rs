//! Group membership, playlists and sorting

use crate::engine::MixtapeEngine;
use crate::order::{load_annotated, load_group_order, GroupOrder};
use mixtape_core::types::{
    CreateGroup, CreatePlaylist, Group, GroupId, ImportedSong, JoinCode, Member, Playlist,
    PlaylistId, Song, SongId, UserId,
};
use mixtape_core::{MixtapeError, OrderScorer, Result};
use mixtape_ordering::{accept_reordering, interleave_by_playlist, ScoreDecision};
use tracing::{debug, info};

/// What a sort request did to the group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortOutcome {
    /// A new vector was persisted
    Applied(GroupOrder),
    /// The scorer declined or returned an unusable order
    Kept(GroupOrder),
}

impl SortOutcome {
    pub fn order(&self) -> &GroupOrder {
        match self {
            SortOutcome::Applied(order) | SortOutcome::Kept(order) => order,
        }
    }

    pub fn into_order(self) -> GroupOrder {
        match self {
            SortOutcome::Applied(order) | SortOutcome::Kept(order) => order,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, SortOutcome::Applied(_))
    }
}

impl MixtapeEngine {
    pub async fn create_group(&self, name: &str, owner: &UserId) -> Result<Group> {
        let name = name.trim();
        if name.is_empty() {
            return Err(MixtapeError::validation("Group name is required"));
        }
        self.inner
            .store
            .create_group(CreateGroup::new(name, owner.clone()))
            .await
    }

    /// Join the group behind `code`; joining twice is a no-op
    pub async fn join_group(&self, code: &str, user: &UserId) -> Result<(Group, Member)> {
        let code = JoinCode::parse(code)?;
        let group = self
            .inner
            .store
            .find_group_by_code(&code)
            .await?
            .ok_or_else(|| MixtapeError::not_found("group", code.as_str()))?;

        let member = self.inner.store.add_member(&group.id, user).await?;
        info!(group_id = %group.id, user_id = %user, "Joined group");
        Ok((group, member))
    }

    pub async fn members(&self, group_id: &GroupId) -> Result<Vec<Member>> {
        self.inner.store.list_members(group_id).await
    }

    /// Only the owner may delete a group
    pub async fn delete_group(&self, group_id: &GroupId, requested_by: &UserId) -> Result<()> {
        self.inner.store.delete_group(group_id, requested_by).await?;
        let prefix = format!("group:{group_id}:");
        self.inner.cache.invalidate_prefix(&prefix);
        Ok(())
    }

    /// Contribute a source playlist to a group
    pub async fn add_playlist(
        &self,
        playlist: CreatePlaylist,
        songs: Vec<ImportedSong>,
    ) -> Result<(Playlist, Vec<Song>)> {
        let group_id = playlist.group_id.clone();
        let created = self.inner.store.add_playlist(playlist, songs).await?;
        self.invalidate_order(&group_id);
        Ok(created)
    }

    pub async fn remove_playlist(&self, group_id: &GroupId, playlist_id: &PlaylistId) -> Result<()> {
        self.inner.store.remove_playlist(playlist_id).await?;
        self.invalidate_order(group_id);
        Ok(())
    }

    /// Fresh reconciled order, also pushed to the cache
    pub async fn group_order(&self, group_id: &GroupId) -> Result<GroupOrder> {
        let order = load_group_order(self.inner.store.as_ref(), group_id).await?;
        self.publish_order(&order);
        Ok(order)
    }

    /// Ask `scorer` for a new arrangement of the current order
    ///
    /// The result is persisted only if it is a permutation of the live songs.
    pub async fn smart_sort(
        &self,
        group_id: &GroupId,
        scorer: &dyn OrderScorer,
    ) -> Result<SortOutcome> {
        let current = load_group_order(self.inner.store.as_ref(), group_id).await?;
        let songs: Vec<Song> = current.songs.iter().map(|s| s.song.clone()).collect();
        let live = current.song_ids();

        let outcome = scorer.score(&current.group, &songs).await?;
        match accept_reordering(outcome, &live) {
            ScoreDecision::Accept(vector) => {
                let order = self.persist_vector(group_id, vector).await?;
                info!(group_id = %group_id, songs = order.len(), "Smart sort applied");
                Ok(SortOutcome::Applied(order))
            }
            ScoreDecision::Keep => {
                debug!(group_id = %group_id, "Smart sort kept existing order");
                self.publish_order(&current);
                Ok(SortOutcome::Kept(current))
            }
        }
    }

    /// Interleave members' playlists without a scorer
    pub async fn quick_sort(&self, group_id: &GroupId) -> Result<GroupOrder> {
        let (_, songs) = load_annotated(self.inner.store.as_ref(), group_id).await?;
        let vector = interleave_by_playlist(songs);
        let order = self.persist_vector(group_id, vector).await?;
        info!(group_id = %group_id, songs = order.len(), "Quick sort applied");
        Ok(order)
    }

    /// Drop the vector and every rank, back to pure fallback order
    pub async fn reset_sort(&self, group_id: &GroupId) -> Result<GroupOrder> {
        self.inner.store.set_sort_order(group_id, None, None).await?;
        self.inner.store.clear_ranks(group_id).await?;
        let order = self.group_order(group_id).await?;
        info!(group_id = %group_id, "Sort reset");
        Ok(order)
    }

    async fn persist_vector(
        &self,
        group_id: &GroupId,
        vector: Vec<SongId>,
    ) -> Result<GroupOrder> {
        let sorted_at = self.inner.clock.now();
        self.inner
            .store
            .set_sort_order(group_id, Some(vector), Some(sorted_at))
            .await?;
        self.group_order(group_id).await
    }
}

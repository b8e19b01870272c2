//! Rendered group order

use mixtape_core::types::{Group, GroupId, Platform, Song, SongId};
use mixtape_core::{GroupStorage, MixtapeError, Result};
use mixtape_ordering::{annotate, reconcile, AnnotatedSong};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderedSong {
    pub song: Song,
    /// Platform of the playlist the song came from
    pub platform: Platform,
}

/// A group's songs in render order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupOrder {
    pub group: Group,
    pub songs: Vec<OrderedSong>,
    /// Leading songs placed by the persisted vector; the rest are the
    /// unsorted tail
    pub sorted_len: usize,
}

impl GroupOrder {
    pub fn song_ids(&self) -> Vec<SongId> {
        self.songs.iter().map(|s| s.song.id.clone()).collect()
    }

    pub fn unsorted_tail(&self) -> &[OrderedSong] {
        &self.songs[self.sorted_len.min(self.songs.len())..]
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.songs.is_empty()
    }
}

/// The group and every song of its playlists, each tagged with its playlist
pub(crate) async fn load_annotated(
    store: &dyn GroupStorage,
    group_id: &GroupId,
) -> Result<(Group, Vec<AnnotatedSong>)> {
    let group = store
        .get_group(group_id)
        .await?
        .ok_or_else(|| MixtapeError::not_found("group", group_id.as_str()))?;

    let mut songs = Vec::new();
    for playlist in store.list_playlists(group_id).await? {
        let rows = store.list_songs(&playlist.id).await?;
        songs.extend(annotate(&playlist, rows));
    }
    Ok((group, songs))
}

pub(crate) async fn load_group_order(
    store: &dyn GroupStorage,
    group_id: &GroupId,
) -> Result<GroupOrder> {
    let (group, songs) = load_annotated(store, group_id).await?;
    let reconciled = reconcile(group.sort_order.as_deref(), songs);

    Ok(GroupOrder {
        group,
        sorted_len: reconciled.sorted_len,
        songs: reconciled
            .songs
            .into_iter()
            .map(|s| OrderedSong {
                song: s.song,
                platform: s.platform,
            })
            .collect(),
    })
}

//! Likes

use crate::engine::MixtapeEngine;
use crate::query::{Query, Updater};
use mixtape_core::types::{GroupId, Like, LikeSummary, SongId, UserId};
use mixtape_core::{GroupStorage, Result};
use mixtape_sync::apply_with_snapshot;
use tracing::debug;

/// Per-song counts in order of each song's first like; unliked songs are
/// absent
pub fn summarize(likes: &[Like], viewer: &UserId) -> Vec<LikeSummary> {
    let mut summaries: Vec<LikeSummary> = Vec::new();
    for like in likes {
        let mine = &like.user_id == viewer;
        match summaries.iter_mut().find(|s| s.song_id == like.song_id) {
            Some(summary) => {
                summary.count += 1;
                summary.liked_by_me |= mine;
            }
            None => summaries.push(LikeSummary {
                song_id: like.song_id.clone(),
                count: 1,
                liked_by_me: mine,
            }),
        }
    }
    summaries
}

pub(crate) async fn load_like_counts(
    store: &dyn GroupStorage,
    group_id: &GroupId,
    viewer: &UserId,
) -> Result<Vec<LikeSummary>> {
    let likes = store.list_likes(group_id).await?;
    Ok(summarize(&likes, viewer))
}

/// Apply the viewer's like or unlike of one song to a summary list
fn apply_toggle(current: Option<&Vec<LikeSummary>>, song_id: &SongId, liked: bool) -> Vec<LikeSummary> {
    let mut next = current.cloned().unwrap_or_default();
    match next.iter_mut().find(|s| &s.song_id == song_id) {
        Some(summary) if summary.liked_by_me != liked => {
            summary.liked_by_me = liked;
            if liked {
                summary.count += 1;
            } else {
                summary.count = summary.count.saturating_sub(1);
            }
        }
        Some(_) => {}
        None if liked => next.push(LikeSummary {
            song_id: song_id.clone(),
            count: 1,
            liked_by_me: true,
        }),
        None => {}
    }
    next.retain(|s| s.count > 0);
    next
}

impl MixtapeEngine {
    pub async fn like_counts(&self, group_id: &GroupId, viewer: &UserId) -> Result<Vec<LikeSummary>> {
        load_like_counts(self.inner.store.as_ref(), group_id, viewer).await
    }

    pub async fn like(&self, song_id: &SongId, user: &UserId) -> Result<()> {
        self.inner.store.like(song_id, user).await
    }

    pub async fn unlike(&self, song_id: &SongId, user: &UserId) -> Result<()> {
        self.inner.store.unlike(song_id, user).await
    }

    /// Flip `user`'s like on `song_id`, showing the result in `likes` before
    /// the store confirms it
    ///
    /// A failed write restores the previous counts. Returns whether the song
    /// is now liked.
    pub async fn toggle_like(
        &self,
        likes: &Query<Vec<LikeSummary>>,
        song_id: &SongId,
        user: &UserId,
    ) -> Result<bool> {
        let liked = !likes
            .data()
            .and_then(|all| all.into_iter().find(|s| &s.song_id == song_id))
            .is_some_and(|s| s.liked_by_me);

        let song = song_id.clone();
        let store = &self.inner.store;
        apply_with_snapshot(
            likes,
            |query| {
                query.mutate(
                    Updater::apply(move |current| apply_toggle(current, &song, liked)),
                    false,
                );
            },
            || async {
                if liked {
                    store.like(song_id, user).await
                } else {
                    store.unlike(song_id, user).await
                }
            },
        )
        .await?;

        debug!(song_id = %song_id, user_id = %user, liked, "Like toggled");
        Ok(liked)
    }
}

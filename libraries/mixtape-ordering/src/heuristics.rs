//! Local "quick sort" heuristic
//!
//! Used when the scorer is skipped. Takes one song from each playlist in
//! turn so every member's contribution is spread across the group order:
//!
//! ```text
//! playlist A: a1 a2 a3
//! playlist B: b1
//! playlist C: c1 c2
//!
//! result:     a1 b1 c1 a2 c2 a3
//! ```

use crate::reconcile::{fallback_order, AnnotatedSong};
use mixtape_core::types::{PlaylistId, SongId};
use std::collections::VecDeque;

/// Round-robin interleave of playlists, each in fallback order
pub fn interleave_by_playlist(songs: Vec<AnnotatedSong>) -> Vec<SongId> {
    let total = songs.len();
    let mut lanes: Vec<(PlaylistId, VecDeque<SongId>)> = Vec::new();

    for s in fallback_order(songs) {
        match lanes.iter_mut().find(|(id, _)| *id == s.song.playlist_id) {
            Some((_, lane)) => lane.push_back(s.song.id),
            None => lanes.push((s.song.playlist_id, VecDeque::from([s.song.id]))),
        }
    }

    let mut order = Vec::with_capacity(total);
    while order.len() < total {
        for (_, lane) in &mut lanes {
            if let Some(id) = lane.pop_front() {
                order.push(id);
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mixtape_core::types::{Platform, Song};

    fn song(id: &str, playlist: &str, position: i64, rank: Option<i64>) -> AnnotatedSong {
        AnnotatedSong {
            song: Song {
                id: SongId::new(id),
                playlist_id: PlaylistId::new(playlist),
                title: id.to_string(),
                artist: "artist".to_string(),
                external_id: None,
                position,
                smart_sorted_order: None,
            },
            platform: Platform::Spotify,
            playlist_rank: rank,
            playlist_created_at: Utc::now(),
        }
    }

    #[test]
    fn uneven_playlists_interleave() {
        let songs = vec![
            song("a1", "a", 0, Some(1)),
            song("a2", "a", 1, Some(1)),
            song("a3", "a", 2, Some(1)),
            song("b1", "b", 0, Some(2)),
            song("c2", "c", 1, Some(3)),
            song("c1", "c", 0, Some(3)),
        ];

        let order: Vec<String> = interleave_by_playlist(songs)
            .into_iter()
            .map(|id| id.as_str().to_string())
            .collect();
        assert_eq!(order, ["a1", "b1", "c1", "a2", "c2", "a3"]);
    }

    #[test]
    fn empty_input() {
        assert!(interleave_by_playlist(Vec::new()).is_empty());
    }
}

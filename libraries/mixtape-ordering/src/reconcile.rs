//! Sort-order reconciliation
//!
//! A group's sort-order vector is a snapshot. Songs are imported and removed
//! after it was produced, so every read merges it with the live song set:
//!
//! ```text
//! vector:  [c, x, a]          live: {a, b, c, d}
//!           │     │
//!           ▼     ▼
//! known:   [c, a]             (x is gone, ignored)
//! unknown: [b, d]             (fallback order)
//! result:  [c, a, b, d]       sorted_len = 2
//! ```

use chrono::{DateTime, Utc};
use mixtape_core::types::{Platform, Playlist, PlaylistId, Song, SongId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A song with the playlist fields the fallback order needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotatedSong {
    pub song: Song,
    /// Platform of the playlist the song was imported from
    pub platform: Platform,
    pub playlist_rank: Option<i64>,
    pub playlist_created_at: DateTime<Utc>,
}

/// Output of [`reconcile`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Reconciled {
    /// Render order: vector-ordered songs followed by the unsorted tail
    pub songs: Vec<AnnotatedSong>,
    /// Number of leading songs placed by the vector
    pub sorted_len: usize,
}

impl Reconciled {
    /// Songs appended after the vector was produced
    pub fn unsorted_tail(&self) -> &[AnnotatedSong] {
        &self.songs[self.sorted_len..]
    }

    pub fn song_ids(&self) -> Vec<SongId> {
        self.songs.iter().map(|s| s.song.id.clone()).collect()
    }
}

/// Attach a playlist's ordering fields to each of its songs
pub fn annotate(playlist: &Playlist, songs: Vec<Song>) -> Vec<AnnotatedSong> {
    songs
        .into_iter()
        .map(|song| AnnotatedSong {
            song,
            platform: playlist.platform,
            playlist_rank: playlist.smart_sorted_order,
            playlist_created_at: playlist.created_at,
        })
        .collect()
}

/// Remove duplicate ids, keeping the first occurrence
pub fn normalize_vector(vector: &[SongId]) -> Vec<SongId> {
    let mut seen = HashSet::with_capacity(vector.len());
    vector
        .iter()
        .filter(|id| seen.insert(*id))
        .cloned()
        .collect()
}

/// Merge a persisted vector with the live song set
///
/// Songs whose id appears in the vector come first, in vector order. The rest
/// follow in fallback order. Ids in the vector with no live song are ignored.
pub fn reconcile(vector: Option<&[SongId]>, songs: Vec<AnnotatedSong>) -> Reconciled {
    let vector = match vector {
        Some(v) if !v.is_empty() => v,
        _ => {
            return Reconciled {
                songs: fallback_order(songs),
                sorted_len: 0,
            }
        }
    };

    let mut index: HashMap<&SongId, usize> = HashMap::with_capacity(vector.len());
    for (i, id) in vector.iter().enumerate() {
        index.entry(id).or_insert(i);
    }

    let mut known = Vec::new();
    let mut unknown = Vec::new();
    for song in songs {
        match index.get(&song.song.id) {
            Some(&i) => known.push((i, song)),
            None => unknown.push(song),
        }
    }

    known.sort_by_key(|(i, _)| *i);
    let sorted_len = known.len();

    let mut ordered: Vec<AnnotatedSong> = known.into_iter().map(|(_, song)| song).collect();
    ordered.extend(fallback_order(unknown));

    Reconciled {
        songs: ordered,
        sorted_len,
    }
}

/// Two-level fallback order
///
/// Playlists by rank (nulls last) then creation time; songs within a playlist
/// by rank (nulls last) then position. Both sorts are stable, so equal keys
/// keep their input order.
pub fn fallback_order(songs: Vec<AnnotatedSong>) -> Vec<AnnotatedSong> {
    // Distinct playlists in first-appearance order
    let mut playlists: Vec<(&PlaylistId, Option<i64>, DateTime<Utc>)> = Vec::new();
    for s in &songs {
        if !playlists.iter().any(|(id, _, _)| *id == &s.song.playlist_id) {
            playlists.push((&s.song.playlist_id, s.playlist_rank, s.playlist_created_at));
        }
    }
    playlists.sort_by_key(|(_, rank, created_at)| (nulls_last(*rank), *created_at));

    let ordinal: HashMap<PlaylistId, usize> = playlists
        .iter()
        .enumerate()
        .map(|(i, (id, _, _))| ((*id).clone(), i))
        .collect();

    let mut keyed: Vec<(usize, AnnotatedSong)> = songs
        .into_iter()
        .map(|s| (ordinal.get(&s.song.playlist_id).copied().unwrap_or(usize::MAX), s))
        .collect();

    keyed.sort_by_key(|(playlist, s)| {
        (
            *playlist,
            nulls_last(s.song.smart_sorted_order),
            s.song.position,
        )
    });

    keyed.into_iter().map(|(_, s)| s).collect()
}

fn nulls_last(rank: Option<i64>) -> (bool, i64) {
    (rank.is_none(), rank.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn song(id: &str, playlist: &str, position: i64, rank: Option<i64>, created: i64) -> AnnotatedSong {
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
            playlist_created_at: at(created),
        }
    }

    fn ids(songs: &[AnnotatedSong]) -> Vec<&str> {
        songs.iter().map(|s| s.song.id.as_str()).collect()
    }

    fn vector(ids: &[&str]) -> Vec<SongId> {
        ids.iter().map(|id| SongId::new(*id)).collect()
    }

    #[test]
    fn ranked_playlists_without_vector() {
        // Five songs, two playlists ranked 1 and 2, input deliberately shuffled
        let songs = vec![
            song("q2", "q", 1, Some(2), 0),
            song("p1", "p", 1, Some(1), 5),
            song("q1", "q", 0, Some(2), 0),
            song("p3", "p", 2, Some(1), 5),
            song("p0", "p", 0, Some(1), 5),
        ];

        let result = reconcile(None, songs);
        assert_eq!(ids(&result.songs), ["p0", "p1", "p3", "q1", "q2"]);
        assert_eq!(result.sorted_len, 0);
    }

    #[test]
    fn new_songs_appended_after_vector() {
        let songs = vec![
            song("a", "p", 0, None, 0),
            song("b", "p", 1, None, 0),
            song("c", "p", 2, None, 0),
        ];

        let result = reconcile(Some(&vector(&["c", "a"])), songs);
        assert_eq!(ids(&result.songs), ["c", "a", "b"]);
        assert_eq!(ids(result.unsorted_tail()), ["b"]);
    }

    #[test]
    fn vanished_ids_are_ignored() {
        let songs = vec![song("a", "p", 0, None, 0), song("b", "p", 1, None, 0)];

        let result = reconcile(Some(&vector(&["gone", "b", "also-gone"])), songs);
        assert_eq!(ids(&result.songs), ["b", "a"]);
        assert_eq!(result.sorted_len, 1);
    }

    #[test]
    fn disjoint_vector_falls_back_entirely() {
        let songs = vec![song("b", "p", 1, None, 0), song("a", "p", 0, None, 0)];

        let result = reconcile(Some(&vector(&["x", "y"])), songs);
        assert_eq!(ids(&result.songs), ["a", "b"]);
        assert_eq!(result.sorted_len, 0);
    }

    #[test]
    fn empty_vector_is_pure_fallback() {
        let songs = vec![song("b", "p", 1, None, 0), song("a", "p", 0, None, 0)];
        let result = reconcile(Some(&[]), songs);
        assert_eq!(ids(&result.songs), ["a", "b"]);
    }

    #[test]
    fn duplicate_ids_first_occurrence_wins() {
        let songs = vec![
            song("a", "p", 0, None, 0),
            song("b", "p", 1, None, 0),
            song("c", "p", 2, None, 0),
        ];

        // "a" appears at index 0 and 3; index 0 must win, putting it first
        let result = reconcile(Some(&vector(&["a", "c", "b", "a"])), songs);
        assert_eq!(ids(&result.songs), ["a", "c", "b"]);
        assert_eq!(result.sorted_len, 3);
    }

    #[test]
    fn unranked_playlists_sort_last_then_by_creation() {
        let songs = vec![
            song("late", "late", 0, None, 20),
            song("early", "early", 0, None, 10),
            song("ranked", "ranked", 0, Some(7), 30),
        ];

        let result = fallback_order(songs);
        assert_eq!(ids(&result), ["ranked", "early", "late"]);
    }

    #[test]
    fn song_rank_beats_position_within_playlist() {
        let mut first = song("first", "p", 5, None, 0);
        first.song.smart_sorted_order = Some(0);
        let second = song("second", "p", 0, None, 0);

        let result = fallback_order(vec![second, first]);
        assert_eq!(ids(&result), ["first", "second"]);
    }

    #[test]
    fn equal_keys_keep_input_order() {
        let songs = vec![
            song("x", "p", 0, None, 0),
            song("y", "p", 0, None, 0),
            song("z", "p", 0, None, 0),
        ];
        assert_eq!(ids(&fallback_order(songs)), ["x", "y", "z"]);
    }

    #[test]
    fn tied_playlists_are_not_interleaved() {
        // Same rank and creation time: playlists stay contiguous in
        // first-appearance order
        let songs = vec![
            song("q0", "q", 0, Some(1), 0),
            song("p0", "p", 0, Some(1), 0),
            song("q1", "q", 1, Some(1), 0),
            song("p1", "p", 1, Some(1), 0),
        ];
        assert_eq!(ids(&fallback_order(songs)), ["q0", "q1", "p0", "p1"]);
    }

    #[test]
    fn normalize_keeps_first_occurrence() {
        let normalized = normalize_vector(&vector(&["b", "a", "b", "c", "a"]));
        assert_eq!(normalized, vector(&["b", "a", "c"]));
    }
}

//! Mixtape - Song Ordering
//!
//! Produces the render order of a group's aggregated songs.
//!
//! This crate provides:
//! - Sort-order reconciliation: a persisted vector of song ids merged with
//!   the live song set, new songs appended as an unsorted tail
//! - The two-level fallback order (playlist rank, then song rank) used when
//!   no vector exists
//! - The "quick sort" interleave heuristic
//! - Validation of scorer output before it is persisted
//!
//! Everything here is synchronous and pure; callers fetch rows and persist
//! results.
//!
//! # Example
//!
//! ```rust
//! use mixtape_ordering::{reconcile, AnnotatedSong};
//! # use mixtape_core::types::*;
//! # use chrono::Utc;
//! # fn song(id: &str, position: i64) -> AnnotatedSong {
//! #     AnnotatedSong {
//! #         song: Song {
//! #             id: SongId::new(id),
//! #             playlist_id: PlaylistId::new("p"),
//! #             title: id.into(),
//! #             artist: "a".into(),
//! #             external_id: None,
//! #             position,
//! #             smart_sorted_order: None,
//! #         },
//! #         platform: Platform::Spotify,
//! #         playlist_rank: None,
//! #         playlist_created_at: Utc::now(),
//! #     }
//! # }
//! let songs = vec![song("a", 0), song("b", 1), song("c", 2)];
//! let vector = vec![SongId::new("c"), SongId::new("a")];
//!
//! let result = reconcile(Some(&vector), songs);
//! let ids: Vec<&str> = result.songs.iter().map(|s| s.song.id.as_str()).collect();
//! assert_eq!(ids, ["c", "a", "b"]);
//! assert_eq!(result.sorted_len, 2);
//! ```

mod heuristics;
mod reconcile;
mod scoring;

pub use heuristics::interleave_by_playlist;
pub use reconcile::{
    annotate, fallback_order, normalize_vector, reconcile, AnnotatedSong, Reconciled,
};
pub use scoring::{accept_reordering, ScoreDecision};

/// Collaborator traits the engine calls out to
use crate::error::Result;
use crate::types::{Group, Platform, Song, SongId};
use async_trait::async_trait;

/// Result of asking a scorer to reorder a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoreOutcome {
    /// Full reordering, consumed verbatim as the new sort-order vector
    Reordered(Vec<SongId>),
    /// Scorer declined; the existing order stands
    Declined,
}

/// AI or heuristic ranking of a group's songs
///
/// Scorers are opaque to the engine: they may be slow, may decline, and may
/// be skipped entirely.
#[async_trait]
pub trait OrderScorer: Send + Sync {
    async fn score(&self, group: &Group, songs: &[Song]) -> Result<ScoreOutcome>;
}

/// Resolves a song to a platform-native identifier on another platform
///
/// Returns `Ok(None)` when the target platform has no match.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve(&self, song: &Song, target: Platform) -> Result<Option<String>>;
}

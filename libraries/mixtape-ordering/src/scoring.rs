//! Scorer output validation
//!
//! A scorer's reordering is persisted verbatim, so it is only accepted when it
//! names every live song exactly once. Anything else counts as a decline.

use mixtape_core::types::SongId;
use mixtape_core::ScoreOutcome;
use std::collections::HashSet;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoreDecision {
    /// Persist this vector
    Accept(Vec<SongId>),
    /// Keep the existing order
    Keep,
}

/// Decide whether a scorer outcome can replace the group's vector
pub fn accept_reordering(outcome: ScoreOutcome, live: &[SongId]) -> ScoreDecision {
    let proposed = match outcome {
        ScoreOutcome::Reordered(ids) => ids,
        ScoreOutcome::Declined => return ScoreDecision::Keep,
    };

    if proposed.len() != live.len() {
        warn!(
            proposed = proposed.len(),
            live = live.len(),
            "Scorer returned a reordering of the wrong length"
        );
        return ScoreDecision::Keep;
    }

    let live_set: HashSet<&SongId> = live.iter().collect();
    let mut seen = HashSet::with_capacity(proposed.len());
    for id in &proposed {
        if !live_set.contains(id) || !seen.insert(id) {
            warn!(song_id = %id, "Scorer reordering is not a permutation of the live songs");
            return ScoreDecision::Keep;
        }
    }

    ScoreDecision::Accept(proposed)
}

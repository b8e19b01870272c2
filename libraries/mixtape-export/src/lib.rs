//! Mixtape - Playlist Export
//!
//! Writes a group's aggregated song list (or one of its playlists) to a
//! target platform as a new playlist.
//!
//! The pipeline fails fast before any remote mutation when the name is
//! blank, the group or playlist is gone, or nothing resolves on the target
//! platform. Once the playlist exists, track batches that fail are logged
//! and reported in the outcome instead of aborting the export.

mod http;
mod pipeline;
mod resolver;
mod target;

pub use http::{ApiClient, HttpExportTarget};
pub use pipeline::{ExportOutcome, ExportPipeline, ExportRequest, ExportSource, ExportStats};
pub use resolver::SearchTrackResolver;
pub use target::{CreatedPlaylist, ExportTarget, PlaylistRequest};

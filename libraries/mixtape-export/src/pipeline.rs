//! Export pipeline
//!
//! Gather, resolve, create, then add in batches. Everything up to the
//! create call can fail the export; after it, only individual batches fail.

use crate::target::{CreatedPlaylist, ExportTarget, PlaylistRequest};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use mixtape_core::config::{ExportSettings, MAX_EXPORT_BATCH};
use mixtape_core::types::{GroupId, Platform, PlaylistId};
use mixtape_core::{GroupStorage, MixtapeError, Result, TrackResolver};
use mixtape_ordering::{annotate, fallback_order, reconcile, AnnotatedSong};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Concurrent searches while resolving cross-platform songs
const RESOLVE_CONCURRENCY: usize = 8;

/// What to export from a group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportSource {
    /// Every playlist, in the group's reconciled order
    Group,
    /// A single playlist, by rank then position
    Playlist(PlaylistId),
}

#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub group_id: GroupId,
    pub source: ExportSource,
    pub name: String,
    pub public: bool,
    pub collaborative: bool,
    pub description: Option<String>,
}

impl ExportRequest {
    /// Export the whole group as a private, non-collaborative playlist
    pub fn group(group_id: GroupId, name: impl Into<String>) -> Self {
        Self {
            group_id,
            source: ExportSource::Group,
            name: name.into(),
            public: false,
            collaborative: false,
            description: None,
        }
    }

    /// Export one playlist of the group
    pub fn playlist(group_id: GroupId, playlist_id: PlaylistId, name: impl Into<String>) -> Self {
        Self {
            source: ExportSource::Playlist(playlist_id),
            ..Self::group(group_id, name)
        }
    }

    pub fn public(mut self, public: bool) -> Self {
        self.public = public;
        self
    }

    pub fn collaborative(mut self, collaborative: bool) -> Self {
        self.collaborative = collaborative;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExportStats {
    /// Songs in the exported selection
    pub total_tracks: usize,
    /// Tracks written by successful batches
    pub exported_tracks: usize,
    /// Songs with no identifier on the target platform
    pub missing_tracks: usize,
}

#[derive(Debug, Clone)]
pub struct ExportOutcome {
    pub playlist: CreatedPlaylist,
    pub stats: ExportStats,
    /// Zero-based indices of add-tracks batches that failed
    pub failed_batches: Vec<usize>,
    /// A batch was refused for missing permissions
    pub reconnect_required: bool,
}

impl ExportOutcome {
    /// Resolved tracks that a failed batch left out
    pub fn failed_tracks(&self) -> usize {
        self.stats.total_tracks - self.stats.missing_tracks - self.stats.exported_tracks
    }

    pub fn is_complete(&self) -> bool {
        self.failed_batches.is_empty() && self.stats.missing_tracks == 0
    }

    /// Failed batches as the non-fatal error kind, if any
    pub fn partial_failure(&self) -> Option<MixtapeError> {
        (!self.failed_batches.is_empty()).then(|| MixtapeError::PartialExportFailure {
            failed_tracks: self.failed_tracks(),
            total_tracks: self.stats.total_tracks,
        })
    }

    /// Qualified success message for the user
    pub fn summary(&self) -> String {
        let mut message = format!(
            "Exported {} of {} tracks to \"{}\".",
            self.stats.exported_tracks, self.stats.total_tracks, self.playlist.name
        );
        if self.stats.missing_tracks > 0 {
            message.push_str(&format!(
                " {} could not be found on the target platform.",
                self.stats.missing_tracks
            ));
        }
        if let Some(partial) = self.partial_failure() {
            message.push(' ');
            message.push_str(&partial.user_message());
        }
        if self.reconnect_required {
            message.push_str(" Reconnect your account to export the rest.");
        }
        message
    }
}

/// Writes group songs to one export target
pub struct ExportPipeline {
    store: Arc<dyn GroupStorage>,
    target: Arc<dyn ExportTarget>,
    resolver: Option<Arc<dyn TrackResolver>>,
    batch_size: usize,
}

impl ExportPipeline {
    pub fn new(
        store: Arc<dyn GroupStorage>,
        target: Arc<dyn ExportTarget>,
        settings: &ExportSettings,
    ) -> Self {
        Self {
            store,
            target,
            resolver: None,
            batch_size: settings.batch_size.clamp(1, MAX_EXPORT_BATCH),
        }
    }

    /// Resolver for songs imported from other platforms
    ///
    /// Without one, those songs count as missing.
    pub fn with_resolver(mut self, resolver: Arc<dyn TrackResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub async fn run(&self, request: ExportRequest) -> Result<ExportOutcome> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(MixtapeError::validation("Playlist name is required"));
        }

        let songs = self.gather(&request).await?;
        let total_tracks = songs.len();
        let target = self.target.platform();

        let uris = self.resolve_all(&songs, target).await?;
        let missing_tracks = total_tracks - uris.len();
        if uris.is_empty() {
            return Err(MixtapeError::validation(format!(
                "None of the {total_tracks} tracks could be found on {}",
                target.display_name()
            )));
        }

        let playlist = self
            .target
            .create_playlist(&PlaylistRequest {
                name: name.to_string(),
                public: request.public,
                collaborative: request.collaborative,
                description: request
                    .description
                    .as_deref()
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_string),
            })
            .await?;

        let mut exported_tracks = 0;
        let mut failed_batches = Vec::new();
        let mut reconnect_required = false;

        for (index, batch) in uris.chunks(self.batch_size).enumerate() {
            match self.target.add_tracks(&playlist.id, batch).await {
                Ok(()) => exported_tracks += batch.len(),
                Err(e) => {
                    warn!(
                        playlist_id = %playlist.id,
                        batch = index,
                        tracks = batch.len(),
                        error = %e,
                        "Export batch failed, continuing"
                    );
                    reconnect_required |= matches!(e, MixtapeError::ReconnectRequired(_));
                    failed_batches.push(index);
                }
            }
        }

        let outcome = ExportOutcome {
            playlist,
            stats: ExportStats {
                total_tracks,
                exported_tracks,
                missing_tracks,
            },
            failed_batches,
            reconnect_required,
        };

        info!(
            group_id = %request.group_id,
            playlist_id = %outcome.playlist.id,
            platform = %target,
            total = total_tracks,
            exported = exported_tracks,
            missing = missing_tracks,
            failed_batches = outcome.failed_batches.len(),
            "Export finished"
        );
        Ok(outcome)
    }

    /// Songs to export, in export order
    async fn gather(&self, request: &ExportRequest) -> Result<Vec<AnnotatedSong>> {
        let group = self
            .store
            .get_group(&request.group_id)
            .await?
            .ok_or_else(|| MixtapeError::not_found("group", request.group_id.as_str()))?;

        match &request.source {
            ExportSource::Group => {
                let playlists = self.store.list_playlists(&group.id).await?;
                if playlists.is_empty() {
                    return Err(MixtapeError::not_found("playlists", group.id.as_str()));
                }

                let mut songs = Vec::new();
                for playlist in &playlists {
                    let rows = self.store.list_songs(&playlist.id).await?;
                    songs.extend(annotate(playlist, rows));
                }
                Ok(reconcile(group.sort_order.as_deref(), songs).songs)
            }
            ExportSource::Playlist(playlist_id) => {
                let playlist = self
                    .store
                    .get_playlist(playlist_id)
                    .await?
                    .filter(|p| p.group_id == group.id)
                    .ok_or_else(|| MixtapeError::not_found("playlist", playlist_id.as_str()))?;

                let rows = self.store.list_songs(&playlist.id).await?;
                Ok(fallback_order(annotate(&playlist, rows)))
            }
        }
    }

    /// Target identifiers in input order; unresolvable songs are dropped
    ///
    /// A search refused for the account's credentials stops the export.
    async fn resolve_all(&self, songs: &[AnnotatedSong], target: Platform) -> Result<Vec<String>> {
        stream::iter(songs)
            .map(|song| self.resolve_one(song, target))
            .buffered(RESOLVE_CONCURRENCY)
            .try_filter_map(|uri| async move { Ok(uri) })
            .try_collect()
            .await
    }

    async fn resolve_one(&self, song: &AnnotatedSong, target: Platform) -> Result<Option<String>> {
        if song.platform == target {
            return Ok(song
                .song
                .external_id
                .as_deref()
                .map(|id| target.native_uri(id)));
        }

        let Some(resolver) = self.resolver.as_ref() else {
            return Ok(None);
        };
        match resolver.resolve(&song.song, target).await {
            Ok(Some(uri)) => Ok(Some(uri)),
            Ok(None) => {
                debug!(song_id = %song.song.id, platform = %target, "No match on target");
                Ok(None)
            }
            Err(e) if e.needs_reconnect() => {
                warn!(song_id = %song.song.id, error = %e, "Track search refused, stopping export");
                Err(e)
            }
            Err(e) => {
                warn!(song_id = %song.song.id, error = %e, "Track resolution failed");
                Ok(None)
            }
        }
    }
}

//! Subcommand implementations
//!
//! A [`Session`] owns one engine over the `SQLite` store for the life of a
//! command. Open it, run one operation, then [`Session::close`] so cache
//! writes reach the database.

use crate::config::CliConfig;
use crate::error::{CliError, Result};
use crate::transport::OfflineTransport;
use mixtape_client::{GroupOrder, LiveGroupOrder, MixtapeEngine};
use mixtape_core::types::{
    CreatePlaylist, Group, GroupId, ImportedSong, LikeSummary, Platform, Playlist, PlaylistId,
    SongId, UserId,
};
use mixtape_export::{
    ApiClient, ExportOutcome, ExportRequest, HttpExportTarget, SearchTrackResolver,
};
use mixtape_storage::{SqliteCacheStore, SqliteStore};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

pub struct Session {
    engine: MixtapeEngine,
    config: CliConfig,
    user: UserId,
}

/// Options for [`Session::export`]
#[derive(Debug, Clone, Default)]
pub struct ExportOptions {
    pub playlist: Option<String>,
    pub public: bool,
    pub collaborative: bool,
    pub description: Option<String>,
}

impl Session {
    /// Connect to the database, run migrations and hydrate the cache
    pub async fn open(config: CliConfig, user: UserId) -> Result<Self> {
        config.validate()?;

        let pool = mixtape_storage::create_pool(&config.database.url).await?;
        mixtape_storage::run_migrations(&pool).await?;
        info!(url = %config.database.url, "Database connected");

        let store = Arc::new(SqliteStore::new(pool.clone()));
        let mut builder = MixtapeEngine::builder(
            config.engine.clone(),
            Arc::new(OfflineTransport::new()),
            store,
        )
        .cache_store(Arc::new(SqliteCacheStore::new(pool)));

        if let Some(api) = export_api(&config)? {
            builder = builder.resolver(Arc::new(SearchTrackResolver::new(api)));
        }

        let engine = builder.build()?;
        engine.hydrate().await?;
        Ok(Self {
            engine,
            config,
            user,
        })
    }

    pub fn engine(&self) -> &MixtapeEngine {
        &self.engine
    }

    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Shut the engine down and flush the cache
    pub async fn close(self) -> Result<()> {
        self.engine.shutdown().await?;
        Ok(())
    }

    pub async fn create_group(&self, name: &str) -> Result<Group> {
        Ok(self.engine.create_group(name, &self.user).await?)
    }

    pub async fn join(&self, code: &str) -> Result<Group> {
        let (group, _) = self.engine.join_group(code, &self.user).await?;
        Ok(group)
    }

    /// Add the songs in `file` to `group` as a new playlist
    pub async fn import(
        &self,
        group: &str,
        file: &Path,
        name: &str,
        platform: Platform,
    ) -> Result<(Playlist, usize)> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CliError::Input("Playlist name is required".to_string()));
        }

        let contents = tokio::fs::read_to_string(file).await?;
        let songs = parse_songs(&contents)?;
        let playlist = CreatePlaylist {
            group_id: GroupId::new(group),
            platform,
            name: name.to_string(),
            added_by: Some(self.user.clone()),
        };

        let (playlist, rows) = self.engine.add_playlist(playlist, songs).await?;
        Ok((playlist, rows.len()))
    }

    /// The group's order with the acting user's view of likes
    pub async fn order(&self, group: &str) -> Result<(GroupOrder, Vec<LikeSummary>)> {
        let group_id = GroupId::new(group);
        let order = self.engine.group_order(&group_id).await?;
        let likes = self.engine.like_counts(&group_id, &self.user).await?;
        Ok((order, likes))
    }

    pub async fn sort(&self, group: &str) -> Result<GroupOrder> {
        Ok(self.engine.quick_sort(&GroupId::new(group)).await?)
    }

    pub async fn reset_sort(&self, group: &str) -> Result<GroupOrder> {
        Ok(self.engine.reset_sort(&GroupId::new(group)).await?)
    }

    /// Returns whether the song is liked afterwards
    pub async fn toggle_like(&self, group: &str, song: &str) -> Result<bool> {
        let likes = self.engine.likes_query(&GroupId::new(group), &self.user);
        likes.refresh().await?;
        let liked = self
            .engine
            .toggle_like(&likes, &SongId::new(song), &self.user)
            .await?;
        likes.dispose();
        Ok(liked)
    }

    pub async fn export(
        &self,
        group: &str,
        name: &str,
        options: ExportOptions,
    ) -> Result<ExportOutcome> {
        let api = export_api(&self.config)?.ok_or_else(|| {
            CliError::Config(
                "Export needs export.base_url and export.access_token \
                 (or MIXTAPE_EXPORT__BASE_URL and MIXTAPE_EXPORT__ACCESS_TOKEN)"
                    .to_string(),
            )
        })?;

        let group_id = GroupId::new(group);
        let mut request = match options.playlist {
            Some(playlist) => ExportRequest::playlist(group_id, PlaylistId::new(playlist), name),
            None => ExportRequest::group(group_id, name),
        }
        .public(options.public)
        .collaborative(options.collaborative);
        if let Some(description) = options.description {
            request = request.description(description);
        }

        let target = Arc::new(HttpExportTarget::new(api));
        Ok(self.engine.export(target, request).await?)
    }

    /// Print the group's order on every change until Ctrl-C
    pub async fn watch(&self, group: &str) -> Result<()> {
        let live = LiveGroupOrder::start(&self.engine, GroupId::new(group)).await?;
        let mut updates = live.subscribe();
        let mut last_printed: Option<Vec<SongId>> = None;

        let interrupted = tokio::signal::ctrl_c();
        tokio::pin!(interrupted);

        loop {
            let state = updates.borrow_and_update().clone();
            if let Some(order) = state.data {
                let ids = order.song_ids();
                if last_printed.as_ref() != Some(&ids) {
                    println!("{}", render_order(&order, &[]));
                    last_printed = Some(ids);
                }
            }
            if let Some(error) = state.error {
                warn!(group_id = group, error = %error, "Refresh failed");
            }

            tokio::select! {
                result = &mut interrupted => {
                    result?;
                    break;
                }
                changed = updates.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        live.dispose();
        Ok(())
    }
}

fn export_api(config: &CliConfig) -> Result<Option<ApiClient>> {
    match config.export.credentials() {
        Some((base_url, token)) => Ok(Some(ApiClient::new(
            config.export.platform,
            base_url,
            token,
        )?)),
        None => Ok(None),
    }
}

/// Songs from an import file: a JSON array of song objects
pub fn parse_songs(json: &str) -> Result<Vec<ImportedSong>> {
    let songs: Vec<ImportedSong> = serde_json::from_str(json)?;
    if let Some(blank) = songs.iter().find(|s| s.title.trim().is_empty()) {
        return Err(CliError::Input(format!(
            "Song at position {} has no title",
            blank.position
        )));
    }
    Ok(songs)
}

/// One line per song, numbered, with like counts where known
pub fn render_order(order: &GroupOrder, likes: &[LikeSummary]) -> String {
    let mut out = format!("{} ({} songs)", order.group.name, order.len());
    for (index, entry) in order.songs.iter().enumerate() {
        let song = &entry.song;
        out.push_str(&format!(
            "\n{:>3}. {} - {} [{}]",
            index + 1,
            song.title,
            song.artist,
            entry.platform.display_name()
        ));
        if let Some(summary) = likes.iter().find(|l| l.song_id == song.id) {
            let marker = if summary.liked_by_me { " (you)" } else { "" };
            out.push_str(&format!(" +{}{marker}", summary.count));
        }
        if index + 1 == order.sorted_len && order.sorted_len < order.len() {
            out.push_str("\n     -- added since last sort --");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_songs_defaults_missing_external_id() {
        let songs = parse_songs(
            r#"[
                {"title": "Heroes", "artist": "David Bowie", "position": 0},
                {"title": "Roads", "artist": "Portishead", "external_id": "4uLU6hMC", "position": 1}
            ]"#,
        )
        .unwrap();

        assert_eq!(songs.len(), 2);
        assert_eq!(songs[0].external_id, None);
        assert_eq!(songs[1].external_id.as_deref(), Some("4uLU6hMC"));
    }

    #[test]
    fn parse_songs_rejects_blank_title() {
        let result = parse_songs(r#"[{"title": " ", "artist": "Nobody", "position": 3}]"#);
        assert!(matches!(result, Err(CliError::Input(msg)) if msg.contains("position 3")));
    }

    #[test]
    fn parse_songs_rejects_non_array() {
        assert!(matches!(parse_songs("{}"), Err(CliError::Json(_))));
    }
}

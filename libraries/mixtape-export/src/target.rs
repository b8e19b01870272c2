use async_trait::async_trait;
use mixtape_core::types::Platform;
use mixtape_core::Result;
use serde::{Deserialize, Serialize};

/// Body of a create-playlist call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistRequest {
    pub name: String,
    pub public: bool,
    pub collaborative: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Playlist descriptor returned by the target platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPlaylist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
}

/// A platform playlists can be written to
#[async_trait]
pub trait ExportTarget: Send + Sync {
    /// Platform whose native identifiers `add_tracks` expects
    fn platform(&self) -> Platform;

    async fn create_playlist(&self, request: &PlaylistRequest) -> Result<CreatedPlaylist>;

    /// Append tracks to a playlist; callers keep each call within
    /// `MAX_EXPORT_BATCH` identifiers
    async fn add_tracks(&self, playlist_id: &str, uris: &[String]) -> Result<()>;
}

use crate::http::ApiClient;
use async_trait::async_trait;
use mixtape_core::types::{Platform, Song};
use mixtape_core::{Result, TrackResolver};
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    tracks: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    id: String,
    #[serde(default)]
    uri: Option<String>,
}

/// Resolves songs by title and artist through the target's search endpoint
pub struct SearchTrackResolver {
    api: ApiClient,
}

impl SearchTrackResolver {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    fn query_for(song: &Song) -> String {
        format!("{} {}", song.title.trim(), song.artist.trim())
            .trim()
            .to_string()
    }
}

#[async_trait]
impl TrackResolver for SearchTrackResolver {
    async fn resolve(&self, song: &Song, target: Platform) -> Result<Option<String>> {
        if target != self.api.platform() {
            warn!(
                song_id = %song.id,
                requested = %target,
                serves = %self.api.platform(),
                "Resolver asked for a platform it does not search"
            );
            return Ok(None);
        }

        let query = Self::query_for(song);
        if query.is_empty() {
            return Ok(None);
        }

        let request = self
            .api
            .get("/search")
            .query(&[("q", query.as_str()), ("type", "track"), ("limit", "1")]);
        let response: SearchResponse = self.api.json(request).await?;

        let resolved = response
            .tracks
            .into_iter()
            .next()
            .map(|hit| hit.uri.unwrap_or_else(|| target.native_uri(&hit.id)));

        debug!(song_id = %song.id, matched = resolved.is_some(), "Search resolved");
        Ok(resolved)
    }
}

//! HTTP plumbing for the export target platform API

use crate::target::{CreatedPlaylist, ExportTarget, PlaylistRequest};
use async_trait::async_trait;
use mixtape_core::types::Platform;
use mixtape_core::{MixtapeError, Result};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Authenticated client for one platform account
///
/// Cheap to clone; clones share the connection pool.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    access_token: String,
    platform: Platform,
}

impl ApiClient {
    pub fn new(
        platform: Platform,
        base_url: impl AsRef<str>,
        access_token: impl Into<String>,
    ) -> Result<Self> {
        let base_url = base_url.as_ref().trim_end_matches('/');
        let parsed = Url::parse(base_url)
            .map_err(|e| MixtapeError::validation(format!("Invalid API URL {base_url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(MixtapeError::validation(
                "API URL must start with http:// or https://",
            ));
        }

        let access_token = access_token.into();
        if access_token.trim().is_empty() {
            return Err(MixtapeError::NotConnected(
                platform.display_name().to_string(),
            ));
        }

        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(format!("Mixtape/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MixtapeError::Other(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.to_string(),
            access_token,
            platform,
        })
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(crate) fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.access_token)
    }

    pub(crate) fn post(&self, path: &str, body: &impl Serialize) -> RequestBuilder {
        self.http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.access_token)
            .json(body)
    }

    /// Send a request, mapping transport failures and non-2xx statuses
    pub(crate) async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                MixtapeError::Other(format!(
                    "{} unreachable: {e}",
                    self.platform.display_name()
                ))
            } else {
                MixtapeError::upstream(e.status().map_or(0, |s| s.as_u16()), e.to_string())
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(self.status_error(status, message))
    }

    pub(crate) async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        response.json().await.map_err(|e| {
            MixtapeError::upstream(0, format!("Failed to parse response: {e}"))
        })
    }

    fn status_error(&self, status: StatusCode, message: String) -> MixtapeError {
        match status {
            StatusCode::UNAUTHORIZED => MixtapeError::AuthRequired,
            StatusCode::FORBIDDEN => MixtapeError::ReconnectRequired(format!(
                "{} refused the request: {}",
                self.platform.display_name(),
                if message.is_empty() { status.to_string() } else { message }
            )),
            _ => MixtapeError::upstream(status.as_u16(), message),
        }
    }
}

/// Export target speaking the platform playlist API over HTTP
#[derive(Clone)]
pub struct HttpExportTarget {
    api: ApiClient,
}

impl HttpExportTarget {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }
}

#[async_trait]
impl ExportTarget for HttpExportTarget {
    fn platform(&self) -> Platform {
        self.api.platform()
    }

    async fn create_playlist(&self, request: &PlaylistRequest) -> Result<CreatedPlaylist> {
        debug!(name = %request.name, public = request.public, "Creating playlist");

        let created: CreatedPlaylist = self.api.json(self.api.post("/playlists", request)).await?;

        info!(
            playlist_id = %created.id,
            platform = %self.api.platform(),
            "Playlist created"
        );
        Ok(created)
    }

    async fn add_tracks(&self, playlist_id: &str, uris: &[String]) -> Result<()> {
        #[derive(Serialize)]
        struct AddTracks<'a> {
            uris: &'a [String],
        }

        let path = format!("/playlists/{playlist_id}/tracks");
        self.api.send(self.api.post(&path, &AddTracks { uris })).await?;

        debug!(playlist_id, count = uris.len(), "Tracks added");
        Ok(())
    }
}

/// Streaming platforms a playlist can be imported from or exported to
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Spotify,
    YoutubeMusic,
    AppleMusic,
}

impl Platform {
    /// Convert platform to string for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Spotify => "spotify",
            Platform::YoutubeMusic => "youtube_music",
            Platform::AppleMusic => "apple_music",
        }
    }

    /// Parse platform from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "spotify" => Some(Platform::Spotify),
            "youtube_music" | "ytm" | "youtube" => Some(Platform::YoutubeMusic),
            "apple_music" | "apple" => Some(Platform::AppleMusic),
            _ => None,
        }
    }

    /// Human-readable name used in user-facing messages
    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::Spotify => "Spotify",
            Platform::YoutubeMusic => "YouTube Music",
            Platform::AppleMusic => "Apple Music",
        }
    }

    /// Platform-native track reference for a stored external id
    ///
    /// Already-qualified Spotify URIs are passed through unchanged.
    pub fn native_uri(&self, external_id: &str) -> String {
        match self {
            Platform::Spotify if external_id.starts_with("spotify:track:") => {
                external_id.to_string()
            }
            Platform::Spotify => format!("spotify:track:{external_id}"),
            Platform::YoutubeMusic | Platform::AppleMusic => external_id.to_string(),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

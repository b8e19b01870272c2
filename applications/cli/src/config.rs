/// CLI configuration
use crate::error::{CliError, Result};
use mixtape_core::{EngineConfig, Platform};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_CONFIG_FILE: &str = "mixtape.toml";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CliConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub export: ExportApiSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseSettings {
    #[serde(default = "default_database_url")]
    pub url: String,
}

/// Where exports go and how to authenticate
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExportApiSettings {
    #[serde(default = "default_platform")]
    pub platform: Platform,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub access_token: Option<String>,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

impl Default for ExportApiSettings {
    fn default() -> Self {
        Self {
            platform: default_platform(),
            base_url: None,
            access_token: None,
        }
    }
}

impl ExportApiSettings {
    /// Base URL and token, when both are set
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let base_url = self.base_url.as_deref().filter(|s| !s.trim().is_empty())?;
        let token = self.access_token.as_deref().filter(|s| !s.trim().is_empty())?;
        Some((base_url, token))
    }
}

impl CliConfig {
    /// Load configuration from file and environment
    ///
    /// An explicit `path` must exist; otherwise `mixtape.toml` in the working
    /// directory is read when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = config::Config::builder();

        match path {
            Some(path) => {
                settings = settings.add_source(config::File::from(path.to_path_buf()).required(true));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    settings = settings.add_source(config::File::from(default_path));
                }
            }
        }

        // Override with environment variables, e.g. MIXTAPE_ENGINE__EXPORT__BATCH_SIZE
        settings = settings.add_source(
            config::Environment::with_prefix("MIXTAPE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = settings
            .build()
            .map_err(|e| CliError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| CliError::Config(e.to_string()))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.database.url.trim().is_empty() {
            return Err(CliError::Config(
                "Database URL is required (set MIXTAPE_DATABASE__URL)".to_string(),
            ));
        }

        self.engine
            .validate()
            .map_err(|e| CliError::Config(e.to_string()))
    }
}

fn default_database_url() -> String {
    "sqlite://./mixtape.db".to_string()
}

fn default_platform() -> Platform {
    Platform::Spotify
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn defaults_validate() {
        let config = CliConfig::default();
        assert_eq!(config.database.url, "sqlite://./mixtape.db");
        assert_eq!(config.export.platform, Platform::Spotify);
        assert!(config.export.credentials().is_none());
        config.validate().unwrap();
    }

    #[test]
    fn file_overrides_nested_engine_settings() {
        let file = write_config(
            r#"
[database]
url = "sqlite://./groups.db"

[engine.ordering]
resort_debounce_ms = 250

[engine.export]
batch_size = 50

[export]
platform = "youtube_music"
base_url = "https://api.example.com/v1"
access_token = "secret"
"#,
        );

        let config = CliConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.database.url, "sqlite://./groups.db");
        assert_eq!(config.engine.ordering.resort_debounce_ms, 250);
        assert_eq!(config.engine.export.batch_size, 50);
        // Untouched sections keep their defaults
        assert_eq!(config.engine.hub.max_reconnect_attempts, 5);
        assert_eq!(config.export.platform, Platform::YoutubeMusic);
        assert_eq!(
            config.export.credentials(),
            Some(("https://api.example.com/v1", "secret"))
        );
    }

    #[test]
    fn oversized_batch_fails_validation() {
        let file = write_config("[engine.export]\nbatch_size = 500\n");
        let config = CliConfig::load(Some(file.path())).unwrap();
        assert!(matches!(config.validate(), Err(CliError::Config(_))));
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = CliConfig::load(Some(Path::new("/nonexistent/mixtape.toml")));
        assert!(matches!(result, Err(CliError::Config(_))));
    }

    #[test]
    fn blank_token_is_not_a_credential() {
        let settings = ExportApiSettings {
            base_url: Some("https://api.example.com".into()),
            access_token: Some("  ".into()),
            ..ExportApiSettings::default()
        };
        assert!(settings.credentials().is_none());
    }
}

/// Core error types for Mixtape
use std::sync::Arc;
use thiserror::Error;

/// Result type alias using `MixtapeError`
pub type Result<T> = std::result::Result<T, MixtapeError>;

/// Error taxonomy shared by every engine entry point
///
/// Cloneable so query state can hold the last failure.
#[derive(Error, Debug, Clone)]
pub enum MixtapeError {
    /// No valid session or token
    #[error("Authentication required")]
    AuthRequired,

    /// Missing third-party account linkage
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Entity not found
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Input rejected before any remote mutation
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Third-party API returned a non-2xx status
    #[error("Upstream failure ({status}): {message}")]
    UpstreamFailure { status: u16, message: String },

    /// Third-party API refused the token's permissions (HTTP 403)
    #[error("Reconnect required: {0}")]
    ReconnectRequired(String),

    /// Some export batches failed; the rest were written
    #[error("Export partially failed: {failed_tracks} of {total_tracks} tracks not added")]
    PartialExportFailure {
        failed_tracks: usize,
        total_tracks: usize,
    },

    /// Live channel unavailable, callers should fall back to polling
    #[error("Live transport degraded: {0}")]
    TransportDegraded(String),

    /// Concurrent edit needs a decision from the user
    #[error("Conflict needs user input on fields: {}", fields.join(", "))]
    ConflictUnresolved { fields: Vec<String> },

    /// Persistent store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization errors
    #[error(transparent)]
    Serialization(Arc<serde_json::Error>),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for MixtapeError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(Arc::new(e))
    }
}

impl MixtapeError {
    /// Create a not found error
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationFailed(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an upstream failure
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::UpstreamFailure {
            status,
            message: message.into(),
        }
    }

    /// Whether the engine handles this locally instead of surfacing it
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::TransportDegraded(_) | Self::PartialExportFailure { .. } => true,
            Self::UpstreamFailure { status, .. } => *status >= 500 || *status == 429,
            Self::Storage(_) | Self::Other(_) => true,
            _ => false,
        }
    }

    /// The account behind a third-party call has to be signed in or
    /// reconnected before any retry can succeed
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            Self::AuthRequired | Self::ReconnectRequired(_) | Self::NotConnected(_)
        )
    }

    /// Message suitable for showing to a user
    pub fn user_message(&self) -> String {
        match self {
            Self::AuthRequired => "Please sign in again to continue.".to_string(),
            Self::NotConnected(platform) => {
                format!("Connect your {platform} account to continue.")
            }
            Self::ReconnectRequired(_) => {
                "Your account connection is missing permissions. Please reconnect it.".to_string()
            }
            Self::NotFound { entity, .. } => format!("That {entity} no longer exists."),
            Self::ValidationFailed(msg) => msg.clone(),
            Self::PartialExportFailure {
                failed_tracks,
                total_tracks,
            } => format!(
                "Playlist created, but {failed_tracks} of {total_tracks} tracks could not be added."
            ),
            Self::ConflictUnresolved { .. } => {
                "This was changed on another device. Choose which version to keep.".to_string()
            }
            Self::TransportDegraded(_) => "Live updates are paused; refreshing periodically.".to_string(),
            Self::UpstreamFailure { .. } | Self::Storage(_) | Self::Serialization(_) | Self::Other(_) => {
                "Something went wrong. Please try again.".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_formats_entity_and_id() {
        let err = MixtapeError::not_found("group", "g-1");
        assert_eq!(err.to_string(), "group not found: g-1");
        assert_eq!(err.user_message(), "That group no longer exists.");
    }

    #[test]
    fn server_errors_are_recoverable_client_errors_are_not() {
        assert!(MixtapeError::upstream(503, "unavailable").is_recoverable());
        assert!(MixtapeError::upstream(429, "slow down").is_recoverable());
        assert!(!MixtapeError::upstream(400, "bad").is_recoverable());
        assert!(!MixtapeError::AuthRequired.is_recoverable());
    }

    #[test]
    fn credential_failures_need_reconnect() {
        assert!(MixtapeError::AuthRequired.needs_reconnect());
        assert!(MixtapeError::ReconnectRequired("scope".into()).needs_reconnect());
        assert!(MixtapeError::NotConnected("Spotify".into()).needs_reconnect());
        assert!(!MixtapeError::upstream(500, "down").needs_reconnect());
    }

    #[test]
    fn conflict_lists_fields() {
        let err = MixtapeError::ConflictUnresolved {
            fields: vec!["theme".into(), "volume".into()],
        };
        assert_eq!(err.to_string(), "Conflict needs user input on fields: theme, volume");
    }
}

/// Storage-specific errors
use thiserror::Error;

/// Result type alias using `StorageError`
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage error types
#[derive(Error, Debug)]
pub enum StorageError {
    /// Entity not found
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The caller may not perform this operation
    #[error("{0}")]
    Forbidden(String),

    /// A stored value could not be decoded
    #[error("Corrupt {column} value: {reason}")]
    Corrupt { column: String, reason: String },

    /// No unused join code found within the retry budget
    #[error("Could not allocate a unique join code after {0} attempts")]
    CodeSpaceExhausted(u32),

    /// Migration error
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Serialization/deserialization error
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// Database error from `SQLx`
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StorageError {
    /// Create a not found error
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn corrupt(column: impl Into<String>, reason: impl ToString) -> Self {
        Self::Corrupt {
            column: column.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn is_unique_violation(&self) -> bool {
        matches!(self, Self::Database(sqlx::Error::Database(db)) if db.is_unique_violation())
    }
}

impl From<StorageError> for mixtape_core::MixtapeError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { entity, id } => Self::NotFound { entity, id },
            StorageError::Forbidden(msg) => Self::ValidationFailed(msg),
            other => Self::storage(other.to_string()),
        }
    }
}

//! Mixtape Storage
//!
//! `SQLite` implementation of the group store and of cache persistence.
//!
//! # Architecture
//!
//! - **Vertical Slicing**: each table owns its own queries (`groups`,
//!   `members`, `playlists`, `songs`, `likes`, `cache`)
//! - **Context**: [`SqliteStore`] implements `GroupStorage` by delegating to
//!   the slices
//! - **Timestamps**: stored as fixed-width RFC 3339 text so they sort
//!   lexically
//!
//! # Example
//!
//! ```rust,no_run
//! use mixtape_storage::{create_pool, run_migrations, SqliteStore};
//! use mixtape_core::{CreateGroup, GroupStorage, UserId};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = create_pool("sqlite://mixtape.db").await?;
//! run_migrations(&pool).await?;
//!
//! let store = SqliteStore::new(pool);
//! let group = store
//!     .create_group(CreateGroup::new("Road trip", UserId::new("user-1")))
//!     .await?;
//! println!("join with {}", group.join_code);
//! # Ok(())
//! # }
//! ```

mod context;
mod error;
mod time;

// Vertical slices
pub mod cache;
pub mod groups;
pub mod likes;
pub mod members;
pub mod playlists;
pub mod songs;

pub use cache::SqliteCacheStore;
pub use context::SqliteStore;
pub use error::{Result, StorageError};

use sqlx::migrate::Migrator;
use sqlx::sqlite::SqlitePool;

// Embed migrations into binary
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Run database migrations
///
/// Call once at startup, before the pool is handed to a store.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    MIGRATOR.run(pool).await?;
    Ok(())
}

/// Create a new `SQLite` pool
///
/// `database_url` is an `SQLite` connection string such as
/// `sqlite://mixtape.db`. The file is created if missing.
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
    use std::str::FromStr;

    tracing::debug!(url = database_url, "Creating SQLite pool");

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(std::time::Duration::from_secs(30));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}
